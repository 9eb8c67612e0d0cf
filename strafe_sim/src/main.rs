// strafe_sim/src/main.rs

use std::process::ExitCode;

use clap::Parser;
use strafe_sim::prelude::*;
use tracing::{error, info};

fn run(cli: &Cli) -> Result<(), SimError> {
    let mut config = RobotConfig::load(&cli.config)?;
    cli.apply(&mut config);

    let summary = Simulation::new(&config)?.run()?;
    let text = summary.to_toml()?;
    match &cli.summary {
        Some(path) => {
            std::fs::write(path, &text)?;
            info!("Run summary written to: {}", path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
