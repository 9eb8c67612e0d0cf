// strafe_core/src/sampling/mod.rs

//! High-rate background sampling of module signals.
//!
//! The sampler polls every registered signal at a fixed frequency on its own
//! thread and queues the results, one entry per tick, next to a shared
//! timestamp queue. The control loop drains everything once per cycle, so a
//! 250 Hz sampler feeding a 100 Hz loop hands over two or three ticks per
//! drain instead of aliasing them away.
//!
//! All queues sit behind a single lock. A tick is appended in one critical
//! section and a drain empties every queue in one critical section, so the
//! consumer never sees half of a tick.

mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

use crate::error::ConfigError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Reads one value of a signal. Receives the capture timestamp of the tick and
/// returns `None` when the read failed, in which case nothing is queued for
/// this signal on this tick.
pub type SignalFn<T> = Box<dyn FnMut(f64) -> Option<T> + Send>;

/// Index of a registered signal, valid for the lifetime of its sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalId(pub usize);

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerConfig {
    /// Polling frequency in Hz.
    pub frequency_hz: f64,
    /// Upper bound on ticks held between drains. When a consumer stalls the
    /// oldest tick is dropped.
    pub max_queued_ticks: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 250.0,
            max_queued_ticks: 1000,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.frequency_hz.is_finite() && self.frequency_hz > 0.0) {
            return Err(ConfigError::NonPositive {
                field: "sampler.frequency_hz",
                value: self.frequency_hz,
            });
        }
        if self.max_queued_ticks == 0 {
            return Err(ConfigError::NonPositive {
                field: "sampler.max_queued_ticks",
                value: 0.0,
            });
        }
        Ok(())
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frequency_hz)
    }
}

/// Everything queued since the previous drain.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleDrain<T> {
    pub timestamps: Vec<f64>,
    /// One queue per registered signal, indexed by [`SignalId`].
    pub signals: Vec<Vec<T>>,
    /// Ticks lost to the queue bound since the previous drain.
    pub overflowed_ticks: u64,
}

impl<T> SampleDrain<T> {
    pub fn signal(&self, id: SignalId) -> &[T] {
        self.signals.get(id.0).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

struct RegisteredSignal<T> {
    name: String,
    read: SignalFn<T>,
    failed_reads: u64,
}

struct SampleQueues<T> {
    timestamps: VecDeque<f64>,
    signals: Vec<VecDeque<T>>,
    overflowed_ticks: u64,
}

impl<T> SampleQueues<T> {
    fn push_tick(&mut self, timestamp: f64, values: Vec<Option<T>>, max_ticks: usize) {
        self.timestamps.push_back(timestamp);
        for (queue, value) in self.signals.iter_mut().zip(values) {
            if let Some(value) = value {
                queue.push_back(value);
            }
        }

        if self.timestamps.len() > max_ticks {
            self.timestamps.pop_front();
            for queue in self.signals.iter_mut() {
                if queue.len() > max_ticks {
                    queue.pop_front();
                }
            }
            self.overflowed_ticks += 1;
        }
    }
}

/// Runs one sampling tick: read every signal, then append all results at once.
fn run_tick<T>(
    signals: &Mutex<Vec<RegisteredSignal<T>>>,
    queues: &Mutex<SampleQueues<T>>,
    clock: &dyn Clock,
    max_ticks: usize,
) {
    // Reads happen outside the queue lock so a slow device never blocks a drain.
    let mut signals = signals.lock();
    let timestamp = clock.now();
    let values: Vec<Option<T>> = signals
        .iter_mut()
        .map(|signal| {
            let value = (signal.read)(timestamp);
            if value.is_none() {
                signal.failed_reads += 1;
                trace!(signal = %signal.name, timestamp, "signal read failed, skipping tick");
            }
            value
        })
        .collect();

    queues.lock().push_tick(timestamp, values, max_ticks);
}

/// The background odometry sampler. One instance per robot, created
/// explicitly and handed to every module at construction time.
pub struct OdometrySampler<T: Send + 'static> {
    config: SamplerConfig,
    clock: Arc<dyn Clock>,
    signals: Arc<Mutex<Vec<RegisteredSignal<T>>>>,
    queues: Arc<Mutex<SampleQueues<T>>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> OdometrySampler<T> {
    pub fn new(config: SamplerConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            signals: Arc::new(Mutex::new(Vec::new())),
            queues: Arc::new(Mutex::new(SampleQueues {
                timestamps: VecDeque::new(),
                signals: Vec::new(),
                overflowed_ticks: 0,
            })),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        })
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Registers a signal to be polled on every tick.
    ///
    /// Register everything before [`OdometrySampler::start`]: a signal added
    /// later starts with an empty queue and will be shorter than the
    /// timestamp queue for the next drain.
    pub fn register_signal(&self, name: impl Into<String>, read: SignalFn<T>) -> SignalId {
        let name = name.into();
        let mut signals = self.signals.lock();
        let mut queues = self.queues.lock();
        signals.push(RegisteredSignal {
            name: name.clone(),
            read,
            failed_reads: 0,
        });
        queues.signals.push(VecDeque::new());
        let id = SignalId(signals.len() - 1);
        debug!(signal = %name, id = id.0, "registered odometry signal");
        id
    }

    pub fn signal_count(&self) -> usize {
        self.signals.lock().len()
    }

    /// Runs one tick on the calling thread.
    pub fn poll_once(&self) {
        run_tick(
            &self.signals,
            &self.queues,
            self.clock.as_ref(),
            self.config.max_queued_ticks,
        );
    }

    /// Takes every queued value, leaving all queues empty.
    pub fn drain(&self) -> SampleDrain<T> {
        let mut queues = self.queues.lock();
        let overflowed_ticks = std::mem::take(&mut queues.overflowed_ticks);
        if overflowed_ticks > 0 {
            warn!(
                overflowed_ticks,
                "odometry queues overflowed since last drain, oldest ticks were dropped"
            );
        }
        SampleDrain {
            timestamps: queues.timestamps.drain(..).collect(),
            signals: queues
                .signals
                .iter_mut()
                .map(|queue| queue.drain(..).collect())
                .collect(),
            overflowed_ticks,
        }
    }

    /// Count of failed reads per signal since construction.
    pub fn failed_reads(&self) -> Vec<(String, u64)> {
        self.signals
            .lock()
            .iter()
            .map(|s| (s.name.clone(), s.failed_reads))
            .collect()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Spawns the background sampling thread. Calling it twice is a no-op.
    pub fn start(&mut self) -> std::io::Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        self.running.store(true, Ordering::SeqCst);
        let signals = Arc::clone(&self.signals);
        let queues = Arc::clone(&self.queues);
        let clock = Arc::clone(&self.clock);
        let running = Arc::clone(&self.running);
        let period = self.config.period();
        let max_ticks = self.config.max_queued_ticks;

        let handle = thread::Builder::new()
            .name("odometry-sampler".into())
            .spawn(move || {
                info!(period_ms = period.as_secs_f64() * 1e3, "odometry sampler started");
                while running.load(Ordering::SeqCst) {
                    let cycle_start = Instant::now();
                    run_tick(&signals, &queues, clock.as_ref(), max_ticks);

                    // Maintain the tick period
                    let elapsed = cycle_start.elapsed();
                    if elapsed < period {
                        thread::sleep(period - elapsed);
                    } else if elapsed > period * 2 {
                        warn!(?elapsed, ?period, "odometry sampler tick overrun");
                    }
                }
                info!("odometry sampler stopped");
            })?;

        self.handle = Some(handle);
        Ok(())
    }

    /// Stops the background thread and waits for it to exit.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("odometry sampler thread panicked");
            }
        }
    }
}

impl<T: Send + 'static> Drop for OdometrySampler<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_signal(counter: Arc<AtomicUsize>) -> SignalFn<f64> {
        Box::new(move |_| Some(counter.fetch_add(1, Ordering::SeqCst) as f64))
    }

    #[test]
    fn test_poll_once_queues_one_value_per_signal() {
        let clock = Arc::new(ManualClock::new(0.0));
        let sampler = OdometrySampler::new(SamplerConfig::default(), clock.clone()).unwrap();
        let a = sampler.register_signal("a", Box::new(|t| Some(t * 10.0)));
        let b = sampler.register_signal("b", Box::new(|t| Some(t * 20.0)));

        for _ in 0..3 {
            clock.advance(0.004);
            sampler.poll_once();
        }

        let drain = sampler.drain();
        assert_eq!(drain.timestamps.len(), 3);
        assert_eq!(drain.signal(a).len(), 3);
        assert_eq!(drain.signal(b).len(), 3);
        assert!((drain.signal(b)[2] - 0.24).abs() < 1e-12);

        // Drain leaves everything empty.
        let second = sampler.drain();
        assert!(second.is_empty());
        assert!(second.signal(a).is_empty());
    }

    #[test]
    fn test_failed_read_skips_only_that_signal() {
        let clock = Arc::new(ManualClock::new(0.0));
        let sampler = OdometrySampler::new(SamplerConfig::default(), clock.clone()).unwrap();
        let good = sampler.register_signal("good", Box::new(|t| Some(t)));
        let mut calls = 0;
        let flaky = sampler.register_signal(
            "flaky",
            Box::new(move |t| {
                calls += 1;
                (calls % 2 == 0).then_some(t)
            }),
        );

        for _ in 0..4 {
            clock.advance(0.004);
            sampler.poll_once();
        }

        let drain = sampler.drain();
        assert_eq!(drain.signal(good).len(), 4);
        assert_eq!(drain.signal(flaky).len(), 2);
        // No stale or zero values were inserted for the failed ticks.
        assert!(drain.signal(flaky).iter().all(|v| *v > 0.0));
        assert_eq!(sampler.failed_reads()[1], ("flaky".to_string(), 2));
    }

    #[test]
    fn test_queue_bound_drops_oldest_tick() {
        let clock = Arc::new(ManualClock::new(0.0));
        let config = SamplerConfig {
            frequency_hz: 250.0,
            max_queued_ticks: 3,
        };
        let sampler = OdometrySampler::new(config, clock.clone()).unwrap();
        let id = sampler.register_signal("a", Box::new(|t| Some(t)));

        for _ in 0..5 {
            clock.advance(1.0);
            sampler.poll_once();
        }

        let drain = sampler.drain();
        assert_eq!(drain.timestamps, vec![3.0, 4.0, 5.0]);
        assert_eq!(drain.signal(id), &[3.0, 4.0, 5.0]);
        assert_eq!(drain.overflowed_ticks, 2);
    }

    #[test]
    fn test_invalid_frequency_is_rejected() {
        let config = SamplerConfig {
            frequency_hz: 0.0,
            max_queued_ticks: 10,
        };
        let result = OdometrySampler::<f64>::new(config, Arc::new(ManualClock::default()));
        assert!(matches!(result, Err(ConfigError::NonPositive { .. })));
    }

    #[test]
    fn test_background_drain_never_sees_partial_tick() {
        let config = SamplerConfig {
            frequency_hz: 2000.0,
            max_queued_ticks: 10_000,
        };
        let mut sampler = OdometrySampler::new(config, Arc::new(MonotonicClock::new())).unwrap();
        let ids: Vec<SignalId> = (0..4)
            .map(|i| {
                sampler.register_signal(
                    format!("signal-{i}"),
                    counter_signal(Arc::new(AtomicUsize::new(0))),
                )
            })
            .collect();

        sampler.start().unwrap();
        let mut total = 0;
        for _ in 0..20 {
            thread::sleep(Duration::from_millis(5));
            let drain = sampler.drain();
            for id in &ids {
                assert_eq!(drain.signal(*id).len(), drain.timestamps.len());
            }
            // Timestamps are strictly increasing within a drain.
            assert!(drain.timestamps.windows(2).all(|w| w[0] < w[1]));
            total += drain.timestamps.len();
        }
        sampler.shutdown();

        assert!(!sampler.is_running());
        assert!(total > 0);
    }
}
