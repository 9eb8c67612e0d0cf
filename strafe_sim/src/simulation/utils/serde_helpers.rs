// strafe_sim/src/simulation/utils/serde_helpers.rs

//! `#[serde(with = ...)]` adapters so config files can stay in degrees and
//! plain arrays while the code works in radians and nalgebra types.

pub mod vec3_from_array {
    use nalgebra::Vector3;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(vec: &Vector3<f64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq([vec.x, vec.y, vec.z].iter())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vector3<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let arr: [f64; 3] = Deserialize::deserialize(deserializer)?;
        Ok(Vector3::from(arr))
    }
}

pub mod quat_from_euler_deg {
    use nalgebra::UnitQuaternion;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(quat: &UnitQuaternion<f64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let (roll, pitch, yaw) = quat.euler_angles();
        serializer.collect_seq([roll.to_degrees(), pitch.to_degrees(), yaw.to_degrees()].iter())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<UnitQuaternion<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let [roll, pitch, yaw]: [f64; 3] = Deserialize::deserialize(deserializer)?;
        Ok(UnitQuaternion::from_euler_angles(
            roll.to_radians(),
            pitch.to_radians(),
            yaw.to_radians(),
        ))
    }
}

/// A scalar written in degrees, held in radians.
pub mod radians_from_deg {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(radians: &f64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(radians.to_degrees())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let degrees = f64::deserialize(deserializer)?;
        Ok(degrees.to_radians())
    }
}

pub mod std_devs_from_array {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use strafe_core::messages::StdDevs;

    pub fn serialize<S>(std_devs: &StdDevs, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(std_devs.as_array().iter())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<StdDevs, D::Error>
    where
        D: Deserializer<'de>,
    {
        let [x, y, theta]: [f64; 3] = Deserialize::deserialize(deserializer)?;
        Ok(StdDevs::new(x, y, theta))
    }
}
