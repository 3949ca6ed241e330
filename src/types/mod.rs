pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};
use std::marker::PhantomData;

/// Wrap an angle into the canonical heading range (-π, π].
///
/// Values already inside the range are returned untouched, so wrapping is
/// exact for in-range inputs.
pub fn normalize_angle(angle: f64) -> f64 {
    if !angle.is_finite() || (angle > -PI && angle <= PI) {
        return angle;
    }
    let wrapped = angle.rem_euclid(TAU);
    if wrapped > PI {
        wrapped - TAU
    } else {
        wrapped
    }
}

// ─── Sensor samples ──────────────────────────────────────────────────────────

/// Marker for the physical quantity carried by a [`SensorSample`].
pub trait SensorKind: Copy + std::fmt::Debug + Send + Sync + 'static {
    const NAME: &'static str;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Accel;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Gyro;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mag;

impl SensorKind for Accel {
    const NAME: &'static str = "accelerometer";
}

impl SensorKind for Gyro {
    const NAME: &'static str = "gyroscope";
}

impl SensorKind for Mag {
    const NAME: &'static str = "magnetometer";
}

/// Timestamped 3-axis reading. Timestamps are nanoseconds and never decrease
/// within one stream.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct SensorSample<K: SensorKind> {
    pub timestamp: u64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(skip)]
    kind: PhantomData<K>,
}

impl<K: SensorKind> SensorSample<K> {
    pub fn new(x: f64, y: f64, z: f64, timestamp: u64) -> Self {
        Self {
            timestamp,
            x,
            y,
            z,
            kind: PhantomData,
        }
    }

    pub fn as_vector(&self) -> nalgebra::Vector3<f64> {
        nalgebra::Vector3::new(self.x, self.y, self.z)
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Specific force in m/s².
pub type Acceleration = SensorSample<Accel>;
/// Angular rate in rad/s.
pub type AngularSpeed = SensorSample<Gyro>;
/// Magnetic flux density in µT.
pub type MagneticField = SensorSample<Mag>;

/// Radio-signal scan: one RSSI level (dBm) per surveyed access point, in the
/// column order of the radio map it is matched against.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RssiScan {
    pub timestamp: u64,
    pub levels: Vec<f64>,
}

// ─── Estimator inputs / outputs ──────────────────────────────────────────────

/// Device orientation in radians: azimuth about Z, pitch about X, roll about Y.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub azimuth: f64,
    pub pitch: f64,
    pub roll: f64,
}

impl Orientation {
    pub fn new(azimuth: f64, pitch: f64, roll: f64) -> Self {
        Self {
            azimuth,
            pitch,
            roll,
        }
    }

    /// Angles in `[azimuth, pitch, roll]` order.
    pub fn to_array(self) -> [f64; 3] {
        [self.azimuth, self.pitch, self.roll]
    }

    pub fn from_array(angles: [f64; 3]) -> Self {
        Self::new(angles[0], angles[1], angles[2])
    }
}

/// Fused compass output.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Heading {
    /// Radians from magnetic north, in (-π, π].
    pub azimuth: f64,
    /// Timestamp of the last gyroscope sample folded into this heading.
    pub timestamp: u64,
}

/// A detected step, produced by an external step detector.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    pub heading: f64,
    /// Step length in metres.
    pub length: f64,
    pub timestamp: u64,
}

/// Planar position on a known floor.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionEstimate {
    pub x: f64,
    pub y: f64,
    pub floor: i32,
    pub timestamp: u64,
}

impl PositionEstimate {
    pub fn new(x: f64, y: f64, floor: i32, timestamp: u64) -> Self {
        Self {
            x,
            y,
            floor,
            timestamp,
        }
    }
}
