use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

use crate::types::{
    normalize_angle, Acceleration, AngularSpeed, Heading, MagneticField, Orientation, RotationMat,
};

pub const DEFAULT_FUSION_COEFFICIENT: f64 = 0.98;

const NS2S: f64 = 1.0e-9;
// Below this angular rate the rotation axis is undefined.
const GYRO_EPSILON: f64 = 1.0e-9;
// |field × gravity| below this means free fall or a field parallel to gravity.
const MIN_HORIZONTAL_FIELD: f64 = 0.1;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrientationFusionState {
    pub acc_mag_orientation: Option<Orientation>,
    pub gyro_orientation: Orientation,
    pub gyro_initialized: bool,
    pub heading_deg: Option<f64>,
    pub gyro_updates: u64,
    pub fused_updates: u64,
}

/// Complementary-filter compass.
///
/// Accelerometer + magnetometer give a tilt-compensated orientation that is
/// noisy but drift free. The gyroscope is integrated into a rotation matrix
/// at sensor rate, smooth but drifting. Each [`fuse`](Self::fuse) blends the
/// two per axis with weight `c` on the gyro side and re-anchors the gyro
/// matrix on the result.
pub struct OrientationFusion {
    fusion_coefficient: f64,

    // Low-pass side
    accel: Option<Acceleration>,
    mag: Option<MagneticField>,
    acc_mag_orientation: Option<Orientation>,

    // High-pass side
    gyro_matrix: RotationMat,
    gyro_orientation: Orientation,
    gyro_initialized: bool,
    last_gyro_timestamp: Option<u64>,

    gyro_updates: u64,
    fused_updates: u64,
}

impl OrientationFusion {
    pub fn new(fusion_coefficient: f64) -> Self {
        Self {
            fusion_coefficient: fusion_coefficient.clamp(0.0, 1.0),
            accel: None,
            mag: None,
            acc_mag_orientation: None,
            gyro_matrix: RotationMat::identity(),
            gyro_orientation: Orientation::default(),
            gyro_initialized: false,
            last_gyro_timestamp: None,
            gyro_updates: 0,
            fused_updates: 0,
        }
    }

    pub fn on_accelerometer(&mut self, sample: &Acceleration) {
        self.accel = Some(*sample);
        self.update_acc_mag_orientation();
    }

    pub fn on_magnetometer(&mut self, sample: &MagneticField) {
        self.mag = Some(*sample);
        self.update_acc_mag_orientation();
    }

    fn update_acc_mag_orientation(&mut self) {
        let (Some(accel), Some(mag)) = (self.accel, self.mag) else {
            return;
        };
        match rotation_from_gravity_and_field(&accel.as_vector(), &mag.as_vector()) {
            Some(r) => self.acc_mag_orientation = Some(orientation_from_matrix(&r)),
            None => log::trace!("degenerate accel/mag pair, keeping previous orientation"),
        }
    }

    pub fn on_gyroscope(&mut self, sample: &AngularSpeed) {
        // Nothing to integrate from until accel/mag gave an absolute reference.
        let Some(reference) = self.acc_mag_orientation else {
            return;
        };

        if !self.gyro_initialized {
            self.gyro_matrix *= matrix_from_orientation(&reference);
            self.gyro_initialized = true;
            log::debug!(
                "gyro integrator seeded at azimuth {:.1}°",
                reference.azimuth.to_degrees()
            );
        }

        let delta = match self.last_gyro_timestamp {
            Some(prev) => {
                let dt = sample.timestamp.saturating_sub(prev) as f64 * NS2S;
                rotation_from_gyro(sample, dt / 2.0)
            }
            None => RotationMat::identity(),
        };
        self.last_gyro_timestamp = Some(sample.timestamp);

        self.gyro_matrix *= delta;
        self.gyro_orientation = orientation_from_matrix(&self.gyro_matrix);
        self.gyro_updates += 1;
    }

    /// One complementary-filter tick.
    ///
    /// Returns `None` until both the absolute reference and the gyro
    /// integrator exist.
    pub fn fuse(&mut self) -> Option<Heading> {
        let absolute = self.acc_mag_orientation?;
        if !self.gyro_initialized {
            return None;
        }

        let c = self.fusion_coefficient;
        let gyro = self.gyro_orientation.to_array();
        let acc_mag = absolute.to_array();
        let fused = Orientation::from_array(std::array::from_fn(|axis| {
            blend_angle(gyro[axis], acc_mag[axis], c)
        }));

        // Re-anchor the integrator on the fused orientation.
        self.gyro_matrix = matrix_from_orientation(&fused);
        self.gyro_orientation = fused;
        self.fused_updates += 1;

        Some(Heading {
            azimuth: fused.azimuth,
            timestamp: self.last_gyro_timestamp.unwrap_or_default(),
        })
    }

    pub fn fusion_coefficient(&self) -> f64 {
        self.fusion_coefficient
    }

    pub fn acc_mag_orientation(&self) -> Option<Orientation> {
        self.acc_mag_orientation
    }

    pub fn gyro_orientation(&self) -> Orientation {
        self.gyro_orientation
    }

    pub fn is_initialized(&self) -> bool {
        self.gyro_initialized
    }

    pub fn get_state(&self) -> OrientationFusionState {
        OrientationFusionState {
            acc_mag_orientation: self.acc_mag_orientation,
            gyro_orientation: self.gyro_orientation,
            gyro_initialized: self.gyro_initialized,
            heading_deg: self
                .gyro_initialized
                .then(|| self.gyro_orientation.azimuth.to_degrees()),
            gyro_updates: self.gyro_updates,
            fused_updates: self.fused_updates,
        }
    }
}

impl Default for OrientationFusion {
    fn default() -> Self {
        Self::new(DEFAULT_FUSION_COEFFICIENT)
    }
}

/// `c·gyro + (1−c)·absolute` along the short arc.
///
/// The minority term is moved onto the branch of the dominant one before
/// blending, so c = 1 returns `gyro` and c = 0 returns `absolute` unchanged.
fn blend_angle(gyro: f64, absolute: f64, c: f64) -> f64 {
    let (g, a) = if c >= 0.5 {
        (gyro, unwrap_near(absolute, gyro))
    } else {
        (unwrap_near(gyro, absolute), absolute)
    };
    normalize_angle(c * g + (1.0 - c) * a)
}

fn unwrap_near(angle: f64, reference: f64) -> f64 {
    let diff = angle - reference;
    if diff > PI {
        angle - TAU
    } else if diff < -PI {
        angle + TAU
    } else {
        angle
    }
}

// ─── Rotation helpers ────────────────────────────────────────────────────────

/// Device-to-world rotation from gravity and geomagnetic vectors (both in
/// device coordinates). Rows are East, North, Up.
pub fn rotation_from_gravity_and_field(
    gravity: &Vector3<f64>,
    field: &Vector3<f64>,
) -> Option<RotationMat> {
    let east = field.cross(gravity);
    let east_norm = east.norm();
    if east_norm < MIN_HORIZONTAL_FIELD {
        return None;
    }
    let east = east / east_norm;
    let up = gravity / gravity.norm();
    let north = up.cross(&east);

    Some(RotationMat::new(
        east.x, east.y, east.z, //
        north.x, north.y, north.z, //
        up.x, up.y, up.z,
    ))
}

/// (azimuth, pitch, roll) of a rotation matrix.
pub fn orientation_from_matrix(r: &RotationMat) -> Orientation {
    Orientation::new(
        r[(0, 1)].atan2(r[(1, 1)]),
        (-r[(2, 1)]).clamp(-1.0, 1.0).asin(),
        (-r[(2, 0)]).atan2(r[(2, 2)]),
    )
}

/// Rotation matrix for an orientation: roll about Y, then pitch about X, then
/// azimuth about Z, composed as Z·(X·Y).
pub fn matrix_from_orientation(o: &Orientation) -> RotationMat {
    let (sin_x, cos_x) = o.pitch.sin_cos();
    let (sin_y, cos_y) = o.roll.sin_cos();
    let (sin_z, cos_z) = o.azimuth.sin_cos();

    let x_m = RotationMat::new(
        1.0, 0.0, 0.0, //
        0.0, cos_x, sin_x, //
        0.0, -sin_x, cos_x,
    );
    let y_m = RotationMat::new(
        cos_y, 0.0, sin_y, //
        0.0, 1.0, 0.0, //
        -sin_y, 0.0, cos_y,
    );
    let z_m = RotationMat::new(
        cos_z, sin_z, 0.0, //
        -sin_z, cos_z, 0.0, //
        0.0, 0.0, 1.0,
    );

    z_m * (x_m * y_m)
}

/// Incremental rotation for one gyro sample; `time_factor` is Δt/2, so the
/// quaternion half angle is `ω·Δt/2`.
fn rotation_from_gyro(sample: &AngularSpeed, time_factor: f64) -> RotationMat {
    let omega = sample.magnitude();
    let axis = if omega > GYRO_EPSILON {
        sample.as_vector() / omega
    } else {
        Vector3::zeros()
    };

    let (sin_half, cos_half) = (omega * time_factor).sin_cos();
    rotation_from_quaternion(
        sin_half * axis.x,
        sin_half * axis.y,
        sin_half * axis.z,
        cos_half,
    )
}

fn rotation_from_quaternion(q1: f64, q2: f64, q3: f64, q0: f64) -> RotationMat {
    let sq_q1 = 2.0 * q1 * q1;
    let sq_q2 = 2.0 * q2 * q2;
    let sq_q3 = 2.0 * q3 * q3;
    let q1_q2 = 2.0 * q1 * q2;
    let q3_q0 = 2.0 * q3 * q0;
    let q1_q3 = 2.0 * q1 * q3;
    let q2_q0 = 2.0 * q2 * q0;
    let q2_q3 = 2.0 * q2 * q3;
    let q1_q0 = 2.0 * q1 * q0;

    RotationMat::new(
        1.0 - sq_q2 - sq_q3, q1_q2 - q3_q0, q1_q3 + q2_q0, //
        q1_q2 + q3_q0, 1.0 - sq_q1 - sq_q3, q2_q3 - q1_q0, //
        q1_q3 - q2_q0, q2_q3 + q1_q0, 1.0 - sq_q1 - sq_q2,
    )
}
