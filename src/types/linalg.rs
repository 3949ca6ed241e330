//! Linear algebra type system for the indoor estimator
//!
//! Provides compile-time dimension checking and clean type aliases
//! for the step-driven Kalman filter and the compass.

use nalgebra::{Matrix3, SMatrix, SVector};

// ===== State Dimensions =====
pub const STATE_DIM: usize = 4; // (x, y, heading, step length)

// ===== State Indices =====
pub const IDX_X: usize = 0;
pub const IDX_Y: usize = 1;
pub const IDX_HEADING: usize = 2;
pub const IDX_STEP_LENGTH: usize = 3;

// ===== Measurement Dimensions =====
// Fingerprint fixes are expressed over the full state; unobserved channels
// get zero rows in H.
pub const MEASURE_DIM_POSITION: usize = STATE_DIM;

// ===== 4-State Filter Types =====
pub type StateVec = SVector<f64, STATE_DIM>;
pub type StateMat = SMatrix<f64, STATE_DIM, STATE_DIM>;
pub type ControlVec = SVector<f64, STATE_DIM>;

// Measurement types for fingerprint position fixes
pub type PositionMeasureVec = SVector<f64, MEASURE_DIM_POSITION>;
pub type PositionMeasureMat = SMatrix<f64, MEASURE_DIM_POSITION, STATE_DIM>;
pub type PositionNoise = SMatrix<f64, MEASURE_DIM_POSITION, MEASURE_DIM_POSITION>;

// ===== Compass Types =====
pub type RotationMat = Matrix3<f64>;
