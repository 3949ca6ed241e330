pub mod complementary;
pub mod kalman;
pub mod measurement_updater;
pub mod pdr_predictor;

pub use complementary::{OrientationFusion, OrientationFusionState, DEFAULT_FUSION_COEFFICIENT};
pub use kalman::{KalmanFilter, KalmanFilterState};
pub use measurement_updater::{Measurement, MeasurementUpdater};
pub use pdr_predictor::StepPredictor;
