use crate::filters::kalman::KalmanFilter;
use crate::types::{normalize_angle, ControlVec, StepEvent, STATE_DIM};

/// Pedestrian dead-reckoning predictor.
///
/// Turns each detected step into one Kalman time update with control
/// `u = (L·cos θ, L·sin θ, θ, L)`, where θ is the step heading and L the
/// calibrated step length. The filter it drives is expected to use identity
/// A and B so the control displaces the state directly.
#[derive(Clone, Debug)]
pub struct StepPredictor {
    step_length: f64,
    steps: u64,
}

impl StepPredictor {
    pub fn new(step_length: f64) -> Self {
        Self {
            step_length,
            steps: 0,
        }
    }

    /// Control vector for one step. The heading is wrapped to (-π, π] first.
    pub fn control_for(&self, step: &StepEvent) -> ControlVec {
        let theta = normalize_angle(step.heading);
        let l = self.step_length;
        ControlVec::new(l * theta.cos(), l * theta.sin(), theta, l)
    }

    pub fn predict(&mut self, kf: &mut KalmanFilter<STATE_DIM>, step: &StepEvent) {
        let u = self.control_for(step);
        kf.predict(&u);
        self.steps += 1;
        log::trace!(
            "step #{} heading={:.3} rad -> ({:.2}, {:.2})",
            self.steps,
            u[2],
            kf.state()[0],
            kf.state()[1]
        );
    }

    pub fn step_length(&self) -> f64 {
        self.step_length
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }
}
