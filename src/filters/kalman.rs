//! Discrete linear Kalman filter over a fixed-size state.
//!
//! Predict:
//!   x ← A·x + B·u
//!   P ← A·P·Aᵀ + Q
//!
//! Update (measurement size M, supplied per call):
//!   y = z − H·x
//!   S = H·P·Hᵀ + R
//!   K = P·Hᵀ·S⁻¹
//!   x ← x + K·y
//!   P ← (I − K·H)·P
//!
//! S is factored with Cholesky. A factorization failure, a determinant below
//! `MIN_INNOVATION_DET`, or any non-finite result rejects the update and
//! keeps the prior state.

use nalgebra::{Cholesky, SMatrix, SVector};
use serde::{Deserialize, Serialize};

use crate::error::FilterError;
use crate::types::{PositionEstimate, IDX_X, IDX_Y};

const MIN_INNOVATION_DET: f64 = 1e-12;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KalmanFilterState {
    pub state: Vec<f64>,
    pub covariance_trace: f64,
    pub predict_count: u64,
    pub update_count: u64,
    pub rejected_updates: u64,
}

#[derive(Clone, Debug)]
pub struct KalmanFilter<const N: usize> {
    /// State vector x
    x: SVector<f64, N>,
    /// Error covariance P
    p: SMatrix<f64, N, N>,
    /// State transition A
    a: SMatrix<f64, N, N>,
    /// Control matrix B
    b: SMatrix<f64, N, N>,
    /// Process noise Q
    q: SMatrix<f64, N, N>,

    predict_count: u64,
    update_count: u64,
    rejected_updates: u64,
}

impl<const N: usize> KalmanFilter<N> {
    pub fn new(
        x0: SVector<f64, N>,
        p0: SMatrix<f64, N, N>,
        a: SMatrix<f64, N, N>,
        b: SMatrix<f64, N, N>,
        q: SMatrix<f64, N, N>,
    ) -> Self {
        Self {
            x: x0,
            p: p0,
            a,
            b,
            q,
            predict_count: 0,
            update_count: 0,
            rejected_updates: 0,
        }
    }

    /// Time update driven by the control input `u`.
    pub fn predict(&mut self, u: &SVector<f64, N>) {
        self.x = self.a * self.x + self.b * u;
        self.p = self.a * self.p * self.a.transpose() + self.q;
        self.predict_count += 1;
    }

    /// Measurement update. On error the filter is left exactly as it was.
    pub fn update<const M: usize>(
        &mut self,
        z: &SVector<f64, M>,
        h: &SMatrix<f64, M, N>,
        r: &SMatrix<f64, M, M>,
    ) -> Result<(), FilterError> {
        let y = z - h * self.x;
        let s = h * self.p * h.transpose() + r;

        let Some(chol) = Cholesky::new(s) else {
            self.rejected_updates += 1;
            return Err(FilterError::NotPositiveDefinite);
        };

        let determinant = chol.l_dirty().diagonal().product().powi(2);
        if !(determinant.is_finite() && determinant >= MIN_INNOVATION_DET) {
            self.rejected_updates += 1;
            return Err(FilterError::SingularInnovation { determinant });
        }

        let s_inv = chol.inverse();
        let k = self.p * h.transpose() * s_inv;

        let x_new = self.x + k * y;
        let p_new = (SMatrix::<f64, N, N>::identity() - k * h) * self.p;

        if !(x_new.iter().all(|v| v.is_finite()) && p_new.iter().all(|v| v.is_finite())) {
            self.rejected_updates += 1;
            return Err(FilterError::NonFinite);
        }

        self.x = x_new;
        self.p = p_new;
        self.update_count += 1;
        Ok(())
    }

    /// Planar position read from the first two state components.
    pub fn position_at(&self, floor: i32, timestamp: u64) -> PositionEstimate {
        PositionEstimate::new(self.x[IDX_X], self.x[IDX_Y], floor, timestamp)
    }

    pub fn state(&self) -> &SVector<f64, N> {
        &self.x
    }

    pub fn covariance(&self) -> &SMatrix<f64, N, N> {
        &self.p
    }

    pub fn covariance_trace(&self) -> f64 {
        self.p.trace()
    }

    pub fn predict_count(&self) -> u64 {
        self.predict_count
    }

    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    pub fn get_state(&self) -> KalmanFilterState {
        KalmanFilterState {
            state: self.x.iter().copied().collect(),
            covariance_trace: self.covariance_trace(),
            predict_count: self.predict_count,
            update_count: self.update_count,
            rejected_updates: self.rejected_updates,
        }
    }
}
