use crate::error::FilterError;
use crate::filters::kalman::KalmanFilter;
use crate::types::{
    PositionEstimate, PositionMeasureMat, PositionMeasureVec, PositionNoise, IDX_HEADING,
    IDX_STEP_LENGTH, IDX_X, IDX_Y, STATE_DIM,
};

/// A fully built linear measurement, as handed to [`KalmanFilter::update`].
#[derive(Clone, Debug, PartialEq)]
pub struct Measurement {
    pub z: PositionMeasureVec,
    pub h: PositionMeasureMat,
    pub r: PositionNoise,
    /// Sources whose buffered fixes were combined into `z`.
    pub sources: Vec<String>,
}

#[derive(Clone, Debug)]
struct SourceSlot {
    id: String,
    position_std: f64,
    latest: Option<PositionEstimate>,
}

/// Feeds fingerprint fixes into the Kalman filter.
///
/// The latest fix of every registered source is buffered. Each new fix
/// triggers one update built from all buffered fixes: a single source gives
/// `z = (x, y)` with `R = σ²`, several are combined by inverse-variance
/// weighting. Heading and step length are never observed: their rows of H are
/// zero and their R entries hold `unobserved_noise` so S stays invertible.
#[derive(Clone, Debug)]
pub struct MeasurementUpdater {
    sources: Vec<SourceSlot>,
    unobserved_noise: f64,
    applied: u64,
}

impl MeasurementUpdater {
    pub fn new(unobserved_noise: f64) -> Self {
        Self {
            sources: Vec::new(),
            unobserved_noise,
            applied: 0,
        }
    }

    /// Registers a source with its expected 1-σ position error in metres.
    /// Registering an existing id updates its σ.
    pub fn add_source(&mut self, id: &str, position_std: f64) {
        if let Some(slot) = self.sources.iter_mut().find(|s| s.id == id) {
            slot.position_std = position_std;
            return;
        }
        self.sources.push(SourceSlot {
            id: id.to_string(),
            position_std,
            latest: None,
        });
    }

    pub fn with_source(mut self, id: &str, position_std: f64) -> Self {
        self.add_source(id, position_std);
        self
    }

    /// Buffers `estimate` for `source` and applies the resulting measurement.
    ///
    /// The buffer only changes once the filter accepts the update; a rejected
    /// fix leaves the previously buffered one in place.
    pub fn on_estimate(
        &mut self,
        kf: &mut KalmanFilter<STATE_DIM>,
        source: &str,
        estimate: &PositionEstimate,
    ) -> Result<Measurement, FilterError> {
        let index = self
            .sources
            .iter()
            .position(|s| s.id == source)
            .ok_or_else(|| FilterError::UnknownSource(source.to_string()))?;
        if !(estimate.x.is_finite() && estimate.y.is_finite()) {
            return Err(FilterError::NonFiniteFix {
                x: estimate.x,
                y: estimate.y,
            });
        }

        let previous = self.sources[index].latest.replace(*estimate);
        // At least the slot just filled is buffered.
        let result = match self.pending_measurement() {
            Some(m) => kf.update(&m.z, &m.h, &m.r).map(|_| m),
            None => Err(FilterError::UnknownSource(source.to_string())),
        };
        match result {
            Ok(measurement) => {
                self.applied += 1;
                Ok(measurement)
            }
            Err(e) => {
                self.sources[index].latest = previous;
                Err(e)
            }
        }
    }

    /// The measurement the buffered fixes would produce right now.
    pub fn pending_measurement(&self) -> Option<Measurement> {
        let mut weight_sum = 0.0;
        let mut x = 0.0;
        let mut y = 0.0;
        let mut sources = Vec::new();

        for slot in &self.sources {
            let Some(p) = slot.latest else { continue };
            let w = 1.0 / (slot.position_std * slot.position_std);
            weight_sum += w;
            x += w * p.x;
            y += w * p.y;
            sources.push(slot.id.clone());
        }

        if sources.is_empty() {
            return None;
        }

        let variance = 1.0 / weight_sum;
        let mut z = PositionMeasureVec::zeros();
        z[IDX_X] = x / weight_sum;
        z[IDX_Y] = y / weight_sum;

        let mut h = PositionMeasureMat::zeros();
        h[(IDX_X, IDX_X)] = 1.0;
        h[(IDX_Y, IDX_Y)] = 1.0;

        let mut r = PositionNoise::zeros();
        r[(IDX_X, IDX_X)] = variance;
        r[(IDX_Y, IDX_Y)] = variance;
        r[(IDX_HEADING, IDX_HEADING)] = self.unobserved_noise;
        r[(IDX_STEP_LENGTH, IDX_STEP_LENGTH)] = self.unobserved_noise;

        Some(Measurement { z, h, r, sources })
    }

    /// Drops every buffered fix.
    pub fn clear_positions(&mut self) {
        for slot in &mut self.sources {
            slot.latest = None;
        }
    }

    pub fn buffered(&self, source: &str) -> Option<&PositionEstimate> {
        self.sources
            .iter()
            .find(|s| s.id == source)
            .and_then(|s| s.latest.as_ref())
    }

    pub fn applied_updates(&self) -> u64 {
        self.applied
    }
}
