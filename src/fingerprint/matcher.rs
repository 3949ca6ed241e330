use std::borrow::Cow;
use std::marker::PhantomData;
use std::path::Path;

use crate::config::MatcherConfig;
use crate::error::{LoadError, LocatorError};
use crate::fingerprint::database::FingerprintDatabase;
use crate::types::{MagneticField, PositionEstimate, RssiScan};

/// A live reading that can be compared against a fingerprint map.
pub trait FingerprintSample {
    /// Fixed feature count for this kind of sample, if there is one.
    const FEATURE_COUNT: Option<usize>;

    fn features(&self) -> Cow<'_, [f64]>;

    fn timestamp(&self) -> u64;
}

impl FingerprintSample for MagneticField {
    const FEATURE_COUNT: Option<usize> = Some(3);

    fn features(&self) -> Cow<'_, [f64]> {
        Cow::Owned(vec![self.x, self.y, self.z])
    }

    fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

impl FingerprintSample for RssiScan {
    const FEATURE_COUNT: Option<usize> = None;

    fn features(&self) -> Cow<'_, [f64]> {
        Cow::Borrowed(&self.levels)
    }

    fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

/// Nearest-neighbour / threshold fingerprint locator for one floor.
///
/// # Selection
/// - Threshold: a row survives when its squared feature distance is `<= τ`.
///   The per-axis sum stops as soon as it exceeds τ.
/// - K-NN: only the `k` closest survivors are kept, ties broken by database
///   order.
/// - Both knobs are optional and independent.
///
/// The estimate is the mean of the surviving positions, stamped with the
/// sample's timestamp and the matcher's floor.
pub struct FingerprintMatcher<S> {
    database: FingerprintDatabase,
    floor: i32,
    config: MatcherConfig,
    sample: PhantomData<fn(&S)>,
}

/// Magnetic-mismatch locator: 3 features (µT per axis).
pub type MagneticMatcher = FingerprintMatcher<MagneticField>;
/// Radio-map locator: one RSSI column per access point.
pub type RadioMatcher = FingerprintMatcher<RssiScan>;

impl<S: FingerprintSample> FingerprintMatcher<S> {
    pub fn new(
        database: FingerprintDatabase,
        floor: i32,
        config: MatcherConfig,
    ) -> Result<Self, LocatorError> {
        config.validate()?;
        if let Some(expected) = S::FEATURE_COUNT {
            if database.dimension() != expected {
                return Err(LoadError::Malformed {
                    line: 1,
                    expected: expected + 2,
                    found: database.dimension() + 2,
                }
                .into());
            }
        }
        Ok(Self {
            database,
            floor,
            config,
            sample: PhantomData,
        })
    }

    /// Loads a TSV map and builds the matcher. Any failure yields no matcher.
    pub fn from_tsv(path: &Path, floor: i32, config: MatcherConfig) -> Result<Self, LocatorError> {
        let database = FingerprintDatabase::load(path, S::FEATURE_COUNT)?;
        Self::new(database, floor, config)
    }

    pub fn localize(&self, sample: &S) -> Option<PositionEstimate> {
        let features = sample.features();
        if features.len() != self.database.dimension() {
            log::debug!(
                "sample has {} features, map has {}; skipping",
                features.len(),
                self.database.dimension()
            );
            return None;
        }

        let threshold = self.config.threshold;
        let mut survivors: Vec<(usize, f64)> = self
            .database
            .rows()
            .iter()
            .enumerate()
            .filter_map(|(i, row)| {
                squared_distance(&row.features, &features, threshold).map(|d| (i, d))
            })
            .collect();

        if let Some(k) = self.config.k {
            survivors.sort_by(|a, b| a.1.total_cmp(&b.1));
            survivors.truncate(k);
            survivors.sort_by_key(|&(i, _)| i);
        }

        if survivors.is_empty() {
            return None;
        }

        let rows = self.database.rows();
        let n = survivors.len() as f64;
        let (sum_x, sum_y) = survivors
            .iter()
            .fold((0.0, 0.0), |(sx, sy), &(i, _)| (sx + rows[i].x, sy + rows[i].y));

        Some(PositionEstimate::new(
            sum_x / n,
            sum_y / n,
            self.floor,
            sample.timestamp(),
        ))
    }

    pub fn floor(&self) -> i32 {
        self.floor
    }
}

/// Squared Euclidean distance, or `None` once the running sum passes the
/// threshold.
fn squared_distance(row: &[f64], query: &[f64], threshold: Option<f64>) -> Option<f64> {
    let mut sum = 0.0;
    for (a, b) in row.iter().zip(query) {
        let diff = a - b;
        sum += diff * diff;
        if threshold.is_some_and(|t| sum > t) {
            return None;
        }
    }
    Some(sum)
}
