// strategy.rs: Step-driven Kalman fusion of dead reckoning and fingerprint
// fixes.
//
// `KalmanStrategy` is the pure core: it owns the filter, the step predictor
// and the measurement updater, and turns events into positions. The runners
// below only wire it to channels.

use std::io;
use std::sync::{Arc, Mutex};

use crate::config::StrategyConfig;
use crate::filters::kalman::{KalmanFilter, KalmanFilterState};
use crate::filters::measurement_updater::MeasurementUpdater;
use crate::filters::pdr_predictor::StepPredictor;
use crate::fingerprint::matcher::{FingerprintMatcher, FingerprintSample};
use crate::observer::{Channel, Emitter, SubscriptionId};
use crate::types::{PositionEstimate, StateMat, StateVec, StepEvent, STATE_DIM};

pub const MAGNETIC_SOURCE: &str = "magnetic";
pub const RADIO_SOURCE: &str = "radio";

pub struct KalmanStrategy {
    kf: KalmanFilter<STATE_DIM>,
    predictor: StepPredictor,
    updater: MeasurementUpdater,
    floor: i32,
    step_limit: u32,
    steps_since_fix: u32,
}

impl KalmanStrategy {
    /// Filter seeded at `start`, with x0 = (x, y, 1, 1) and A = B = I.
    pub fn new(start: &PositionEstimate, config: &StrategyConfig) -> Self {
        let l = config.step_length;
        let pos_var = config.initial_position_std.powi(2);
        let head_var = config.initial_heading_std_deg.to_radians().powi(2);
        let q_pos = config.position_process_std.powi(2);
        let q_head = config.heading_process_std_deg.to_radians().powi(2);

        let x0 = StateVec::new(start.x, start.y, 1.0, 1.0);
        let p0 = StateMat::from_diagonal(&StateVec::new(pos_var, pos_var, head_var, l * l));
        let q = StateMat::from_diagonal(&StateVec::new(q_pos, q_pos, q_head, l * l));

        Self {
            kf: KalmanFilter::new(x0, p0, StateMat::identity(), StateMat::identity(), q),
            predictor: StepPredictor::new(l),
            updater: MeasurementUpdater::new(config.unobserved_noise),
            floor: start.floor,
            step_limit: config.step_limit,
            steps_since_fix: 0,
        }
    }

    pub fn add_source(&mut self, id: &str, position_std: f64) {
        self.updater.add_source(id, position_std);
    }

    pub fn with_source(mut self, id: &str, position_std: f64) -> Self {
        self.add_source(id, position_std);
        self
    }

    /// Dead-reckoning step. Returns the predicted position for immediate
    /// publishing.
    pub fn on_step(&mut self, step: &StepEvent) -> PositionEstimate {
        self.predictor.predict(&mut self.kf, step);
        let position = self.kf.position_at(self.floor, step.timestamp);

        self.steps_since_fix += 1;
        if self.steps_since_fix > self.step_limit {
            // Fixes older than the last few steps no longer describe where we are.
            self.updater.clear_positions();
            log::trace!("{} steps without a fix, buffered fixes dropped", self.steps_since_fix);
        }
        position
    }

    /// Fingerprint fix from `source`. Returns the corrected position, or
    /// `None` if the fix was ignored or the update rejected.
    pub fn on_estimate(&mut self, source: &str, estimate: &PositionEstimate) -> Option<PositionEstimate> {
        if estimate.floor != self.floor {
            log::debug!(
                "{} fix on floor {} ignored (tracking floor {})",
                source,
                estimate.floor,
                self.floor
            );
            return None;
        }

        match self.updater.on_estimate(&mut self.kf, source, estimate) {
            Ok(_) => {
                self.steps_since_fix = 0;
                Some(self.kf.position_at(self.floor, estimate.timestamp))
            }
            Err(e) => {
                log::warn!("{} fix at ({:.2}, {:.2}) rejected: {}", source, estimate.x, estimate.y, e);
                None
            }
        }
    }

    pub fn position(&self, timestamp: u64) -> PositionEstimate {
        self.kf.position_at(self.floor, timestamp)
    }

    pub fn floor(&self) -> i32 {
        self.floor
    }

    pub fn steps_since_fix(&self) -> u32 {
        self.steps_since_fix
    }

    pub fn buffered(&self, source: &str) -> Option<&PositionEstimate> {
        self.updater.buffered(source)
    }

    pub fn filter(&self) -> &KalmanFilter<STATE_DIM> {
        &self.kf
    }

    pub fn get_state(&self) -> KalmanFilterState {
        self.kf.get_state()
    }
}

// ─── Runtime wiring ──────────────────────────────────────────────────────────

struct RunnerSubscriptions {
    steps: SubscriptionId,
    sources: Vec<SubscriptionId>,
}

/// Connects a [`KalmanStrategy`] to its input channels and publishes every
/// position it produces.
pub struct StrategyRunner {
    strategy: Arc<Mutex<KalmanStrategy>>,
    steps: Channel<StepEvent>,
    sources: Vec<(String, Channel<PositionEstimate>)>,
    positions: Channel<PositionEstimate>,
    subscriptions: Option<RunnerSubscriptions>,
}

impl StrategyRunner {
    pub fn new(strategy: KalmanStrategy, steps: Channel<StepEvent>) -> Self {
        Self {
            strategy: Arc::new(Mutex::new(strategy)),
            steps,
            sources: Vec::new(),
            positions: Channel::new(),
            subscriptions: None,
        }
    }

    /// Registers a fix source. On a running runner the channel is subscribed
    /// right away.
    pub fn add_source(&mut self, id: &str, position_std: f64, fixes: Channel<PositionEstimate>) {
        match self.strategy.lock() {
            Ok(mut strategy) => strategy.add_source(id, position_std),
            Err(_) => log::warn!("strategy lock poisoned; source {} not registered", id),
        }
        if self.subscriptions.is_some() {
            let sub = self.subscribe_source(id, &fixes);
            if let Some(subs) = self.subscriptions.as_mut() {
                subs.sources.push(sub);
            }
        }
        self.sources.push((id.to_string(), fixes));
    }

    fn subscribe_source(&self, id: &str, fixes: &Channel<PositionEstimate>) -> SubscriptionId {
        let id = id.to_string();
        let strategy = Arc::clone(&self.strategy);
        let positions = self.positions.clone();
        fixes.subscribe(move |estimate: &PositionEstimate| {
            let corrected = match strategy.lock() {
                Ok(mut s) => s.on_estimate(&id, estimate),
                Err(_) => {
                    log::warn!("strategy lock poisoned; {} fix dropped", id);
                    None
                }
            };
            if let Some(p) = corrected {
                positions.publish(&p);
            }
        })
    }

    pub fn positions(&self) -> Channel<PositionEstimate> {
        self.positions.clone()
    }

    pub fn strategy(&self) -> Arc<Mutex<KalmanStrategy>> {
        Arc::clone(&self.strategy)
    }
}

impl Emitter for StrategyRunner {
    fn start(&mut self) -> io::Result<()> {
        if self.subscriptions.is_some() {
            return Ok(());
        }

        let strategy = Arc::clone(&self.strategy);
        let positions = self.positions.clone();
        let steps = self.steps.subscribe(move |step: &StepEvent| {
            let position = match strategy.lock() {
                Ok(mut s) => Some(s.on_step(step)),
                Err(_) => {
                    log::warn!("strategy lock poisoned; step dropped");
                    None
                }
            };
            if let Some(p) = position {
                positions.publish(&p);
            }
        });

        let sources = self
            .sources
            .iter()
            .map(|(id, channel)| self.subscribe_source(id, channel))
            .collect();

        self.subscriptions = Some(RunnerSubscriptions { steps, sources });
        Ok(())
    }

    fn stop(&mut self) {
        let Some(subs) = self.subscriptions.take() else {
            return;
        };
        self.steps.unsubscribe(subs.steps);
        for ((_, channel), id) in self.sources.iter().zip(subs.sources) {
            channel.unsubscribe(id);
        }
    }

    fn is_running(&self) -> bool {
        self.subscriptions.is_some()
    }
}

impl Drop for StrategyRunner {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Push adapter for a fingerprint matcher: every sample is localized and hits
/// are published. Misses publish nothing.
pub struct LocatorRunner<S> {
    matcher: Arc<FingerprintMatcher<S>>,
    samples: Channel<S>,
    positions: Channel<PositionEstimate>,
    subscription: Option<SubscriptionId>,
}

impl<S: FingerprintSample + 'static> LocatorRunner<S> {
    pub fn new(matcher: FingerprintMatcher<S>, samples: Channel<S>) -> Self {
        Self {
            matcher: Arc::new(matcher),
            samples,
            positions: Channel::new(),
            subscription: None,
        }
    }

    pub fn positions(&self) -> Channel<PositionEstimate> {
        self.positions.clone()
    }
}

impl<S: FingerprintSample + 'static> Emitter for LocatorRunner<S> {
    fn start(&mut self) -> io::Result<()> {
        if self.subscription.is_none() {
            let matcher = Arc::clone(&self.matcher);
            let positions = self.positions.clone();
            self.subscription = Some(self.samples.subscribe(move |sample: &S| {
                if let Some(p) = matcher.localize(sample) {
                    positions.publish(&p);
                }
            }));
        }
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.samples.unsubscribe(id);
        }
    }

    fn is_running(&self) -> bool {
        self.subscription.is_some()
    }
}

impl<S> Drop for LocatorRunner<S> {
    fn drop(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.samples.unsubscribe(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatcherConfig;
    use crate::fingerprint::{FingerprintDatabase, MagneticMatcher};
    use crate::types::{MagneticField, IDX_HEADING, IDX_STEP_LENGTH};
    use approx::assert_abs_diff_eq;

    fn strategy() -> KalmanStrategy {
        KalmanStrategy::new(&PositionEstimate::new(1.0, 2.0, 0, 0), &StrategyConfig::default())
            .with_source(MAGNETIC_SOURCE, 1.0)
            .with_source(RADIO_SOURCE, 1.0)
    }

    fn east(timestamp: u64) -> StepEvent {
        StepEvent {
            heading: 0.0,
            length: 0.7,
            timestamp,
        }
    }

    #[test]
    fn test_initial_state() {
        let s = strategy();
        let kf = s.filter();
        assert_eq!(*kf.state(), StateVec::new(1.0, 2.0, 1.0, 1.0));
        assert_abs_diff_eq!(kf.covariance()[(0, 0)], 25.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            kf.covariance()[(IDX_HEADING, IDX_HEADING)],
            10f64.to_radians().powi(2),
            epsilon = 1e-15
        );
        assert_abs_diff_eq!(kf.covariance()[(IDX_STEP_LENGTH, IDX_STEP_LENGTH)], 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_step_uses_configured_length() {
        let mut s = strategy();
        let p = s.on_step(&east(500));

        assert_eq!(p.timestamp, 500);
        assert_eq!(p.floor, 0);
        assert_abs_diff_eq!(p.x, 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(p.y, 2.0, epsilon = 1e-12);
        assert_eq!(s.steps_since_fix(), 1);
    }

    #[test]
    fn test_fix_corrects_and_resets_step_count() {
        let mut s = strategy();
        s.on_step(&east(1));
        s.on_step(&east(2));

        let p = s
            .on_estimate(MAGNETIC_SOURCE, &PositionEstimate::new(10.0, 2.0, 0, 3))
            .unwrap();

        assert!(p.x > 2.0 && p.x < 10.0);
        assert_eq!(p.timestamp, 3);
        assert_eq!(s.steps_since_fix(), 0);
        assert_eq!(s.filter().update_count(), 1);
    }

    #[test]
    fn test_buffered_fixes_dropped_after_step_limit() {
        let mut s = strategy();
        s.on_estimate(RADIO_SOURCE, &PositionEstimate::new(3.0, 3.0, 0, 1))
            .unwrap();

        for t in 0..3 {
            s.on_step(&east(10 + t));
        }
        assert!(s.buffered(RADIO_SOURCE).is_some());

        s.on_step(&east(20));
        assert!(s.buffered(RADIO_SOURCE).is_none());

        s.on_estimate(MAGNETIC_SOURCE, &PositionEstimate::new(0.0, 0.0, 0, 30))
            .unwrap();
        assert!(s.buffered(RADIO_SOURCE).is_none());
        assert!(s.buffered(MAGNETIC_SOURCE).is_some());
    }

    #[test]
    fn test_other_floor_ignored() {
        let mut s = strategy();
        let before = *s.filter().state();

        assert!(s
            .on_estimate(MAGNETIC_SOURCE, &PositionEstimate::new(9.0, 9.0, 1, 5))
            .is_none());
        assert_eq!(*s.filter().state(), before);
        assert!(s.buffered(MAGNETIC_SOURCE).is_none());
    }

    #[test]
    fn test_rejected_update_returns_none() {
        let mut s = strategy();
        let before = *s.filter().state();

        let fix = PositionEstimate::new(f64::NAN, 0.0, 0, 5);
        assert!(s.on_estimate(MAGNETIC_SOURCE, &fix).is_none());
        assert!(s.on_estimate("uwb", &PositionEstimate::new(0.0, 0.0, 0, 6)).is_none());
        assert_eq!(*s.filter().state(), before);
    }

    #[test]
    fn test_bad_fix_does_not_block_other_sources() {
        let mut s = KalmanStrategy::new(&PositionEstimate::new(0.0, 0.0, 0, 0), &StrategyConfig::default())
            .with_source(MAGNETIC_SOURCE, 2.0)
            .with_source(RADIO_SOURCE, 4.0);

        assert!(s
            .on_estimate(RADIO_SOURCE, &PositionEstimate::new(f64::NAN, 0.0, 0, 1))
            .is_none());
        assert!(s.buffered(RADIO_SOURCE).is_none());

        let p = s
            .on_estimate(MAGNETIC_SOURCE, &PositionEstimate::new(3.0, 3.0, 0, 2))
            .unwrap();
        assert!(p.x > 0.0 && p.x < 3.0);
        assert!(p.y > 0.0 && p.y < 3.0);
        assert_eq!(s.filter().update_count(), 1);
    }

    #[test]
    fn test_runner_publishes_steps_and_fixes() {
        let steps = Channel::new();
        let magnetic = Channel::new();
        let mut runner = StrategyRunner::new(
            KalmanStrategy::new(&PositionEstimate::new(0.0, 0.0, 0, 0), &StrategyConfig::default()),
            steps.clone(),
        );
        runner.add_source(MAGNETIC_SOURCE, 2.0, magnetic.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        runner
            .positions()
            .subscribe(move |p: &PositionEstimate| s.lock().unwrap().push(*p));

        runner.start().unwrap();
        runner.start().unwrap();
        steps.publish(&east(1));
        magnetic.publish(&PositionEstimate::new(5.0, 0.0, 0, 2));
        magnetic.publish(&PositionEstimate::new(5.0, 0.0, 3, 3));

        let seen_now = seen.lock().unwrap().clone();
        assert_eq!(seen_now.len(), 2);
        assert_eq!(seen_now[0].timestamp, 1);
        assert_eq!(seen_now[1].timestamp, 2);

        runner.stop();
        runner.stop();
        steps.publish(&east(4));
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert_eq!(steps.subscriber_count(), 0);
        assert_eq!(magnetic.subscriber_count(), 0);
    }

    #[test]
    fn test_source_added_while_running_is_subscribed() {
        let steps = Channel::new();
        let radio = Channel::new();
        let mut runner = StrategyRunner::new(
            KalmanStrategy::new(&PositionEstimate::new(0.0, 0.0, 0, 0), &StrategyConfig::default()),
            steps,
        );
        runner.start().unwrap();
        runner.add_source(RADIO_SOURCE, 4.0, radio.clone());
        assert_eq!(radio.subscriber_count(), 1);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        runner
            .positions()
            .subscribe(move |p: &PositionEstimate| s.lock().unwrap().push(*p));
        radio.publish(&PositionEstimate::new(4.0, 0.0, 0, 7));
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(seen.lock().unwrap()[0].timestamp, 7);

        runner.stop();
        assert_eq!(radio.subscriber_count(), 0);
    }

    #[test]
    fn test_observer_may_read_strategy_during_publish() {
        let steps = Channel::new();
        let mut runner = StrategyRunner::new(strategy(), steps.clone());

        let shared = runner.strategy();
        let counts = Arc::new(Mutex::new(Vec::new()));
        let c = Arc::clone(&counts);
        runner.positions().subscribe(move |_: &PositionEstimate| {
            let steps = shared.lock().unwrap().steps_since_fix();
            c.lock().unwrap().push(steps);
        });

        runner.start().unwrap();
        steps.publish(&east(1));
        steps.publish(&east(2));

        assert_eq!(*counts.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_locator_runner_publishes_hits_only() {
        let db = FingerprintDatabase::parse("4\t5\t10\t20\t30", Some(3)).unwrap();
        let matcher = MagneticMatcher::new(db, 0, MatcherConfig::threshold(1.0)).unwrap();
        let samples = Channel::new();
        let mut locator = LocatorRunner::new(matcher, samples.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        locator
            .positions()
            .subscribe(move |p: &PositionEstimate| s.lock().unwrap().push(*p));

        locator.start().unwrap();
        samples.publish(&MagneticField::new(10.0, 20.0, 30.5, 8));
        samples.publish(&MagneticField::new(0.0, 0.0, 0.0, 9));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![PositionEstimate::new(4.0, 5.0, 0, 8)]
        );

        locator.stop();
        assert!(!locator.is_running());
        assert_eq!(samples.subscriber_count(), 0);
    }
}
