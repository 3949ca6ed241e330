// compass.rs: Runtime wrapper around `OrientationFusion`.
//
// Sensor callbacks and the periodic fusion tick share one mutex. Headings are
// published after the guard is dropped.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{CompassConfig, MIN_COMPASS_RATE};
use crate::filters::complementary::{OrientationFusion, OrientationFusionState};
use crate::observer::{Channel, Emitter, SubscriptionId};
use crate::scheduler::FixedRateScheduler;
use crate::types::{Acceleration, AngularSpeed, Heading, MagneticField};

struct InputSubscriptions {
    accel: SubscriptionId,
    gyro: SubscriptionId,
    mag: SubscriptionId,
}

pub struct Compass {
    fusion: Arc<Mutex<OrientationFusion>>,
    accel: Channel<Acceleration>,
    gyro: Channel<AngularSpeed>,
    mag: Channel<MagneticField>,
    headings: Channel<Heading>,
    rate: Duration,
    inputs: Option<InputSubscriptions>,
    ticker: Option<FixedRateScheduler>,
}

impl Compass {
    pub fn new(
        config: &CompassConfig,
        accel: Channel<Acceleration>,
        gyro: Channel<AngularSpeed>,
        mag: Channel<MagneticField>,
    ) -> Self {
        Self {
            fusion: Arc::new(Mutex::new(OrientationFusion::new(config.fusion_coefficient))),
            accel,
            gyro,
            mag,
            headings: Channel::new(),
            rate: config.rate(),
            inputs: None,
            ticker: None,
        }
    }

    /// Output channel; one publish per successful fusion tick.
    pub fn headings(&self) -> Channel<Heading> {
        self.headings.clone()
    }

    pub fn rate(&self) -> Duration {
        self.rate
    }

    /// Changes the tick period, clamped to [`MIN_COMPASS_RATE`]. A running
    /// timer is rescheduled; filter state is kept.
    pub fn set_rate(&mut self, rate: Duration) -> io::Result<()> {
        self.rate = rate.max(MIN_COMPASS_RATE);
        if self.ticker.take().is_some() {
            self.ticker = Some(self.schedule_ticks()?);
        }
        Ok(())
    }

    /// Subscribes to the inputs without starting the timer. Ticks are then
    /// driven by [`tick`](Self::tick), e.g. on sensor time during replay.
    pub fn start_manual_ticks(&mut self) {
        if self.inputs.is_none() {
            self.inputs = Some(self.subscribe_inputs());
        }
    }

    /// Runs one fusion tick on the calling thread.
    pub fn tick(&self) -> Option<Heading> {
        fusion_tick(&self.fusion, &self.headings)
    }

    pub fn state(&self) -> Option<OrientationFusionState> {
        self.fusion.lock().ok().map(|f| f.get_state())
    }

    fn subscribe_inputs(&self) -> InputSubscriptions {
        let fusion = Arc::clone(&self.fusion);
        let accel = self.accel.subscribe(move |s: &Acceleration| {
            with_fusion(&fusion, |f| f.on_accelerometer(s));
        });

        let fusion = Arc::clone(&self.fusion);
        let gyro = self.gyro.subscribe(move |s: &AngularSpeed| {
            with_fusion(&fusion, |f| f.on_gyroscope(s));
        });

        let fusion = Arc::clone(&self.fusion);
        let mag = self.mag.subscribe(move |s: &MagneticField| {
            with_fusion(&fusion, |f| f.on_magnetometer(s));
        });

        InputSubscriptions { accel, gyro, mag }
    }

    fn unsubscribe_inputs(&mut self) {
        if let Some(inputs) = self.inputs.take() {
            self.accel.unsubscribe(inputs.accel);
            self.gyro.unsubscribe(inputs.gyro);
            self.mag.unsubscribe(inputs.mag);
        }
    }

    fn schedule_ticks(&self) -> io::Result<FixedRateScheduler> {
        let fusion = Arc::clone(&self.fusion);
        let headings = self.headings.clone();
        FixedRateScheduler::schedule_at_fixed_rate("compass-fusion", self.rate, move || {
            fusion_tick(&fusion, &headings);
        })
    }
}

fn with_fusion(fusion: &Mutex<OrientationFusion>, f: impl FnOnce(&mut OrientationFusion)) {
    match fusion.lock() {
        Ok(mut guard) => f(&mut guard),
        Err(_) => log::warn!("orientation fusion lock poisoned; sample dropped"),
    }
}

fn fusion_tick(fusion: &Mutex<OrientationFusion>, headings: &Channel<Heading>) -> Option<Heading> {
    let heading = match fusion.lock() {
        Ok(mut guard) => guard.fuse(),
        Err(_) => {
            log::warn!("orientation fusion lock poisoned; tick skipped");
            None
        }
    };
    if let Some(h) = &heading {
        headings.publish(h);
    }
    heading
}

impl Emitter for Compass {
    fn start(&mut self) -> io::Result<()> {
        if self.ticker.is_some() {
            return Ok(());
        }
        self.start_manual_ticks();
        match self.schedule_ticks() {
            Ok(ticker) => {
                self.ticker = Some(ticker);
                log::info!("compass started, tick every {:?}", self.rate);
                Ok(())
            }
            Err(e) => {
                self.unsubscribe_inputs();
                Err(e)
            }
        }
    }

    fn stop(&mut self) {
        if let Some(mut ticker) = self.ticker.take() {
            ticker.cancel();
        }
        self.unsubscribe_inputs();
    }

    fn is_running(&self) -> bool {
        self.inputs.is_some()
    }
}

impl Drop for Compass {
    fn drop(&mut self) {
        self.stop();
    }
}
