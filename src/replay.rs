// replay.rs: Drives the whole pipeline from a recorded session.
//
// Sessions are JSON Lines (optionally gzipped), one tagged event per line.
// The compass is ticked on sensor time, once per configured period of gyro
// timestamps, so a replay is deterministic.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::sync::{Arc, Mutex};

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use crate::compass::Compass;
use crate::config::NavConfig;
use crate::error::SessionError;
use crate::fingerprint::{MagneticMatcher, RadioMatcher};
use crate::observer::{Channel, Emitter};
use crate::strategy::{KalmanStrategy, LocatorRunner, StrategyRunner, MAGNETIC_SOURCE, RADIO_SOURCE};
use crate::types::{
    Acceleration, AngularSpeed, Heading, MagneticField, PositionEstimate, RssiScan, StepEvent,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SessionEvent {
    Accel(Acceleration),
    Gyro(AngularSpeed),
    Mag(MagneticField),
    Step {
        timestamp: u64,
        /// `None` means "use the compass".
        #[serde(default)]
        heading: Option<f64>,
        #[serde(default)]
        length: Option<f64>,
    },
    Rssi(RssiScan),
}

pub fn parse_session<R: BufRead>(reader: R) -> Result<Vec<SessionEvent>, SessionError> {
    let mut events = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line.map_err(|source| SessionError::Read {
            line: line_no,
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(&line).map_err(|source| SessionError::Parse {
            line: line_no,
            source,
        })?;
        events.push(event);
    }
    Ok(events)
}

/// Reads a `.jsonl` or `.jsonl.gz` session file.
pub fn read_session(path: &Path) -> Result<Vec<SessionEvent>, SessionError> {
    let file = File::open(path).map_err(|source| SessionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|e| e == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let events = parse_session(BufReader::new(reader))?;
    log::info!("read {} events from {}", events.len(), path.display());
    Ok(events)
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ReplayStats {
    pub accel: u64,
    pub gyro: u64,
    pub mag: u64,
    pub steps: u64,
    pub steps_without_heading: u64,
    pub rssi: u64,
    pub headings: u64,
    pub positions: u64,
}

pub struct ReplayPipeline {
    accel: Channel<Acceleration>,
    gyro: Channel<AngularSpeed>,
    mag: Channel<MagneticField>,
    steps: Channel<StepEvent>,
    rssi: Channel<RssiScan>,

    compass: Compass,
    runner: StrategyRunner,
    magnetic: Option<LocatorRunner<MagneticField>>,
    radio: Option<LocatorRunner<RssiScan>>,

    latest_heading: Arc<Mutex<Option<Heading>>>,
    positions: Arc<Mutex<Vec<PositionEstimate>>>,

    step_length: f64,
    tick_period_ns: u64,
    next_tick_ns: Option<u64>,
    stats: ReplayStats,
}

impl ReplayPipeline {
    pub fn new(
        config: &NavConfig,
        start: PositionEstimate,
        magnetic: Option<MagneticMatcher>,
        radio: Option<RadioMatcher>,
    ) -> io::Result<Self> {
        let accel = Channel::new();
        let gyro = Channel::new();
        let mag = Channel::new();
        let steps = Channel::new();
        let rssi = Channel::new();

        let mut compass = Compass::new(&config.compass, accel.clone(), gyro.clone(), mag.clone());
        compass.start_manual_ticks();

        let latest_heading = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&latest_heading);
        compass.headings().subscribe(move |h: &Heading| {
            if let Ok(mut latest) = slot.lock() {
                *latest = Some(*h);
            }
        });

        let strategy = KalmanStrategy::new(&start, &config.strategy);
        let mut runner = StrategyRunner::new(strategy, steps.clone());

        let magnetic = magnetic.map(|matcher| {
            let locator = LocatorRunner::new(matcher, mag.clone());
            runner.add_source(MAGNETIC_SOURCE, config.magnetic.position_std, locator.positions());
            locator
        });
        let radio = radio.map(|matcher| {
            let locator = LocatorRunner::new(matcher, rssi.clone());
            runner.add_source(RADIO_SOURCE, config.radio.position_std, locator.positions());
            locator
        });

        let positions = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&positions);
        runner.positions().subscribe(move |p: &PositionEstimate| {
            if let Ok(mut out) = sink.lock() {
                out.push(*p);
            }
        });
        runner.start()?;

        let mut pipeline = Self {
            accel,
            gyro,
            mag,
            steps,
            rssi,
            compass,
            runner,
            magnetic,
            radio,
            latest_heading,
            positions,
            step_length: config.strategy.step_length,
            tick_period_ns: config.compass.rate().as_nanos() as u64,
            next_tick_ns: None,
            stats: ReplayStats::default(),
        };
        // Locators subscribe after the compass so each magnetometer sample
        // updates the heading source first.
        if let Some(locator) = pipeline.magnetic.as_mut() {
            locator.start()?;
        }
        if let Some(locator) = pipeline.radio.as_mut() {
            locator.start()?;
        }
        Ok(pipeline)
    }

    pub fn feed(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::Accel(sample) => {
                self.stats.accel += 1;
                self.accel.publish(sample);
            }
            SessionEvent::Gyro(sample) => {
                self.stats.gyro += 1;
                self.gyro.publish(sample);
                self.tick_on_sensor_time(sample.timestamp);
            }
            SessionEvent::Mag(sample) => {
                self.stats.mag += 1;
                self.mag.publish(sample);
            }
            SessionEvent::Step {
                timestamp,
                heading,
                length,
            } => {
                self.stats.steps += 1;
                let compass_heading = self.latest_heading().map(|h| h.azimuth);
                let Some(heading) = heading.or(compass_heading) else {
                    self.stats.steps_without_heading += 1;
                    log::debug!("step at {} ns before any heading; skipped", timestamp);
                    return;
                };
                self.steps.publish(&StepEvent {
                    heading,
                    length: length.unwrap_or(self.step_length),
                    timestamp: *timestamp,
                });
            }
            SessionEvent::Rssi(scan) => {
                self.stats.rssi += 1;
                self.rssi.publish(scan);
            }
        }
    }

    fn tick_on_sensor_time(&mut self, timestamp: u64) {
        let due = *self.next_tick_ns.get_or_insert(timestamp);
        if timestamp < due {
            return;
        }
        if self.compass.tick().is_some() {
            self.stats.headings += 1;
        }
        self.next_tick_ns = Some(timestamp.saturating_add(self.tick_period_ns));
    }

    pub fn latest_heading(&self) -> Option<Heading> {
        self.latest_heading.lock().ok().and_then(|h| *h)
    }

    /// Positions published since the previous call, oldest first.
    pub fn drain_positions(&mut self) -> Vec<PositionEstimate> {
        let drained = match self.positions.lock() {
            Ok(mut out) => std::mem::take(&mut *out),
            Err(_) => Vec::new(),
        };
        self.stats.positions += drained.len() as u64;
        drained
    }

    pub fn current_position(&self, timestamp: u64) -> Option<PositionEstimate> {
        self.runner
            .strategy()
            .lock()
            .ok()
            .map(|s| s.position(timestamp))
    }

    pub fn stats(&self) -> &ReplayStats {
        &self.stats
    }
}
