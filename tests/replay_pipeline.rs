use std::io::{Cursor, Write};

use approx::assert_abs_diff_eq;
use flate2::write::GzEncoder;
use flate2::Compression;

use indoor_nav_rs::config::{MatcherConfig, NavConfig};
use indoor_nav_rs::fingerprint::{FingerprintDatabase, MagneticMatcher, RadioMatcher};
use indoor_nav_rs::replay::{parse_session, read_session, ReplayPipeline, SessionEvent};
use indoor_nav_rs::types::{Acceleration, AngularSpeed, MagneticField, PositionEstimate, RssiScan};

const MS: u64 = 1_000_000;

/// One RSSI column per access point; row i sits at x = 2.5·i.
const RADIO_MAP: &str = "0\t0\t-40\t-70\t-90\t-90\t-90\n\
2.5\t0\t-70\t-40\t-70\t-90\t-90\n\
5\t0\t-90\t-70\t-40\t-70\t-90\n\
7.5\t0\t-90\t-90\t-70\t-40\t-70\n\
10\t0\t-90\t-90\t-90\t-70\t-40\n";

fn distance(a: &PositionEstimate, b: &PositionEstimate) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

fn radio_levels(row: usize) -> Vec<f64> {
    let db = FingerprintDatabase::parse(RADIO_MAP, None).unwrap();
    db.rows()[row].features.clone()
}

/// Flat device facing north, 2 s at 100 Hz, one step every 100 ms with the
/// heading left to the compass, and an RSSI scan every 500 ms taken at the
/// true position.
fn walk_north() -> Vec<SessionEvent> {
    let mut events = Vec::new();
    let mut steps = 0usize;
    for i in 0..=200u64 {
        let t = i * 10 * MS;
        events.push(SessionEvent::Accel(Acceleration::new(0.0, 0.0, 9.81, t)));
        events.push(SessionEvent::Mag(MagneticField::new(0.0, 20.0, -40.0, t)));
        events.push(SessionEvent::Gyro(AngularSpeed::new(0.0, 0.0, 0.0, t)));

        if i > 0 && i % 10 == 0 {
            steps += 1;
            events.push(SessionEvent::Step {
                timestamp: t,
                heading: None,
                length: None,
            });
        }
        if i > 0 && i % 50 == 0 {
            events.push(SessionEvent::Rssi(RssiScan {
                timestamp: t,
                levels: radio_levels(steps / 5),
            }));
        }
    }
    events
}

fn run(pipeline: &mut ReplayPipeline, events: &[SessionEvent]) -> Vec<PositionEstimate> {
    let mut out = Vec::new();
    for event in events {
        pipeline.feed(event);
        out.extend(pipeline.drain_positions());
    }
    out
}

#[test]
fn test_walk_with_radio_fixes() {
    let db = FingerprintDatabase::parse(RADIO_MAP, None).unwrap();
    let radio = RadioMatcher::new(db, 0, MatcherConfig::knn(1)).unwrap();
    let mut pipeline = ReplayPipeline::new(
        &NavConfig::default(),
        PositionEstimate::new(0.0, 0.0, 0, 0),
        None,
        Some(radio),
    )
    .unwrap();

    let positions = run(&mut pipeline, &walk_north());

    // 20 steps plus 4 radio fixes.
    assert_eq!(positions.len(), 24);
    assert!(positions.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    let last = positions.last().unwrap();
    assert_eq!(last.timestamp, 2000 * MS);
    assert_abs_diff_eq!(last.x, 10.0, epsilon = 1e-9);
    assert_abs_diff_eq!(last.y, 0.0, epsilon = 1e-9);

    let heading = pipeline.latest_heading().unwrap();
    assert_abs_diff_eq!(heading.azimuth, 0.0, epsilon = 1e-12);

    let stats = pipeline.stats();
    assert_eq!(stats.steps, 20);
    assert_eq!(stats.steps_without_heading, 0);
    assert_eq!(stats.rssi, 4);
    assert_eq!(stats.positions, 24);
    // Ticks at 0, 30, 60, ... ms of gyro time.
    assert_eq!(stats.headings, 67);
}

#[test]
fn test_radio_fix_pulls_drifted_track_back() {
    let db = FingerprintDatabase::parse(RADIO_MAP, None).unwrap();
    let radio = RadioMatcher::new(db, 0, MatcherConfig::knn(1)).unwrap();
    let mut pipeline = ReplayPipeline::new(
        &NavConfig::default(),
        PositionEstimate::new(0.0, 0.0, 0, 0),
        None,
        Some(radio),
    )
    .unwrap();

    // Five steps with a biased heading, then a scan taken at (2.5, 0).
    let mut events: Vec<SessionEvent> = (1..=5u64)
        .map(|i| SessionEvent::Step {
            timestamp: i * 100 * MS,
            heading: Some(0.3),
            length: None,
        })
        .collect();
    events.push(SessionEvent::Rssi(RssiScan {
        timestamp: 600 * MS,
        levels: radio_levels(1),
    }));

    let positions = run(&mut pipeline, &events);
    assert_eq!(positions.len(), 6);

    let drifted = positions[4];
    let corrected = positions[5];
    let target = PositionEstimate::new(2.5, 0.0, 0, 0);
    assert!(distance(&corrected, &target) < distance(&drifted, &target));
}

#[test]
fn test_magnetic_locator_on_shared_channel() {
    let db = FingerprintDatabase::parse("3\t4\t0\t20\t-40", Some(3)).unwrap();
    let magnetic = MagneticMatcher::new(db, 0, MatcherConfig::threshold(1.0)).unwrap();
    let mut pipeline = ReplayPipeline::new(
        &NavConfig::default(),
        PositionEstimate::new(0.0, 0.0, 0, 0),
        Some(magnetic),
        None,
    )
    .unwrap();

    let positions = run(
        &mut pipeline,
        &[
            SessionEvent::Accel(Acceleration::new(0.0, 0.0, 9.81, 0)),
            SessionEvent::Mag(MagneticField::new(0.0, 20.0, -40.0, 5)),
            SessionEvent::Mag(MagneticField::new(30.0, 20.0, -40.0, 6)),
        ],
    );

    // Only the first reading matches the map.
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].timestamp, 5);
    assert!(positions[0].x > 0.0 && positions[0].y > 0.0);
}

#[test]
fn test_gzipped_session_round_trip() {
    let events = walk_north();
    let mut lines = String::new();
    for event in &events[..30] {
        lines.push_str(&serde_json::to_string(event).unwrap());
        lines.push('\n');
    }

    let path = std::env::temp_dir().join(format!("indoor_nav_session_{}.jsonl.gz", std::process::id()));
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(lines.as_bytes()).unwrap();
    std::fs::write(&path, encoder.finish().unwrap()).unwrap();

    let from_gz = read_session(&path).unwrap();
    std::fs::remove_file(&path).ok();

    let from_text = parse_session(Cursor::new(lines)).unwrap();
    assert_eq!(from_gz, from_text);
    assert_eq!(from_gz, events[..30].to_vec());
}
