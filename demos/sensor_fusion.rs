//! # Sensor Fusion
//!
//! Two simulated sensors deliver samples with transport jitter: an IMU at
//! 100Hz and a camera at 20Hz that occasionally drops a frame. Each arrival
//! time goes through a [`TimestampEstimator`], then the stream aligner
//! replays both sensors in timestamp order.
//!
//! ```text
//! [IMU]    -> [estimator] -\
//!                           [StreamAligner] -> fused output
//! [camera] -> [estimator] -/
//! ```
//!
//! Run: `RUST_LOG=streamalign=debug cargo run --example sensor_fusion`

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use streamalign::observability::init_metrics;
use streamalign::prelude::*;
use tracing_subscriber::EnvFilter;

const IMU_PERIOD_MS: u64 = 10;
const CAMERA_PERIOD_MS: u64 = 50;
const DURATION_MS: u64 = 2_000;

#[derive(Debug, Clone)]
struct Frame {
    index: u64,
}

/// One arrival of either sensor.
enum Arrival {
    Imu { at: ClockTime, accel: [f32; 3] },
    Camera { at: ClockTime, frame: Frame },
}

impl Arrival {
    fn at(&self) -> ClockTime {
        match self {
            Arrival::Imu { at, .. } | Arrival::Camera { at, .. } => *at,
        }
    }
}

fn simulate(rng: &mut StdRng) -> Vec<Arrival> {
    let mut arrivals = Vec::new();
    for i in 0..DURATION_MS / IMU_PERIOD_MS {
        let at = ClockTime::from_millis(i * IMU_PERIOD_MS + rng.gen_range(1..4));
        arrivals.push(Arrival::Imu {
            at,
            accel: [0.0, 0.0, 9.81f32 + rng.gen_range(-0.05f32..0.05)],
        });
    }
    for index in 0..DURATION_MS / CAMERA_PERIOD_MS {
        if rng.gen_bool(0.05) {
            continue;
        }
        let at = ClockTime::from_millis(index * CAMERA_PERIOD_MS + rng.gen_range(15..30));
        arrivals.push(Arrival::Camera {
            at,
            frame: Frame { index },
        });
    }
    arrivals.sort_by_key(Arrival::at);
    arrivals
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("streamalign=info")),
        )
        .init();
    init_metrics();

    println!("=== Sensor Fusion Example ===\n");

    let mut imu_estimator = TimestampEstimator::new(
        EstimatorConfig::with_window(Duration::from_millis(500))
            .with_initial_period(Duration::from_millis(IMU_PERIOD_MS))
            .with_initial_latency(Duration::from_millis(1)),
    )?;
    let mut camera_estimator = TimestampEstimator::new(
        EstimatorConfig::with_window(Duration::from_secs(1))
            .with_initial_period(Duration::from_millis(CAMERA_PERIOD_MS))
            .with_initial_latency(Duration::from_millis(15))
            .with_lost_threshold(1),
    )?;

    let fused = Rc::new(RefCell::new(Vec::new()));
    let mut aligner = StreamAligner::new(Duration::from_millis(200));

    let sink = fused.clone();
    let imu = aligner.register_stream(
        StreamConfig::new(Duration::from_millis(IMU_PERIOD_MS)).with_name("imu"),
        move |ts, accel: &[f32; 3]| {
            sink.borrow_mut().push(format!("{} imu    z={:.3}", ts, accel[2]))
        },
    )?;
    let sink = fused.clone();
    let camera = aligner.register_stream(
        StreamConfig::new(Duration::from_millis(CAMERA_PERIOD_MS))
            .with_name("camera")
            .with_priority(-2),
        move |ts, frame: &Frame| sink.borrow_mut().push(format!("{} camera #{}", ts, frame.index)),
    )?;

    let mut rng = StdRng::seed_from_u64(2024);
    for arrival in simulate(&mut rng) {
        match arrival {
            Arrival::Imu { at, accel } => aligner.push(imu, imu_estimator.update(at), accel)?,
            Arrival::Camera { at, frame } => {
                aligner.push(camera, camera_estimator.update(at), frame)?
            }
        }
        while aligner.step() {}
    }

    // flush the tail
    aligner.disable_stream(imu)?;
    aligner.disable_stream(camera)?;
    while aligner.step() {}

    for line in fused.borrow().iter().take(20) {
        println!("{}", line);
    }
    println!("... {} samples total\n", fused.borrow().len());

    println!("{}", imu_estimator.status());
    println!("{}", camera_estimator.status());
    println!("== Aligner Status\n{}", aligner.status());

    Ok(())
}
