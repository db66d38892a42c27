use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use arrow::util::pretty::pretty_format_batches;
use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;

use fleetseries::aggregate::{AggregateKind, InMemoryFleetDirectory};
use fleetseries::storage::{Coordinate, PointFilter, Record, TelemetryPoint};
use fleetseries::{Engine, EngineConfig, Granularity, PointKind, QueryFilter, Result};

const NUM_DRONES: i32 = 50;
const NUM_FLEETS: i32 = 5;
const DAYS: i64 = 7;
const SAMPLE_INTERVAL_SECS: i64 = 30;

pub fn run_benchmarks() -> Result<()> {
    let samples_per_drone = DAYS * 24 * 3600 / SAMPLE_INTERVAL_SECS;
    println!(
        "Running benchmarks with {} drones x {} samples ({} rows)...",
        NUM_DRONES,
        samples_per_drone,
        NUM_DRONES as i64 * samples_per_drone
    );

    let start_time = DateTime::from_timestamp(1_704_067_200, 0).unwrap_or_default(); // 2024-01-01
    let now = start_time + TimeDelta::days(DAYS + 1);
    let engine = setup_engine()?;

    let points = generate_test_data(start_time, samples_per_drone);
    benchmark_ingest(&engine, points)?;

    let filter = QueryFilter::default()
        .drone(7)
        .between(start_time + TimeDelta::days(2), start_time + TimeDelta::days(3));
    let raw_before = time_ms(|| engine.query(PointKind::Telemetry, &filter, Granularity::Raw))?;

    benchmark_compression(&engine, now);

    let raw_after = time_ms(|| engine.query(PointKind::Telemetry, &filter, Granularity::Raw))?;
    println!("\nRaw query (1 drone, 1 day, capped):");
    println!("Uncompressed: {:.2}ms", raw_before.0);
    println!("Compressed:   {:.2}ms", raw_after.0);

    for kind in [AggregateKind::HourlyDroneStats, AggregateKind::WeeklyFleetUtilization] {
        let (elapsed, report) = time_ms(|| engine.backfill(kind, start_time, now, now))?;
        println!(
            "Backfill {}: {:.2}ms ({} points -> {} buckets)",
            kind, elapsed, report.points_read, report.buckets_written
        );
    }

    let (elapsed, rows) = time_ms(|| {
        engine.query(PointKind::Telemetry, &QueryFilter::default().drone(7), Granularity::Hour)
    })?;
    println!("Hourly rollup query: {:.2}ms ({} rows)", elapsed, rows.len());

    print_sample(&engine, start_time)
}

fn setup_engine() -> Result<Engine> {
    let fleets = Arc::new(InMemoryFleetDirectory::new());
    for drone_id in 1..=NUM_DRONES {
        fleets.assign(drone_id, drone_id % NUM_FLEETS + 1);
    }
    Engine::new(EngineConfig::default(), fleets)
}

fn generate_test_data(start_time: DateTime<Utc>, samples_per_drone: i64) -> Vec<TelemetryPoint> {
    let mut rng = rand::rng();
    let mut points = Vec::with_capacity((NUM_DRONES as i64 * samples_per_drone) as usize);

    for drone_id in 1..=NUM_DRONES {
        let mut latitude = 40.0 + rng.random::<f64>();
        let mut longitude = -74.0 + rng.random::<f64>();
        for i in 0..samples_per_drone {
            latitude += rng.random_range(-0.0005..0.0005);
            longitude += rng.random_range(-0.0005..0.0005);
            points.push(TelemetryPoint {
                time: start_time + TimeDelta::seconds(i * SAMPLE_INTERVAL_SECS),
                drone_id,
                mission_id: Some(drone_id % 10 + 1),
                latitude: Coordinate::from_degrees(latitude),
                longitude: Coordinate::from_degrees(longitude),
                altitude: (rng.random_range(50.0..400.0_f64) * 100.0).round() / 100.0,
                battery_level: rng.random_range(5..=100),
                speed: (rng.random_range(0.0..25.0_f64) * 100.0).round() / 100.0,
                signal_strength: rng.random_range(-90..=-40),
                temperature: (rng.random_range(-5.0..35.0_f64) * 100.0).round() / 100.0,
            });
        }
    }
    points
}

fn benchmark_ingest(engine: &Engine, points: Vec<TelemetryPoint>) -> Result<()> {
    println!("Ingesting telemetry...");
    let total = points.len();
    let start = Instant::now();
    for point in points {
        engine.telemetry().write(point)?;
    }
    let duration = start.elapsed().as_secs_f64() * 1000.0;
    println!(
        "Ingest completed in {:.2}ms ({:.0} points/s)",
        duration,
        total as f64 / start.elapsed().as_secs_f64()
    );
    Ok(())
}

fn benchmark_compression(engine: &Engine, now: DateTime<Utc>) {
    let before = engine.table_stats(PointKind::Telemetry);
    let start = Instant::now();
    let report = engine.compress(PointKind::Telemetry, now, &AtomicBool::new(false));
    let duration = start.elapsed().as_secs_f64() * 1000.0;
    let after = engine.table_stats(PointKind::Telemetry);

    println!("\nCompression:");
    println!(
        "Chunks compressed: {} ({} rows) in {:.2}ms",
        report.compressed, report.rows, duration
    );
    println!(
        "Raw rows {} -> {}, encoded bytes {}",
        before.raw_rows, after.raw_rows, after.encoded_bytes
    );
}

fn print_sample(engine: &Engine, start_time: DateTime<Utc>) -> Result<()> {
    let filter = PointFilter::range(start_time, start_time + TimeDelta::minutes(2)).drone(1);
    let sample = engine.telemetry().query(&filter)?;
    let batch = TelemetryPoint::to_batch(&sample)?;
    println!("\nSample rows:\n{}", pretty_format_batches(&[batch])?);
    Ok(())
}

fn time_ms<T>(f: impl FnOnce() -> Result<T>) -> Result<(f64, T)> {
    let start = Instant::now();
    let value = f()?;
    Ok((start.elapsed().as_secs_f64() * 1000.0, value))
}
