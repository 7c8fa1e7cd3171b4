use clap::{Parser, ValueEnum};
use power_stats::sink::{ColumnKeySelector, SqliteWriter, StorageSink, WindowKeySelector};
use power_stats::{
    AggregatedMeasurementRecord, DayOfWeekKeyFactory, DayOfWeekRecordFactory, HourOfDayKeyFactory,
    HourOfDayRecordFactory, HourOfWeekKeyFactory, HourOfWeekRecordFactory, MeasurementRecord,
    SensorId, SensorKeyFactory, StatKind, TopologyBuilder, TopologyOptions, Tz, WindowPolicy,
    WindowStatsRecordFactory,
};
use spdlog::{Level, LevelFilter, info};
use std::path::PathBuf;
use std::time::{Duration, Instant};

const DAY: Duration = Duration::from_secs(24 * 3600);

#[derive(Clone, Copy, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::Error,
            LogLevel::Warn => Level::Warn,
            LogLevel::Info => Level::Info,
            LogLevel::Debug => Level::Debug,
            LogLevel::Trace => Level::Trace,
        }
    }
}

/// Simulates a fleet of power meters, plus one group meter per ten meters
/// that reports pre-aggregated sums, and runs them through every built-in
/// stat kind.
#[derive(Parser)]
struct Args {
    #[arg(long, default_value_t = 100)]
    sensors: usize,
    /// Readings per sensor.
    #[arg(long, default_value_t = 10_000)]
    readings: usize,
    /// Milliseconds between two readings of a sensor.
    #[arg(long, default_value_t = 60_000)]
    interval: i64,
    #[arg(long, default_value_t = 4)]
    partitions: usize,
    #[arg(long, default_value = "Europe/Paris")]
    zone: String,
    /// Store results in this SQLite database. Without it results are only published.
    #[arg(long)]
    sqlite: Option<PathBuf>,
    /// Keep journals in files under this directory instead of memory.
    #[arg(long)]
    journal_dir: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    spdlog::default_logger().set_level_filter(LevelFilter::MoreSevereEqual(args.log_level.into()));

    let zone: Tz = args
        .zone
        .parse()
        .map_err(|e| format!("unknown time zone '{}': {}", args.zone, e))?;
    info!(
        "[System] Simulating {} sensors x {} readings every {}ms in {}",
        args.sensors, args.readings, args.interval, zone
    );

    let storage = match &args.sqlite {
        Some(path) => {
            info!("[System] Storing results in {}", path.display());
            Some(StorageSink::new(SqliteWriter::open(path)?))
        }
        None => None,
    };

    let total = args.sensors * args.readings;
    let group_total = args.sensors.div_ceil(10) * args.readings;
    let options = TopologyOptions {
        partitions: args.partitions,
        // a kind publishes at most one record per input record
        capacity: total + group_total + 1024,
        in_memory: args.journal_dir.is_none(),
        root_path: args.journal_dir.clone().unwrap_or_else(|| PathBuf::from("data")),
        latency_stats: true,
        progress_interval: Some(1_000_000),
        ..TopologyOptions::default()
    };
    let mut builder = TopologyBuilder::new(options, storage.clone())?;

    let mut minutes = builder.add_stat(
        StatKind::new(
            "minute",
            SensorKeyFactory,
            WindowStatsRecordFactory,
            WindowPolicy::hopping(Duration::from_secs(300), Duration::from_secs(60))
                .with_grace(Duration::from_secs(30)),
        )
        .with_topic("minute-stats")
        .with_storage_key(WindowKeySelector),
    )?;
    let mut hours_of_day = builder.add_stat(
        StatKind::new(
            "hour_of_day",
            HourOfDayKeyFactory,
            HourOfDayRecordFactory,
            WindowPolicy::tumbling(DAY * 7).with_zone(zone),
        )
        .with_topic("hour-of-day-stats")
        .with_storage_key(ColumnKeySelector::new(&[
            "sensor_id",
            "hour_of_day",
            "period_start",
        ])),
    )?;
    let mut days_of_week = builder.add_stat(
        StatKind::new(
            "day_of_week",
            DayOfWeekKeyFactory,
            DayOfWeekRecordFactory,
            WindowPolicy::tumbling(DAY * 28).with_zone(zone),
        )
        .with_topic("day-of-week-stats")
        .with_storage_key(ColumnKeySelector::new(&[
            "sensor_id",
            "day_of_week",
            "period_start",
        ])),
    )?;
    let mut hours_of_week = builder.add_stat(
        StatKind::new(
            "hour_of_week",
            HourOfWeekKeyFactory,
            HourOfWeekRecordFactory,
            WindowPolicy::tumbling(DAY * 28).with_zone(zone),
        )
        .with_topic("hour-of-week-stats")
        .with_storage_key(ColumnKeySelector::new(&[
            "sensor_id",
            "day_of_week",
            "hour_of_day",
            "period_start",
        ])),
    )?;
    let mut topology = builder.build()?;

    let sensors: Vec<SensorId> = (0..args.sensors)
        .map(|i| SensorId::new(&format!("meter-{:05}", i)))
        .collect::<Result<_, _>>()?;
    let groups: Vec<SensorId> = (0..args.sensors.div_ceil(10))
        .map(|i| SensorId::new(&format!("group-{:04}", i)))
        .collect::<Result<_, _>>()?;

    let start = Instant::now();
    let mut group_sums = vec![0.0; groups.len()];
    for step in 0..args.readings {
        let timestamp = step as i64 * args.interval;
        group_sums.iter_mut().for_each(|s| *s = 0.0);
        for (i, sensor) in sensors.iter().enumerate() {
            let value = simulated_watts(i, timestamp);
            group_sums[i / 10] += value;
            topology.send_measurement(&MeasurementRecord::new(*sensor, timestamp, value))?;
        }
        for (group, sum) in groups.iter().zip(&group_sums) {
            topology.send_aggregated(&AggregatedMeasurementRecord::new(*group, timestamp, *sum))?;
        }
    }
    info!(
        "[System] Sent {} records in {}ms, waiting for the pipelines...",
        total + group_total,
        start.elapsed().as_millis()
    );

    let drained = topology.shutdown(Duration::from_secs(600));
    let elapsed = start.elapsed();
    info!(
        "[System] Finished in {}ms ({:.0} rec/s), drained: {}",
        elapsed.as_millis(),
        (total + group_total) as f64 / elapsed.as_secs_f64(),
        drained
    );

    info!("[Output] minute-stats: {} records", minutes.drain().len());
    info!("[Output] hour-of-day-stats: {} records", hours_of_day.drain().len());
    info!("[Output] day-of-week-stats: {} records", days_of_week.drain().len());
    info!("[Output] hour-of-week-stats: {} records", hours_of_week.drain().len());
    if let Some(storage) = storage {
        info!(
            "[Output] storage: {} writes, {} failures",
            storage.writes(),
            storage.failures()
        );
    }
    Ok(())
}

/// Base load plus a daily curve and a little per-sensor noise.
fn simulated_watts(sensor: usize, timestamp: i64) -> f64 {
    let hour = (timestamp / 3_600_000) % 24;
    let daily = if (7..22).contains(&hour) { 800.0 } else { 250.0 };
    let noise = ((sensor as i64 * 7919 + timestamp / 1_000) % 101) as f64;
    daily + sensor as f64 * 2.0 + noise
}
