//! End-to-end tests of the data and event stores against a temp directory.

use pmu_core::time::{Ticks, TICKS_PER_MILLISECOND, TICKS_PER_SECOND};
use pmu_core::{Event, SignalKey};
use pmu_storage::{
    DataSignalReader, DataSignalWriter, EventSignalReader, EventSignalWriter, Level, Resolution,
    SignalMetadata,
};

// 2024-03-09 16:00:00 UTC, aligned to the hour.
const BASE: Ticks = 1_710_000_000 * TICKS_PER_SECOND;

#[test]
fn thirty_hertz_second_buckets() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = DataSignalWriter::new(dir.path(), SignalMetadata::named("freq"));
    for i in 0..90i64 {
        writer.write(BASE + i * TICKS_PER_SECOND / 30, i as f64).unwrap();
    }
    let stats = writer.finish().unwrap();
    assert_eq!(stats.points_written, 90);
    assert_eq!(stats.leaf_files, 3);

    let reader = DataSignalReader::open(dir.path()).unwrap();
    let trend = reader.trend(BASE, BASE + 3 * TICKS_PER_SECOND, 10).unwrap();
    assert_eq!(trend.resolution, Resolution::Aggregated(Level::Second));
    assert_eq!(trend.points.len(), 3);
    assert_eq!(trend.points.iter().map(|p| p.count).sum::<u64>(), 90);

    for (bucket, point) in trend.points.iter().enumerate() {
        let first = bucket as f64 * 30.0;
        assert_eq!(point.count, 30);
        assert_eq!(point.min, first);
        assert_eq!(point.max, first + 29.0);
        assert!((point.mean() - (first + 14.5)).abs() < 1e-9);
    }
}

#[test]
fn unbounded_trend_covers_what_is_stored() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = DataSignalWriter::new(dir.path(), SignalMetadata::named("freq"));
    for i in 0..90i64 {
        writer.write(BASE + i * TICKS_PER_SECOND / 30, 60.0).unwrap();
    }
    writer.finish().unwrap();

    let reader = DataSignalReader::open(dir.path()).unwrap();
    let trend = reader.trend(Ticks::MIN, Ticks::MAX, 10).unwrap();
    assert_eq!(trend.resolution, Resolution::Aggregated(Level::Second));
    assert_eq!(trend.points.iter().map(|p| p.count).collect::<Vec<_>>(), vec![30; 3]);
    assert_eq!(reader.statistics(Ticks::MIN, Ticks::MAX).unwrap().count, 90);

    let raw = reader.trend(Ticks::MIN, Ticks::MAX, 100).unwrap();
    assert_eq!(raw.resolution, Resolution::Raw);
    assert_eq!(raw.points.len(), 90);

    let empty = DataSignalReader::open(dir.path())
        .unwrap()
        .trend(Ticks::MIN, BASE, 10)
        .unwrap();
    assert!(empty.points.is_empty());
}

#[test]
fn samples_read_back_bit_exact() {
    let values = [
        std::f64::consts::PI,
        -0.0,
        f64::MIN_POSITIVE,
        5e-324,
        1e300,
        -123_456.789_012_345,
        f64::INFINITY,
    ];
    let dir = tempfile::tempdir().unwrap();
    let mut writer = DataSignalWriter::new(dir.path(), SignalMetadata::named("angle"));
    let stamps: Vec<Ticks> = (0..values.len() as i64)
        .map(|i| BASE + i * 7 * TICKS_PER_MILLISECOND * 100 + 3)
        .collect();
    for (t, v) in stamps.iter().zip(values) {
        writer.write(*t, v).unwrap();
    }
    writer.finish().unwrap();

    let reader = DataSignalReader::open(dir.path()).unwrap();
    let samples = reader.read_samples(BASE, BASE + 60 * TICKS_PER_SECOND).unwrap();
    assert_eq!(samples.len(), values.len());
    for ((sample, t), v) in samples.iter().zip(&stamps).zip(values) {
        assert_eq!(sample.ticks, *t);
        assert_eq!(sample.value.to_bits(), v.to_bits());
    }
}

#[test]
fn trend_picks_coarser_levels_for_long_ranges() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = DataSignalWriter::new(dir.path(), SignalMetadata::named("mag"));
    // One sample every 10 s for two hours.
    for i in 0..720i64 {
        writer.write(BASE + i * 10 * TICKS_PER_SECOND, (i % 60) as f64).unwrap();
    }
    writer.finish().unwrap();
    let reader = DataSignalReader::open(dir.path()).unwrap();
    let end = BASE + 7200 * TICKS_PER_SECOND;

    let hourly = reader.trend(BASE, end, 10).unwrap();
    assert_eq!(hourly.resolution, Resolution::Aggregated(Level::Hour));
    assert_eq!(hourly.points.iter().map(|p| p.count).collect::<Vec<_>>(), vec![360, 360]);

    let by_minute = reader.trend(BASE, end, 200).unwrap();
    assert_eq!(by_minute.resolution, Resolution::Aggregated(Level::Minute));
    assert_eq!(by_minute.points.len(), 120);
    assert!(by_minute.points.iter().all(|p| p.count == 6));

    let raw = reader.trend(BASE, end, 1000).unwrap();
    assert_eq!(raw.resolution, Resolution::Raw);
    assert_eq!(raw.points.len(), 720);

    // A range starting mid-hour clips the first bucket.
    let partial = reader.trend(BASE + 1800 * TICKS_PER_SECOND, end, 10).unwrap();
    assert_eq!(partial.points.iter().map(|p| p.count).collect::<Vec<_>>(), vec![180, 360]);

    let whole = reader.statistics(BASE, end).unwrap();
    assert_eq!(whole.count, 720);
    assert_eq!((whole.min, whole.max), (0.0, 59.0));
}

#[test]
fn event_durations_are_conserved_across_seconds() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = EventSignalWriter::new(dir.path(), SignalMetadata::named("sag"));
    let events = [(300, 2.5), (4_100, 0.2), (4_700, 3.05), (9_000, 0.0)];
    for (ms, duration) in events {
        let ticks = BASE + ms * TICKS_PER_MILLISECOND;
        let event = Event::new(SignalKey::new("sag"), 0.8, ticks, duration)
            .with_parameter("depth", 0.2)
            .with_parameter("phase_count", 1.0);
        writer.write(&event).unwrap();
    }
    let stats = writer.finish().unwrap();
    assert_eq!(stats.points_written, 4);

    let reader = EventSignalReader::open(dir.path()).unwrap();
    let end = BASE + 20 * TICKS_PER_SECOND;
    let expected: f64 = events.iter().map(|(_, d)| d).sum();

    let total = reader.statistics(BASE, end).unwrap();
    assert_eq!(total.count, 4);
    assert!((total.total_duration() - expected).abs() < 1e-9);

    let mut per_second = 0.0;
    for second in 0..20 {
        let start = BASE + second * TICKS_PER_SECOND;
        per_second += reader.statistics(start, start + TICKS_PER_SECOND).unwrap().total_duration();
    }
    assert!((per_second - expected).abs() < 1e-9);

    let trend = reader.trend(BASE, end, 3).unwrap();
    assert_eq!(trend.resolution, Resolution::Aggregated(Level::Minute));
    let summed: f64 = trend.points.iter().map(|p| p.total_duration()).sum();
    assert!((summed - expected).abs() < 1e-9);

    // Second 6 holds nothing but the tail of the 4.7 s event.
    let tail = reader
        .statistics(BASE + 6 * TICKS_PER_SECOND, BASE + 7 * TICKS_PER_SECOND)
        .unwrap();
    assert!(tail.continuation);
    assert!((tail.total_duration() - 1.0).abs() < 1e-9);

    let records = reader.read_events(BASE, end).unwrap();
    assert_eq!(records.iter().filter(|r| !r.is_continuation()).count(), 4);
    assert!(records.windows(2).all(|w| w[0].ticks <= w[1].ticks));
    assert_eq!(
        reader.parameter_names().to_vec(),
        vec!["depth".to_string(), "phase_count".to_string()]
    );
}

#[test]
fn data_signal_named_event_reopens() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = DataSignalWriter::new(dir.path(), SignalMetadata::named("EVENT"));
    writer.write(BASE, 1.0).unwrap();
    writer.finish().unwrap();

    let reader = DataSignalReader::open(dir.path()).unwrap();
    assert_eq!(reader.metadata().name, "EVENT");
    assert_eq!(reader.read_samples(BASE, BASE + TICKS_PER_SECOND).unwrap().len(), 1);
    assert!(EventSignalReader::open(dir.path()).is_err());
}

#[test]
fn readers_refuse_the_other_kind() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = DataSignalWriter::new(dir.path(), SignalMetadata::named("mag"));
    writer.write(BASE, 1.0).unwrap();
    writer.finish().unwrap();

    let err = EventSignalReader::open(dir.path()).unwrap_err();
    assert!(err.to_string().contains("stored as data, expected event"));
}
