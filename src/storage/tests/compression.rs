use std::sync::atomic::AtomicBool;

use super::*;
use crate::storage::chunk::ChunkData;

fn day_one_table(config: StorageConfig) -> Table<TelemetryPoint> {
    let table = Table::new(config).unwrap();
    for (t, drone) in [
        ("2024-01-01T01:00:00Z", 1),
        ("2024-01-01T03:00:00Z", 2),
        ("2024-01-01T05:00:00Z", 1),
        ("2024-01-01T07:00:00Z", 3),
        ("2024-01-01T09:00:00Z", 2),
    ] {
        table.write(telemetry_point(t, drone, 60)).unwrap();
    }
    // head chunk
    table.write(telemetry_point("2024-01-02T00:30:00Z", 9, 60)).unwrap();
    table
}

#[test]
fn test_compression_waits_for_threshold() {
    let table = day_one_table(test_config());
    let chunk = ts("2024-01-01T00:00:00Z");

    // Interval closed at 01-02, threshold is one more day
    let early = table.compress(chunk, ts("2024-01-02T12:00:00Z")).unwrap();
    assert_eq!(early, CompressOutcome::NotEligible);
    assert_eq!(table.chunks()[0].state, ChunkState::Raw);

    let outcome = table.compress(chunk, ts("2024-01-03T00:00:00Z")).unwrap();
    assert!(matches!(outcome, CompressOutcome::Compressed { rows: 5, segments: 3, .. }));
    assert_eq!(table.chunks()[0].state, ChunkState::Compressed);
}

#[test]
fn test_compression_is_idempotent() {
    let table = day_one_table(test_config());
    let chunk = ts("2024-01-01T00:00:00Z");
    let now = ts("2024-01-05T00:00:00Z");
    let before = table.query(&PointFilter::default()).unwrap();

    table.compress(chunk, now).unwrap();
    let info = table.chunks();
    let after_first = table.query(&PointFilter::default()).unwrap();

    assert_eq!(table.compress(chunk, now).unwrap(), CompressOutcome::AlreadyCompressed);
    assert_eq!(table.chunks(), info);
    assert_eq!(table.query(&PointFilter::default()).unwrap(), after_first);
    assert_eq!(after_first, before);
}

#[test]
fn test_late_write_into_compressed_chunk_is_rejected() {
    let table = telemetry_table();
    table.write(telemetry_point("2024-01-01T01:00:00Z", 1, 90)).unwrap();
    table.write(telemetry_point("2024-01-02T10:00:00Z", 1, 85)).unwrap();
    table.compress(ts("2024-01-01T00:00:00Z"), ts("2024-01-03T00:00:00Z")).unwrap();

    let err = table.write(telemetry_point("2024-01-01T02:00:00Z", 1, 80)).unwrap_err();
    assert!(matches!(err, Error::ChunkSealed { kind: PointKind::Telemetry, .. }));
    assert_eq!(table.stats().rejected_sealed, 1);
    let day_one = PointFilter::range(ts("2024-01-01T00:00:00Z"), ts("2024-01-02T00:00:00Z"));
    let found = table.query(&day_one).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].battery_level, 90);
}

#[test]
fn test_late_write_into_open_chunk_is_accepted() {
    let table = telemetry_table();
    table.write(telemetry_point("2024-01-02T10:00:00Z", 1, 90)).unwrap();
    // Out of order, but the 01-01 chunk has not been compressed
    table.write(telemetry_point("2024-01-01T23:00:00Z", 1, 91)).unwrap();

    table.compress_due(ts("2024-01-02T12:00:00Z"), &AtomicBool::new(false));
    assert_eq!(table.stats().compressed_chunks, 0);
}

#[test]
fn test_delete_from_compressed_chunk_is_rejected() {
    let table = day_one_table(test_config());
    table.compress(ts("2024-01-01T00:00:00Z"), ts("2024-01-03T00:00:00Z")).unwrap();

    let key = telemetry_point("2024-01-01T01:00:00Z", 1, 60).key();
    assert!(matches!(table.delete(&key), Err(Error::ChunkSealed { .. })));
}

#[test]
fn test_segments_group_by_entity() {
    let table = day_one_table(test_config());
    table.compress(ts("2024-01-01T00:00:00Z"), ts("2024-01-03T00:00:00Z")).unwrap();

    let chunk = table.chunk_at(ts("2024-01-01T00:00:00Z")).unwrap();
    let ChunkData::Compressed(compressed) = chunk.data() else {
        panic!("chunk was not compressed");
    };
    let segment = compressed.segment(2).unwrap();
    assert_eq!(segment.rows, 2);
    assert_eq!(segment.min_time, ts("2024-01-01T03:00:00Z"));
    assert_eq!(segment.max_time, ts("2024-01-01T09:00:00Z"));
    assert!(compressed.segment(4).is_none());

    let found = table.query(&PointFilter::default().drone(2)).unwrap();
    assert_eq!(
        found.iter().map(|p| p.time).collect::<Vec<_>>(),
        vec![ts("2024-01-01T09:00:00Z"), ts("2024-01-01T03:00:00Z")]
    );
    let windowed = PointFilter::range(ts("2024-01-01T04:00:00Z"), ts("2024-01-01T08:00:00Z"));
    assert_eq!(table.query(&windowed).unwrap().len(), 2);
}

#[test]
fn test_progress_segments_by_mission() {
    let table = progress_table();
    table.write(progress_point("2024-01-01T10:05:00Z", 7, 1, 10)).unwrap();
    table.write(progress_point("2024-01-01T10:10:00Z", 7, 2, 15)).unwrap();
    table.write(progress_point("2024-01-01T10:20:00Z", 8, 1, 50)).unwrap();
    table.write(progress_point("2024-01-01T12:00:00Z", 9, 3, 5)).unwrap();

    let outcome = table.compress(ts("2024-01-01T10:00:00Z"), ts("2024-01-01T17:00:00Z")).unwrap();
    assert!(matches!(outcome, CompressOutcome::Compressed { rows: 3, segments: 2, .. }));
    assert_eq!(table.query(&PointFilter::default().mission(7)).unwrap().len(), 2);
}

#[test]
fn test_every_codec_round_trips() {
    for codec in [Compression::None, Compression::Lz4, Compression::Zstd] {
        let table = day_one_table(test_config().compression(codec.clone()));
        let before = table.query(&PointFilter::default()).unwrap();

        table.compress(ts("2024-01-01T00:00:00Z"), ts("2024-01-03T00:00:00Z")).unwrap();
        assert_eq!(table.query(&PointFilter::default()).unwrap(), before, "codec {codec:?}");
        assert!(table.stats().encoded_bytes > 0);
    }
}

#[test]
fn test_spilled_segments() {
    let config = spill_config();
    let dir = config.spill_path.clone().unwrap();
    let table = day_one_table(config);
    let before = table.query(&PointFilter::default()).unwrap();

    table.compress(ts("2024-01-01T00:00:00Z"), ts("2024-01-03T00:00:00Z")).unwrap();
    assert_eq!(spill_files(&dir), 3);
    assert_eq!(table.query(&PointFilter::default()).unwrap(), before);

    // Keep a head chunk so the compressed one can expire
    table.write(telemetry_point("2024-06-01T00:00:00Z", 1, 60)).unwrap();
    let report = table.drop_chunks_older_than(ts("2024-06-01T00:00:00Z"), TimeDelta::days(90));
    assert_eq!(report.rows, 6);
    assert_eq!(spill_files(&dir), 0);
}

#[test]
fn test_compress_due_only_touches_eligible_chunks() {
    let table = telemetry_table();
    for t in ["2024-01-01T10:00:00Z", "2024-01-02T10:00:00Z", "2024-01-03T10:00:00Z"] {
        table.write(telemetry_point(t, 1, 60)).unwrap();
    }

    let report = table.compress_due(ts("2024-01-03T12:00:00Z"), &AtomicBool::new(false));
    assert_eq!(report.compressed, 1);
    assert_eq!(report.rows, 1);

    let states: Vec<ChunkState> = table.chunks().iter().map(|c| c.state).collect();
    assert_eq!(states, vec![ChunkState::Compressed, ChunkState::Raw, ChunkState::Raw]);

    // Already compressed chunks are skipped on the next pass
    let report = table.compress_due(ts("2024-01-03T12:00:00Z"), &AtomicBool::new(false));
    assert_eq!(report, CompressionReport::default());
}

#[test]
fn test_cancelled_pass_leaves_chunks_raw() {
    let table = telemetry_table();
    for t in ["2024-01-01T10:00:00Z", "2024-01-02T10:00:00Z"] {
        table.write(telemetry_point(t, 1, 60)).unwrap();
    }

    let report = table.compress_due(ts("2024-01-10T00:00:00Z"), &AtomicBool::new(true));
    assert!(report.cancelled);
    assert_eq!(report.compressed, 0);
    assert_eq!(table.stats().compressed_chunks, 0);

    // 01-02 is the head chunk
    let report = table.compress_due(ts("2024-01-10T00:00:00Z"), &AtomicBool::new(false));
    assert_eq!(report.compressed, 1);
}

#[test]
fn test_sealing_blocks_writes_but_not_reads() {
    let table = day_one_table(test_config());
    let chunk = table.chunk_at(ts("2024-01-01T00:00:00Z")).unwrap();

    let raw = chunk.begin_seal().unwrap();
    assert_eq!(chunk.state(), ChunkState::Sealing);
    assert!(chunk.begin_seal().is_none());
    assert!(matches!(
        table.write(telemetry_point("2024-01-01T11:00:00Z", 1, 60)),
        Err(Error::ChunkSealed { .. })
    ));
    assert_eq!(table.query(&PointFilter::default()).unwrap().len(), 6);

    // A failed build hands the chunk back to writers
    chunk.abort_seal();
    assert_eq!(chunk.state(), ChunkState::Raw);
    assert_eq!(raw.len(), 5);
    table.write(telemetry_point("2024-01-01T11:00:00Z", 1, 60)).unwrap();
}

#[test]
fn test_head_chunk_is_never_compressed() {
    let table = telemetry_table();
    table.write(telemetry_point("2024-01-01T10:00:00Z", 1, 60)).unwrap();
    let far_future = ts("2100-01-01T00:00:00Z");

    let report = table.compress_due(far_future, &AtomicBool::new(false));
    assert_eq!(report.compressed, 0);
    assert_eq!(
        table.compress(ts("2024-01-01T00:00:00Z"), far_future).unwrap(),
        CompressOutcome::NotEligible
    );
    table.write(telemetry_point("2024-01-01T11:00:00Z", 1, 60)).unwrap();

    // Once a newer chunk exists the old one is sealed
    table.write(telemetry_point("2024-01-05T10:00:00Z", 1, 60)).unwrap();
    assert_eq!(table.compress_due(far_future, &AtomicBool::new(false)).compressed, 1);
}

#[test]
fn test_chunk_containing_now_is_never_compressed() {
    let config = test_config().compress_after(TimeDelta::hours(-12));
    let table = Table::<TelemetryPoint>::new(config).unwrap();
    table.write(telemetry_point("2024-01-01T10:00:00Z", 1, 60)).unwrap();
    table.write(telemetry_point("2024-01-02T10:00:00Z", 1, 60)).unwrap();

    // A negative threshold would otherwise make the 01-01 chunk due at 18:00 that day
    let report = table.compress_due(ts("2024-01-01T18:00:00Z"), &AtomicBool::new(false));
    assert_eq!(report.compressed, 0);
    let report = table.compress_due(ts("2024-01-02T00:00:00Z"), &AtomicBool::new(false));
    assert_eq!(report.compressed, 1);
}
