use super::*;

#[test]
fn test_far_future_now_keeps_open_chunk() {
    let table = telemetry_table();
    table.write(telemetry_point("2024-01-01T00:00:00Z", 1, 60)).unwrap();

    let report = table.drop_chunks_older_than(ts("2100-01-01T00:00:00Z"), TimeDelta::days(90));
    assert!(report.dropped.is_empty());
    assert_eq!(table.chunks().len(), 1);
}

#[test]
fn test_expired_chunks_are_dropped() {
    let table = telemetry_table();
    let times = [
        "2024-01-01T10:00:00Z",
        "2024-01-02T10:00:00Z",
        "2024-01-17T10:00:00Z",
        "2024-04-15T10:00:00Z",
    ];
    for t in times {
        table.write(telemetry_point(t, 1, 60)).unwrap();
    }

    // Cutoff is 2024-01-16T12:00Z
    let report = table.enforce_retention(ts("2024-04-15T12:00:00Z"));
    assert_eq!(
        report.dropped.iter().map(|r| r.start).collect::<Vec<_>>(),
        vec![ts("2024-01-01T00:00:00Z"), ts("2024-01-02T00:00:00Z")]
    );
    assert_eq!(report.rows, 2);
    assert_eq!(table.chunks().len(), 2);
    assert_eq!(table.query(&PointFilter::default()).unwrap().len(), 2);
}

#[test]
fn test_retention_is_idempotent() {
    let table = telemetry_table();
    for t in ["2024-01-01T10:00:00Z", "2024-04-15T10:00:00Z"] {
        table.write(telemetry_point(t, 1, 60)).unwrap();
    }
    let now = ts("2024-04-15T12:00:00Z");

    assert_eq!(table.enforce_retention(now).dropped.len(), 1);
    assert_eq!(table.enforce_retention(now), DropReport::default());
}

#[test]
fn test_chunk_containing_now_survives_skewed_horizon() {
    let table = telemetry_table();
    table.write(telemetry_point("2024-01-01T10:00:00Z", 1, 60)).unwrap();
    table.write(telemetry_point("2024-03-01T10:00:00Z", 1, 60)).unwrap();

    // A negative horizon puts the cutoff ahead of `now`
    let report = table.drop_chunks_older_than(ts("2024-01-01T12:00:00Z"), TimeDelta::days(-10));
    assert!(report.dropped.is_empty());
}

#[test]
fn test_compressed_chunks_expire_too() {
    let table = progress_table();
    table.write(progress_point("2024-01-01T10:15:00Z", 1, 1, 10)).unwrap();
    table.write(progress_point("2024-01-01T10:45:00Z", 1, 1, 20)).unwrap();
    table.write(progress_point("2024-02-15T08:00:00Z", 1, 1, 90)).unwrap();
    table.compress(ts("2024-01-01T10:00:00Z"), ts("2024-01-02T00:00:00Z")).unwrap();

    let report = table.enforce_retention(ts("2024-02-15T09:00:00Z"));
    assert_eq!(report.dropped.len(), 1);
    assert_eq!(report.rows, 2);
    assert_eq!(table.stats().compressed_chunks, 0);
}

#[test]
fn test_unbounded_retention() {
    let table = Table::<TelemetryPoint>::new(test_config().retention(None)).unwrap();
    table.write(telemetry_point("2000-01-01T10:00:00Z", 1, 60)).unwrap();
    table.write(telemetry_point("2024-01-01T10:00:00Z", 1, 60)).unwrap();

    assert!(table.enforce_retention(ts("2024-01-01T12:00:00Z")).dropped.is_empty());
}

#[test]
fn test_dropped_interval_is_writable_again() {
    let table = telemetry_table();
    table.write(telemetry_point("2024-01-01T10:00:00Z", 1, 60)).unwrap();
    table.write(telemetry_point("2024-04-15T10:00:00Z", 1, 60)).unwrap();
    table.enforce_retention(ts("2024-04-15T12:00:00Z"));

    // Same key as the dropped point; it is gone, so this is not a duplicate
    table.write(telemetry_point("2024-01-01T10:00:00Z", 1, 61)).unwrap();
    assert_eq!(table.chunks().len(), 2);
}
