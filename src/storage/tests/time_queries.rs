use super::*;

fn times(points: &[TelemetryPoint]) -> Vec<DateTime<Utc>> {
    points.iter().map(|p| p.time).collect()
}

#[test]
fn test_time_range_is_half_open() {
    let table = telemetry_table();
    for t in ["2024-01-01T00:00:00Z", "2024-01-01T00:30:00Z", "2024-01-01T01:00:00Z"] {
        table.write(telemetry_point(t, 1, 50)).unwrap();
    }

    let found = table
        .query(&PointFilter::range(ts("2024-01-01T00:00:00Z"), ts("2024-01-01T01:00:00Z")))
        .unwrap();
    assert_eq!(times(&found), vec![ts("2024-01-01T00:30:00Z"), ts("2024-01-01T00:00:00Z")]);
}

#[test]
fn test_results_newest_first_across_chunks() {
    let table = telemetry_table();
    let inputs = [
        "2024-01-02T08:00:00Z",
        "2024-01-01T12:00:00Z",
        "2024-01-03T01:00:00Z",
        "2024-01-01T06:00:00Z",
    ];
    for t in inputs {
        table.write(telemetry_point(t, 1, 50)).unwrap();
    }

    let found = table.query(&PointFilter::default()).unwrap();
    assert_eq!(
        times(&found),
        vec![
            ts("2024-01-03T01:00:00Z"),
            ts("2024-01-02T08:00:00Z"),
            ts("2024-01-01T12:00:00Z"),
            ts("2024-01-01T06:00:00Z"),
        ]
    );
}

#[test]
fn test_open_ended_ranges() {
    let table = telemetry_table();
    for t in ["2024-01-01T00:00:00Z", "2024-01-02T00:00:00Z", "2024-01-03T00:00:00Z"] {
        table.write(telemetry_point(t, 1, 50)).unwrap();
    }

    let since = PointFilter {
        start: Some(ts("2024-01-02T00:00:00Z")),
        ..Default::default()
    };
    assert_eq!(table.query(&since).unwrap().len(), 2);

    let until = PointFilter {
        end: Some(ts("2024-01-02T00:00:00Z")),
        ..Default::default()
    };
    assert_eq!(times(&table.query(&until).unwrap()), vec![ts("2024-01-01T00:00:00Z")]);
}

#[test]
fn test_entity_filters() {
    let table = telemetry_table();
    table.write(telemetry_point("2024-01-01T00:00:00Z", 1, 50)).unwrap();
    table.write(telemetry_point("2024-01-01T00:00:00Z", 2, 50)).unwrap();
    let mut unassigned = telemetry_point("2024-01-01T00:01:00Z", 1, 50);
    unassigned.mission_id = None;
    table.write(unassigned).unwrap();

    assert_eq!(table.query(&PointFilter::default().drone(1)).unwrap().len(), 2);
    // Points without a mission never match a mission filter
    assert_eq!(table.query(&PointFilter::default().mission(101)).unwrap().len(), 1);
    assert!(table.query(&PointFilter::default().drone(2).mission(101)).unwrap().is_empty());
}

#[test]
fn test_read_is_lazy() {
    let table = telemetry_table();
    for day in 1..=5 {
        table.write(telemetry_point(&format!("2024-01-0{day}T00:00:00Z"), 1, 50)).unwrap();
    }

    let newest: Vec<TelemetryPoint> = table
        .read(&PointFilter::default())
        .take(2)
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(times(&newest), vec![ts("2024-01-05T00:00:00Z"), ts("2024-01-04T00:00:00Z")]);
}

#[test]
fn test_only_overlapping_chunks_are_scanned() {
    let table = progress_table();
    for hour in 0..6 {
        table.write(progress_point(&format!("2024-01-01T0{hour}:30:00Z"), 1, 1, 10)).unwrap();
    }

    let (start, end) = (ts("2024-01-01T02:00:00Z"), ts("2024-01-01T04:00:00Z"));
    let chunks = table.relevant_chunks(Some(start), Some(end));
    let starts: Vec<DateTime<Utc>> = chunks.iter().map(|c| c.range.start).collect();
    assert_eq!(starts, vec![ts("2024-01-01T03:00:00Z"), ts("2024-01-01T02:00:00Z")]);
}
