use super::*;

fn daily() -> ContinuousAggregate<DailyMissionSummary> {
    ContinuousAggregate::new(DailyMissionSummary, RefreshPolicy::daily())
}

#[test]
fn test_daily_summary_per_mission_and_drone() {
    let agg = daily();
    let table = progress_table(vec![
        progress("2024-01-01T08:00:00Z", 3, 7, 20, Some("2024-01-01T12:00:00Z")),
        progress("2024-01-01T14:00:00Z", 3, 7, 60, Some("2024-01-01T16:00:00Z")),
        progress("2024-01-01T20:00:00Z", 3, 7, 80, None),
        progress("2024-01-01T09:00:00Z", 3, 8, 10, None),
    ]);

    let report = agg.refresh(&table, ts("2024-01-03T12:00:00Z")).unwrap();
    assert_eq!(report.buckets_written, 2);

    let row = agg.bucket(ts("2024-01-01T00:00:00Z"), (3, 7)).unwrap();
    assert_eq!(row.progress_updates, 3);
    assert!((row.avg_progress - 160.0 / 3.0).abs() < 1e-9);
    assert_eq!(row.max_progress, 80);
    assert_eq!(row.total_waypoints_completed, 8);
    assert_eq!(row.total_waypoints, 10);
    assert_eq!(row.avg_remaining_hours, Some(3.0));

    let other = agg.bucket(ts("2024-01-01T00:00:00Z"), (3, 8)).unwrap();
    assert_eq!(other.avg_remaining_hours, None);
}

#[test]
fn test_mission_filter_on_rows() {
    let agg = daily();
    let table = progress_table(vec![
        progress("2024-01-01T08:00:00Z", 3, 7, 20, None),
        progress("2024-01-01T08:00:00Z", 4, 7, 20, None),
    ]);
    agg.refresh(&table, ts("2024-01-03T12:00:00Z")).unwrap();

    let rows = agg.rows(None, None, 10, |(mission, _)| *mission == 4);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].mission_id, 4);
}

#[test]
fn test_daily_average_progress_does_not_wrap() {
    let agg = daily();
    let mut first = progress("2024-01-01T08:00:00Z", 3, 7, 20, None);
    let mut second = progress("2024-01-01T09:00:00Z", 3, 7, 20, None);
    first.progress_percentage = 2_000_000_000;
    second.progress_percentage = 2_000_000_000;
    let table = progress_table(vec![first, second]);

    agg.refresh(&table, ts("2024-01-03T12:00:00Z")).unwrap();
    let row = agg.bucket(ts("2024-01-01T00:00:00Z"), (3, 7)).unwrap();
    assert_eq!(row.avg_progress, 2_000_000_000.0);
}
