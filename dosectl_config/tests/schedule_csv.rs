use std::fs;
use std::io::Write;

use dosectl_config::{ScheduleRow, load_schedule_csv};
use tempfile::tempdir;

fn write_csv(lines: &[&str]) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("schedule.csv");
    let mut f = fs::File::create(&path).unwrap();
    for l in lines {
        writeln!(f, "{l}").unwrap();
    }
    (dir, path)
}

#[test]
fn parses_rows_with_optional_flow() {
    let (_dir, path) = write_csv(&[
        "offset_s,duration_s,flow_rate",
        "-10,20,80",
        "3600, 45 ,",
    ]);
    let rows = load_schedule_csv(&path).expect("load");
    assert_eq!(
        rows,
        vec![
            ScheduleRow { offset_s: -10.0, duration_s: 20.0, flow_rate: Some(80.0) },
            ScheduleRow { offset_s: 3600.0, duration_s: 45.0, flow_rate: None },
        ]
    );
}

#[test]
fn rejects_wrong_headers() {
    let (_dir, path) = write_csv(&["when,duration_s,flow_rate", "0,20,80"]);
    let err = load_schedule_csv(&path).expect_err("bad headers");
    assert!(err.to_string().contains("must have headers"));
}

#[test]
fn reports_row_number_of_bad_row() {
    let (_dir, path) = write_csv(&["offset_s,duration_s,flow_rate", "0,20,80", "soon,20,80"]);
    let err = load_schedule_csv(&path).expect_err("bad row");
    assert!(err.to_string().contains("invalid CSV row 3"), "{err}");
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempdir().unwrap();
    let err = load_schedule_csv(&dir.path().join("nope.csv")).expect_err("missing");
    assert!(err.to_string().contains("open schedule CSV"));
}
