//! End-to-end query behavior over real files.
//!
//! These tests verify:
//! 1. Seeking agrees with a naive linear scan
//! 2. Forward and backward streams see the same records
//! 3. Filtering matches an independent regex evaluation
//! 4. Malformed lines are skipped and counted
//! 5. Small-file scenarios (start bound, backward default, empty file)

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::executor::block_on;
use logscan::{
    BackwardStreamer, BoundarySeeker, Direction, Engine, EngineConfig, ForwardStreamer, Query,
    QueryStream, SeekDirection,
};
use proptest::prelude::*;
use regex::Regex;
use tempfile::NamedTempFile;

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).single().expect("valid base time")
}

fn at(millis: i64) -> DateTime<Utc> {
    base() + Duration::milliseconds(millis)
}

fn cri_line(millis: i64, message: &str) -> String {
    format!("{} stdout F {message}\n", at(millis).to_rfc3339_opts(chrono::SecondsFormat::Nanos, true))
}

fn write_log(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write");
    file.flush().expect("flush");
    file
}

fn small_config() -> EngineConfig {
    EngineConfig::new().with_chunk_size(37).with_batch_size(4)
}

fn drain(stream: &mut QueryStream) -> Vec<(DateTime<Utc>, String)> {
    block_on(async {
        let mut out = Vec::new();
        while let Some(item) = stream.next_record().await {
            let record = item.expect("record");
            out.push((record.timestamp, record.message));
        }
        out
    })
}

fn forward_all(path: &Path, config: &EngineConfig) -> Vec<(DateTime<Utc>, String)> {
    let mut streamer = ForwardStreamer::open(path, None, config).expect("open");
    block_on(async {
        let mut out = Vec::new();
        while let Some(item) = streamer.next_record().await {
            let record = item.expect("record");
            out.push((record.timestamp, record.message));
        }
        out
    })
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_start_bound_without_follow() {
    let file = write_log(&(cri_line(1000, "t1") + &cri_line(2000, "t2") + &cri_line(3000, "t3")));
    let engine = Engine::new(small_config()).expect("engine");

    let query = Query::new(file.path()).with_start_time(at(2000));
    let mut stream = engine.open(&query).expect("open");
    let messages: Vec<_> = drain(&mut stream).into_iter().map(|(_, m)| m).collect();
    assert_eq!(messages, vec!["t2", "t3"]);
}

#[test]
fn test_backward_defaults_to_end_of_file() {
    let file = write_log(&(cri_line(1000, "t1") + &cri_line(2000, "t2") + &cri_line(3000, "t3")));
    let engine = Engine::new(small_config()).expect("engine");

    let query = Query::new(file.path()).with_direction(Direction::Backward);
    let mut stream = engine.open(&query).expect("open");
    let messages: Vec<_> = drain(&mut stream).into_iter().map(|(_, m)| m).collect();
    assert_eq!(messages, vec!["t3", "t2", "t1"]);
    assert!(!stream.summary().cursor.has_more);
}

#[test]
fn test_empty_file_yields_nothing() {
    let file = write_log("");
    let engine = Engine::new(small_config()).expect("engine");

    for direction in [Direction::Forward, Direction::Backward] {
        let query = Query::new(file.path())
            .with_direction(direction)
            .with_start_time(at(0))
            .with_stop_time(at(5000))
            .with_grep("x");
        let mut stream = engine.open(&query).expect("open");
        assert!(drain(&mut stream).is_empty());
        assert_eq!(stream.summary().skipped, 0);
    }

    let mut seeker = BoundarySeeker::open(file.path(), 64).expect("seeker");
    for direction in [SeekDirection::AtOrAfter, SeekDirection::AtOrBefore] {
        assert!(!seeker.seek(at(0), direction).expect("seek").found);
    }
}

#[test]
fn test_duplicate_timestamps_resume_without_gaps() {
    let contents: String = (0..6).map(|i| cri_line(1000, &format!("burst-{i}"))).collect();
    let file = write_log(&contents);
    let config = small_config();

    let mut first = ForwardStreamer::open(file.path(), None, &config).expect("open");
    let mut seen = Vec::new();
    block_on(async {
        for _ in 0..3 {
            seen.push(first.next_record().await.expect("some").expect("record").message);
        }
    });

    let mut rest = ForwardStreamer::resume(file.path(), &first.cursor(), &config).expect("resume");
    block_on(async {
        while let Some(item) = rest.next_record().await {
            seen.push(item.expect("record").message);
        }
    });

    let expected: Vec<_> = (0..6).map(|i| format!("burst-{i}")).collect();
    assert_eq!(seen, expected);
}

#[test]
fn test_backward_pages_cover_file_once() {
    let contents: String = (0..10).map(|i| cri_line(i * 10, &format!("m{i}"))).collect();
    let file = write_log(&contents);
    let config = small_config();

    let mut pages = Vec::new();
    let mut streamer = BackwardStreamer::open(file.path(), None, &config).expect("open");
    loop {
        let batch = streamer.next_batch().expect("batch");
        pages.extend(batch.records.into_iter().map(|r| r.message));
        if !batch.cursor.has_more {
            break;
        }
        streamer = BackwardStreamer::resume(file.path(), &batch.cursor, &config).expect("resume");
    }

    let expected: Vec<_> = (0..10).rev().map(|i| format!("m{i}")).collect();
    assert_eq!(pages, expected);
}

// ============================================================================
// Skip-and-continue
// ============================================================================

#[test]
fn test_malformed_lines_are_counted_not_fatal() {
    let mut contents = String::new();
    for i in 0..5 {
        contents.push_str(&cri_line(i * 100, &format!("good-{i}")));
        contents.push_str("this line has no timestamp\n");
    }
    contents.push_str("{\"log\":\"unterminated json\"\n");
    let file = write_log(&contents);
    let engine = Engine::new(small_config()).expect("engine");

    for direction in [Direction::Forward, Direction::Backward] {
        let mut stream = engine
            .open(&Query::new(file.path()).with_direction(direction))
            .expect("open");
        assert_eq!(drain(&mut stream).len(), 5);
        assert_eq!(stream.summary().skipped, 6);
        assert_eq!(stream.summary().emitted, 5);
    }
}

#[test]
fn test_leading_garbage_counted_with_or_without_start() {
    let contents = String::from("garbage one\ngarbage two\n")
        + &cri_line(1000, "a")
        + &cri_line(2000, "b");
    let file = write_log(&contents);
    let config = small_config();
    let engine = Engine::new(config.clone()).expect("engine");

    let mut seeker = BoundarySeeker::open(file.path(), config.chunk_size).expect("seeker");
    let boundary = seeker.seek(at(-3_600_000), SeekDirection::AtOrAfter).expect("seek");
    assert!(boundary.found);
    assert_eq!(boundary.resolved_offset, 0);

    let unbounded = Query::new(file.path());
    let bounded = Query::new(file.path()).with_start_time(at(-3_600_000));
    for query in [unbounded, bounded] {
        let mut stream = engine.open(&query).expect("open");
        let messages: Vec<_> = drain(&mut stream).into_iter().map(|(_, m)| m).collect();
        assert_eq!(messages, vec!["a", "b"]);
        assert_eq!(stream.summary().skipped, 2);
    }
}

// ============================================================================
// Properties
// ============================================================================

fn arb_log() -> impl Strategy<Value = (Vec<i64>, Vec<bool>)> {
    (
        proptest::collection::vec(0i64..50, 0..30),
        proptest::collection::vec(any::<bool>(), 30),
    )
}

fn render(mut offsets: Vec<i64>, noise: &[bool]) -> (String, Vec<i64>) {
    offsets.sort_unstable();
    let mut contents = String::new();
    for (i, millis) in offsets.iter().enumerate() {
        if noise[i] {
            contents.push_str("noise without a timestamp\n");
        }
        let word = if i % 3 == 0 { "error" } else { "info" };
        contents.push_str(&cri_line(*millis, &format!("{word} #{i}")));
    }
    (contents, offsets)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn seek_then_stream_matches_linear_scan((offsets, noise) in arb_log(), target in -5i64..55) {
        let (contents, sorted) = render(offsets, &noise);
        let file = write_log(&contents);
        let config = small_config();

        let mut seeker = BoundarySeeker::open(file.path(), config.chunk_size).expect("seeker");
        let boundary = seeker.seek(at(target), SeekDirection::AtOrAfter).expect("seek");
        let mut streamer = ForwardStreamer::open(file.path(), Some(&boundary), &config).expect("open");
        let first = block_on(streamer.next_record()).map(|r| r.expect("record").timestamp);

        let expected = sorted.iter().copied().find(|m| *m >= target).map(at);
        prop_assert_eq!(first, expected);
        prop_assert_eq!(boundary.found, expected.is_some());

        let again = seeker.seek(at(target), SeekDirection::AtOrAfter).expect("seek");
        prop_assert_eq!(again.resolved_offset, boundary.resolved_offset);
    }

    #[test]
    fn forward_and_backward_agree((offsets, noise) in arb_log()) {
        let (contents, _) = render(offsets, &noise);
        let file = write_log(&contents);
        let config = small_config();

        let forward = forward_all(file.path(), &config);
        let mut backward: Vec<_> = BackwardStreamer::open(file.path(), None, &config)
            .expect("open")
            .map(|r| {
                let record = r.expect("record");
                (record.timestamp, record.message)
            })
            .collect();
        backward.reverse();
        prop_assert_eq!(forward, backward);
    }

    #[test]
    fn filter_matches_reference_regex((offsets, noise) in arb_log(), pattern in "(error|info|#1[0-9]?|r+o)") {
        let (contents, _) = render(offsets, &noise);
        let file = write_log(&contents);
        let engine = Engine::new(small_config()).expect("engine");

        let all = drain(&mut engine.open(&Query::new(file.path())).expect("open"));
        let filtered = drain(&mut engine.open(&Query::new(file.path()).with_grep(pattern.clone())).expect("open"));

        let reference = Regex::new(&pattern).expect("reference");
        let expected: Vec<_> = all.into_iter().filter(|(_, m)| reference.is_match(m)).collect();
        prop_assert_eq!(filtered, expected);
    }
}
