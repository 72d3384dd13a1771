use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use rusqlite::Connection;

use detection_store::{
    local_midnight, DetectionStore, ErrorKind, StoreLog, StoreSettings, SuppressionPolicy,
};

fn settings(path: &Path, lock_timeout: Duration) -> StoreSettings {
    StoreSettings {
        db_path: path.to_string_lossy().to_string(),
        lock_timeout,
    }
}

fn five_minutes() -> SuppressionPolicy {
    SuppressionPolicy::new(0.75, Duration::from_secs(300))
}

fn row_count(path: &Path) -> Result<i64> {
    let conn = Connection::open(path)?;
    Ok(conn.query_row("SELECT COUNT(*) FROM detections", [], |row| row.get(0))?)
}

#[test]
fn concurrent_callers_grant_exactly_one_notification() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("detection.db");
    drop(DetectionStore::open(
        &settings(&db_path, Duration::from_secs(10)),
        StoreLog::discard(),
    )?);

    const CALLERS: usize = 8;
    let barrier = Arc::new(Barrier::new(CALLERS));
    let handles = (0..CALLERS)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            let db_path = db_path.clone();
            thread::spawn(move || -> Result<bool> {
                let mut store = DetectionStore::open(
                    &settings(&db_path, Duration::from_secs(10)),
                    StoreLog::discard(),
                )?;
                let image = format!("img{}.jpg", i);
                barrier.wait();
                let reg = store.register_with_suppression(
                    "chige",
                    0.9,
                    Some(image.as_str()),
                    &five_minutes(),
                )?;
                Ok(reg.should_notify)
            })
        })
        .collect::<Vec<_>>();

    let mut granted = 0;
    for handle in handles {
        let should_notify = handle.join().expect("caller thread panicked")?;
        if should_notify {
            granted += 1;
        }
    }

    assert_eq!(granted, 1);
    assert_eq!(row_count(&db_path)?, CALLERS as i64);

    let store = DetectionStore::open(
        &settings(&db_path, Duration::from_secs(1)),
        StoreLog::discard(),
    )?;
    let notified = store
        .recent(CALLERS)?
        .into_iter()
        .filter(|event| event.notified)
        .count();
    assert_eq!(notified, 1);
    Ok(())
}

#[test]
fn concurrent_callers_for_different_classes_all_notify() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("detection.db");
    drop(DetectionStore::open(
        &settings(&db_path, Duration::from_secs(10)),
        StoreLog::discard(),
    )?);

    let classes = ["chige", "motsu", "other"];
    let barrier = Arc::new(Barrier::new(classes.len()));
    let handles = classes
        .iter()
        .map(|class| {
            let barrier = Arc::clone(&barrier);
            let db_path = db_path.clone();
            let class = class.to_string();
            thread::spawn(move || -> Result<bool> {
                let mut store = DetectionStore::open(
                    &settings(&db_path, Duration::from_secs(10)),
                    StoreLog::discard(),
                )?;
                barrier.wait();
                Ok(store
                    .register_with_suppression(&class, 0.9, None, &five_minutes())?
                    .should_notify)
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        assert!(handle.join().expect("caller thread panicked")?);
    }
    Ok(())
}

#[test]
fn held_write_lock_times_out_without_writing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("detection.db");
    let mut store = DetectionStore::open(
        &settings(&db_path, Duration::from_millis(100)),
        StoreLog::discard(),
    )?;

    let lock_conn = Connection::open(&db_path)?;
    lock_conn.execute_batch("BEGIN IMMEDIATE;")?;

    let err = store
        .register_with_suppression("chige", 0.9, None, &five_minutes())
        .expect_err("lock is held elsewhere");
    assert_eq!(err.kind(), ErrorKind::LockTimeout);
    assert!(err.is_retryable());

    lock_conn.execute_batch("COMMIT;")?;
    assert_eq!(row_count(&db_path)?, 0);

    let reg = store.register_with_suppression("chige", 0.9, None, &five_minutes())?;
    assert!(reg.should_notify);
    Ok(())
}

#[test]
fn reads_are_not_blocked_by_a_writer() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("detection.db");
    let store = DetectionStore::open(
        &settings(&db_path, Duration::from_millis(100)),
        StoreLog::discard(),
    )?;
    let date = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
    let noon = local_midnight(date, &Utc)? + ChronoDuration::hours(12);
    store.append_at(noon, "chige", 0.9, None, true)?;

    let lock_conn = Connection::open(&db_path)?;
    lock_conn.execute_batch(
        "BEGIN IMMEDIATE;
         INSERT INTO detections(timestamp, class_name, confidence, is_notified)
         VALUES ('2024-06-02T13:00:00.000000Z', 'motsu', 0.9, 1);",
    )?;

    // the uncommitted insert stays invisible
    let summary = store.daily_rollup(date, &Utc)?.summary;
    assert_eq!(summary.total, 1);
    assert_eq!(summary.notified, 1);

    lock_conn.execute_batch("ROLLBACK;")?;
    Ok(())
}

#[test]
fn rollup_stays_consistent_while_another_process_registers() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("detection.db");
    let reader = DetectionStore::open(
        &settings(&db_path, Duration::from_secs(10)),
        StoreLog::discard(),
    )?;
    let date = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
    let start = local_midnight(date, &Utc)?;

    const WRITES: i64 = 200;
    let writer_path = db_path.clone();
    let writer = thread::spawn(move || -> Result<()> {
        let mut store = DetectionStore::open(
            &settings(&writer_path, Duration::from_secs(10)),
            StoreLog::discard(),
        )?;
        for i in 0..WRITES {
            let class = if i % 2 == 0 { "chige" } else { "motsu" };
            store.register_with_suppression_at(
                start + ChronoDuration::seconds(i),
                class,
                0.9,
                None,
                &five_minutes(),
            )?;
        }
        Ok(())
    });

    loop {
        let report = reader.daily_rollup(date, &Utc)?;
        assert_eq!(report.counts.values().sum::<u64>(), report.summary.total);
        if report.summary.total == WRITES as u64 {
            break;
        }
        if writer.is_finished() && report.summary.total < WRITES as u64 {
            // one more pass picks up the final commit
            let last = reader.daily_rollup(date, &Utc)?;
            assert_eq!(last.summary.total, WRITES as u64);
            break;
        }
    }
    writer.join().expect("writer thread panicked")?;
    Ok(())
}

#[test]
fn reconciler_waits_for_lock_release() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("detection.db");
    let mut store = DetectionStore::open(
        &settings(&db_path, Duration::from_secs(5)),
        StoreLog::discard(),
    )?;
    let reg = store.register_with_suppression("chige", 0.9, None, &five_minutes())?;

    let lock_conn = Connection::open(&db_path)?;
    lock_conn.execute_batch("BEGIN IMMEDIATE;")?;
    let release = thread::spawn(move || -> rusqlite::Result<()> {
        thread::sleep(Duration::from_millis(150));
        lock_conn.execute_batch("COMMIT;")
    });

    store.update_notification_status(reg.id, false)?;
    release.join().expect("release thread panicked")?;

    assert!(!store.get(reg.id)?.expect("row").notified);
    Ok(())
}
