use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::mpsc;
use ulid::Ulid;

use washslot::admission::AdmissionController;
use washslot::config::Config;
use washslot::console::Console;
use washslot::engine::Engine;
use washslot::notify::NotifyHub;
use washslot::reaper::compact_if_due;
use washslot::time::{FixedClock, parse_date};

// ── Test infrastructure ──────────────────────────────────────

struct Harness {
    console: Arc<Console>,
    engine: Arc<Engine>,
    notices: mpsc::Receiver<String>,
}

fn data_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("washslot_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn start(dir: &Path) -> Harness {
    let cfg = Config {
        data_dir: dir.to_path_buf(),
        ..Config::default()
    };
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(
        Engine::new(
            cfg.wal_path(),
            &cfg.resources,
            cfg.lock_expiration_ms,
            notify.clone(),
        )
        .unwrap(),
    );
    let clock = FixedClock::at(parse_date("2024-03-01").unwrap(), 9 * 60);
    let ctl = AdmissionController::new(engine.clone(), Arc::new(cfg), Arc::new(clock));
    let (tx, notices) = mpsc::channel(64);
    Harness {
        console: Arc::new(Console::new(Arc::new(ctl), notify, tx)),
        engine,
        notices,
    }
}

async fn run(console: &Console, line: &str) -> Value {
    let out = console.handle_line(line).await.expect("command printed nothing");
    serde_json::from_str(&out).unwrap()
}

fn book_line(machine: &str, date: &str, start: &str, duration: u32, name: &str, pin: &str) -> String {
    format!(
        "book {machine} {date} {start} --duration {duration} --name '{name}' --phone 0712345678 --pin {pin}"
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn bookings_survive_restart() {
    let dir = data_dir();
    let (late_id, cancelled_id) = {
        let h = start(&dir);
        let late = run(&h.console, &book_line("masina1", "2024-03-01", "23:30", 90, "Ana Pop", "1234")).await;
        assert_eq!(late["booked"]["ends_next_day"], true);
        let other = run(&h.console, &book_line("uscator1", "2024-03-02", "10:00", 30, "Ion Pop", "4321")).await;
        let other_id = other["booked"]["id"].as_str().unwrap().to_string();
        run(&h.console, &format!("cancel {other_id} --pin 4321")).await;
        run(&h.console, "maintenance on --admin").await;
        (late["booked"]["id"].as_str().unwrap().to_string(), other_id)
    };

    let h = start(&dir);
    assert_eq!(run(&h.console, "maintenance").await["maintenance"], true);
    run(&h.console, "maintenance off --admin").await;

    let listed = run(&h.console, "list 2024-03-01 2024-03-02").await;
    let ids: Vec<&str> = listed["reservations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![late_id.as_str()]);
    assert!(!ids.contains(&cancelled_id.as_str()));

    // The replayed spill still blocks the first half hour of the next day.
    let early = run(&h.console, &book_line("masina1", "2024-03-02", "00:30", 30, "Ion Pop", "1111")).await;
    assert_eq!(early["remedy"], "change_input");
    let after = run(&h.console, &book_line("masina1", "2024-03-02", "01:00", 30, "Ion Pop", "1111")).await;
    assert!(after.get("booked").is_some(), "{after}");

    // The PIN set at booking still works after restart.
    let gone = run(&h.console, &format!("cancel {late_id} --pin 1234")).await;
    assert_eq!(gone["cancelled"]["id"], late_id.as_str());
}

#[tokio::test]
async fn compacted_log_replays_the_same_schedule() {
    let dir = data_dir();
    {
        let h = start(&dir);
        for hour in 10..14 {
            let line = book_line("masina2", "2024-03-03", &format!("{hour}:00"), 30, &format!("User {hour}"), "1234");
            run(&h.console, &line).await;
        }
        assert!(compact_if_due(&h.engine, 1).await.unwrap());
    }
    let h = start(&dir);
    let listed = run(&h.console, "list 2024-03-03 --resource masina2").await;
    assert_eq!(listed["count"], 4);
    assert_eq!(listed["reservations"][0]["start_time"], "10:00");
}

#[tokio::test]
async fn racing_bookings_admit_exactly_one() {
    let dir = data_dir();
    let h = start(&dir);
    let attempts = (0..12).map(|i| {
        let console = h.console.clone();
        async move {
            run(&console, &book_line("uscator2", "2024-03-05", "18:00", 60, &format!("Racer {i}"), "1234")).await
        }
    });
    let results = join_all(attempts).await;
    let winners = results.iter().filter(|r| r.get("booked").is_some()).count();
    assert_eq!(winners, 1);
    for loser in results.iter().filter(|r| r.get("booked").is_none()) {
        assert_eq!(loser["remedy"], "change_input", "{loser}");
    }
    assert_eq!(run(&h.console, "list 2024-03-05").await["count"], 1);
}

#[tokio::test]
async fn watchers_see_bookings_and_cancellations() {
    let dir = data_dir();
    let mut h = start(&dir);
    run(&h.console, "watch masina1").await;

    let booked = run(&h.console, &book_line("masina1", "2024-03-04", "07:00", 60, "Ana Pop", "1234")).await;
    let id = booked["booked"]["id"].as_str().unwrap().to_string();
    run(&h.console, &format!("cancel {id} --admin")).await;
    // Other machines are not forwarded.
    run(&h.console, &book_line("masina2", "2024-03-04", "07:00", 60, "Ana Pop", "1234")).await;

    let mut kinds = Vec::new();
    for _ in 0..2 {
        let line = tokio::time::timeout(Duration::from_secs(2), h.notices.recv())
            .await
            .expect("notice not delivered")
            .unwrap();
        let notice: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(notice["notice"]["resource_id"], "masina1");
        kinds.push(notice["notice"]["kind"].as_str().unwrap().to_string());
    }
    assert_eq!(kinds, vec!["booked", "cancelled"]);
    assert!(h.notices.try_recv().is_err());
}

#[tokio::test]
async fn quota_and_status_through_the_console() {
    let dir = data_dir();
    let h = start(&dir);
    for (i, machine) in ["masina1", "masina2", "uscator1", "uscator2"].iter().enumerate() {
        let line = book_line(machine, "2024-03-01", &format!("0{}:00", 8 + i / 2), 60, "ana pop", "1234");
        let out = run(&h.console, &line).await;
        assert!(out.get("booked").is_some(), "{out}");
    }
    let fifth = run(&h.console, &book_line("masina1", "2024-03-02", "12:00", 60, "ANA POP", "1234")).await;
    assert_eq!(fifth["error"], "you already hold 4 upcoming reservations");

    // Clock reads 09:00: the 09:00 bookings run, the 08:00 ones just ended.
    let status = run(&h.console, "status").await;
    let busy: Vec<&str> = status["machines"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|m| m["busy"] == true)
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert_eq!(busy, vec!["uscator1", "uscator2"]);

    let stats = run(&h.console, "stats").await;
    assert_eq!(stats["today"], 4);
    assert_eq!(stats["upcoming"], 4);
    assert_eq!(run(&h.console, "mine 'Ana Pop'").await["count"], 4);
}
