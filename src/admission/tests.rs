use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::future::join_all;

use super::*;
use crate::engine::Engine;
use crate::notify::NotifyHub;
use crate::time::{FixedClock, parse_date};

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("washslot_test_admission");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn d(s: &str) -> NaiveDate {
    parse_date(s).unwrap()
}

fn controller_with(name: &str, cfg: Config, clock: FixedClock) -> AdmissionController {
    let engine = Engine::new(
        test_wal_path(name),
        &cfg.resources,
        cfg.lock_expiration_ms,
        Arc::new(NotifyHub::new()),
    )
    .unwrap();
    AdmissionController::new(Arc::new(engine), Arc::new(cfg), Arc::new(clock))
}

fn controller(name: &str) -> AdmissionController {
    controller_with(name, Config::default(), FixedClock::on(d("2024-02-28")))
}

fn request(resource: &str, date: &str, start: &str, duration: Minute) -> BookingRequest {
    BookingRequest {
        user_name: "ana popescu".into(),
        phone_number: "0712345678".into(),
        pin: Some("1234".into()),
        resource_id: resource.into(),
        date: date.into(),
        start_time: start.into(),
        duration_minutes: duration,
    }
}

fn by(user: &str, mut req: BookingRequest) -> BookingRequest {
    req.user_name = user.into();
    req
}

#[tokio::test]
async fn laundry_day_end_to_end() {
    let ctl = controller("e2e.wal");

    let first = ctl
        .submit_booking(request("masina1", "2024-03-01", "10:00", 60), Caller::Public)
        .await
        .unwrap();
    assert_eq!(first.user_name, "Ana Popescu");
    assert_eq!(first.start, 600);
    assert!(first.pin_hash.as_deref().unwrap().starts_with("$argon2id$"));

    let overlap = ctl
        .submit_booking(request("masina1", "2024-03-01", "10:30", 30), Caller::Public)
        .await
        .unwrap_err();
    assert!(matches!(
        overlap,
        BookingError::SlotConflict { conflicting: Some(id), .. } if id == first.id
    ));
    assert_eq!(overlap.remedy(), Remedy::ChangeInput);

    for resource in ["masina2", "uscator1", "uscator2"] {
        ctl.submit_booking(request(resource, "2024-03-01", "10:00", 60), Caller::Public)
            .await
            .unwrap();
    }
    let over = ctl
        .submit_booking(request("masina1", "2024-03-02", "10:00", 60), Caller::Public)
        .await
        .unwrap_err();
    assert!(matches!(over, BookingError::QuotaExceeded { limit: 4 }));

    // Someone else can still take that slot.
    ctl.submit_booking(
        by("Ion Ionescu", request("masina1", "2024-03-02", "10:00", 60)),
        Caller::Public,
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn concurrent_submissions_for_one_key_commit_once() {
    let ctl = controller("one_key_race.wal");
    let users = ["Ana Pop", "Ion Pop", "Maria Pop", "Dan Pop", "Vlad Pop", "Ioana Pop"];
    let durations = [30, 60, 90, 120, 30, 60];

    let attempts = users.iter().zip(durations).map(|(user, duration)| {
        ctl.submit_booking(
            by(user, request("uscator2", "2024-03-01", "18:00", duration)),
            Caller::Public,
        )
    });
    let results = join_all(attempts).await;

    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    for r in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(r, BookingError::SlotConflict { .. }), "unexpected: {r}");
    }
    let listed = ctl
        .list_reservations(Some("uscator2"), "2024-03-01", "2024-03-01")
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn spillover_blocks_early_next_day() {
    let ctl = controller("spill.wal");
    ctl.submit_booking(request("masina2", "2024-02-29", "23:30", 120), Caller::Public)
        .await
        .unwrap();

    let blocked = ctl
        .submit_booking(
            by("Ion Ionescu", request("masina2", "2024-03-01", "00:30", 30)),
            Caller::Public,
        )
        .await;
    assert!(matches!(blocked, Err(BookingError::SlotConflict { .. })));

    ctl.submit_booking(
        by("Ion Ionescu", request("masina2", "2024-03-01", "01:30", 30)),
        Caller::Public,
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn late_booking_cannot_spill_into_existing_morning() {
    let ctl = controller("spill_forward.wal");
    ctl.submit_booking(request("uscator1", "2024-03-02", "00:00", 30), Caller::Public)
        .await
        .unwrap();

    assert!(!ctl.is_slot_free("uscator1", "2024-03-01", "23:30", 60).await.unwrap());
    let late = ctl
        .submit_booking(
            by("Ion Ionescu", request("uscator1", "2024-03-01", "23:30", 60)),
            Caller::Public,
        )
        .await;
    assert!(matches!(late, Err(BookingError::SlotConflict { .. })));
    assert!(ctl.is_slot_free("uscator1", "2024-03-01", "23:30", 30).await.unwrap());
}

#[tokio::test]
async fn slot_free_precheck_matches_boundaries() {
    let ctl = controller("precheck.wal");
    ctl.submit_booking(request("masina1", "2024-02-05", "09:00", 60), Caller::Public)
        .await
        .unwrap();
    assert!(ctl.is_slot_free("masina1", "2024-02-05", "10:00", 60).await.unwrap());
    assert!(!ctl.is_slot_free("masina1", "2024-02-05", "09:30", 60).await.unwrap());
    assert!(!ctl.is_slot_free("masina1", "2024-02-05", "10:00", 0).await.unwrap());
    assert!(matches!(
        ctl.is_slot_free("masina1", "2024-02-05", "25:00", 30).await,
        Err(QueryError::Validation(ValidationError::InvalidTime(_)))
    ));
}

#[tokio::test]
async fn quota_ignores_case_and_past_dates() {
    let cfg = Config {
        booking_limit: 2,
        ..Config::default()
    };
    let ctl = controller_with("quota.wal", cfg, FixedClock::on(d("2024-03-01")));
    ctl.submit_booking(request("masina1", "2024-03-01", "08:00", 30), Caller::Public)
        .await
        .unwrap();
    ctl.submit_booking(
        by("ANA POPESCU", request("masina1", "2024-03-03", "08:00", 30)),
        Caller::Public,
    )
    .await
    .unwrap();

    let third = ctl
        .submit_booking(
            by("Ana  Popescu", request("masina2", "2024-03-04", "08:00", 30)),
            Caller::Public,
        )
        .await;
    assert!(matches!(third, Err(BookingError::QuotaExceeded { limit: 2 })));

    // Substring is a different user.
    ctl.submit_booking(
        by("Ana Popescu Ionescu", request("masina2", "2024-03-04", "08:00", 30)),
        Caller::Public,
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn cancelling_frees_quota() {
    let cfg = Config {
        booking_limit: 1,
        ..Config::default()
    };
    let ctl = controller_with("quota_cancel.wal", cfg, FixedClock::on(d("2024-03-01")));
    let held = ctl
        .submit_booking(request("masina1", "2024-03-02", "08:00", 30), Caller::Public)
        .await
        .unwrap();
    assert!(matches!(
        ctl.submit_booking(request("masina1", "2024-03-03", "08:00", 30), Caller::Public)
            .await,
        Err(BookingError::QuotaExceeded { .. })
    ));
    ctl.delete_reservation(held.id, Some("1234"), Caller::Public)
        .await
        .unwrap();
    ctl.submit_booking(request("masina1", "2024-03-03", "08:00", 30), Caller::Public)
        .await
        .unwrap();
}

#[tokio::test]
async fn maintenance_blocks_public_but_not_admin() {
    let ctl = controller("maintenance.wal");
    assert!(matches!(
        ctl.set_maintenance_mode(true, Caller::Public).await,
        Err(SettingsError::Forbidden)
    ));
    ctl.set_maintenance_mode(true, Caller::Admin).await.unwrap();
    assert!(ctl.get_maintenance_mode().await.unwrap());

    let err = ctl
        .submit_booking(request("masina1", "2024-03-01", "10:00", 60), Caller::Public)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Maintenance));
    assert_eq!(err.remedy(), Remedy::RetryLater);

    ctl.submit_booking(request("masina1", "2024-03-01", "10:00", 60), Caller::Admin)
        .await
        .unwrap();

    ctl.set_maintenance_mode(false, Caller::Admin).await.unwrap();
    ctl.submit_booking(request("masina1", "2024-03-01", "11:00", 60), Caller::Public)
        .await
        .unwrap();
}

#[tokio::test]
async fn deletion_requires_matching_pin() {
    let ctl = controller("delete_pin.wal");
    let r = ctl
        .submit_booking(request("masina1", "2024-03-01", "10:00", 60), Caller::Public)
        .await
        .unwrap();

    assert!(matches!(
        ctl.delete_reservation(r.id, Some("9999"), Caller::Public).await,
        Err(DeleteError::Unauthorized)
    ));
    assert!(matches!(
        ctl.delete_reservation(r.id, None, Caller::Public).await,
        Err(DeleteError::Unauthorized)
    ));

    let removed = ctl
        .delete_reservation(r.id, Some("1234"), Caller::Public)
        .await
        .unwrap();
    assert_eq!(removed.id, r.id);
    assert!(matches!(
        ctl.delete_reservation(r.id, Some("1234"), Caller::Public).await,
        Err(DeleteError::NotFound(id)) if id == r.id
    ));
    let left = ctl
        .list_reservations(None, "2024-03-01", "2024-03-01")
        .await
        .unwrap();
    assert!(left.is_empty());
}

#[tokio::test]
async fn pinless_reservations_are_admin_only() {
    let cfg = Config {
        require_pin: false,
        ..Config::default()
    };
    let ctl = controller_with("pinless.wal", cfg, FixedClock::on(d("2024-02-28")));
    let mut req = request("uscator1", "2024-03-01", "10:00", 60);
    req.pin = None;
    let r = ctl.submit_booking(req, Caller::Public).await.unwrap();
    assert!(r.pin_hash.is_none());

    assert!(matches!(
        ctl.delete_reservation(r.id, Some("1234"), Caller::Public).await,
        Err(DeleteError::Unauthorized)
    ));
    ctl.delete_reservation(r.id, None, Caller::Admin).await.unwrap();
}

#[tokio::test]
async fn invalid_requests_fail_before_touching_the_store() {
    let store = Arc::new(StubStore::default());
    let ctl = AdmissionController::new(
        store.clone(),
        Arc::new(Config::default()),
        Arc::new(FixedClock::on(d("2024-02-28"))),
    );
    let mut req = request("masina1", "2024-03-01", "10:00", 60);
    req.phone_number = "12345".into();
    let err = ctl.submit_booking(req, Caller::Admin).await.unwrap_err();
    assert!(matches!(err, BookingError::Validation(ValidationError::InvalidPhone { .. })));
    assert_eq!(store.queries.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn losing_the_commit_race_reads_as_conflict() {
    let store = Arc::new(StubStore {
        create: StubCreate::SlotTaken,
        ..StubStore::default()
    });
    let ctl = AdmissionController::new(
        store.clone(),
        Arc::new(Config::default()),
        Arc::new(FixedClock::on(d("2024-02-28"))),
    );
    let err = ctl
        .submit_booking(request("masina1", "2024-03-01", "10:00", 60), Caller::Public)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BookingError::SlotConflict { conflicting: None, start: 600, .. }
    ));
    assert_eq!(store.creates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn slow_commit_is_an_unknown_outcome() {
    let store = Arc::new(StubStore {
        create: StubCreate::Hang,
        ..StubStore::default()
    });
    let cfg = Config {
        commit_timeout_ms: 50,
        ..Config::default()
    };
    let ctl = AdmissionController::new(store, Arc::new(cfg), Arc::new(FixedClock::on(d("2024-02-28"))));
    let err = ctl
        .submit_booking(request("masina1", "2024-03-01", "10:00", 60), Caller::Public)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::OutcomeUnknown));
    assert_eq!(err.remedy(), Remedy::RetryLater);
}

#[tokio::test]
async fn history_pages_through_a_busy_day_without_gaps() {
    let ctl = controller_with("history_pages.wal", Config::default(), FixedClock::on(d("2024-03-02")));
    for (date, start) in [
        ("2024-02-29", "10:00"),
        ("2024-03-01", "08:00"),
        ("2024-03-01", "10:00"),
        ("2024-03-01", "12:00"),
    ] {
        ctl.submit_booking(request("masina1", date, start, 60), Caller::Admin)
            .await
            .unwrap();
    }

    let mut seen = Vec::new();
    let mut before: Option<String> = None;
    loop {
        let page = ctl.history(before.as_deref(), Some(2), Caller::Admin).await.unwrap();
        assert!(page.count <= 2);
        seen.extend(
            page.reservations
                .iter()
                .map(|r| format!("{} {}", r.date, r.start_time)),
        );
        match page.next {
            Some(next) => before = Some(next),
            None => break,
        }
    }
    assert_eq!(
        seen,
        ["2024-03-01 12:00", "2024-03-01 10:00", "2024-03-01 08:00", "2024-02-29 10:00"]
    );

    // A plain date still works as the starting point.
    let from_date = ctl.history(Some("2024-03-01"), Some(2), Caller::Admin).await.unwrap();
    assert_eq!(from_date.reservations[0].date, d("2024-02-29"));
    assert_eq!(from_date.next, None);

    assert!(matches!(
        ctl.history(Some("2024-03-01_25:00_masina1"), None, Caller::Admin).await,
        Err(QueryError::Validation(ValidationError::InvalidCursor(_)))
    ));
}

#[tokio::test]
async fn admin_views() {
    let ctl = controller_with(
        "admin_views.wal",
        Config::default(),
        FixedClock::at(d("2024-03-01"), 10 * 60 + 15),
    );
    // Backdated by an admin, so it shows up in history.
    ctl.submit_booking(request("masina1", "2024-02-27", "10:00", 60), Caller::Admin)
        .await
        .unwrap();
    ctl.submit_booking(request("masina1", "2024-03-01", "10:00", 60), Caller::Public)
        .await
        .unwrap();
    ctl.submit_booking(
        by("Ion Ionescu", {
            let mut r = request("uscator1", "2024-03-05", "12:00", 30);
            r.phone_number = "0799000111".into();
            r
        }),
        Caller::Public,
    )
    .await
    .unwrap();

    assert!(matches!(
        ctl.history(None, None, Caller::Public).await,
        Err(QueryError::Forbidden)
    ));
    let past = ctl.history(None, None, Caller::Admin).await.unwrap();
    assert_eq!(past.count, 1);
    assert_eq!(past.reservations[0].date, d("2024-02-27"));
    assert_eq!(past.next, None);

    let by_phone = ctl.search_reservations("0799", None, Caller::Admin).await.unwrap();
    assert_eq!(by_phone.len(), 1);
    assert_eq!(by_phone[0].user_name, "Ion Ionescu");
    let by_name = ctl
        .search_reservations("POPESCU", Some("2024-03-01"), Caller::Admin)
        .await
        .unwrap();
    assert_eq!(by_name.len(), 1);

    assert_eq!(
        ctl.dashboard_stats().await.unwrap(),
        DashboardStats {
            today: 1,
            upcoming: 2
        }
    );

    let mine = ctl.user_reservations("ANA popescu").await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].date, d("2024-03-01"));

    let status = ctl.resource_status().await.unwrap();
    let m1 = status.iter().find(|s| s.id == "masina1").unwrap();
    assert!(m1.busy);
    assert_eq!(m1.until.as_deref(), Some("11:00"));
    assert_eq!(m1.remaining_minutes, Some(45));
    assert!(!status.iter().find(|s| s.id == "uscator1").unwrap().busy);
    assert_eq!(ctl.resources().len(), 4);
}

#[tokio::test]
async fn status_counts_yesterdays_spill() {
    let ctl = controller_with(
        "status_spill.wal",
        Config::default(),
        FixedClock::at(d("2024-03-02"), 20),
    );
    ctl.submit_booking(request("uscator2", "2024-03-01", "23:30", 60), Caller::Admin)
        .await
        .unwrap();
    let status = ctl.resource_status().await.unwrap();
    let dryer = status.iter().find(|s| s.id == "uscator2").unwrap();
    assert!(dryer.busy);
    assert_eq!(dryer.until.as_deref(), Some("00:30"));
    assert_eq!(dryer.remaining_minutes, Some(10));
}

#[tokio::test]
async fn public_callers_cannot_book_the_past() {
    let ctl = controller_with("past.wal", Config::default(), FixedClock::on(d("2024-03-01")));
    let err = ctl
        .submit_booking(request("masina1", "2024-02-29", "10:00", 60), Caller::Public)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BookingError::Validation(ValidationError::DateInPast(date)) if date == d("2024-02-29")
    ));
    // Today itself is bookable.
    ctl.submit_booking(request("masina1", "2024-03-01", "10:00", 60), Caller::Public)
        .await
        .unwrap();
}

// ── Stub store ───────────────────────────────────────────

#[derive(Default)]
enum StubCreate {
    #[default]
    SlotTaken,
    Hang,
}

#[derive(Default)]
struct StubStore {
    create: StubCreate,
    queries: AtomicUsize,
    creates: AtomicUsize,
}

#[async_trait]
impl ReservationStore for StubStore {
    async fn query_range(
        &self,
        _resource_id: Option<&str>,
        _from: NaiveDate,
        _to: NaiveDate,
    ) -> Result<Vec<Reservation>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    async fn atomic_create(
        &self,
        key: SlotKey,
        _new: NewReservation,
    ) -> Result<Reservation, StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        match self.create {
            StubCreate::SlotTaken => Err(StoreError::SlotTaken(key)),
            StubCreate::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(StoreError::SlotTaken(key))
            }
        }
    }

    async fn get(&self, _id: Ulid) -> Result<Option<Reservation>, StoreError> {
        Ok(None)
    }

    async fn delete(&self, id: Ulid) -> Result<Reservation, StoreError> {
        Err(StoreError::NotFound(id))
    }

    async fn history(
        &self,
        _before: &HistoryCursor,
        _limit: usize,
    ) -> Result<Vec<Reservation>, StoreError> {
        Ok(Vec::new())
    }

    async fn settings(&self) -> Result<Settings, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(Settings::default())
    }

    async fn set_maintenance(&self, _enabled: bool) -> Result<(), StoreError> {
        Ok(())
    }

    fn resources(&self) -> Vec<ResourceInfo> {
        Vec::new()
    }
}
