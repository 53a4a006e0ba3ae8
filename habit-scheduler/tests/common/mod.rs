use chrono::{DateTime, TimeZone, Utc};
use habit_scheduler::clock::ManualClock;
use habit_scheduler::engine::ReconciliationEngine;
use habit_scheduler::remote::{MockRemoteTracker, RemoteItem};
use habit_scheduler::task::SharedRegistry;
use std::sync::Arc;

/// Fixed starting instant for every test scenario.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
}

/// Allow multiple calls to init for tests.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[allow(dead_code)]
pub fn engine(
    registry: &SharedRegistry,
    remote: MockRemoteTracker,
    clock: &ManualClock,
) -> ReconciliationEngine {
    ReconciliationEngine::new(
        Arc::clone(registry),
        Arc::new(remote),
        Arc::new(clock.clone()),
    )
}

#[allow(dead_code)]
pub fn open_item(id: &str) -> RemoteItem {
    RemoteItem {
        id: id.to_string(),
        ..Default::default()
    }
}

#[allow(dead_code)]
pub fn completed_item(id: &str, at: DateTime<Utc>) -> RemoteItem {
    RemoteItem {
        id: id.to_string(),
        completed: true,
        date_completed: Some(at),
        ..Default::default()
    }
}
