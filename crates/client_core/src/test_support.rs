//! In-memory backend used by coordinator and runtime tests.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::domain::{Location, LocationId, SessionId, UserId};
use tokio::sync::Semaphore;

use crate::{
    coordinator::SessionOp,
    error::SessionError,
    location_directory::LocationDirectory,
    session_service::{LocationSource, SessionOps},
};

pub(crate) fn store_a() -> Location {
    Location::new(5, "StoreA")
}

pub(crate) fn store_b() -> Location {
    Location::new(7, "StoreB")
}

pub(crate) fn store_c() -> Location {
    Location::new(9, "StoreC")
}

pub(crate) fn directory() -> Arc<LocationDirectory> {
    Arc::new(LocationDirectory::with_locations(vec![
        store_a(),
        store_b(),
        store_c(),
    ]))
}

#[derive(Default)]
pub(crate) struct RecordingBackend {
    calls: Mutex<Vec<SessionOp>>,
    fail_status: Mutex<Option<u16>>,
    current: Mutex<Option<Location>>,
    locations: Mutex<Vec<Location>>,
    permits: Option<Arc<Semaphore>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingBackend {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every operation waits for a permit from the returned semaphore.
    pub(crate) fn gated() -> (Arc<Self>, Arc<Semaphore>) {
        let permits = Arc::new(Semaphore::new(0));
        let backend = Self {
            permits: Some(Arc::clone(&permits)),
            ..Self::default()
        };
        (Arc::new(backend), permits)
    }

    pub(crate) fn fail_with_status(&self, status: u16) {
        *self.fail_status.lock().unwrap() = Some(status);
    }

    pub(crate) fn set_current(&self, location: Option<Location>) {
        *self.current.lock().unwrap() = location;
    }

    pub(crate) fn set_locations(&self, locations: Vec<Location>) {
        *self.locations.lock().unwrap() = locations;
    }

    pub(crate) fn calls(&self) -> Vec<SessionOp> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait_for_calls(&self, count: usize) {
        for _ in 0..200 {
            if self.calls.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "expected {count} session calls, saw {:?}",
            self.calls.lock().unwrap()
        );
    }

    async fn record(&self, op: SessionOp) -> Result<(), SessionError> {
        self.calls.lock().unwrap().push(op);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(permits) = &self.permits {
            permits.acquire().await.expect("semaphore open").forget();
        } else {
            tokio::task::yield_now().await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match *self.fail_status.lock().unwrap() {
            Some(status) => Err(SessionError::Http { status }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SessionOps for RecordingBackend {
    async fn clock_in(&self, location_id: LocationId) -> Result<(), SessionError> {
        self.record(SessionOp::ClockIn(location_id)).await
    }

    async fn clock_out(&self) -> Result<(), SessionError> {
        self.record(SessionOp::ClockOut).await
    }

    async fn edit_session(
        &self,
        session_id: SessionId,
        location_id: LocationId,
        check_in: DateTime<Utc>,
        check_out: Option<DateTime<Utc>>,
    ) -> Result<(), SessionError> {
        self.record(SessionOp::EditSession {
            session_id,
            location_id,
            check_in,
            check_out,
        })
        .await
    }

    async fn delete_session(&self, session_id: SessionId) -> Result<(), SessionError> {
        self.record(SessionOp::DeleteSession(session_id)).await
    }

    async fn current_location(&self, _user_id: UserId) -> Result<Option<Location>, SessionError> {
        if let Some(status) = *self.fail_status.lock().unwrap() {
            return Err(SessionError::Http { status });
        }
        Ok(self.current.lock().unwrap().clone())
    }
}

#[async_trait]
impl LocationSource for RecordingBackend {
    async fn fetch_locations(&self) -> Result<Vec<Location>, SessionError> {
        if let Some(status) = *self.fail_status.lock().unwrap() {
            return Err(SessionError::Http { status });
        }
        Ok(self.locations.lock().unwrap().clone())
    }
}
