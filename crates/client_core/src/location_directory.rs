//! Cached set of valid check-in locations.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use shared::domain::{Location, LocationId};
use tracing::{info, warn};

use crate::{error::SessionError, selection::Selection, session_service::LocationSource};

#[derive(Debug, Default)]
struct DirectorySnapshot {
    ordered: Vec<Location>,
    by_id: HashMap<LocationId, usize>,
}

impl DirectorySnapshot {
    fn build(locations: Vec<Location>) -> Self {
        let mut ordered = Vec::with_capacity(locations.len());
        let mut by_id = HashMap::with_capacity(locations.len());
        for location in locations {
            if by_id.contains_key(&location.id) {
                warn!(
                    location_id = location.id.0,
                    name = %location.name,
                    "directory: duplicate location id ignored"
                );
                continue;
            }
            by_id.insert(location.id, ordered.len());
            ordered.push(location);
        }
        Self { ordered, by_id }
    }
}

/// Readers always see either the previous or the new set in full: a load
/// builds a fresh snapshot off-lock and swaps the pointer.
#[derive(Debug, Default)]
pub struct LocationDirectory {
    snapshot: RwLock<Arc<DirectorySnapshot>>,
}

impl LocationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_locations(locations: Vec<Location>) -> Self {
        let directory = Self::new();
        directory.replace(locations);
        directory
    }

    /// Fetches the full set and replaces the cache. On failure the previously
    /// loaded set stays in place.
    pub async fn load(&self, source: &dyn LocationSource) -> Result<usize, SessionError> {
        match source.fetch_locations().await {
            Ok(locations) => {
                let count = self.replace(locations);
                info!(count, "directory: locations loaded");
                Ok(count)
            }
            Err(err) => {
                warn!(error = %err, "directory: load failed; keeping previous set");
                Err(err)
            }
        }
    }

    pub fn replace(&self, locations: Vec<Location>) -> usize {
        let next = Arc::new(DirectorySnapshot::build(locations));
        let count = next.ordered.len();
        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = next;
        count
    }

    fn current(&self) -> Arc<DirectorySnapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn resolve(&self, id: LocationId) -> Option<Location> {
        let snapshot = self.current();
        snapshot
            .by_id
            .get(&id)
            .map(|index| snapshot.ordered[*index].clone())
    }

    pub fn resolve_by_name(&self, name: &str) -> Option<Location> {
        self.current()
            .ordered
            .iter()
            .find(|location| location.name == name)
            .cloned()
    }

    pub fn locations(&self) -> Vec<Location> {
        self.current().ordered.clone()
    }

    /// Picker entries: `Absent` first, then every location in load order.
    pub fn options(&self) -> Vec<Selection> {
        std::iter::once(Selection::Absent)
            .chain(
                self.current()
                    .ordered
                    .iter()
                    .map(|location| Selection::Location(location.name.clone())),
            )
            .collect()
    }

    pub fn len(&self) -> usize {
        self.current().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "tests/location_directory_tests.rs"]
mod tests;
