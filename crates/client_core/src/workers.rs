use std::cmp::Ordering;

use shared::{domain::WorkerSort, protocol::Worker};

#[derive(Debug, Default, Clone)]
pub struct WorkersRoster {
    workers: Vec<Worker>,
}

impl WorkersRoster {
    pub fn new(workers: Vec<Worker>) -> Self {
        Self { workers }
    }

    /// Case-insensitive name filter, then sort. Sorting by location puts
    /// workers with a location first, ordered by location name; the rest
    /// follow ordered by name.
    pub fn filtered(&self, search: &str, sort: WorkerSort) -> Vec<&Worker> {
        let needle = search.trim().to_lowercase();
        let mut matches: Vec<&Worker> = self
            .workers
            .iter()
            .filter(|worker| needle.is_empty() || worker.name.to_lowercase().contains(&needle))
            .collect();

        match sort {
            WorkerSort::Name => matches.sort_by(|a, b| a.name.cmp(&b.name)),
            WorkerSort::Location => matches.sort_by(|a, b| by_location(a, b)),
        }
        matches
    }
}

fn by_location(a: &Worker, b: &Worker) -> Ordering {
    match (&a.location_name, &b.location_name) {
        (Some(x), Some(y)) => x.cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.name.cmp(&b.name),
    }
}
