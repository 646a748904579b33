use dashmap::DashSet;

/// Ids of the requests with a task in flight
///
/// `try_register` is an atomic check-and-insert, so two concurrent
/// admissions of the same request cannot both succeed.
#[derive(Debug, Default)]
pub struct RunningTaskRegistry {
    running: DashSet<i64>,
}

impl RunningTaskRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request, `false` if it already has a task in flight
    pub fn try_register(&self, request_id: i64) -> bool {
        self.running.insert(request_id)
    }

    /// Whether a task is in flight for a request
    pub fn contains(&self, request_id: i64) -> bool {
        self.running.contains(&request_id)
    }

    /// Unregister a request, `false` if it was not registered
    pub fn complete(&self, request_id: i64) -> bool {
        self.running.remove(&request_id).is_some()
    }

    /// Number of requests with a task in flight
    pub fn len(&self) -> usize {
        self.running.len()
    }

    /// Whether no task is in flight
    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }

    /// Registered ids
    pub fn ids(&self) -> Vec<i64> {
        self.running.iter().map(|id| *id).collect()
    }
}
