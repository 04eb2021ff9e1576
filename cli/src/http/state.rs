use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;

use codebox_core::api::{DispatchEvent, DispatchEvents, Dispatcher, EventsOutTx, JobLedger};
use codebox_plugins::Services;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Backlog of live events kept for slow SSE subscribers.
const UPDATE_BACKLOG: usize = 1024;

#[derive(Debug)]
pub struct ServerStats {
    started_at: Instant,
    pub requests_total: u64,
    pub errors_total: u64,
    pub by_endpoint: HashMap<&'static str, u64>,
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            requests_total: 0,
            errors_total: 0,
            by_endpoint: HashMap::new(),
        }
    }

    pub fn increment_request(&mut self, endpoint: &'static str) {
        self.requests_total += 1;
        *self.by_endpoint.entry(endpoint).or_default() += 1;
    }

    pub fn increment_error(&mut self) {
        self.errors_total += 1;
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub session_id: String,
    pub dispatcher: Dispatcher,
    pub services: Services,
    pub jobs: Arc<Mutex<JobLedger>>,
    /// Live dispatch events, sent while `jobs` is locked.
    pub updates: broadcast::Sender<DispatchEvent>,
    pub stats: Arc<RwLock<ServerStats>>,
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(
        session_id: String,
        dispatcher: Dispatcher,
        services: Services,
        retained_jobs: usize,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_BACKLOG);
        Self {
            session_id,
            dispatcher,
            services,
            jobs: Arc::new(Mutex::new(JobLedger::new(retained_jobs))),
            updates,
            stats: Arc::new(RwLock::new(ServerStats::new())),
            shutdown_tx,
        }
    }

    pub fn ledger(&self) -> MutexGuard<'_, JobLedger> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_request(&self, endpoint: &'static str) {
        let mut stats = self.stats.write().unwrap_or_else(|p| p.into_inner());
        stats.increment_request(endpoint);
    }

    pub fn record_error(&self) {
        let mut stats = self.stats.write().unwrap_or_else(|p| p.into_inner());
        stats.increment_error();
    }

    /// Folds dispatcher events into the ledger and fans them out to SSE
    /// subscribers until the dispatcher goes away.
    pub fn spawn_event_pump(
        &self,
        mut events: DispatchEvents,
        events_out: Option<EventsOutTx>,
    ) -> JoinHandle<()> {
        let jobs = Arc::clone(&self.jobs);
        let updates = self.updates.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Some(out) = &events_out {
                    out.send_event(&event).await;
                }
                let mut ledger = jobs.lock().unwrap_or_else(|p| p.into_inner());
                ledger.apply(&event);
                // no subscribers is fine
                let _ = updates.send(event);
            }
            tracing::debug!(target: "codebox.http", "event pump finished");
        })
    }
}
