use std::sync::Arc;

use anyhow::Context;

use crate::config::AppConfig;
use crate::dispatcher::{DispatchEvent, DispatchEvents, Dispatcher};
use crate::events_out::{start_events_out, EventsOutTx};
use crate::interpreter::{InterpreterFactory, PythonInterpreterFactory};

/// Process-wide wiring shared by the CLI commands and the HTTP server.
#[derive(Clone)]
pub struct AppContext {
    cfg: AppConfig,
    events_out: Option<EventsOutTx>,
}

impl AppContext {
    pub async fn new(cfg: AppConfig) -> anyhow::Result<Self> {
        let events_out = start_events_out(&cfg.events_out)
            .await
            .with_context(|| format!("failed to open events_out sink `{}`", cfg.events_out.path))?;
        Ok(Self { cfg, events_out })
    }

    pub fn cfg(&self) -> &AppConfig {
        &self.cfg
    }

    pub fn events_out(&self) -> Option<EventsOutTx> {
        self.events_out.clone()
    }

    /// Starts a dispatcher backed by real Python interpreters.
    pub fn start_dispatcher(&self) -> (Dispatcher, DispatchEvents) {
        let factory = PythonInterpreterFactory::new(self.cfg.interpreter.clone());
        self.start_dispatcher_with(Arc::new(factory))
    }

    pub fn start_dispatcher_with(
        &self,
        factory: Arc<dyn InterpreterFactory>,
    ) -> (Dispatcher, DispatchEvents) {
        Dispatcher::start(self.cfg.dispatcher.clone(), factory)
    }

    /// Mirrors `event` to events_out when it is enabled.
    pub async fn record_event(&self, event: &DispatchEvent) {
        if let Some(out) = &self.events_out {
            out.send_event(event).await;
        }
    }

    /// Flushes events_out before the process exits.
    pub async fn flush_events_out(&self) {
        if let Some(out) = &self.events_out {
            out.flush().await;
            if out.dropped_count() > 0 {
                tracing::warn!(target: "codebox.events_out", dropped = out.dropped_count(), "events were dropped");
            }
        }
    }
}
