//! In-memory record of submitted jobs, rebuilt from dispatch events.

use std::collections::{HashMap, VecDeque};

use crate::dispatcher::{DispatchEvent, DispatchEventKind};
use crate::job::{Job, JobId, OutputLine};

#[derive(Debug)]
pub struct JobLedger {
    jobs: HashMap<JobId, Job>,
    /// Finished job ids, oldest first.
    finished: VecDeque<JobId>,
    retain_finished: usize,
}

impl JobLedger {
    pub fn new(retain_finished: usize) -> Self {
        Self {
            jobs: HashMap::new(),
            finished: VecDeque::new(),
            retain_finished,
        }
    }

    pub fn register(&mut self, id: JobId, source_text: impl Into<String>) {
        self.jobs
            .entry(id.clone())
            .or_insert_with(|| Job::new(id, source_text.into()));
    }

    /// Folds one event into the matching job. Returns false for unknown jobs
    /// and for events the job's current status does not accept.
    pub fn apply(&mut self, event: &DispatchEvent) -> bool {
        let Some(job) = self.jobs.get_mut(&event.job_id) else {
            tracing::debug!(target: "codebox.ledger", job_id = %event.job_id, "event for unknown job");
            return false;
        };
        let applied = match &event.kind {
            DispatchEventKind::Started => job.start().is_ok(),
            DispatchEventKind::Output { stream, text } => job.push_output(OutputLine {
                stream: *stream,
                text: text.clone(),
            }),
            DispatchEventKind::Finished { record } => job.finish(record).is_ok(),
        };
        if !applied {
            tracing::warn!(
                target: "codebox.ledger",
                job_id = %event.job_id,
                status = ?job.status,
                "event does not fit job status"
            );
            return false;
        }
        if event.is_terminal() {
            self.finished.push_back(event.job_id.clone());
            self.evict();
        }
        true
    }

    pub fn get(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn evict(&mut self) {
        while self.finished.len() > self.retain_finished {
            if let Some(old) = self.finished.pop_front() {
                self.jobs.remove(&old);
            }
        }
    }
}
