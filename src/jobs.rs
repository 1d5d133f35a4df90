//! Job submission: create runs and publish one work request per run.
//!
//! A failed publish marks its run `Failed`, which is also what ends any
//! stream following that run. Publishing continues for the other runs, and
//! runs that were published successfully are left alone.

use crate::error::{GridError, Result};
use crate::runs::RunTable;
use crate::types::{JobId, RunId};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Topic work requests are published to unless configured otherwise.
pub const DEFAULT_TOPIC: &str = "simulation_requests";

/// A batch of identical runs to start.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobRequest {
    pub number_of_runs: usize,
    /// Producer configuration, passed through untouched.
    pub config: serde_json::Value,
}

/// Message asking a producer to execute one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkRequest {
    pub job_id: JobId,
    pub run_id: RunId,
    pub config: serde_json::Value,
}

/// Runs created for a submitted job.
#[derive(Clone, Debug, PartialEq)]
pub struct JobReceipt {
    pub job_id: JobId,
    pub run_ids: Vec<RunId>,
}

/// Queue the producers consume work requests from.
pub trait TaskQueue: Send + Sync {
    /// Publish one request. Any error counts as a failed publish.
    fn publish(&self, topic: &str, request: &WorkRequest) -> Result<()>;
}

/// In-process task queue over an unbounded crossbeam channel.
pub struct ChannelTaskQueue {
    sender: Sender<(String, WorkRequest)>,
    receiver: Receiver<(String, WorkRequest)>,
}

impl ChannelTaskQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Consumer side: `(topic, request)` pairs in publish order.
    pub fn receiver(&self) -> Receiver<(String, WorkRequest)> {
        self.receiver.clone()
    }
}

impl Default for ChannelTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue for ChannelTaskQueue {
    fn publish(&self, topic: &str, request: &WorkRequest) -> Result<()> {
        self.sender
            .send((topic.to_string(), request.clone()))
            .map_err(|e| GridError::PublishFailure {
                run_id: request.run_id,
                message: e.to_string(),
            })
    }
}

/// Creates runs for a job and publishes their work requests.
pub struct JobSubmitter<'a> {
    runs: &'a RunTable,
    queue: &'a dyn TaskQueue,
    topic: String,
}

impl<'a> JobSubmitter<'a> {
    pub fn new(runs: &'a RunTable, queue: &'a dyn TaskQueue) -> Self {
        Self {
            runs,
            queue,
            topic: DEFAULT_TOPIC.to_string(),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Create `number_of_runs` queued runs and publish a request for each.
    ///
    /// If any publish fails, that run is marked `Failed` and the submission
    /// returns `PublishFailure` for the first failed run once every request
    /// has been attempted.
    pub fn submit(&self, request: &JobRequest) -> Result<JobReceipt> {
        let job_id = self.runs.allocate_job_id()?;
        let run_ids = (0..request.number_of_runs)
            .map(|_| self.runs.create_run(Some(job_id)).map(|run| run.id))
            .collect::<Result<Vec<RunId>>>()?;

        let mut first_failure = None;
        for &run_id in &run_ids {
            let work = WorkRequest {
                job_id,
                run_id,
                config: request.config.clone(),
            };

            if let Err(e) = self.queue.publish(&self.topic, &work) {
                error!(job_id = %job_id, run_id = %run_id, error = %e, "failed to publish work request");
                self.runs.mark_failed(run_id)?;
                first_failure.get_or_insert(GridError::PublishFailure {
                    run_id,
                    message: e.to_string(),
                });
            }
        }

        if let Some(failure) = first_failure {
            return Err(failure);
        }

        info!(job_id = %job_id, runs = run_ids.len(), topic = %self.topic, "job submitted");
        Ok(JobReceipt { job_id, run_ids })
    }
}
