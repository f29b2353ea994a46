use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::models::job::ProcessingJob;
use crate::services::pipeline::JobOrchestrator;

/// Fixed pool of pipeline workers draining the bounded job queue.
///
/// Backpressure lives on the submission side: `JobOrchestrator::create_job`
/// reserves a queue slot before doing any work. On shutdown the pool stops
/// taking new jobs, finishes whatever is in flight, and is joined.
pub struct PipelineRunner {
    workers: JoinSet<()>,
    token: CancellationToken,
}

impl PipelineRunner {
    pub fn spawn(
        orchestrator: Arc<JobOrchestrator>,
        jobs: mpsc::Receiver<ProcessingJob>,
        worker_count: usize,
        token: CancellationToken,
    ) -> Self {
        let jobs = Arc::new(Mutex::new(jobs));
        let mut workers = JoinSet::new();

        for worker_id in 0..worker_count {
            let orchestrator = orchestrator.clone();
            let jobs = jobs.clone();
            let token = token.clone();
            workers.spawn(worker_loop(worker_id, orchestrator, jobs, token));
        }

        Self { workers, token }
    }

    /// Cancel the pool and wait for in-flight pipelines to finish.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        while let Some(result) = self.workers.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "pipeline worker panicked");
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    orchestrator: Arc<JobOrchestrator>,
    jobs: Arc<Mutex<mpsc::Receiver<ProcessingJob>>>,
    token: CancellationToken,
) {
    tracing::debug!(worker_id, "pipeline worker started");

    loop {
        let job = tokio::select! {
            _ = token.cancelled() => break,
            job = recv(&jobs) => match job {
                Some(job) => job,
                None => break,
            },
        };

        orchestrator.run_pipeline(job).await;
    }

    tracing::debug!(worker_id, "pipeline worker stopped");
}

async fn recv(jobs: &Arc<Mutex<mpsc::Receiver<ProcessingJob>>>) -> Option<ProcessingJob> {
    jobs.lock().await.recv().await
}
