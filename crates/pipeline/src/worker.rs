//! Worker pool: claims jobs from the durable queue and runs pipelines.
//!
//! Each worker owns one claim-execute-ack loop; a job lands on exactly one
//! worker via the queue's conditional claim. Stage idempotency makes
//! re-execution of orphaned jobs safe after a crash.

use std::time::Duration;

use es_store::queue::{self, Job, JobKind};

use crate::cancel::CancelToken;
use crate::orchestrator::{Orchestrator, VisualizeParams};
use crate::PipelineContext;

/// Spawn the configured number of workers. Returns their join handles;
/// workers exit after finishing their current job once `shutdown` fires.
pub fn spawn_workers(
    ctx: PipelineContext,
    shutdown: CancelToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    let count = ctx.config.pipeline.workers;
    (0..count)
        .map(|worker_id| {
            let ctx = ctx.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                worker_loop(worker_id, ctx, shutdown).await;
            })
        })
        .collect()
}

async fn worker_loop(worker_id: usize, ctx: PipelineContext, shutdown: CancelToken) {
    let poll = Duration::from_millis(ctx.config.pipeline.queue_poll_ms.max(50));
    let orchestrator = Orchestrator::new(ctx.clone());
    tracing::info!(worker_id, "pipeline worker started");

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let job = match queue::claim(&ctx.pool).await {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(worker_id, error = %e, "queue claim failed");
                tokio::time::sleep(poll).await;
                continue;
            }
        };

        let Some(job) = job else {
            tokio::time::sleep(poll).await;
            continue;
        };

        let ok = run_job(&orchestrator, &job).await;
        if let Err(e) = queue::finish(&ctx.pool, job.id, ok).await {
            tracing::error!(worker_id, job_id = job.id, error = %e, "queue ack failed");
        }
    }

    tracing::info!(worker_id, "pipeline worker stopped");
}

async fn run_job(orchestrator: &Orchestrator, job: &Job) -> bool {
    let result = match job.kind {
        JobKind::Pipeline => orchestrator.run_pipeline(job.task_id).await,
        JobKind::Visualize => {
            let params: VisualizeParams = match job
                .payload
                .clone()
                .map(serde_json::from_value)
                .transpose()
            {
                Ok(Some(params)) => params,
                Ok(None) => {
                    tracing::error!(job_id = job.id, "visualize job has no payload");
                    return false;
                }
                Err(e) => {
                    tracing::error!(job_id = job.id, error = %e, "bad visualize payload");
                    return false;
                }
            };
            orchestrator.run_visualization(job.task_id, params).await
        }
    };

    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(job_id = job.id, task_id = %job.task_id, error = %e, "job failed");
            false
        }
    }
}
