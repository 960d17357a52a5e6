//! Standalone worker process.
//!
//! Loads settings from the environment (and `.env`), starts the worker pool
//! on the configured queue and runs until Ctrl-C. The credits ledger is an
//! in-memory stand-in seeded with a demo tenant.

use std::time::Duration;

use actors::{JobHandlerRegistry, JobRequest, job_handler};
use api::{JobEvent, Settings, init_job_queue};
use billing::InMemoryCreditsLedger;
use queue_core::{
    Credits, FailureCode, JobResult, OperationType, Priority, ProcessingError, TenantId,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

const DEMO_TENANT: &str = "demo-tenant";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Pretends to extract text from the document named in the payload.
fn demo_handlers() -> JobHandlerRegistry {
    JobHandlerRegistry::new().with(
        OperationType::Ocr,
        job_handler!(|job| {
            let Some(document) = job.payload.get("document_id").and_then(|d| d.as_str()) else {
                return Err(ProcessingError::fatal(
                    FailureCode::InvalidInput,
                    "payload has no document_id",
                ));
            };
            let pages = job.payload.get("pages").and_then(|p| p.as_u64()).unwrap_or(1);
            tokio::time::sleep(Duration::from_millis(200 * pages)).await;
            Ok(JobResult::with_output(
                format!("extracted {pages} pages from {document}"),
                json!({"document_id": document, "pages": pages}),
            ))
        }),
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let settings = Settings::from_env()?;
    let ledger = InMemoryCreditsLedger::arc();
    let tenant = TenantId::new(DEMO_TENANT);
    ledger.set_balance(&tenant, Credits::whole(10)).await;

    let system = init_job_queue(&settings, ledger, demo_handlers()).await?;
    let manager = system.manager().clone();

    let mut events = manager.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match &event {
                JobEvent::JobRejected { .. } | JobEvent::JobFailed { .. } => {
                    tracing::warn!("{}", event.description())
                }
                _ => tracing::info!("{}", event.description()),
            }
        }
    });

    for (n, priority) in [Priority::Normal, Priority::Urgent, Priority::High]
        .into_iter()
        .enumerate()
    {
        let request = JobRequest::new(
            tenant.clone(),
            OperationType::Ocr,
            json!({"document_id": format!("invoice-{}", n + 1), "pages": n + 1}),
        )
        .with_priority(priority);
        if let Err(e) = manager.submit_job(request).await {
            tracing::error!("Failed to submit demo job: {}", e);
        }
    }

    tracing::info!("Worker running on {}; press Ctrl-C to stop", settings.queue.queue_name);
    tokio::signal::ctrl_c().await?;

    system.shutdown().await?;
    Ok(())
}
