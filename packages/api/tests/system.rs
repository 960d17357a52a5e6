use std::sync::Arc;
use std::time::Duration;

use actors::{JobHandlerRegistry, job_handler};
use api::{
    EnqueueJobRequest, EnqueueJobResponse, Settings, cancel_job, enqueue_job, get_job_status,
    get_performance_metrics, get_queue_stats, init_job_queue, next_sse_frame, retry_failed_job,
};
use billing::InMemoryCreditsLedger;
use queue_core::{Credits, JobResult, JobState, OperationType, QueueConfig, TenantId};
use serde_json::json;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.queue = QueueConfig {
        concurrency: 2,
        poll_interval_ms: 20,
        ..QueueConfig::default()
    };
    settings.admission.rate_limit = None;
    settings
}

fn ocr_handlers() -> JobHandlerRegistry {
    JobHandlerRegistry::new().with(
        OperationType::Ocr,
        job_handler!(|job| Ok(JobResult::with_output(
            "text extracted",
            json!({"pages": 1, "document": job.payload["document_id"].clone()})
        ))),
    )
}

fn submission(tenant: &str, priority: &str) -> EnqueueJobRequest {
    EnqueueJobRequest {
        tenant_id: tenant.to_string(),
        operation: "ocr".to_string(),
        payload: json!({"document_id": "invoice-42", "emission_volume_tons": 1}),
        priority: Some(priority.to_string()),
        queue_name: None,
        max_retries: None,
    }
}

#[tokio::test]
async fn submitted_jobs_run_and_are_billed() -> TestResult {
    let ledger = InMemoryCreditsLedger::arc();
    let tenant = TenantId::new("acme");
    ledger.set_balance(&tenant, Credits::whole(1)).await;

    let system = init_job_queue(&settings(), ledger.clone(), ocr_handlers()).await?;
    let manager = system.manager().clone();
    let mut events = manager.subscribe();
    assert_eq!(system.workers().await?.len(), 2);

    let EnqueueJobResponse::Accepted {
        job_id,
        reserved_cost,
        ..
    } = enqueue_job(&manager, submission("acme", "high")).await?
    else {
        return Err("submission rejected".into());
    };
    assert_eq!(reserved_cost, Credits::from_millis(100));

    let mut frames = Vec::new();
    while !frames.iter().any(|f: &String| f.contains("event: job_completed")) {
        let frame = tokio::time::timeout(Duration::from_secs(5), next_sse_frame(&mut events))
            .await?
            .ok_or("event stream closed")?;
        frames.push(frame);
    }
    let position = |name: &str| frames.iter().position(|f| f.contains(name));
    let enqueued = position("event: job_enqueued").ok_or("no job_enqueued frame")?;
    let started = position("event: job_started").ok_or("no job_started frame")?;
    assert!(enqueued < started, "enqueue announced after start: {frames:?}");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let status = loop {
        let status = get_job_status(&manager, &job_id.to_string())
            .await?
            .ok_or("job missing")?;
        if status.state == JobState::Completed || tokio::time::Instant::now() > deadline {
            break status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.charged_cost, Some(Credits::from_millis(100)));

    let balance = billing::CreditsLedger::get_balance(ledger.as_ref(), &tenant).await?;
    assert_eq!(balance, Credits::from_millis(900));

    let stats = get_queue_stats(&manager, None).await?;
    assert_eq!(stats.completed, 1);
    let performance = get_performance_metrics(&manager, None).await?;
    assert_eq!(performance.completed, 1);

    system.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn rejections_and_missing_jobs_are_answers() -> TestResult {
    let ledger = InMemoryCreditsLedger::arc();
    ledger
        .set_balance(&TenantId::new("broke"), Credits::from_millis(50))
        .await;
    let system = init_job_queue(&settings(), ledger, JobHandlerRegistry::new()).await?;
    let manager = system.manager().clone();

    match enqueue_job(&manager, submission("broke", "normal")).await? {
        EnqueueJobResponse::Rejected {
            code, retryable, ..
        } => {
            assert_eq!(code, "INSUFFICIENT_CREDITS");
            assert!(!retryable);
        }
        other => return Err(format!("expected rejection, got {other:?}").into()),
    }
    assert_eq!(get_queue_stats(&manager, None).await?.total(), 0);

    let unknown = api::JobId::new().to_string();
    assert_eq!(get_job_status(&manager, &unknown).await?, None);
    assert!(!cancel_job(&manager, &unknown).await?.cancelled);
    assert!(!retry_failed_job(&manager, &unknown).await?.requeued);

    let err = get_job_status(&manager, "not-a-ulid").await.unwrap_err();
    assert_eq!(err.code(), "INVALID_REQUEST");

    system.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn waiting_jobs_can_be_cancelled() -> TestResult {
    let ledger = InMemoryCreditsLedger::arc();
    ledger.set_balance(&TenantId::new("acme"), Credits::whole(5)).await;
    let mut settings = settings();
    settings.queue.queue_name = "idle".to_string();
    let system = init_job_queue(&settings, ledger.clone(), JobHandlerRegistry::new()).await?;
    let manager = system.manager().clone();

    // Route the job to a queue no worker serves so it stays WAITING.
    let mut request = submission("acme", "normal");
    request.queue_name = Some("unserved".to_string());
    let EnqueueJobResponse::Accepted { job_id, .. } = enqueue_job(&manager, request).await? else {
        return Err("submission rejected".into());
    };

    let response = cancel_job(&manager, &job_id.to_string()).await?;
    assert!(response.cancelled);
    assert!(!cancel_job(&manager, &job_id.to_string()).await?.cancelled);

    let status = get_job_status(&manager, &job_id.to_string())
        .await?
        .ok_or("job missing")?;
    assert_eq!(status.state, JobState::Cancelled);
    assert!(ledger.debits().await.is_empty());

    system.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn unreachable_database_aborts_startup() {
    let mut settings = settings();
    settings.database.endpoint = "ws://127.0.0.1:1".to_string();
    let result = init_job_queue(
        &settings,
        Arc::new(InMemoryCreditsLedger::new()),
        JobHandlerRegistry::new(),
    )
    .await;
    assert!(matches!(result, Err(api::InitError::Database(_))));
}
