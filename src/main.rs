use std::sync::Arc;
use std::time::Duration;

use tasktrack::config::TrackerConfig;
use tasktrack::status::Status;
use tasktrack::tasks::{
    JobConfig, Scheduler, TaskContext, TaskJob, TaskRegistry, TaskStore, TokioScheduler,
    spawn_expiry_task, work_fn,
};

const DEMO_USER: &str = "demo";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = TrackerConfig::load()?;

    eprintln!("tasktrack v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Max running tasks: {}", config.max_tasks);
    eprintln!("   Parallel jobs: {}", config.max_parallel_jobs);
    eprintln!("   Task expiry: {}s\n", config.task_expiry.as_secs());

    let store = Arc::new(TaskStore::new(config.max_tasks));
    let registry: Arc<dyn TaskRegistry> = store.clone();
    let expiry = spawn_expiry_task(store.clone(), config.sweep_interval, config.task_expiry);
    let scheduler = TokioScheduler::new(config.max_parallel_jobs);

    // ── A job that reports progress and produces a resource ──────────────
    let scan = TaskJob::new(
        JobConfig::new("Scanning repository", DEMO_USER)
            .with_initial_message("Preparing scan")
            .with_final_message("Scan complete")
            .idempotent(true),
        registry.clone(),
        work_fn(|ctx: TaskContext| async move {
            for step in 1..=3 {
                ctx.set_message(format!("Scanning chunk {step} of 3")).await;
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            ctx.set_final_location("/repos/demo/scan").await;
            Status::ok("Repository scanned")
        }),
    )?;

    // ── A cancelable job that would run far too long ─────────────────────
    let log = TaskJob::new(
        JobConfig::new("Generating log", DEMO_USER)
            .with_initial_message("Walking history")
            .cancelable(true),
        registry.clone(),
        work_fn(|ctx: TaskContext| async move {
            loop {
                if ctx.is_cancelled() {
                    return Status::canceled("Log generation stopped");
                }
                ctx.set_message("Still walking history").await;
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }),
    )?;

    let log_record = log.start_task().await?;
    let scan_id = scheduler.submit(scan.clone()).await;
    let log_id = scheduler.submit(log).await;

    tokio::time::sleep(Duration::from_millis(250)).await;
    let canceled = store.cancel_task(DEMO_USER, log_record.task_id()).await?;
    eprintln!("Cancel request forced cancellation: {canceled}");

    if let Some(status) = scheduler.wait(scan_id).await {
        eprintln!("Scan finished: {status}");
    }
    if let Some(status) = scheduler.wait(log_id).await {
        eprintln!("Log job finished: {status}");
    }

    eprintln!("Scan final result: {}", scan.final_result().await);
    for record in store.list_tasks(DEMO_USER).await? {
        println!("{}", serde_json::to_string_pretty(&record)?);
    }

    let summary = store.summary().await;
    eprintln!(
        "\n{} tasks: {} succeeded, {} failed, {} canceled",
        summary.total, summary.succeeded, summary.failed, summary.canceled
    );

    scheduler.shutdown().await;
    expiry.abort();
    Ok(())
}
