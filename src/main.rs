use std::sync::Arc;

use anyhow::Context;

use form_runner::api::{AppState, router};
use form_runner::browser::BrowserLauncher;
use form_runner::config::RunnerConfig;
use form_runner::queue::TaskQueue;
use form_runner::tools::ToolRegistry;
use form_runner::worker::Worker;

#[cfg(feature = "chrome")]
fn launcher(config: &RunnerConfig) -> anyhow::Result<Arc<dyn BrowserLauncher>> {
    Ok(Arc::new(form_runner::browser::chrome::ChromeLauncher::new(
        config.headless,
    )))
}

#[cfg(not(feature = "chrome"))]
fn launcher(_config: &RunnerConfig) -> anyhow::Result<Arc<dyn BrowserLauncher>> {
    anyhow::bail!("form-runner was built without a browser backend; rebuild with `--features chrome`")
}

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

    let config = RunnerConfig::from_env();
    config.validate()?;
    config
        .ensure_upload_dir()
        .await
        .with_context(|| format!("creating upload dir {}", config.upload_dir.display()))?;

    let launcher = launcher(&config)?;

    eprintln!("📝 Form Runner v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Dashboard API: http://0.0.0.0:{}/api/tasks", config.port);
    eprintln!("   Live updates:  ws://0.0.0.0:{}/ws", config.port);
    eprintln!("   Worker stage:  http://0.0.0.0:{}/api/worker", config.port);
    eprintln!("   Uploads:       {}", config.upload_dir.display());

    let (queue, rx) = TaskQueue::new();
    let worker = Worker::new(Arc::clone(&queue), launcher, config.automation.clone());
    let stages = worker.stages();
    let worker_handle = worker.spawn(rx);

    let tools = Arc::new(ToolRegistry::with_queue_tools(Arc::clone(&queue)).await);
    let app = router(AppState {
        queue,
        tools,
        upload_dir: config.upload_dir.clone(),
        stages,
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("binding port {}", config.port))?;
    tracing::info!(port = config.port, "Dashboard server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await
        .context("dashboard server failed")?;

    worker_handle.abort();
    Ok(())
}
