use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ephemera_config::EphemeraConfig;
use ephemera_controller::{DestroyEnvironmentHandler, LifecycleController, ProvisionEnvironmentHandler, UpdateEnvironmentHandler};
use ephemera_driver::{ClusterDriver, DisabledClusterDriver, DisabledSourceHostDriver, GitHubDriver, KubeClusterDriver, SourceHostDriver};
use ephemera_jobs::{run_queue_janitor, run_scheduler, JobQueue, JobRegistry, Worker, CLEANUP_QUEUE, CLEANUP_STALE_ENVIRONMENTS_TASK, ENVIRONMENT_QUEUE};
use ephemera_reconciler::{Reconciler, ReconcilerConfig};
use ephemera_store::{EnvironmentStore, ListEnvironmentsFilter, PostgresStore};
use ephemera_synth::providers::ProviderConfig;
use ephemera_synth::{create_provider, LlmSynthesizer};
use uuid::Uuid;

use crate::output;

/// Shared wiring every long-running command needs: the store, the job
/// queue, the two drivers, and (optionally) the LLM synthesizer.
struct Core {
    config: EphemeraConfig,
    store: Arc<dyn EnvironmentStore>,
    jobs: JobQueue,
    cluster: Arc<dyn ClusterDriver>,
    source_host: Arc<dyn SourceHostDriver>,
    synthesizer: Option<Arc<LlmSynthesizer>>,
}

async fn bootstrap() -> Result<Core> {
    let config = EphemeraConfig::from_env().context("loading configuration")?;

    let store: Arc<dyn EnvironmentStore> = Arc::new(
        PostgresStore::connect(&config.database_url).await.context("connecting to the environment store")?,
    );
    let jobs = JobQueue::connect(&config.database_url).await.context("connecting the job queue")?;

    let cluster: Arc<dyn ClusterDriver> = match KubeClusterDriver::connect(config.cluster_kubeconfig_path.as_deref()).await {
        Ok(driver) => Arc::new(driver),
        Err(e) => {
            tracing::warn!(error = %e, "cluster driver unavailable, running with writes disabled");
            Arc::new(DisabledClusterDriver)
        }
    };

    let source_host: Arc<dyn SourceHostDriver> = if config.github_app_configured() {
        let app_id = config.github_app_id.clone().expect("checked by github_app_configured");
        let key_path = config.github_private_key_path.clone().expect("checked by github_app_configured");
        let private_key = std::fs::read(&key_path).with_context(|| format!("reading GitHub App private key at {key_path}"))?;
        GitHubDriver::new(app_id, &private_key).context("initializing GitHub App driver")?
    } else {
        tracing::warn!("GitHub App not configured, webhook-driven source-host actions will fail");
        Arc::new(DisabledSourceHostDriver)
    };

    let provider_config = ProviderConfig {
        provider: Some(match config.ai_provider {
            ephemera_config::AiProvider::Anthropic => "anthropic",
            ephemera_config::AiProvider::OpenAi => "openai",
            ephemera_config::AiProvider::Gemini => "gemini",
            ephemera_config::AiProvider::None => "none",
        }.to_string()),
        anthropic_api_key: config.ai_credentials.api_key.clone().filter(|_| config.ai_provider == ephemera_config::AiProvider::Anthropic),
        anthropic_model: config.ai_credentials.model.clone().filter(|_| config.ai_provider == ephemera_config::AiProvider::Anthropic),
        openai_api_key: config.ai_credentials.api_key.clone().filter(|_| config.ai_provider == ephemera_config::AiProvider::OpenAi),
        openai_model: config.ai_credentials.model.clone().filter(|_| config.ai_provider == ephemera_config::AiProvider::OpenAi),
        gemini_api_key: config.ai_credentials.api_key.clone().filter(|_| config.ai_provider == ephemera_config::AiProvider::Gemini),
        gemini_model: config.ai_credentials.model.clone().filter(|_| config.ai_provider == ephemera_config::AiProvider::Gemini),
    };
    let synthesizer = create_provider(&provider_config)
        .map(|provider| Arc::new(LlmSynthesizer::new(provider, Duration::from_secs(config.ai_cache_ttl_secs))));

    Ok(Core { config, store, jobs, cluster, source_host, synthesizer })
}

fn registry(controller: Arc<LifecycleController>) -> JobRegistry {
    let mut registry = JobRegistry::new();
    registry.register("provision_environment", Arc::new(ProvisionEnvironmentHandler(controller.clone())));
    registry.register("update_environment", Arc::new(UpdateEnvironmentHandler(controller.clone())));
    registry.register("destroy_environment", Arc::new(DestroyEnvironmentHandler(controller)));
    registry
}

fn reconciler_config(config: &EphemeraConfig) -> ReconcilerConfig {
    ReconcilerConfig {
        stale_provisioning_threshold: chrono::Duration::minutes(config.stale_provisioning_threshold_mins),
        stale_destroying_threshold: chrono::Duration::minutes(config.stale_destroying_threshold_mins),
        destroyed_retention: config.destroyed_retention_days.map(chrono::Duration::days),
        failed_retry_window: config.failed_retry_window_hours.map(chrono::Duration::hours),
    }
}

// ── Serve ─────────────────────────────────────────────────────────────────────

pub async fn serve() -> Result<()> {
    let core = bootstrap().await?;
    let webhook_secret: Option<Arc<str>> = core.config.github_webhook_secret.clone().map(Into::into);
    let controller = Arc::new(LifecycleController::new(
        core.store.clone(),
        core.jobs.clone(),
        core.cluster.clone(),
        core.source_host.clone(),
        core.synthesizer.clone(),
        core.config.base_domain.clone(),
    ));

    let app = ephemera_api::build_app(core.store, controller, webhook_secret, core.config.base_domain.clone());
    let listener = tokio::net::TcpListener::bind(&core.config.http_bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", core.config.http_bind_addr))?;
    println!("Ephemera API listening on http://{}", core.config.http_bind_addr);
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

// ── Worker ────────────────────────────────────────────────────────────────────

pub async fn worker() -> Result<()> {
    let core = bootstrap().await?;
    let controller = Arc::new(LifecycleController::new(
        core.store.clone(),
        core.jobs.clone(),
        core.cluster.clone(),
        core.source_host.clone(),
        core.synthesizer.clone(),
        core.config.base_domain.clone(),
    ));
    let reconciler = Arc::new(Reconciler::new(core.store.clone(), core.cluster.clone(), core.jobs.clone(), reconciler_config(&core.config)));

    let mut job_registry = registry(controller);
    job_registry.register(CLEANUP_STALE_ENVIRONMENTS_TASK, reconciler);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let poll_interval = core.config.broker_queue_poll_interval();

    let mut handles = Vec::new();
    for i in 0..core.config.worker_concurrency {
        let worker = Worker::new(
            format!("worker-{i}"),
            core.jobs.clone(),
            job_registry.clone(),
            vec![ENVIRONMENT_QUEUE.to_string(), CLEANUP_QUEUE.to_string()],
            poll_interval,
        );
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move { worker.run(rx).await }));
    }
    handles.push(tokio::spawn(run_queue_janitor(core.jobs.clone(), poll_interval, shutdown_rx.clone())));
    handles.push(tokio::spawn(run_scheduler(core.jobs.clone(), core.config.reconcile_interval(), shutdown_rx.clone())));

    println!("Ephemera worker pool running ({} workers)", core.config.worker_concurrency);
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    println!("shutting down…");
    let _ = shutdown_tx.send(true);
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

// ── Reconcile ─────────────────────────────────────────────────────────────────

pub async fn reconcile() -> Result<()> {
    let core = bootstrap().await?;
    let reconciler = Reconciler::new(core.store, core.cluster, core.jobs, reconciler_config(&core.config));
    let report = reconciler.run().await.context("running reconciliation sweeps")?;
    print!("{}", output::render_changes(&report.changes));
    if !report.errors.is_empty() {
        eprintln!("\n{} error(s):", report.errors.len());
        for e in &report.errors {
            eprintln!("  ! {e}");
        }
    }
    Ok(())
}

// ── Environments (read-only REST client) ─────────────────────────────────────

pub async fn environments_list(api_url: &str, repository: Option<String>, active_only: bool) -> Result<()> {
    let filter = ListEnvironmentsFilter { repository_full_name: repository, active_only };
    let mut url = reqwest::Url::parse(&format!("{}/api/v1/environments", api_url.trim_end_matches('/')))
        .context("building request URL")?;
    {
        let mut query = url.query_pairs_mut();
        if let Some(repo) = &filter.repository_full_name {
            query.append_pair("repository", repo);
        }
        if filter.active_only {
            query.append_pair("active_only", "true");
        }
    }

    let body: serde_json::Value = reqwest::get(url).await.with_context(|| format!("reaching server at {api_url}"))?.json().await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

pub async fn environments_show(api_url: &str, id: Uuid) -> Result<()> {
    let url = format!("{}/api/v1/environments/{id}", api_url.trim_end_matches('/'));
    let resp = reqwest::get(&url).await.with_context(|| format!("reaching server at {api_url}"))?;
    if resp.status() == reqwest::StatusCode::NOT_FOUND {
        anyhow::bail!("no environment with id {id}");
    }
    let body: serde_json::Value = resp.json().await.context("parsing environment response")?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
