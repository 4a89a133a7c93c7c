//! Learning Build Orchestrator worker binary.
//!
//! Wires every `orchestrator-*` crate together: connects to Postgres, runs
//! migrations, constructs every repo and collaborator, registers the full
//! `Pipeline` set into a `PipelineRegistry`, and runs a bounded claim loop
//! per worker slot until SIGTERM/SIGINT.

mod object_store_fs;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use orchestrator_ai::{AiClient, BackoffPolicy, HttpAiClient, HttpAiClientConfig};
use orchestrator_core::config::OrchestratorConfig;
use orchestrator_core::pipeline::{JobCtx, Pipeline, PipelineRegistry};
use orchestrator_core::{ObjectStore, VectorStore};
use orchestrator_db::{ConceptRepo, JobRepo, MaterialRepo, NodeRepo, PathRepo, PgVectorStore, SagaRepo};
use orchestrator_evidence::EvidenceRetriever;
use orchestrator_notify::Notifier;
use orchestrator_saga::{ReverserRegistry, SagaCoordinator};
use orchestrator_stages::{
    BuildDispatcher, ChainSignatureBuildStage, ConceptGraphBuildStage, CoverageCoherenceAuditStage,
    EmbedChunksStage, IngestChunksStage, LearningBuildStage, NodeAvatarRenderStage, NodeDocBuildStage,
    NodeDocPatchStage, NodeFiguresPlanStage, NodeFiguresRenderStage, NodeVideosPlanStage, NodeVideosRenderStage,
    PathCoverRenderStage, PathIntakeStage, PathPlanBuildStage, RealizeActivitiesStage, SagaCleanupStage,
    UserProfileRefreshStage, WebResourcesSeedStage,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use object_store_fs::FsObjectStore;

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).json().init();
}

/// Every job type a worker claims, in the order a fresh claim loop tries
/// them (the DAG's own dependency order plus `learning_build`/`saga_cleanup`,
/// which are outside the DAG proper).
fn claimable_job_types(registry: &PipelineRegistry) -> Vec<String> {
    registry.registered_types().into_iter().map(str::to_string).collect()
}

fn build_registry(
    config: Arc<OrchestratorConfig>,
    paths: Arc<PathRepo>,
    materials: Arc<MaterialRepo>,
    concepts: Arc<ConceptRepo>,
    nodes: Arc<NodeRepo>,
    jobs: Arc<JobRepo>,
    saga: Arc<SagaCoordinator>,
    ai: Arc<dyn AiClient>,
    vectors: Arc<dyn VectorStore>,
    objects: Arc<dyn ObjectStore>,
    evidence: Arc<EvidenceRetriever>,
    dispatcher: Arc<BuildDispatcher>,
) -> PipelineRegistry {
    let mut registry = PipelineRegistry::new();

    registry.register(Arc::new(LearningBuildStage::new(dispatcher)));
    registry.register(Arc::new(PathIntakeStage::new(paths.clone(), None)));
    registry.register(Arc::new(WebResourcesSeedStage::new(paths.clone(), materials.clone(), None, config.clone())));
    registry.register(Arc::new(IngestChunksStage::new(materials.clone())));
    registry.register(Arc::new(EmbedChunksStage::new(materials.clone(), ai.clone(), vectors.clone(), config.clone())));
    registry.register(Arc::new(UserProfileRefreshStage::new(paths.clone(), materials.clone())));
    registry.register(Arc::new(ConceptGraphBuildStage::new(
        paths.clone(),
        materials.clone(),
        concepts.clone(),
        ai.clone(),
        config.default_max_attempts,
        config.concept_graph_max_chunks,
    )));
    registry.register(Arc::new(ChainSignatureBuildStage::new(paths.clone(), concepts.clone())));
    registry.register(Arc::new(PathPlanBuildStage::new(
        paths.clone(),
        concepts.clone(),
        nodes.clone(),
        ai.clone(),
        config.default_max_attempts,
    )));
    registry.register(Arc::new(NodeFiguresPlanStage::new(
        nodes.clone(),
        materials.clone(),
        evidence.clone(),
        ai.clone(),
        config.default_max_attempts,
    )));
    registry.register(Arc::new(NodeFiguresRenderStage::new(nodes.clone(), ai.clone(), objects.clone())));
    registry.register(Arc::new(NodeVideosPlanStage::new(
        nodes.clone(),
        materials.clone(),
        evidence.clone(),
        ai.clone(),
        config.default_max_attempts,
    )));
    registry.register(Arc::new(NodeVideosRenderStage::new(nodes.clone(), ai.clone(), objects.clone())));
    registry.register(Arc::new(NodeDocBuildStage::new(
        nodes.clone(),
        materials.clone(),
        evidence.clone(),
        ai.clone(),
        config.default_max_attempts,
        config.node_doc_must_cite_per_node,
        config.node_doc_build_concurrency,
    )));
    registry.register(Arc::new(NodeDocPatchStage::new(nodes.clone(), materials.clone(), evidence.clone(), ai.clone(), config.default_max_attempts)));
    registry.register(Arc::new(RealizeActivitiesStage::new(
        nodes.clone(),
        materials.clone(),
        evidence.clone(),
        ai.clone(),
        config.default_max_attempts,
    )));
    registry.register(Arc::new(CoverageCoherenceAuditStage::new(paths.clone(), nodes.clone(), materials.clone(), concepts.clone())));
    registry.register(Arc::new(PathCoverRenderStage::new(paths.clone(), ai.clone(), objects.clone())));
    registry.register(Arc::new(NodeAvatarRenderStage::new(nodes.clone(), ai.clone(), objects.clone())));
    registry.register(Arc::new(SagaCleanupStage::new(saga.clone(), config.saga_cleanup_older_hours, config.saga_cleanup_limit)));

    registry
}

/// One worker slot: claims a job, runs its `Pipeline`, heartbeats while it
/// runs, and ticks the Build DAG dispatcher when a DAG child job settles.
async fn run_worker_slot(
    slot: usize,
    worker_id: String,
    job_types: Vec<String>,
    jobs: Arc<JobRepo>,
    registry: Arc<PipelineRegistry>,
    dispatcher: Arc<BuildDispatcher>,
    notifier: Arc<Notifier>,
    config: Arc<OrchestratorConfig>,
    shutdown: CancellationToken,
) {
    let lease = chrono::Duration::from_std(config.default_lease).unwrap_or_else(|_| chrono::Duration::seconds(90));

    loop {
        if shutdown.is_cancelled() {
            info!(slot, "worker slot shutting down");
            return;
        }

        let claimed = match jobs.claim(&worker_id, &job_types, lease).await {
            Ok(job) => job,
            Err(e) => {
                error!(slot, error = %e, "claim failed; backing off");
                tokio::time::sleep(Duration::from_millis(500)).await;
                continue;
            }
        };

        let job = match claimed {
            Some(job) => job,
            None => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(250)) => {}
                    _ = shutdown.cancelled() => {}
                }
                continue;
            }
        };

        let Some(pipeline) = registry.get(&job.job_type) else {
            warn!(job_id = %job.id, job_type = %job.job_type, "no pipeline registered for job type; failing");
            let _ = jobs.fail(job.id, "dispatch", "no pipeline registered for this job type").await;
            continue;
        };

        let job_id = job.id;
        let owner_user_id = job.owner_user_id;
        let parent_job_id = job.parent_job_id;
        let job_type = job.job_type.clone();

        notifier
            .publish_job_event(owner_user_id, job_id, orchestrator_notify::Event::JobProgress, serde_json::json!({"job_type": job_type, "status": "running"}))
            .await;

        let ctx = CancellationToken::new();
        let mut jc = JobCtx::new(job, jobs.clone(), ctx);

        let run_result = run_with_heartbeat(pipeline, &mut jc, jobs.clone(), job_id).await;

        match run_result {
            Ok(()) => {
                info!(job_id = %job_id, job_type = %job_type, "stage completed");
            }
            Err(e) => {
                warn!(job_id = %job_id, job_type = %job_type, error = %e, "stage run failed");
                let _ = jobs.fail(job_id, &job_type, &e.to_string()).await;
            }
        }

        if let Ok(final_job) = jobs.find(job_id).await {
            let event = match final_job.status {
                orchestrator_core::job::JobStatus::Succeeded => Some(orchestrator_notify::Event::JobDone),
                orchestrator_core::job::JobStatus::Failed => Some(orchestrator_notify::Event::JobFailed),
                _ => None,
            };
            if let Some(event) = event {
                notifier
                    .publish_job_event(owner_user_id, job_id, event, serde_json::json!({"job_type": job_type}))
                    .await;
            }

            if final_job.status.is_terminal() {
                if let Some(parent_id) = parent_job_id {
                    if let Err(e) = dispatcher.tick(parent_id).await {
                        error!(parent_job_id = %parent_id, error = %e, "build dispatcher tick failed");
                    }
                }
            }
        }
    }
}

/// Runs one stage to completion while a background task keeps its lease
/// alive by heartbeating on a fixed interval.
async fn run_with_heartbeat(
    pipeline: Arc<dyn Pipeline>,
    jc: &mut JobCtx,
    jobs: Arc<JobRepo>,
    job_id: Uuid,
) -> orchestrator_core::Result<()> {
    let heartbeat_cancel = CancellationToken::new();
    let heartbeat_task = {
        let jobs = jobs.clone();
        let cancel = heartbeat_cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(30)) => {
                        if jobs.heartbeat(job_id, chrono::Duration::seconds(90)).await.is_err() {
                            return;
                        }
                    }
                    _ = cancel.cancelled() => return,
                }
            }
        })
    };

    let result = pipeline.run(jc).await;
    heartbeat_cancel.cancel();
    let _ = heartbeat_task.await;
    result
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("starting orchestrator-worker");

    let config = Arc::new(OrchestratorConfig::from_env());

    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let max_connections = env_usize("DATABASE_MAX_CONNECTIONS", 10) as u32;
    let pool = orchestrator_db::connect(&database_url, max_connections).await?;
    orchestrator_db::migrate(&pool).await?;
    info!("database connected and migrated");

    let jobs = Arc::new(JobRepo::new(pool.clone()));
    let paths = Arc::new(PathRepo::new(pool.clone()));
    let materials = Arc::new(MaterialRepo::new(pool.clone()));
    let concepts = Arc::new(ConceptRepo::new(pool.clone()));
    let nodes = Arc::new(NodeRepo::new(pool.clone()));
    let saga_repo = SagaRepo::new(pool.clone());
    let vector_store: Arc<dyn VectorStore> = Arc::new(PgVectorStore::new(pool.clone()));

    let object_base_dir = env_string("OBJECT_STORE_DIR", "./data/objects");
    let object_public_base_url = env_string("OBJECT_STORE_PUBLIC_URL", "http://localhost:8080/objects");
    let objects: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(object_base_dir, object_public_base_url));

    let ai_client: Arc<dyn AiClient> = Arc::new(HttpAiClient::new(HttpAiClientConfig {
        base_url: env_string("AI_BASE_URL", "https://api.openai.com"),
        api_key: env::var("AI_API_KEY").unwrap_or_default(),
        chat_model: env_string("AI_CHAT_MODEL", "gpt-4o-mini"),
        embed_model: env_string("AI_EMBED_MODEL", "text-embedding-3-small"),
        image_model: config.openai_image_model.clone(),
        video_model: config.openai_video_model.clone(),
        backoff: BackoffPolicy::default(),
    }));

    let reversers = ReverserRegistry::with_defaults(objects.clone(), vector_store.clone());
    let saga = Arc::new(SagaCoordinator::new(saga_repo, reversers));

    let evidence = Arc::new(EvidenceRetriever::new(ai_client.clone(), vector_store.clone(), materials.clone()));

    let dispatcher = Arc::new(BuildDispatcher::new(jobs.clone(), paths.clone(), saga.clone(), config.default_max_attempts)?);

    let registry = Arc::new(build_registry(
        config.clone(),
        paths.clone(),
        materials.clone(),
        concepts.clone(),
        nodes.clone(),
        jobs.clone(),
        saga.clone(),
        ai_client.clone(),
        vector_store.clone(),
        objects.clone(),
        evidence.clone(),
        dispatcher.clone(),
    ));
    info!(job_types = ?registry.registered_types(), "pipelines registered");

    let notifier = Arc::new(Notifier::new(orchestrator_notify::DEFAULT_CHANNEL_CAPACITY));

    let job_types = claimable_job_types(&registry);
    let worker_concurrency = env_usize("WORKER_CONCURRENCY", num_cpus::get().max(2));
    let shutdown = CancellationToken::new();

    let mut slots = Vec::with_capacity(worker_concurrency);
    for slot in 0..worker_concurrency {
        let worker_id = format!("{}-{}", env_string("WORKER_NAME", "orchestrator-worker"), slot);
        slots.push(tokio::spawn(run_worker_slot(
            slot,
            worker_id,
            job_types.clone(),
            jobs.clone(),
            registry.clone(),
            dispatcher.clone(),
            notifier.clone(),
            config.clone(),
            shutdown.clone(),
        )));
    }

    wait_for_shutdown_signal().await;
    info!("shutdown signal received; draining in-flight jobs");
    shutdown.cancel();

    for slot in slots {
        let _ = slot.await;
    }

    info!("orchestrator-worker stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
