//! The build DAG's stage implementations: one
//! [`orchestrator_core::pipeline::Pipeline`] per node in
//! `orchestrator_dag::learning_build_dag()`, plus `saga_cleanup` which runs
//! standalone outside the DAG. `apps/orchestrator-worker` registers every
//! struct exported here into a `PipelineRegistry` at startup.

pub mod build_dispatch;
pub mod canonical;
pub mod chain_signature_build;
pub mod chat;
pub mod concept_graph_build;
pub mod coverage;
pub mod coverage_coherence_audit;
pub mod embed_chunks;
pub mod error;
pub mod ingest_chunks;
pub mod media;
pub mod node_avatar_render;
pub mod node_doc_build;
pub mod node_doc_patch;
pub mod node_figures_plan;
pub mod node_figures_render;
pub mod node_videos_plan;
pub mod node_videos_render;
pub mod path_cover_render;
pub mod path_intake;
pub mod path_plan_build;
pub mod realize_activities;
pub mod saga_cleanup;
pub mod user_profile_refresh;
pub mod validate;
pub mod web_fetch;
pub mod web_resources_seed;

pub use error::{Result, StageError};

pub use build_dispatch::{BuildDispatcher, BuildOutcome, LearningBuildStage, TickOutcome};
pub use chain_signature_build::ChainSignatureBuildStage;
pub use concept_graph_build::ConceptGraphBuildStage;
pub use coverage_coherence_audit::CoverageCoherenceAuditStage;
pub use embed_chunks::EmbedChunksStage;
pub use ingest_chunks::IngestChunksStage;
pub use node_avatar_render::NodeAvatarRenderStage;
pub use node_doc_build::NodeDocBuildStage;
pub use node_doc_patch::NodeDocPatchStage;
pub use node_figures_plan::NodeFiguresPlanStage;
pub use node_figures_render::NodeFiguresRenderStage;
pub use node_videos_plan::NodeVideosPlanStage;
pub use node_videos_render::NodeVideosRenderStage;
pub use path_cover_render::PathCoverRenderStage;
pub use path_intake::PathIntakeStage;
pub use path_plan_build::PathPlanBuildStage;
pub use realize_activities::RealizeActivitiesStage;
pub use saga_cleanup::SagaCleanupStage;
pub use user_profile_refresh::UserProfileRefreshStage;
pub use web_resources_seed::WebResourcesSeedStage;
