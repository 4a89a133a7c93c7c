//! Stage name constants shared by the DAG declaration and
//! `orchestrator-stages`' `Pipeline::r#type()` implementations, so the two
//! crates cannot drift apart on a typo'd string.

pub const PATH_INTAKE: &str = "path_intake";
pub const WEB_RESOURCES_SEED: &str = "web_resources_seed";
pub const INGEST_CHUNKS: &str = "ingest_chunks";
pub const EMBED_CHUNKS: &str = "embed_chunks";
pub const USER_PROFILE_REFRESH: &str = "user_profile_refresh";
pub const CONCEPT_GRAPH_BUILD: &str = "concept_graph_build";
pub const CHAIN_SIGNATURE_BUILD: &str = "chain_signature_build";
pub const PATH_PLAN_BUILD: &str = "path_plan_build";
pub const NODE_FIGURES_PLAN: &str = "node_figures_plan";
pub const NODE_FIGURES_RENDER: &str = "node_figures_render";
pub const NODE_VIDEOS_PLAN: &str = "node_videos_plan";
pub const NODE_VIDEOS_RENDER: &str = "node_videos_render";
pub const NODE_DOC_BUILD: &str = "node_doc_build";
pub const NODE_DOC_PATCH: &str = "node_doc_patch";
pub const REALIZE_ACTIVITIES: &str = "realize_activities";
pub const COVERAGE_COHERENCE_AUDIT: &str = "coverage_coherence_audit";
pub const PATH_COVER_RENDER: &str = "path_cover_render";
pub const NODE_AVATAR_RENDER: &str = "node_avatar_render";
pub const SAGA_CLEANUP: &str = "saga_cleanup";
pub const LEARNING_BUILD: &str = "learning_build";
