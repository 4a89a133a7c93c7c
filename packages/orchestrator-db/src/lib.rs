//! Postgres persistence for the learning build orchestrator.
//!
//! One repository module per entity family, hand-written `sqlx::query_as`
//! (no `query!` macros, since there's no `DATABASE_URL` available at
//! compile time — see `DESIGN.md`).

pub mod concept_repo;
pub mod error;
pub mod job_repo;
pub mod material_repo;
pub mod node_repo;
pub mod path_repo;
pub mod pool;
pub mod saga_repo;
pub mod vector_store;

pub use concept_repo::ConceptRepo;
pub use error::{DbError, Result};
pub use job_repo::JobRepo;
pub use material_repo::MaterialRepo;
pub use node_repo::NodeRepo;
pub use path_repo::PathRepo;
pub use pool::{connect, migrate};
pub use saga_repo::{SagaRepo, SagaStatus};
pub use vector_store::PgVectorStore;
