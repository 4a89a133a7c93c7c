//! Evidence Retrieval Layer: hybrid semantic + lexical +
//! cosine-fallback chunk selection over a material set's chunks.

pub mod cosine;
pub mod error;
pub mod retrieve;

pub use cosine::{cosine_similarity, top_k_by_cosine};
pub use error::{EvidenceError, Result};
pub use retrieve::{EvidenceRetriever, RetrievalParams};

/// The vector-store namespace scoped to a material set's chunks.
pub fn chunk_namespace(material_set_id: &uuid::Uuid) -> String {
    format!("material_set:{material_set_id}:chunk")
}
