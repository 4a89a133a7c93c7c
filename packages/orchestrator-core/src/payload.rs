//! Recognized job payload keys. Kept as string constants rather
//! than a typed struct: child jobs only ever need a subset of these keys,
//! and stages read through `Job::payload_uuid`/`payload_str` directly.

pub const MATERIAL_SET_ID: &str = "material_set_id";
pub const SAGA_ID: &str = "saga_id";
pub const PATH_ID: &str = "path_id";
pub const THREAD_ID: &str = "thread_id";
pub const JOB_ID: &str = "job_id";
pub const PROMPT: &str = "prompt";
pub const USER_ID: &str = "user_id";
pub const FORCE: &str = "force";
pub const NODE_ID: &str = "node_id";
pub const BLOCK_ID: &str = "block_id";
pub const CITATION_POLICY: &str = "citation_policy";
pub const INSTRUCTION: &str = "instruction";

/// Build the canonical object-storage key for an uploaded material file.
pub fn material_object_key(material_set_id: &uuid::Uuid, file_id: &uuid::Uuid) -> String {
    format!("materials/{material_set_id}/{file_id}")
}

/// Build the canonical object-storage key for a generated asset.
pub fn generated_object_key(
    kind: &str,
    path_id: &uuid::Uuid,
    node_id: &uuid::Uuid,
    slot: u32,
    prompt_hash: &str,
    ext: &str,
) -> String {
    format!("generated/{kind}/{path_id}/{node_id}/slot_{slot}_{prompt_hash}.{ext}")
}

/// Build the saga staging prefix.
pub fn saga_staging_prefix(saga_id: &uuid::Uuid) -> String {
    format!("saga/{saga_id}/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn generated_key_matches_spec_layout() {
        let path_id = Uuid::nil();
        let node_id = Uuid::nil();
        let key = generated_object_key("figure", &path_id, &node_id, 2, "abcd1234", "png");
        assert_eq!(
            key,
            format!("generated/figure/{path_id}/{node_id}/slot_2_abcd1234.png")
        );
    }
}
