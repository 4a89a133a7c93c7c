//! JSON-schema-validated generator output: schemas are defined as data,
//! compiled once, and validated at stage boundaries so any schema-shape
//! drift fails fast instead of propagating a malformed document.

use jsonschema::JSONSchema;
use serde_json::Value;

use crate::error::AiError;

/// Compile a schema once and validate candidate JSON against it. Stages hold
/// one `CompiledSchema` per v-numbered schema and call `generate_json`
/// against it.
pub struct CompiledSchema {
    name: String,
    schema: JSONSchema,
}

impl CompiledSchema {
    pub fn compile(name: impl Into<String>, schema: &Value) -> Result<Self, AiError> {
        let compiled = JSONSchema::compile(schema)
            .map_err(|e| AiError::SchemaRejected(format!("schema itself failed to compile: {e}")))?;
        Ok(Self { name: name.into(), schema: compiled })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Validate `candidate`, returning every violation message on failure.
    pub fn validate(&self, candidate: &Value) -> Result<(), Vec<String>> {
        match self.schema.validate(candidate) {
            Ok(()) => Ok(()),
            Err(errors) => Err(errors.map(|e| e.to_string()).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validates_a_simple_object_schema() {
        let schema = json!({
            "type": "object",
            "required": ["title", "blocks"],
            "properties": {
                "title": {"type": "string"},
                "blocks": {"type": "array"}
            }
        });
        let compiled = CompiledSchema::compile("doc.v1", &schema).unwrap();
        assert!(compiled.validate(&json!({"title": "x", "blocks": []})).is_ok());
        let errs = compiled.validate(&json!({"title": "x"})).unwrap_err();
        assert!(!errs.is_empty());
    }
}
