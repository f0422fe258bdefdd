//! Inbound event schema validation.

use crate::error::{AppError, Result};
use jsonschema::Validator;
use once_cell::sync::OnceCell;
use serde_json::Value;
use std::path::PathBuf;

enum SchemaSource {
    File(PathBuf),
    Inline(Value),
}

/// Validates inbound events against a JSON Schema.
///
/// The schema is compiled on first use and cached for the process
/// lifetime. Validation never mutates the instance.
pub struct SchemaValidator {
    source: SchemaSource,
    validator: OnceCell<Validator>,
}

impl SchemaValidator {
    /// Validator backed by a schema file on disk
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            source: SchemaSource::File(path.into()),
            validator: OnceCell::new(),
        }
    }

    /// Validator backed by an in-memory schema document
    pub fn from_value(schema: Value) -> Self {
        Self {
            source: SchemaSource::Inline(schema),
            validator: OnceCell::new(),
        }
    }

    /// Check `instance` against the schema.
    ///
    /// Returns [`AppError::Schema`] carrying the first violated
    /// constraint's description.
    pub fn validate(&self, instance: &Value) -> Result<()> {
        let validator = self.validator.get_or_try_init(|| self.compile())?;

        if let Some(error) = validator.iter_errors(instance).next() {
            return Err(AppError::Schema(error.to_string()));
        }
        Ok(())
    }

    fn compile(&self) -> Result<Validator> {
        let schema = match &self.source {
            SchemaSource::File(path) => {
                let raw = std::fs::read_to_string(path)?;
                serde_json::from_str(&raw)
                    .map_err(|e| AppError::Configuration(format!("invalid schema file: {}", e)))?
            }
            SchemaSource::Inline(value) => value.clone(),
        };

        jsonschema::validator_for(&schema)
            .map_err(|e| AppError::Configuration(format!("invalid JSON Schema: {}", e)))
    }
}
