//! JSON Schema validation for transformer configuration files.
//!
//! Every configuration is checked against `schemas/transformer.json`
//! (Draft 7) before serde maps it onto the operation enums, so a bad file is
//! rejected with the JSON pointer of every offending value instead of the
//! first serde message.
//!
//! The schema is embedded at compile time.
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use rebate_engine::validation::validate_transformer;
//!
//! let config = json!({
//!     "sources": [{ "type": "excel", "group": "acme", "subgroup": "east" }],
//!     "properties": { "id": [{ "type": "column", "index": 0 }] },
//!     "destination": { "type": "csv", "group": "acme", "subgroup": "east" }
//! });
//! assert!(validate_transformer(&config).is_ok());
//! ```

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::error::{ConfigError, ConfigResult, SchemaViolation};

/// The transformer configuration schema.
pub static TRANSFORMER_SCHEMA: Lazy<Value> = Lazy::new(|| {
    serde_json::from_str(include_str!("../../schemas/transformer.json"))
        .expect("embedded transformer schema is valid JSON")
});

/// Validate `data` against `schema`, collecting every violation.
pub fn validate(schema: &Value, data: &Value) -> ConfigResult<()> {
    let validator = jsonschema::draft7::new(schema).map_err(|e| ConfigError::InvalidValue {
        path: "/".to_string(),
        message: format!("invalid schema: {}", e),
    })?;

    let violations: Vec<SchemaViolation> = validator
        .iter_errors(data)
        .map(|e| SchemaViolation {
            path: e.instance_path.to_string(),
            message: e.to_string(),
        })
        .collect();

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Schema { violations })
    }
}

/// Quick yes/no check.
pub fn is_valid(schema: &Value, data: &Value) -> bool {
    jsonschema::draft7::is_valid(schema, data)
}

/// Validate a transformer configuration document.
pub fn validate_transformer(data: &Value) -> ConfigResult<()> {
    validate(&TRANSFORMER_SCHEMA, data)
}
