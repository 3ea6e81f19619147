//! Schema and size checks run before a dashboard is persisted

use jsonschema::Validator;
use serde_json::Value;

use crate::dashboard::DashboardError;

/// Default per-document ceiling: 10 MiB
pub const DEFAULT_MAX_DOCUMENT_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct ValidationConfig {
    pub validate_schema: bool,
    pub validate_size: bool,
    pub max_document_bytes: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            validate_schema: true,
            validate_size: true,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
        }
    }
}

pub struct DashboardValidator {
    schema: Option<Validator>,
    config: ValidationConfig,
}

impl DashboardValidator {
    /// Compile `schema` once; it is used for the lifetime of the validator.
    pub fn new(schema: Option<&Value>, config: ValidationConfig) -> Result<Self, DashboardError> {
        let schema = schema
            .map(jsonschema::validator_for)
            .transpose()
            .map_err(|e| DashboardError::Validation(format!("Invalid dashboard schema: {}", e)))?;
        Ok(Self { schema, config })
    }

    /// No schema, default size ceiling
    pub fn without_schema() -> Self {
        Self {
            schema: None,
            config: ValidationConfig::default(),
        }
    }

    /// Check `payload` and return its serialized size in bytes.
    ///
    /// The schema check runs first, so a payload failing both checks
    /// reports the schema failure.
    pub fn validate(&self, payload: &Value) -> Result<u64, DashboardError> {
        if !payload.is_object() {
            return Err(DashboardError::Validation(
                "Dashboard payload must be a JSON object".into(),
            ));
        }

        if self.config.validate_schema
            && let Some(schema) = &self.schema
        {
            let errors: Vec<String> = schema.iter_errors(payload).map(|e| e.to_string()).collect();
            if !errors.is_empty() {
                return Err(DashboardError::Validation(errors.join("; ")));
            }
        }

        let size = document_size(payload)?;
        if self.config.validate_size && size > self.config.max_document_bytes {
            return Err(DashboardError::Size {
                size,
                limit: self.config.max_document_bytes,
            });
        }
        Ok(size)
    }
}

/// Length of the compact serialized form
pub fn document_size(payload: &Value) -> Result<u64, DashboardError> {
    serde_json::to_vec(payload)
        .map(|bytes| bytes.len() as u64)
        .map_err(|e| DashboardError::Validation(format!("Dashboard is not serializable: {}", e)))
}
