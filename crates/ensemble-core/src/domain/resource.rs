//! Resource request handed to the resource manager.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::ValidationError;

/// A validated request for a compute allocation.
///
/// `walltime` is in minutes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescription {
    pub resource: String,
    pub walltime: u64,
    pub cores: u64,
    #[serde(default)]
    pub project: Option<String>,
}

impl ResourceDescription {
    /// Validate an untyped description (`resource`, `walltime`, `cores`
    /// required, `project` optional).
    pub fn from_value(value: &Value) -> Result<Self, ValidationError> {
        let map = value.as_object().ok_or(ValidationError::NotAMapping)?;

        let required = |key: &'static str| map.get(key).ok_or(ValidationError::MissingKey(key));

        let resource = required("resource")?
            .as_str()
            .ok_or(ValidationError::WrongType {
                key: "resource",
                expected: "a string",
            })?
            .to_string();

        let walltime = required("walltime")?
            .as_u64()
            .ok_or(ValidationError::WrongType {
                key: "walltime",
                expected: "a non-negative integer",
            })?;

        let cores = required("cores")?
            .as_u64()
            .ok_or(ValidationError::WrongType {
                key: "cores",
                expected: "a non-negative integer",
            })?;

        let project = match map.get("project") {
            None | Some(Value::Null) => None,
            Some(Value::String(p)) => Some(p.clone()),
            Some(_) => {
                return Err(ValidationError::WrongType {
                    key: "project",
                    expected: "a string or null",
                });
            }
        };

        Ok(Self {
            resource,
            walltime,
            cores,
            project,
        })
    }
}
