//! Operation request and response model
//!
//! Requests arrive as JSON objects:
//!
//! ```json
//! {
//!   "address": [["host", "primary"], ["server-config", "server-one"]],
//!   "operation": "start",
//!   "blocking": true,
//!   "operation-headers": {"rollout": {"id": "testPlan"}, "roles": ["Monitor"]}
//! }
//! ```
//!
//! Every key other than `address`, `operation` and `operation-headers` is an
//! operation parameter.

use crate::error::ManagementError;
use mgmt_model::PathAddress;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Operation headers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationHeaders {
    /// Rollout plan reference (`{"id": name}`) or inline plan
    pub rollout: Option<Value>,
    /// Run-as roles
    pub roles: Option<Vec<String>>,
}

impl OperationHeaders {
    fn from_json(value: &Value) -> Result<Self, ManagementError> {
        let Value::Object(headers) = value else {
            return Err(ManagementError::InvalidRequest(
                "'operation-headers' must be an object".into(),
            ));
        };
        let roles = match headers.get("roles") {
            None | Some(Value::Null) => None,
            Some(Value::String(role)) => Some(vec![role.clone()]),
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .map(|item| {
                        item.as_str().map(str::to_string).ok_or_else(|| {
                            ManagementError::InvalidRequest("'roles' entries must be strings".into())
                        })
                    })
                    .collect::<Result<_, _>>()?,
            ),
            Some(_) => {
                return Err(ManagementError::InvalidRequest(
                    "'roles' must be a string or a list of strings".into(),
                ))
            }
        };
        Ok(Self {
            rollout: headers.get("rollout").filter(|v| !v.is_null()).cloned(),
            roles,
        })
    }

    fn to_json(&self) -> Option<Value> {
        let mut headers = Map::new();
        if let Some(rollout) = &self.rollout {
            headers.insert("rollout".into(), rollout.clone());
        }
        if let Some(roles) = &self.roles {
            headers.insert("roles".into(), Value::from(roles.clone()));
        }
        (!headers.is_empty()).then_some(Value::Object(headers))
    }
}

/// Addressed management operation
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    pub address: PathAddress,
    pub operation: String,
    pub params: Map<String, Value>,
    pub headers: OperationHeaders,
}

impl OperationRequest {
    /// Create request without parameters
    #[must_use]
    pub fn new(address: PathAddress, operation: impl Into<String>) -> Self {
        Self {
            address,
            operation: operation.into(),
            params: Map::new(),
            headers: OperationHeaders::default(),
        }
    }

    /// Parse the JSON request form
    ///
    /// # Errors
    /// - `ManagementError::MalformedAddress` for an unparseable address
    /// - `ManagementError::InvalidRequest` for a missing operation name
    pub fn from_json(value: &Value) -> Result<Self, ManagementError> {
        let Value::Object(fields) = value else {
            return Err(ManagementError::InvalidRequest("request must be an object".into()));
        };
        let address = match fields.get("address") {
            None | Some(Value::Null) => PathAddress::root(),
            Some(Value::String(raw)) => PathAddress::resolve(raw)?,
            Some(other) => PathAddress::from_json(other)?,
        };
        let operation = fields
            .get("operation")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ManagementError::InvalidRequest("missing 'operation'".into()))?
            .to_string();
        let headers = match fields.get("operation-headers") {
            Some(value) => OperationHeaders::from_json(value)?,
            None => OperationHeaders::default(),
        };
        let params = fields
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), "address" | "operation" | "operation-headers"))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Ok(Self {
            address,
            operation,
            params,
            headers,
        })
    }

    /// JSON request form
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        out.insert("address".into(), self.address.to_json());
        out.insert("operation".into(), Value::String(self.operation.clone()));
        for (key, value) in &self.params {
            out.insert(key.clone(), value.clone());
        }
        if let Some(headers) = self.headers.to_json() {
            out.insert("operation-headers".into(), headers);
        }
        Value::Object(out)
    }

    #[inline]
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_rollout(mut self, rollout: Value) -> Self {
        self.headers.rollout = Some(rollout);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.headers.roles = Some(roles.into_iter().map(Into::into).collect());
        self
    }

    #[inline]
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name).filter(|v| !v.is_null())
    }

    /// Boolean parameter, `default` when absent
    #[must_use]
    pub fn param_bool(&self, name: &str, default: bool) -> bool {
        self.param(name).and_then(Value::as_bool).unwrap_or(default)
    }

    #[must_use]
    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.param(name).and_then(Value::as_str)
    }

    /// Required string parameter
    ///
    /// # Errors
    /// `ManagementError::InvalidRequest` when absent or not a string.
    pub fn require_str(&self, name: &str) -> Result<&str, ManagementError> {
        self.param_str(name).ok_or_else(|| {
            ManagementError::InvalidRequest(format!(
                "operation '{}' requires string parameter '{name}'",
                self.operation
            ))
        })
    }
}

/// Operation outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failed,
}

/// Structured response; failures never cross the boundary any other way
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OperationResponse {
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_description: Option<String>,
    /// Rollout report of multi-host operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_groups: Option<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub response_headers: Map<String, Value>,
}

impl OperationResponse {
    /// Successful response carrying `result`
    #[must_use]
    pub fn success(result: Value) -> Self {
        Self {
            outcome: Outcome::Success,
            result: Some(result),
            failure_description: None,
            server_groups: None,
            response_headers: Map::new(),
        }
    }

    /// Failed response for `error`
    #[must_use]
    pub fn failed(error: &ManagementError) -> Self {
        Self {
            outcome: Outcome::Failed,
            result: None,
            failure_description: Some(error.failure_description()),
            server_groups: error.rollout_report().map(crate::rollout::RolloutReport::to_value),
            response_headers: Map::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_server_groups(mut self, report: Value) -> Self {
        self.server_groups = Some(report);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_response_header(mut self, name: impl Into<String>, value: Value) -> Self {
        self.response_headers.insert(name.into(), value);
        self
    }

    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    /// Result payload, `null` when absent
    #[must_use]
    pub fn result_or_null(&self) -> Value {
        self.result.clone().unwrap_or(Value::Null)
    }

    /// Convert into a `Result`, keeping remote failure descriptions intact
    ///
    /// # Errors
    /// `ManagementError::Remote` for failed responses.
    pub fn into_result(self) -> Result<Value, ManagementError> {
        match self.outcome {
            Outcome::Success => Ok(self.result.unwrap_or(Value::Null)),
            Outcome::Failed => Err(ManagementError::Remote {
                description: self
                    .failure_description
                    .unwrap_or_else(|| "operation failed".to_string()),
            }),
        }
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
