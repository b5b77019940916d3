//! Operation descriptors

use crate::visibility::Visibility;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What an operation does to the model, used to pick the required role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionEffect {
    /// Resolve or validate an address without reading data
    Address,
    /// Read persistent configuration
    ReadConfig,
    /// Read runtime state
    ReadRuntime,
    /// Change persistent configuration
    WriteConfig,
    /// Change runtime state (start, stop, reload)
    WriteRuntime,
}

impl ActionEffect {
    #[inline]
    #[must_use]
    pub fn is_write(self) -> bool {
        matches!(self, Self::WriteConfig | Self::WriteRuntime)
    }
}

/// Parameter value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValueType {
    Boolean,
    Int,
    String,
    Object,
    List,
    Any,
}

impl ValueType {
    /// Check whether `value` has this type
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Boolean => value.is_boolean(),
            Self::Int => value.is_i64() || value.is_u64(),
            Self::String => value.is_string(),
            Self::Object => value.is_object(),
            Self::List => value.is_array(),
            Self::Any => true,
        }
    }
}

/// Declared operation parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ParameterDescriptor {
    pub name: String,
    pub value_type: ValueType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParameterDescriptor {
    /// Required parameter
    #[must_use]
    pub fn required(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            required: true,
            default: None,
        }
    }

    /// Optional parameter with a default
    #[must_use]
    pub fn optional(name: impl Into<String>, value_type: ValueType, default: Value) -> Self {
        Self {
            name: name.into(),
            value_type,
            required: false,
            default: Some(default),
        }
    }
}

/// Immutable description of one operation on one resource type
///
/// A `target_resource_type` of `*` registers a global operation available on
/// every resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OperationDescriptor {
    pub name: String,
    pub target_resource_type: String,
    pub visibility: Visibility,
    pub effect: ActionEffect,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParameterDescriptor>,
}

impl OperationDescriptor {
    /// Create public descriptor
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        target_resource_type: impl Into<String>,
        effect: ActionEffect,
    ) -> Self {
        Self {
            name: name.into(),
            target_resource_type: target_resource_type.into(),
            visibility: Visibility::Public,
            effect,
            description: String::new(),
            parameters: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_parameter(mut self, parameter: ParameterDescriptor) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Check request parameters against the declared ones and fill defaults
    ///
    /// Undeclared parameters pass through untouched.
    ///
    /// # Errors
    /// Returns a message naming the first missing or mistyped parameter.
    pub fn bind(&self, params: &Map<String, Value>) -> Result<Map<String, Value>, String> {
        let mut bound = params.clone();
        for parameter in &self.parameters {
            match params.get(&parameter.name) {
                Some(Value::Null) | None if parameter.required => {
                    return Err(format!(
                        "missing required parameter '{}' for operation '{}'",
                        parameter.name, self.name
                    ));
                }
                Some(Value::Null) | None => {
                    if let Some(default) = &parameter.default {
                        bound.insert(parameter.name.clone(), default.clone());
                    }
                }
                Some(value) if !parameter.value_type.accepts(value) => {
                    return Err(format!(
                        "parameter '{}' of operation '{}' must be {:?}, got {value}",
                        parameter.name, self.name, parameter.value_type
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(bound)
    }
}
