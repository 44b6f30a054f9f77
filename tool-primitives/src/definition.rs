//! Tool definitions supplied by the persistence layer.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};

const MAX_NAME_LEN: usize = 64;

/// JSON-schema type of a declared tool parameter.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    /// UTF-8 string.
    #[default]
    String,
    /// Floating point or integral number.
    Number,
    /// Integral number.
    Integer,
    /// `true` / `false`.
    Boolean,
    /// Ordered list.
    Array,
    /// Nested mapping; may declare its own properties.
    Object,
}

impl ParameterType {
    /// Returns the JSON-schema spelling of the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// A single declared parameter of a tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    name: String,
    #[serde(rename = "type", default)]
    kind: ParameterType,
    #[serde(default)]
    description: String,
    #[serde(default)]
    required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default: Option<Value>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    enum_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    properties: Vec<ToolParameter>,
}

impl ToolParameter {
    /// Creates an optional parameter of the given type.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ParameterType) -> Self {
        Self {
            name: name.into(),
            kind,
            description: String::new(),
            required: false,
            default: None,
            enum_values: None,
            properties: Vec::new(),
        }
    }

    /// Sets the human-readable description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Marks the parameter as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Sets the value used when the caller omits the parameter.
    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Restricts the parameter to an enumerated set of values.
    #[must_use]
    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }

    /// Declares nested properties for an object-typed parameter.
    #[must_use]
    pub fn with_properties(mut self, properties: Vec<ToolParameter>) -> Self {
        self.properties = properties;
        self
    }

    /// Returns the parameter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared type.
    #[must_use]
    pub const fn kind(&self) -> ParameterType {
        self.kind
    }

    /// Returns the description, possibly empty.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns `true` when callers must supply the parameter.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        self.required
    }

    /// Returns the default value, if any.
    #[must_use]
    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Returns the enumerated values, if any.
    #[must_use]
    pub fn enum_values(&self) -> Option<&[Value]> {
        self.enum_values.as_deref()
    }

    /// Returns nested properties of an object-typed parameter.
    #[must_use]
    pub fn properties(&self) -> &[ToolParameter] {
        &self.properties
    }

    /// Renders the parameter as a JSON-schema property.
    #[must_use]
    pub fn schema(&self) -> Value {
        let mut prop = Map::new();
        prop.insert("type".into(), Value::from(self.kind.as_str()));
        if !self.description.is_empty() {
            prop.insert("description".into(), Value::from(self.description.clone()));
        }
        if let Some(values) = &self.enum_values {
            prop.insert("enum".into(), Value::Array(values.clone()));
        }
        if let Some(default) = &self.default {
            prop.insert("default".into(), default.clone());
        }
        if self.kind == ParameterType::Object && !self.properties.is_empty() {
            if let Value::Object(nested) = object_schema(&self.properties) {
                for (key, value) in nested {
                    if key != "type" {
                        prop.insert(key, value);
                    }
                }
            }
        }
        Value::Object(prop)
    }
}

fn object_schema(parameters: &[ToolParameter]) -> Value {
    let properties: Map<String, Value> = parameters
        .iter()
        .map(|p| (p.name.clone(), p.schema()))
        .collect();
    let required: Vec<Value> = parameters
        .iter()
        .filter(|p| p.required)
        .map(|p| Value::from(p.name.clone()))
        .collect();

    let mut schema = json!({
        "type": "object",
        "properties": properties,
    });
    if !required.is_empty() {
        schema["required"] = Value::Array(required);
    }
    schema
}

/// Everything the sandbox needs to run a stored tool.
///
/// Created and edited by the persistence layer; immutable for the duration of
/// one invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    parameters: Vec<ToolParameter>,
    code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inherit_from: Option<String>,
}

impl ToolDefinition {
    /// Starts building a [`ToolDefinition`].
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ToolDefinitionBuilder {
        ToolDefinitionBuilder {
            name: name.into(),
            description: String::new(),
            parameters: Vec::new(),
            code: None,
            inherit_from: None,
        }
    }

    /// Parses and validates a definition stored as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDefinition`] if the payload does not match the
    /// definition shape, or any validation error from [`Self::validate`].
    pub fn from_json(value: Value) -> Result<Self> {
        let definition: Self =
            serde_json::from_value(value).map_err(|err| Error::InvalidDefinition {
                reason: err.to_string(),
            })?;
        definition.validate()?;
        Ok(definition)
    }

    /// Checks name, code, parameter uniqueness, and the parent reference.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidToolName`] or [`Error::InvalidDefinition`].
    pub fn validate(&self) -> Result<()> {
        validate_tool_name(&self.name)?;
        if self.code.trim().is_empty() {
            return Err(Error::InvalidDefinition {
                reason: format!("tool `{}` has no code", self.name),
            });
        }
        validate_parameters(&self.parameters)?;
        if let Some(parent) = &self.inherit_from {
            validate_tool_name(parent)?;
            if parent == &self.name {
                return Err(Error::InvalidDefinition {
                    reason: format!("tool `{}` cannot inherit from itself", self.name),
                });
            }
        }
        Ok(())
    }

    /// Returns the tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the description shown to the orchestration layer.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the ordered parameter list.
    #[must_use]
    pub fn parameters(&self) -> &[ToolParameter] {
        &self.parameters
    }

    /// Returns the guest-language source.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Returns the parent tool name, if the tool inherits from one.
    #[must_use]
    pub fn inherit_from(&self) -> Option<&str> {
        self.inherit_from.as_deref()
    }

    /// Renders the parameter list as an object JSON schema.
    #[must_use]
    pub fn json_schema(&self) -> Value {
        object_schema(&self.parameters)
    }
}

/// Builder for [`ToolDefinition`].
#[derive(Debug)]
pub struct ToolDefinitionBuilder {
    name: String,
    description: String,
    parameters: Vec<ToolParameter>,
    code: Option<String>,
    inherit_from: Option<String>,
}

impl ToolDefinitionBuilder {
    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Appends a parameter.
    #[must_use]
    pub fn parameter(mut self, parameter: ToolParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Replaces the parameter list.
    #[must_use]
    pub fn parameters(mut self, parameters: Vec<ToolParameter>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Sets the guest source code.
    #[must_use]
    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Declares the parent tool.
    #[must_use]
    pub fn inherit_from(mut self, parent: impl Into<String>) -> Self {
        self.inherit_from = Some(parent.into());
        self
    }

    /// Consumes the builder and returns a validated definition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDefinition`] if no code was provided, or any
    /// error produced by [`ToolDefinition::validate`].
    pub fn build(self) -> Result<ToolDefinition> {
        let code = self.code.ok_or_else(|| Error::InvalidDefinition {
            reason: "tool code must be provided".into(),
        })?;
        let definition = ToolDefinition {
            name: self.name,
            description: self.description,
            parameters: self.parameters,
            code,
            inherit_from: self.inherit_from,
        };
        definition.validate()?;
        Ok(definition)
    }
}

fn validate_tool_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidToolName {
            name: name.into(),
            reason: "name cannot be empty".into(),
        });
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidToolName {
            name: name.into(),
            reason: format!("name length must be <= {MAX_NAME_LEN}"),
        });
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(Error::InvalidToolName {
            name: name.into(),
            reason: "name must contain alphanumeric, dash, underscore, or dot".into(),
        });
    }
    Ok(())
}

fn validate_parameters(parameters: &[ToolParameter]) -> Result<()> {
    let mut seen = HashSet::new();
    for parameter in parameters {
        if parameter.name.trim().is_empty() {
            return Err(Error::InvalidDefinition {
                reason: "parameter name cannot be empty".into(),
            });
        }
        if !seen.insert(parameter.name.as_str()) {
            return Err(Error::InvalidDefinition {
                reason: format!("duplicate parameter `{}`", parameter.name),
            });
        }
        validate_parameters(&parameter.properties)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell_tool() -> ToolDefinition {
        ToolDefinition::builder("shell")
            .description("Run a command")
            .parameter(ToolParameter::new("command", ParameterType::String).required())
            .parameter(
                ToolParameter::new("timeout", ParameterType::Integer).with_default(json!(60)),
            )
            .code("function execute(context) { return context.args.command; }")
            .build()
            .unwrap()
    }

    #[test]
    fn builds_definition() {
        let tool = shell_tool();
        assert_eq!(tool.name(), "shell");
        assert_eq!(tool.parameters().len(), 2);
        assert!(tool.inherit_from().is_none());
    }

    #[test]
    fn renders_json_schema() {
        let schema = shell_tool().json_schema();
        assert_eq!(
            schema,
            json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "timeout": {"type": "integer", "default": 60}
                },
                "required": ["command"]
            })
        );
    }

    #[test]
    fn nested_object_parameters_render_properties() {
        let param = ToolParameter::new("options", ParameterType::Object).with_properties(vec![
            ToolParameter::new("depth", ParameterType::Integer).with_default(json!(2)),
        ]);
        let schema = param.schema();
        assert_eq!(schema["properties"]["depth"]["default"], json!(2));
        assert_eq!(schema["type"], json!("object"));
    }

    #[test]
    fn code_is_required() {
        let err = ToolDefinition::builder("empty").build().expect_err("no code");
        assert!(matches!(err, Error::InvalidDefinition { .. }));

        let err = ToolDefinition::builder("blank")
            .code("   ")
            .build()
            .expect_err("blank code");
        assert!(matches!(err, Error::InvalidDefinition { .. }));
    }

    #[test]
    fn rejects_self_inheritance_and_bad_names() {
        let err = ToolDefinition::builder("loop")
            .code("1")
            .inherit_from("loop")
            .build()
            .expect_err("self inheritance");
        assert!(matches!(err, Error::InvalidDefinition { .. }));

        let err = ToolDefinition::builder("has space")
            .code("1")
            .build()
            .expect_err("bad name");
        assert!(matches!(err, Error::InvalidToolName { .. }));
    }

    #[test]
    fn rejects_duplicate_parameters() {
        let err = ToolDefinition::builder("dup")
            .code("1")
            .parameter(ToolParameter::new("a", ParameterType::String))
            .parameter(ToolParameter::new("a", ParameterType::Number))
            .build()
            .expect_err("duplicate");
        assert!(matches!(err, Error::InvalidDefinition { .. }));
    }

    #[test]
    fn parses_stored_definition() {
        let stored = json!({
            "name": "weather",
            "description": "Look up weather",
            "parameters": [
                {"name": "city", "type": "string", "description": "City", "required": true,
                 "default": null, "enum": null, "hasEnum": false}
            ],
            "code": "function execute(context) { return context.args.city; }",
            "inherit_from": null
        });
        let definition = ToolDefinition::from_json(stored).unwrap();
        assert_eq!(definition.parameters()[0].name(), "city");
        assert!(definition.parameters()[0].is_required());
        assert!(definition.parameters()[0].default_value().is_none());
    }
}
