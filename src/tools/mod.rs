//! Declarative tool catalogue.
//!
//! Every tool the server exposes is one [`ToolSpec`] row: name, description,
//! where the call goes, and typed parameters with defaults, numeric ranges and
//! allowed values. The JSON schema for `tools/list` and the argument
//! validation for `tools/call` are both generated from the same row, so they
//! cannot drift apart.

mod catalog;
pub mod local;

pub use catalog::{find, CATALOG};

use serde_json::{json, Map, Value};

use crate::bridge::{BridgeError, BridgeResult};

/// Session-level tools answered by the server itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTool {
    /// Mode-query interface.
    Status,
    /// Immediate reconnect probe.
    Connect,
    /// Store the design statement.
    StoreIntent,
    /// Report the design intent.
    DesignContext,
    /// List recorded entities.
    ListEntities,
    /// Report or export command history.
    History,
    /// Write the session file.
    Save,
    /// Read the session file.
    Load,
    /// Clear the design intent.
    Reset,
}

/// Computed in-process without a host round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalTool {
    /// Distance between two points.
    MeasureDistance,
    /// Angle at a vertex.
    MeasureAngle,
    /// Report over earlier analysis results.
    AnalysisReport,
}

/// Where a tool call is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Sent through the dispatcher as this host command.
    Host(&'static str),
    /// Computed locally.
    Local(LocalTool),
    /// Answered from session state.
    Session(SessionTool),
}

/// JSON type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Finite number.
    Number,
    /// Whole number.
    Integer,
    /// `true` or `false`.
    Boolean,
    /// String.
    Text,
    /// `[x, y, z]`.
    Point3,
    /// Array of numbers.
    Numbers,
    /// Array of strings.
    Texts,
    /// JSON object.
    Object,
    /// Array of JSON objects.
    Objects,
}

impl ParamKind {
    fn schema(self) -> Value {
        match self {
            Self::Number => json!({"type": "number"}),
            Self::Integer => json!({"type": "integer"}),
            Self::Boolean => json!({"type": "boolean"}),
            Self::Text => json!({"type": "string"}),
            Self::Point3 => json!({
                "type": "array",
                "items": {"type": "number"},
                "minItems": 3,
                "maxItems": 3
            }),
            Self::Numbers => json!({"type": "array", "items": {"type": "number"}}),
            Self::Texts => json!({"type": "array", "items": {"type": "string"}}),
            Self::Object => json!({"type": "object"}),
            Self::Objects => json!({"type": "array", "items": {"type": "object"}}),
        }
    }

    fn accepts(self, value: &Value) -> bool {
        let number = |v: &Value| v.as_f64().is_some_and(f64::is_finite);
        match self {
            Self::Number => number(value),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Text => value.is_string(),
            Self::Point3 => value
                .as_array()
                .is_some_and(|items| items.len() == 3 && items.iter().all(number)),
            Self::Numbers => value.as_array().is_some_and(|items| items.iter().all(number)),
            Self::Texts => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            Self::Object => value.is_object(),
            Self::Objects => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_object)),
        }
    }

    const fn noun(self) -> &'static str {
        match self {
            Self::Number => "a number",
            Self::Integer => "an integer",
            Self::Boolean => "a boolean",
            Self::Text => "a string",
            Self::Point3 => "a point [x, y, z]",
            Self::Numbers => "an array of numbers",
            Self::Texts => "an array of strings",
            Self::Object => "an object",
            Self::Objects => "an array of objects",
        }
    }
}

/// Default used when an optional parameter is omitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    /// Number.
    Number(f64),
    /// Integer.
    Integer(i64),
    /// Boolean.
    Bool(bool),
    /// String.
    Text(&'static str),
    /// Point or vector.
    Point([f64; 3]),
}

impl DefaultValue {
    fn to_value(self) -> Value {
        match self {
            Self::Number(n) => json!(n),
            Self::Integer(i) => json!(i),
            Self::Bool(b) => json!(b),
            Self::Text(s) => json!(s),
            Self::Point(p) => json!(p),
        }
    }
}

/// One tool parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    /// Parameter name.
    pub name: &'static str,
    /// JSON type.
    pub kind: ParamKind,
    /// Human-readable description.
    pub description: &'static str,
    /// Must be supplied.
    pub required: bool,
    /// Value used when omitted.
    pub default: Option<DefaultValue>,
    /// Inclusive numeric range.
    pub range: Option<(f64, f64)>,
    /// Allowed string values.
    pub choices: &'static [&'static str],
    /// Caller-facing values rewritten to their wire spelling.
    pub wire_names: &'static [(&'static str, &'static str)],
}

impl ParamSpec {
    /// A parameter the caller must supply.
    #[must_use]
    pub const fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: true,
            default: None,
            range: None,
            choices: &[],
            wire_names: &[],
        }
    }

    /// A parameter the caller may omit.
    #[must_use]
    pub const fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }

    /// Sets the value used when the parameter is omitted.
    #[must_use]
    pub const fn or(self, default: DefaultValue) -> Self {
        Self {
            required: false,
            default: Some(default),
            ..self
        }
    }

    /// Restricts a numeric parameter to `min..=max`.
    #[must_use]
    pub const fn within(self, min: f64, max: f64) -> Self {
        Self {
            range: Some((min, max)),
            ..self
        }
    }

    /// Restricts a string parameter to a fixed set.
    #[must_use]
    pub const fn one_of(self, choices: &'static [&'static str]) -> Self {
        Self { choices, ..self }
    }

    /// Rewrites accepted values to the spelling the host expects.
    #[must_use]
    pub const fn sent_as(self, wire_names: &'static [(&'static str, &'static str)]) -> Self {
        Self { wire_names, ..self }
    }

    fn schema(&self) -> Value {
        let mut schema = self.kind.schema();
        if let Value::Object(map) = &mut schema {
            map.insert("description".into(), json!(self.description));
            if let Some(default) = self.default {
                map.insert("default".into(), default.to_value());
            }
            if let Some((min, max)) = self.range {
                map.insert("minimum".into(), json!(min));
                map.insert("maximum".into(), json!(max));
            }
            if !self.choices.is_empty() {
                map.insert("enum".into(), json!(self.choices));
            }
        }
        schema
    }

    fn check(&self, value: &Value) -> BridgeResult<Value> {
        if !self.kind.accepts(value) {
            return Err(BridgeError::invalid_params(format!(
                "'{}' must be {}",
                self.name,
                self.kind.noun()
            )));
        }
        if let (Some((min, max)), Some(n)) = (self.range, value.as_f64()) {
            if n < min || n > max {
                return Err(BridgeError::invalid_params(format!(
                    "'{}' must be between {min} and {max}, got {n}",
                    self.name
                )));
            }
        }
        if let Some(text) = value.as_str() {
            if !self.choices.is_empty() && !self.choices.contains(&text) {
                return Err(BridgeError::invalid_params(format!(
                    "'{}' must be one of: {}",
                    self.name,
                    self.choices.join(", ")
                )));
            }
            if let Some((_, wire)) = self.wire_names.iter().find(|(from, _)| *from == text) {
                return Ok(json!(wire));
            }
        }
        Ok(value.clone())
    }
}

/// One exposed tool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToolSpec {
    /// Tool name.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Where calls go.
    pub route: Route,
    /// Parameters.
    pub params: &'static [ParamSpec],
}

impl ToolSpec {
    /// JSON schema of the tool's arguments.
    #[must_use]
    pub fn input_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|p| (p.name.to_string(), p.schema()))
            .collect();
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name)
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    /// Validates call arguments and fills in defaults.
    ///
    /// Null arguments count as omitted.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` for unknown, missing or ill-typed arguments
    /// and for values outside their range or choices.
    pub fn prepare(&self, arguments: &Value) -> BridgeResult<Map<String, Value>> {
        let empty = Map::new();
        let supplied = match arguments {
            Value::Null => &empty,
            Value::Object(map) => map,
            _ => return Err(BridgeError::invalid_params("arguments must be an object")),
        };

        if let Some(unknown) = supplied
            .keys()
            .find(|key| !self.params.iter().any(|p| p.name == key.as_str()))
        {
            return Err(BridgeError::invalid_params(format!(
                "unknown parameter '{unknown}' for tool {}",
                self.name
            )));
        }

        let mut prepared = Map::new();
        for param in self.params {
            match supplied.get(param.name).filter(|v| !v.is_null()) {
                Some(value) => {
                    prepared.insert(param.name.to_string(), param.check(value)?);
                }
                None => {
                    if let Some(default) = param.default {
                        prepared.insert(param.name.to_string(), param.check(&default.to_value())?);
                    } else if param.required {
                        return Err(BridgeError::invalid_params(format!(
                            "missing required parameter '{}'",
                            param.name
                        )));
                    }
                }
            }
        }
        Ok(prepared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::ErrorKind;

    const PARAMS: &[ParamSpec] = &[
        ParamSpec::required("radius", ParamKind::Number, "Radius").within(0.001, 5000.0),
        ParamSpec::optional("center", ParamKind::Point3, "Centre").or(DefaultValue::Point([0.0; 3])),
        ParamSpec::optional("operation", ParamKind::Text, "Operation")
            .or(DefaultValue::Text("new_body"))
            .one_of(&["new_body", "cut"])
            .sent_as(&[("new_body", "new")]),
        ParamSpec::optional("label", ParamKind::Text, "Label"),
    ];

    const TOOL: ToolSpec = ToolSpec {
        name: "probe",
        description: "Test tool",
        route: Route::Host("probe"),
        params: PARAMS,
    };

    #[test]
    fn defaults_are_filled_and_rewritten() {
        let prepared = TOOL.prepare(&json!({"radius": 2.5})).unwrap();
        assert_eq!(prepared["radius"], json!(2.5));
        assert_eq!(prepared["center"], json!([0.0, 0.0, 0.0]));
        assert_eq!(prepared["operation"], json!("new"));
        assert!(!prepared.contains_key("label"));
    }

    #[test]
    fn range_is_enforced() {
        let err = TOOL.prepare(&json!({"radius": 0.0})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParams);
        assert!(err.to_string().contains("between"));
    }

    #[test]
    fn missing_unknown_and_mistyped_are_rejected() {
        assert!(TOOL.prepare(&json!({})).is_err());
        assert!(TOOL.prepare(&json!({"radius": 1.0, "colour": "red"})).is_err());
        assert!(TOOL.prepare(&json!({"radius": "big"})).is_err());
        assert!(TOOL.prepare(&json!({"radius": 1.0, "center": [1.0, 2.0]})).is_err());
        assert!(TOOL.prepare(&json!({"radius": 1.0, "operation": "explode"})).is_err());
    }

    #[test]
    fn null_counts_as_omitted() {
        let prepared = TOOL.prepare(&json!({"radius": 1.0, "label": null})).unwrap();
        assert!(!prepared.contains_key("label"));
    }

    #[test]
    fn schema_lists_required_and_ranges() {
        let schema = TOOL.input_schema();
        assert_eq!(schema["required"], json!(["radius"]));
        assert_eq!(schema["properties"]["radius"]["minimum"], json!(0.001));
        assert_eq!(schema["properties"]["operation"]["enum"], json!(["new_body", "cut"]));
    }
}
