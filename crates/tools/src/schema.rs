//! Parameter schemas for caller-declared tools.
//!
//! Declared tools describe their input with a JSON-Schema subset:
//! `string`, `number`, `integer`, `boolean`, `array`, `object`, plus
//! `enum`, `minimum`, `maximum`, `items`, nested `properties`, and
//! `required`. Annotation keywords (`description`, `title`, `default`,
//! `examples`, `format`, `additionalProperties`) are accepted and ignored.
//! Anything else that changes validation semantics is rejected, so a schema
//! that parses here is one the validator fully understands.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use thiserror::Error;

/// Keywords accepted without affecting validation.
const ANNOTATIONS: &[&str] = &[
    "description",
    "title",
    "default",
    "examples",
    "format",
    "additionalProperties",
    "$schema",
];

/// Why a declared schema falls outside the supported subset.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("{path}: top-level parameters must be an object schema")]
    TopLevelNotObject { path: String },

    #[error("{path}: schema must be a JSON object")]
    NotAnObject { path: String },

    #[error("{path}: missing 'type'")]
    MissingType { path: String },

    #[error("{path}: unsupported type {found}")]
    UnsupportedType { path: String, found: String },

    #[error("{path}: unsupported keyword '{keyword}'")]
    UnsupportedKeyword { path: String, keyword: String },

    #[error("{path}: invalid '{keyword}': {reason}")]
    InvalidKeyword {
        path: String,
        keyword: String,
        reason: String,
    },
}

/// An input value that does not satisfy a schema.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("at {path}: {reason}")]
pub struct SchemaViolation {
    pub path: String,
    pub reason: String,
}

/// A validated parameter schema, usable as an input validator.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterSchema {
    String {
        allowed: Option<Vec<String>>,
    },
    Number {
        minimum: Option<f64>,
        maximum: Option<f64>,
        allowed: Option<Vec<f64>>,
    },
    Integer {
        minimum: Option<f64>,
        maximum: Option<f64>,
        allowed: Option<Vec<i64>>,
    },
    Boolean,
    Array {
        items: Option<Box<ParameterSchema>>,
    },
    Object {
        properties: BTreeMap<String, ParameterSchema>,
        required: Vec<String>,
    },
}

impl ParameterSchema {
    /// Parse a tool's top-level parameter schema (must be an object schema).
    pub fn parse_parameters(value: &Value) -> Result<Self, SchemaError> {
        let schema = Self::parse_at(value, "$")?;
        match schema {
            Self::Object { .. } => Ok(schema),
            _ => Err(SchemaError::TopLevelNotObject { path: "$".into() }),
        }
    }

    /// Parse any schema node in the supported subset.
    pub fn parse(value: &Value) -> Result<Self, SchemaError> {
        Self::parse_at(value, "$")
    }

    fn parse_at(value: &Value, path: &str) -> Result<Self, SchemaError> {
        let obj = value.as_object().ok_or_else(|| SchemaError::NotAnObject {
            path: path.to_string(),
        })?;

        let ty = match obj.get("type") {
            None => {
                return Err(SchemaError::MissingType {
                    path: path.to_string(),
                });
            }
            Some(Value::String(ty)) => ty.as_str(),
            Some(other) => {
                return Err(SchemaError::UnsupportedType {
                    path: path.to_string(),
                    found: other.to_string(),
                });
            }
        };

        let (schema, keywords): (Self, &[&str]) = match ty {
            "string" => (
                Self::String {
                    allowed: parse_enum(obj, path, |v| v.as_str().map(str::to_string))?,
                },
                &["type", "enum"],
            ),
            "number" => (
                Self::Number {
                    minimum: parse_bound(obj, path, "minimum")?,
                    maximum: parse_bound(obj, path, "maximum")?,
                    allowed: parse_enum(obj, path, Value::as_f64)?,
                },
                &["type", "enum", "minimum", "maximum"],
            ),
            "integer" => (
                Self::Integer {
                    minimum: parse_bound(obj, path, "minimum")?,
                    maximum: parse_bound(obj, path, "maximum")?,
                    allowed: parse_enum(obj, path, Value::as_i64)?,
                },
                &["type", "enum", "minimum", "maximum"],
            ),
            "boolean" => (Self::Boolean, &["type"]),
            "array" => {
                let items = match obj.get("items") {
                    Some(items) => Some(Box::new(Self::parse_at(items, &format!("{path}[]"))?)),
                    None => None,
                };
                (Self::Array { items }, &["type", "items"])
            }
            "object" => (parse_object(obj, path)?, &["type", "properties", "required"]),
            other => {
                return Err(SchemaError::UnsupportedType {
                    path: path.to_string(),
                    found: format!("\"{other}\""),
                });
            }
        };

        if let Some(keyword) = obj
            .keys()
            .find(|k| !keywords.contains(&k.as_str()) && !ANNOTATIONS.contains(&k.as_str()))
        {
            return Err(SchemaError::UnsupportedKeyword {
                path: path.to_string(),
                keyword: keyword.clone(),
            });
        }

        let bounds = match &schema {
            Self::Number {
                minimum, maximum, ..
            }
            | Self::Integer {
                minimum, maximum, ..
            } => minimum.zip(*maximum),
            _ => None,
        };
        if let Some((min, max)) = bounds
            && min > max
        {
            return Err(SchemaError::InvalidKeyword {
                path: path.to_string(),
                keyword: "minimum".into(),
                reason: format!("minimum {min} exceeds maximum {max}"),
            });
        }

        Ok(schema)
    }

    /// Check an input value against this schema.
    pub fn validate(&self, input: &Value) -> Result<(), SchemaViolation> {
        self.validate_at(input, "$")
    }

    fn validate_at(&self, input: &Value, path: &str) -> Result<(), SchemaViolation> {
        let violation = |reason: String| SchemaViolation {
            path: path.to_string(),
            reason,
        };

        match self {
            Self::String { allowed } => {
                let s = input
                    .as_str()
                    .ok_or_else(|| violation(format!("expected string, got {}", kind(input))))?;
                if let Some(allowed) = allowed
                    && !allowed.iter().any(|a| a == s)
                {
                    return Err(violation(format!("'{s}' is not one of {allowed:?}")));
                }
            }
            Self::Number {
                minimum,
                maximum,
                allowed,
            } => {
                let n = input
                    .as_f64()
                    .ok_or_else(|| violation(format!("expected number, got {}", kind(input))))?;
                check_range(n, *minimum, *maximum).map_err(violation)?;
                if let Some(allowed) = allowed
                    && !allowed.contains(&n)
                {
                    return Err(violation(format!("{n} is not one of {allowed:?}")));
                }
            }
            Self::Integer {
                minimum,
                maximum,
                allowed,
            } => {
                let n = as_integer(input)
                    .ok_or_else(|| violation(format!("expected integer, got {}", kind(input))))?;
                check_range(n as f64, *minimum, *maximum).map_err(violation)?;
                if let Some(allowed) = allowed
                    && !allowed.contains(&n)
                {
                    return Err(violation(format!("{n} is not one of {allowed:?}")));
                }
            }
            Self::Boolean => {
                if !input.is_boolean() {
                    return Err(violation(format!("expected boolean, got {}", kind(input))));
                }
            }
            Self::Array { items } => {
                let values = input
                    .as_array()
                    .ok_or_else(|| violation(format!("expected array, got {}", kind(input))))?;
                if let Some(items) = items {
                    for (i, value) in values.iter().enumerate() {
                        items.validate_at(value, &format!("{path}[{i}]"))?;
                    }
                }
            }
            Self::Object {
                properties,
                required,
            } => {
                let obj = input
                    .as_object()
                    .ok_or_else(|| violation(format!("expected object, got {}", kind(input))))?;
                if let Some(missing) = required.iter().find(|r| !obj.contains_key(r.as_str())) {
                    return Err(violation(format!("missing required property '{missing}'")));
                }
                for (name, schema) in properties {
                    if let Some(value) = obj.get(name) {
                        schema.validate_at(value, &format!("{path}.{name}"))?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn parse_object(obj: &Map<String, Value>, path: &str) -> Result<ParameterSchema, SchemaError> {
    let mut properties = BTreeMap::new();
    if let Some(props) = obj.get("properties") {
        let props = props.as_object().ok_or_else(|| SchemaError::InvalidKeyword {
            path: path.to_string(),
            keyword: "properties".into(),
            reason: "must be an object".into(),
        })?;
        for (name, schema) in props {
            properties.insert(
                name.clone(),
                ParameterSchema::parse_at(schema, &format!("{path}.{name}"))?,
            );
        }
    }

    let mut required = Vec::new();
    if let Some(req) = obj.get("required") {
        let invalid = |reason: String| SchemaError::InvalidKeyword {
            path: path.to_string(),
            keyword: "required".into(),
            reason,
        };
        let names = req
            .as_array()
            .ok_or_else(|| invalid("must be an array of property names".into()))?;
        for name in names {
            let name = name
                .as_str()
                .ok_or_else(|| invalid("must be an array of property names".into()))?;
            if !properties.contains_key(name) {
                return Err(invalid(format!("'{name}' is not a declared property")));
            }
            required.push(name.to_string());
        }
    }

    Ok(ParameterSchema::Object {
        properties,
        required,
    })
}

fn parse_bound(
    obj: &Map<String, Value>,
    path: &str,
    keyword: &str,
) -> Result<Option<f64>, SchemaError> {
    match obj.get(keyword) {
        None => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| SchemaError::InvalidKeyword {
            path: path.to_string(),
            keyword: keyword.to_string(),
            reason: "must be a number".into(),
        }),
    }
}

fn parse_enum<T>(
    obj: &Map<String, Value>,
    path: &str,
    convert: impl Fn(&Value) -> Option<T>,
) -> Result<Option<Vec<T>>, SchemaError> {
    let Some(values) = obj.get("enum") else {
        return Ok(None);
    };
    let invalid = |reason: &str| SchemaError::InvalidKeyword {
        path: path.to_string(),
        keyword: "enum".into(),
        reason: reason.to_string(),
    };
    let values = values
        .as_array()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| invalid("must be a non-empty array"))?;
    values
        .iter()
        .map(|v| convert(v).ok_or_else(|| invalid("values must match the declared type")))
        .collect::<Result<Vec<T>, _>>()
        .map(Some)
}

fn check_range(n: f64, minimum: Option<f64>, maximum: Option<f64>) -> Result<(), String> {
    if let Some(min) = minimum
        && n < min
    {
        return Err(format!("{n} is below minimum {min}"));
    }
    if let Some(max) = maximum
        && n > max
    {
        return Err(format!("{n} is above maximum {max}"));
    }
    Ok(())
}

fn as_integer(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    value
        .as_f64()
        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
        .map(|f| f as i64)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order_schema() -> ParameterSchema {
        ParameterSchema::parse_parameters(&json!({
            "type": "object",
            "description": "Place an order",
            "properties": {
                "sku": { "type": "string", "description": "Item id" },
                "quantity": { "type": "integer", "minimum": 1, "maximum": 10 },
                "speed": { "type": "string", "enum": ["standard", "express"] },
                "gift": { "type": "boolean" },
                "tags": { "type": "array", "items": { "type": "string" } },
                "address": {
                    "type": "object",
                    "properties": { "zip": { "type": "string" } },
                    "required": ["zip"]
                }
            },
            "required": ["sku", "quantity"]
        }))
        .unwrap()
    }

    #[test]
    fn valid_input_passes() {
        let schema = order_schema();
        schema
            .validate(&json!({
                "sku": "A-1",
                "quantity": 3,
                "speed": "express",
                "gift": false,
                "tags": ["x", "y"],
                "address": { "zip": "10115" }
            }))
            .unwrap();
    }

    #[test]
    fn violations_carry_paths() {
        let schema = order_schema();

        let err = schema.validate(&json!({"quantity": 1})).unwrap_err();
        assert_eq!(err.path, "$");
        assert!(err.reason.contains("'sku'"));

        let err = schema
            .validate(&json!({"sku": "A", "quantity": 11}))
            .unwrap_err();
        assert_eq!(err.path, "$.quantity");
        assert!(err.reason.contains("maximum"));

        let err = schema
            .validate(&json!({"sku": "A", "quantity": 1, "tags": ["ok", 3]}))
            .unwrap_err();
        assert_eq!(err.path, "$.tags[1]");

        let err = schema
            .validate(&json!({"sku": "A", "quantity": 1, "speed": "teleport"}))
            .unwrap_err();
        assert!(err.to_string().contains("teleport"));

        let err = schema
            .validate(&json!({"sku": "A", "quantity": 1, "address": {}}))
            .unwrap_err();
        assert_eq!(err.path, "$.address");
    }

    #[test]
    fn integer_accepts_whole_floats_only() {
        let schema = ParameterSchema::parse(&json!({"type": "integer"})).unwrap();
        schema.validate(&json!(4.0)).unwrap();
        assert!(schema.validate(&json!(4.5)).is_err());
        assert!(schema.validate(&json!("4")).is_err());
    }

    #[test]
    fn unsupported_constructs_rejected() {
        let err = ParameterSchema::parse_parameters(&json!({
            "type": "object",
            "properties": { "v": { "oneOf": [{ "type": "string" }] , "type": "string"} }
        }))
        .unwrap_err();
        assert!(matches!(err, SchemaError::UnsupportedKeyword { ref keyword, .. } if keyword == "oneOf"));

        let err = ParameterSchema::parse(&json!({"type": "null"})).unwrap_err();
        assert!(matches!(err, SchemaError::UnsupportedType { .. }));

        let err = ParameterSchema::parse(&json!({"type": ["string", "null"]})).unwrap_err();
        assert!(matches!(err, SchemaError::UnsupportedType { .. }));

        let err = ParameterSchema::parse(&json!({"properties": {}})).unwrap_err();
        assert!(matches!(err, SchemaError::MissingType { .. }));
    }

    #[test]
    fn malformed_keywords_rejected() {
        let err = ParameterSchema::parse_parameters(&json!({
            "type": "object",
            "properties": { "a": { "type": "string" } },
            "required": ["b"]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("'b'"));

        assert!(ParameterSchema::parse(&json!({"type": "string", "enum": [1, 2]})).is_err());
        assert!(ParameterSchema::parse(&json!({"type": "string", "enum": []})).is_err());
        assert!(ParameterSchema::parse(&json!({"type": "number", "minimum": "0"})).is_err());
        assert!(
            ParameterSchema::parse(&json!({"type": "integer", "minimum": 5, "maximum": 1}))
                .is_err()
        );
        assert!(ParameterSchema::parse(&json!({"type": "boolean", "minimum": 1})).is_err());
    }

    #[test]
    fn top_level_must_be_object() {
        let err = ParameterSchema::parse_parameters(&json!({"type": "string"})).unwrap_err();
        assert!(matches!(err, SchemaError::TopLevelNotObject { .. }));
    }

    #[test]
    fn nested_errors_report_path() {
        let err = ParameterSchema::parse_parameters(&json!({
            "type": "object",
            "properties": {
                "list": { "type": "array", "items": { "type": "tuple" } }
            }
        }))
        .unwrap_err();
        assert!(err.to_string().starts_with("$.list[]"));
    }
}
