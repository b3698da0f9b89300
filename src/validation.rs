//! Configuration validation.
//!
//! Checks a `serde_json::Value` against a [`Schema`]: presence of required
//! attributes, value types, nested block cardinality, and the per-attribute
//! [`Validator`]s Azure resources declare (name lengths, allowed SKUs, tag
//! limits, resource IDs).
//!
//! # Example
//!
//! ```
//! use terraform_provider_azurerm::schema::{Schema, Attribute};
//! use terraform_provider_azurerm::validation::{validate, Validator};
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute(
//!         "disk_size_gb",
//!         Attribute::optional_int64().with_validator(Validator::IntBetween(0, 32767)),
//!     );
//!
//! let diagnostics = validate(&schema, &json!({"name": "disk1", "disk_size_gb": 64}));
//! assert!(diagnostics.is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"name": "disk1", "disk_size_gb": 40000}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("disk_size_gb".to_string()));
//! ```

use crate::arm::id::ResourceId;
use crate::schema::{
    Attribute, AttributeType, Block, BlockNestingMode, Diagnostic, NestedBlock, Schema,
};
use serde_json::Value;
use std::collections::HashMap;

/// Maximum number of tags on a single Azure resource.
pub const MAX_TAGS: usize = 50;
/// Maximum length of a tag name.
pub const MAX_TAG_KEY_LEN: usize = 512;
/// Maximum length of a tag value.
pub const MAX_TAG_VALUE_LEN: usize = 256;

/// A check applied to an attribute's configured value.
///
/// String checks applied to a list attribute run against every element.
#[derive(Debug, Clone)]
pub enum Validator {
    /// Strings must not be empty.
    NoEmptyStrings,
    /// Strings must be one of `values`.
    StringInSlice {
        /// Accepted values.
        values: &'static [&'static str],
        /// Compare without regard to ASCII case.
        ignore_case: bool,
    },
    /// String length (in characters) must lie in `min..=max`.
    StringLenBetween(usize, usize),
    /// Integers must lie in `min..=max`.
    IntBetween(i64, i64),
    /// Lists may hold at most this many elements.
    MaxItems(usize),
    /// Strings must parse as an Azure resource ID.
    ResourceId,
    /// Maps must respect Azure's tag limits.
    Tags,
    /// Arbitrary string check.
    Custom(fn(&str) -> Result<(), String>),
}

impl Validator {
    /// Case-sensitive [`Validator::StringInSlice`].
    pub fn one_of(values: &'static [&'static str]) -> Self {
        Self::StringInSlice {
            values,
            ignore_case: false,
        }
    }

    /// Case-insensitive [`Validator::StringInSlice`].
    pub fn one_of_ignore_case(values: &'static [&'static str]) -> Self {
        Self::StringInSlice {
            values,
            ignore_case: true,
        }
    }

    /// Check `value`, returning a human-readable reason on failure.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        match self {
            Self::MaxItems(max) => match value.as_array() {
                Some(items) if items.len() > *max => Err(format!(
                    "expected at most {} item(s), got {}",
                    max,
                    items.len()
                )),
                _ => Ok(()),
            },
            Self::Tags => match value.as_object() {
                Some(tags) => check_tags(tags),
                None => Ok(()),
            },
            Self::IntBetween(min, max) => match value.as_i64() {
                Some(v) if v < *min || v > *max => Err(format!(
                    "expected to be in the range ({} - {}), got {}",
                    min, max, v
                )),
                _ => Ok(()),
            },
            _ => match value {
                Value::String(s) => self.check_str(s),
                Value::Array(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .try_for_each(|s| self.check_str(s)),
                _ => Ok(()),
            },
        }
    }

    fn check_str(&self, s: &str) -> Result<(), String> {
        match self {
            Self::NoEmptyStrings => {
                if s.trim().is_empty() {
                    Err("must not be empty".to_string())
                } else {
                    Ok(())
                }
            },
            Self::StringInSlice {
                values,
                ignore_case,
            } => {
                let found = values.iter().any(|v| {
                    if *ignore_case {
                        v.eq_ignore_ascii_case(s)
                    } else {
                        *v == s
                    }
                });
                if found {
                    Ok(())
                } else {
                    Err(format!("expected to be one of {:?}, got {:?}", values, s))
                }
            },
            Self::StringLenBetween(min, max) => {
                let len = s.chars().count();
                if len < *min || len > *max {
                    Err(format!(
                        "expected length to be in the range ({} - {}), got {}",
                        min, max, len
                    ))
                } else {
                    Ok(())
                }
            },
            Self::ResourceId => ResourceId::parse(s).map(|_| ()).map_err(|e| e.to_string()),
            Self::Custom(f) => f(s),
            Self::MaxItems(_) | Self::Tags | Self::IntBetween(..) => Ok(()),
        }
    }
}

fn check_tags(tags: &serde_json::Map<String, Value>) -> Result<(), String> {
    if tags.len() > MAX_TAGS {
        return Err(format!(
            "a maximum of {} tags can be applied to each ARM resource",
            MAX_TAGS
        ));
    }
    for (key, value) in tags {
        if key.chars().count() > MAX_TAG_KEY_LEN {
            return Err(format!(
                "the maximum length for a tag key is {} characters: {:?} is {} characters",
                MAX_TAG_KEY_LEN,
                key,
                key.chars().count()
            ));
        }
        let value = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if value.chars().count() > MAX_TAG_VALUE_LEN {
            return Err(format!(
                "the maximum length for a tag value is {} characters: the value for {:?} is {} characters",
                MAX_TAG_VALUE_LEN,
                key,
                value.chars().count()
            ));
        }
    }
    Ok(())
}

/// Validate a JSON value against a schema.
///
/// Returns a list of diagnostics for any validation errors found.
/// An empty list means the value is valid.
///
/// - Required attributes must be present and non-null
/// - Computed-only attributes are skipped (provider sets these)
/// - Attribute types must match the schema
/// - Attribute validators run on present values
/// - Nested blocks are validated recursively with min/max item constraints
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    validate_block(&schema.block, value, "", &mut diagnostics);
    diagnostics
}

/// Like [`validate`], returning `Err` with the diagnostics when there are any.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Whether a JSON value is valid against a schema.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

fn validate_block(block: &Block, value: &Value, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    let obj = match value {
        Value::Object(map) => map,
        Value::Null => return,
        _ => {
            let diag = Diagnostic::error("Expected object")
                .with_detail(format!("Got {}", value_type_name(value)));
            diagnostics.push(if path.is_empty() {
                diag
            } else {
                diag.with_attribute(path)
            });
            return;
        },
    };

    for (name, attr) in &block.attributes {
        validate_attribute(attr, obj.get(name), &join_path(path, name), diagnostics);
    }

    for (name, nested) in &block.blocks {
        validate_nested_block(nested, obj.get(name), &join_path(path, name), diagnostics);
    }
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if attr.flags.computed && !attr.flags.optional && !attr.flags.required {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => {
            let before = diagnostics.len();
            validate_attribute_type(&attr.attr_type, v, path, diagnostics);
            if diagnostics.len() > before {
                return;
            }
            for validator in &attr.validators {
                if let Err(reason) = validator.check(v) {
                    diagnostics.push(
                        Diagnostic::error(format!("Invalid value for attribute '{}'", path))
                            .with_detail(reason)
                            .with_attribute(path),
                    );
                }
            }
        },
    }
}

fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        },
        AttributeType::Int64 => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int64", value));
            }
        },
        AttributeType::Float64 => {
            if !value.is_number() {
                diagnostics.push(type_error(path, "float64", value));
            }
        },
        AttributeType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
            }
        },
        AttributeType::List(element_type) | AttributeType::Set(element_type) => {
            let expected = if matches!(attr_type, AttributeType::List(_)) {
                "list"
            } else {
                "set"
            };
            match value.as_array() {
                Some(arr) => {
                    for (i, elem) in arr.iter().enumerate() {
                        let elem_path = format!("{}.{}", path, i);
                        validate_attribute_type(element_type, elem, &elem_path, diagnostics);
                    }
                },
                None => diagnostics.push(type_error(path, expected, value)),
            }
        },
        AttributeType::Map(value_type) => match value.as_object() {
            Some(obj) => {
                for (key, val) in obj {
                    let key_path = format!("{}.{}", path, key);
                    validate_attribute_type(value_type, val, &key_path, diagnostics);
                }
            },
            None => diagnostics.push(type_error(path, "map", value)),
        },
        AttributeType::Object(attrs) => match value.as_object() {
            Some(obj) => validate_object_type(attrs, obj, path, diagnostics),
            None => diagnostics.push(type_error(path, "object", value)),
        },
        AttributeType::Dynamic => {},
    }
}

fn validate_object_type(
    attrs: &HashMap<String, AttributeType>,
    obj: &serde_json::Map<String, Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for (name, attr_type) in attrs {
        if let Some(value) = obj.get(name) {
            validate_attribute_type(attr_type, value, &join_path(path, name), diagnostics);
        }
    }
}

fn validate_nested_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match (nested.nesting_mode, value) {
        (_, None | Some(Value::Null)) => {
            if nested.min_items > 0 {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' requires at least {} item(s)",
                        path, nested.min_items
                    ))
                    .with_attribute(path),
                );
            }
        },
        // A single block may arrive bare or wrapped in a one-element list.
        (BlockNestingMode::Single, Some(v @ Value::Object(_))) => {
            validate_block(&nested.block, v, path, diagnostics);
        },
        (BlockNestingMode::Single | BlockNestingMode::List | BlockNestingMode::Set, Some(Value::Array(arr))) => {
            check_item_count(nested, arr.len(), path, diagnostics);
            for (i, item) in arr.iter().enumerate() {
                let item_path = format!("{}.{}", path, i);
                validate_block(&nested.block, item, &item_path, diagnostics);
            }
        },
        (BlockNestingMode::Map, Some(Value::Object(obj))) => {
            check_item_count(nested, obj.len(), path, diagnostics);
            for (key, item) in obj {
                let item_path = format!("{}.{}", path, key);
                validate_block(&nested.block, item, &item_path, diagnostics);
            }
        },
        (mode, Some(v)) => {
            let expected = if mode == BlockNestingMode::Map {
                "map"
            } else {
                "list"
            };
            diagnostics.push(
                Diagnostic::error(format!("Expected {} for block '{}'", expected, path))
                    .with_detail(format!("Got {}", value_type_name(v)))
                    .with_attribute(path),
            );
        },
    }
}

fn check_item_count(
    nested: &NestedBlock,
    len: usize,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let len = len as u32;
    if len < nested.min_items {
        diagnostics.push(
            Diagnostic::error(format!(
                "Block '{}' requires at least {} item(s), got {}",
                path, nested.min_items, len
            ))
            .with_attribute(path),
        );
    }
    if nested.max_items > 0 && len > nested.max_items {
        diagnostics.push(
            Diagnostic::error(format!(
                "Block '{}' allows at most {} item(s), got {}",
                path, nested.max_items, len
            ))
            .with_attribute(path),
        );
    }
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) if n.is_i64() => true,
        Value::Number(n) => n
            .as_f64()
            .map(|f| f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64)
            .unwrap_or(false),
        _ => false,
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for attribute '{}'", path))
        .with_detail(format!("Expected {}, got {}", expected, value_type_name(got)))
        .with_attribute(path)
}
