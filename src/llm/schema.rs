//! Schema adapter
//!
//! Turns a domain type's JSON Schema (derived with `schemars`) into the document a
//! backend accepts for structured output.
//!
//! ## Dialects
//!
//! - **Loose** (Vertex AI): the plain schema, unchanged.
//! - **Strict** (OpenAI): every object node is closed (`additionalProperties: false`)
//!   and lists all of its properties as required; `$defs` becomes `definitions`; a
//!   `$ref` node keeps no sibling keys. Constructs strict mode cannot express are
//!   reported as [`SchemaError::Unsupported`] instead of being dropped.

use crate::llm::types::ProviderType;
use schemars::JsonSchema;
use schemars::generate::SchemaSettings;
use serde_json::{Map, Value};
use std::fmt::Write as _;

const DEFS_KEY: &str = "$defs";
const STRICT_DEFS_KEY: &str = "definitions";
const MAX_DESCRIBE_DEPTH: usize = 8;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaError {
    #[error("Schema construct not supported in strict mode at {path}: {construct}")]
    Unsupported { path: String, construct: String },
    #[error("Schema serialization failed: {0}")]
    Serialization(String),
}

/// Plain JSON Schema for `T`, without a `$schema` meta reference.
pub fn schema_for<T: JsonSchema>() -> Result<Value, SchemaError> {
    let generator = SchemaSettings::draft2020_12()
        .with(|settings| settings.meta_schema = None)
        .into_generator();
    let schema = generator.into_root_schema_for::<T>();
    serde_json::to_value(&schema).map_err(|e| SchemaError::Serialization(e.to_string()))
}

/// Structured-output schema for `T` in the dialect `provider` expects.
pub fn to_backend_schema<T: JsonSchema>(provider: ProviderType) -> Result<Value, SchemaError> {
    let schema = schema_for::<T>()?;
    if provider.requires_strict_schema() {
        to_strict_schema(&schema)
    } else {
        Ok(schema)
    }
}

/// Strict-mode transform of an arbitrary JSON Schema document.
pub fn to_strict_schema(schema: &Value) -> Result<Value, SchemaError> {
    strict_node(schema, "#")
}

fn unsupported(path: &str, construct: impl Into<String>) -> SchemaError {
    SchemaError::Unsupported {
        path: path.to_string(),
        construct: construct.into(),
    }
}

fn rewrite_ref(reference: &str) -> String {
    match reference.strip_prefix("#/$defs/") {
        Some(name) => format!("#/{}/{}", STRICT_DEFS_KEY, name),
        None => reference.to_string(),
    }
}

fn is_object_type(node: &Map<String, Value>) -> bool {
    match node.get("type") {
        Some(Value::String(kind)) => kind == "object",
        Some(Value::Array(kinds)) => kinds.iter().any(|kind| kind == "object"),
        _ => node.contains_key("properties"),
    }
}

fn strict_node(node: &Value, path: &str) -> Result<Value, SchemaError> {
    let map = match node {
        Value::Object(map) => map,
        Value::Bool(true) => return Err(unsupported(path, "unconstrained schema `true`")),
        other => return Ok(other.clone()),
    };

    if let Some(reference) = map.get("$ref") {
        let reference = reference
            .as_str()
            .ok_or_else(|| unsupported(path, "non-string `$ref`"))?;
        let mut bare = Map::new();
        bare.insert("$ref".to_string(), Value::String(rewrite_ref(reference)));
        return Ok(Value::Object(bare));
    }

    let mut out = Map::new();
    for (key, value) in map {
        let child_path = format!("{}/{}", path, key);
        let converted = match key.as_str() {
            DEFS_KEY | STRICT_DEFS_KEY => {
                let defs = value
                    .as_object()
                    .ok_or_else(|| unsupported(&child_path, "non-object definitions"))?;
                let mut converted = Map::new();
                for (name, def) in defs {
                    converted.insert(
                        name.clone(),
                        strict_node(def, &format!("#/{}/{}", STRICT_DEFS_KEY, name))?,
                    );
                }
                out.insert(STRICT_DEFS_KEY.to_string(), Value::Object(converted));
                continue;
            }
            "properties" => {
                let properties = value
                    .as_object()
                    .ok_or_else(|| unsupported(&child_path, "non-object properties"))?;
                let mut converted = Map::new();
                for (name, property) in properties {
                    converted.insert(
                        name.clone(),
                        strict_node(property, &format!("{}/{}", child_path, name))?,
                    );
                }
                Value::Object(converted)
            }
            "items" => match value {
                Value::Array(_) => return Err(unsupported(&child_path, "tuple `items`")),
                other => strict_node(other, &child_path)?,
            },
            "allOf" | "anyOf" | "oneOf" => {
                let variants = value
                    .as_array()
                    .ok_or_else(|| unsupported(&child_path, "non-array union"))?;
                let converted = variants
                    .iter()
                    .enumerate()
                    .map(|(i, variant)| strict_node(variant, &format!("{}/{}", child_path, i)))
                    .collect::<Result<Vec<_>, _>>()?;
                Value::Array(converted)
            }
            "additionalProperties" => match value {
                Value::Bool(false) => continue,
                _ => {
                    return Err(unsupported(
                        &child_path,
                        "open map (`additionalProperties` other than false)",
                    ));
                }
            },
            "patternProperties" => return Err(unsupported(&child_path, "`patternProperties`")),
            "prefixItems" => return Err(unsupported(&child_path, "tuple `prefixItems`")),
            "required" => continue,
            _ => value.clone(),
        };
        out.insert(key.clone(), converted);
    }

    if is_object_type(map) {
        let required = out
            .get("properties")
            .and_then(Value::as_object)
            .map(|properties| {
                properties
                    .keys()
                    .map(|name| Value::String(name.clone()))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        out.entry("properties".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        out.insert("required".to_string(), Value::Array(required));
        out.insert("additionalProperties".to_string(), Value::Bool(false));
    } else if let Some(required) = map.get("required") {
        out.insert("required".to_string(), required.clone());
    }

    Ok(Value::Object(out))
}

/// Markdown listing of every property path with its type and description.
///
/// Works on both the plain and the strict dialect; references are resolved against
/// the document's own definitions.
pub fn describe_schema(schema: &Value) -> String {
    let mut out = String::from("## Response Schema Field Descriptions\n");
    describe_properties(schema, schema, "", 0, &mut out);
    out
}

fn resolve<'a>(root: &'a Value, node: &'a Value) -> &'a Value {
    let reference = match node.get("$ref").and_then(Value::as_str) {
        Some(reference) => reference,
        None => return node,
    };
    let pointer = reference.trim_start_matches('#');
    root.pointer(pointer).unwrap_or(node)
}

/// The non-null member of an `anyOf` used for optional fields, if any.
fn unwrap_nullable<'a>(root: &'a Value, node: &'a Value) -> &'a Value {
    let node = resolve(root, node);
    match node.get("anyOf").and_then(Value::as_array) {
        Some(variants) => variants
            .iter()
            .find(|variant| variant.get("type").and_then(Value::as_str) != Some("null"))
            .map(|variant| resolve(root, variant))
            .unwrap_or(node),
        None => node,
    }
}

fn type_label(root: &Value, node: &Value) -> String {
    let node = unwrap_nullable(root, node);
    match node.get("type") {
        Some(Value::String(kind)) if kind == "array" => {
            let item = node
                .get("items")
                .map(|items| type_label(root, items))
                .unwrap_or_else(|| "any".to_string());
            format!("array<{}>", item)
        }
        Some(Value::String(kind)) => {
            if let Some(variants) = node.get("enum").and_then(Value::as_array) {
                let names = variants
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(" | ");
                format!("{} ({})", kind, names)
            } else {
                kind.clone()
            }
        }
        Some(Value::Array(kinds)) => kinds
            .iter()
            .filter_map(Value::as_str)
            .filter(|kind| *kind != "null")
            .collect::<Vec<_>>()
            .join(" | "),
        _ => node
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("any")
            .to_string(),
    }
}

fn describe_properties(root: &Value, node: &Value, prefix: &str, depth: usize, out: &mut String) {
    if depth > MAX_DESCRIBE_DEPTH {
        return;
    }
    let node = unwrap_nullable(root, node);
    let properties = match node.get("properties").and_then(Value::as_object) {
        Some(properties) => properties,
        None => return,
    };

    for (name, property) in properties {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", prefix, name)
        };
        let description = property
            .get("description")
            .or_else(|| unwrap_nullable(root, property).get("description"))
            .and_then(Value::as_str)
            .unwrap_or("");
        let _ = writeln!(
            out,
            "- `{}` ({}): {}",
            path,
            type_label(root, property),
            description.replace('\n', " ")
        );

        let target = unwrap_nullable(root, property);
        match target.get("type").and_then(Value::as_str) {
            Some("array") => {
                if let Some(items) = target.get("items") {
                    describe_properties(root, items, &format!("{}[]", path), depth + 1, out);
                }
            }
            _ => describe_properties(root, target, &path, depth + 1, out),
        }
    }
}
