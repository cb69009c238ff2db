//! Compiled schema representation.
//!
//! A [`CompiledSchema`] pairs a parsed Avro schema with the JSON convention
//! its input documents follow, and turns one message into schema-encoded
//! binary bytes. Instances are owned by the cache entry that created them
//! and handed out as `Arc` snapshots.

use crate::error::SchemaFlowError;
use crate::types::Message;
use apache_avro::schema::Schema;
use apache_avro::to_avro_datum;
use apache_avro::types::Value as AvroValue;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// How incoming JSON documents map onto the schema.
///
/// In the Avro JSON convention a union value is either `null` or a
/// single-key object naming the selected branch, e.g.
/// `{"string": "a"}`. Raw JSON carries the plain value and branches are
/// matched by shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonMode {
    AvroJson,
    RawJson,
}

pub struct CompiledSchema {
    schema: Schema,
    mode: JsonMode,
}

impl CompiledSchema {
    /// Parses schema text fetched from the registry. Failures are terminal:
    /// re-fetching the same definition cannot fix a malformed schema.
    pub fn compile(schema_text: &str, mode: JsonMode) -> crate::Result<Self> {
        let schema = Schema::parse_str(schema_text)
            .map_err(|e| SchemaFlowError::SchemaInvalid(e.to_string()))?;
        Ok(Self { schema, mode })
    }

    /// Encodes a message's JSON content to Avro binary bytes.
    pub fn encode(&self, msg: &Message) -> crate::Result<Vec<u8>> {
        let doc = msg
            .as_structured()
            .map_err(|e| SchemaFlowError::EncodeFailure(e.to_string()))?;
        let value = json_to_avro(&doc, &self.schema, self.mode)?;
        to_avro_datum(&self.schema, value)
            .map_err(|e| SchemaFlowError::EncodeFailure(e.to_string()))
    }
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

fn encode_err(msg: impl Into<String>) -> SchemaFlowError {
    SchemaFlowError::EncodeFailure(msg.into())
}

fn json_to_avro(json: &JsonValue, schema: &Schema, mode: JsonMode) -> crate::Result<AvroValue> {
    match schema {
        Schema::Null => match json {
            JsonValue::Null => Ok(AvroValue::Null),
            other => Err(encode_err(format!("expected null, got {}", other))),
        },

        Schema::Boolean => match json {
            JsonValue::Bool(b) => Ok(AvroValue::Boolean(*b)),
            other => Err(encode_err(format!("expected boolean, got {}", other))),
        },

        Schema::Int => {
            let n = json_i64(json, "int")?;
            let v = i32::try_from(n)
                .map_err(|_| encode_err(format!("value {} out of int range", n)))?;
            Ok(AvroValue::Int(v))
        }

        Schema::Long => Ok(AvroValue::Long(json_i64(json, "long")?)),

        Schema::Float => Ok(AvroValue::Float(json_f64(json, "float")? as f32)),

        Schema::Double => Ok(AvroValue::Double(json_f64(json, "double")?)),

        Schema::String => match json {
            JsonValue::String(s) => Ok(AvroValue::String(s.clone())),
            other => Err(encode_err(format!("expected string, got {}", other))),
        },

        // Avro JSON carries bytes as a string of code points in 0..=255.
        Schema::Bytes => Ok(AvroValue::Bytes(json_byte_string(json)?)),

        Schema::Fixed(fixed) => {
            let bytes = json_byte_string(json)?;
            if bytes.len() != fixed.size {
                return Err(encode_err(format!(
                    "fixed '{}' expects {} bytes, got {}",
                    fixed.name.name,
                    fixed.size,
                    bytes.len()
                )));
            }
            Ok(AvroValue::Fixed(fixed.size, bytes))
        }

        Schema::Array(array) => match json {
            JsonValue::Array(items) => {
                let converted = items
                    .iter()
                    .map(|item| json_to_avro(item, &array.items, mode))
                    .collect::<crate::Result<Vec<_>>>()?;
                Ok(AvroValue::Array(converted))
            }
            other => Err(encode_err(format!("expected array, got {}", other))),
        },

        Schema::Map(map) => match json {
            JsonValue::Object(entries) => {
                let mut converted = HashMap::with_capacity(entries.len());
                for (key, value) in entries {
                    converted.insert(key.clone(), json_to_avro(value, &map.types, mode)?);
                }
                Ok(AvroValue::Map(converted))
            }
            other => Err(encode_err(format!("expected map object, got {}", other))),
        },

        Schema::Enum(inner) => match json {
            JsonValue::String(symbol) => {
                let position = inner
                    .symbols
                    .iter()
                    .position(|s| s == symbol)
                    .ok_or_else(|| {
                        encode_err(format!(
                            "'{}' is not a symbol of enum '{}'",
                            symbol, inner.name.name
                        ))
                    })?;
                Ok(AvroValue::Enum(position as u32, symbol.clone()))
            }
            other => Err(encode_err(format!("expected enum symbol, got {}", other))),
        },

        Schema::Record(record) => match json {
            JsonValue::Object(entries) => {
                let mut fields = Vec::with_capacity(record.fields.len());
                for field in &record.fields {
                    let value = match entries.get(&field.name) {
                        Some(value) => json_to_avro(value, &field.schema, mode)?,
                        // Defaults are written in the plain convention even
                        // when the document itself is Avro JSON.
                        None => match &field.default {
                            Some(default) => {
                                json_to_avro(default, &field.schema, JsonMode::RawJson)?
                            }
                            None => {
                                return Err(encode_err(format!(
                                    "missing field '{}' of record '{}'",
                                    field.name, record.name.name
                                )))
                            }
                        },
                    };
                    fields.push((field.name.clone(), value));
                }
                Ok(AvroValue::Record(fields))
            }
            other => Err(encode_err(format!("expected record object, got {}", other))),
        },

        Schema::Union(union) => match mode {
            JsonMode::AvroJson => {
                if json.is_null() {
                    let position = union
                        .variants()
                        .iter()
                        .position(|v| matches!(v, Schema::Null))
                        .ok_or_else(|| encode_err("union has no null branch"))?;
                    return Ok(AvroValue::Union(position as u32, Box::new(AvroValue::Null)));
                }
                let entries = json.as_object().filter(|o| o.len() == 1).ok_or_else(|| {
                    encode_err("union value must be null or a single-key object")
                })?;
                let (branch, inner) = entries.iter().next().ok_or_else(|| {
                    encode_err("union value must be null or a single-key object")
                })?;
                for (position, variant) in union.variants().iter().enumerate() {
                    if union_branch_matches(variant, branch) {
                        let value = json_to_avro(inner, variant, mode)?;
                        return Ok(AvroValue::Union(position as u32, Box::new(value)));
                    }
                }
                Err(encode_err(format!("no union branch named '{}'", branch)))
            }
            JsonMode::RawJson => {
                for (position, variant) in union.variants().iter().enumerate() {
                    if let Ok(value) = json_to_avro(json, variant, mode) {
                        return Ok(AvroValue::Union(position as u32, Box::new(value)));
                    }
                }
                Err(encode_err(format!("{} matched no union branch", json)))
            }
        },

        // Logical and less common types fall back to an untyped conversion
        // resolved against the schema.
        other => json_to_avro_untyped(json)
            .resolve(other)
            .map_err(|e| encode_err(e.to_string())),
    }
}

fn json_i64(json: &JsonValue, kind: &str) -> crate::Result<i64> {
    json.as_i64()
        .ok_or_else(|| encode_err(format!("expected {}, got {}", kind, json)))
}

fn json_f64(json: &JsonValue, kind: &str) -> crate::Result<f64> {
    json.as_f64()
        .ok_or_else(|| encode_err(format!("expected {}, got {}", kind, json)))
}

fn json_byte_string(json: &JsonValue) -> crate::Result<Vec<u8>> {
    let s = json
        .as_str()
        .ok_or_else(|| encode_err(format!("expected byte string, got {}", json)))?;
    s.chars()
        .map(|c| {
            u8::try_from(c as u32)
                .map_err(|_| encode_err(format!("byte string code point {:?} out of range", c)))
        })
        .collect()
}

/// Names under which a union branch is addressed in Avro JSON: the type
/// name for primitives, the user-specified (optionally qualified) name for
/// named types.
fn union_branch_matches(variant: &Schema, branch: &str) -> bool {
    match variant {
        Schema::Null => branch == "null",
        Schema::Boolean => branch == "boolean",
        Schema::Int => branch == "int",
        Schema::Long => branch == "long",
        Schema::Float => branch == "float",
        Schema::Double => branch == "double",
        Schema::Bytes => branch == "bytes",
        Schema::String => branch == "string",
        Schema::Array(_) => branch == "array",
        Schema::Map(_) => branch == "map",
        Schema::Record(record) => named_matches(&record.name.name, &record.name.namespace, branch),
        Schema::Enum(inner) => named_matches(&inner.name.name, &inner.name.namespace, branch),
        Schema::Fixed(fixed) => named_matches(&fixed.name.name, &fixed.name.namespace, branch),
        _ => false,
    }
}

fn named_matches(name: &str, namespace: &Option<String>, branch: &str) -> bool {
    if branch == name {
        return true;
    }
    match namespace {
        Some(ns) => branch.strip_prefix(ns.as_str()).and_then(|r| r.strip_prefix('.'))
            == Some(name),
        None => false,
    }
}

fn json_to_avro_untyped(json: &JsonValue) -> AvroValue {
    match json {
        JsonValue::Null => AvroValue::Null,
        JsonValue::Bool(b) => AvroValue::Boolean(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => AvroValue::Long(i),
            None => AvroValue::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::String(s) => AvroValue::String(s.clone()),
        JsonValue::Array(items) => {
            AvroValue::Array(items.iter().map(json_to_avro_untyped).collect())
        }
        JsonValue::Object(entries) => AvroValue::Map(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), json_to_avro_untyped(v)))
                .collect(),
        ),
    }
}
