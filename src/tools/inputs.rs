//! Tool input types with JSON Schema generation.

use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Input for the `connection` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConnectionInput {
    /// What to do with the shared database connection.
    #[schemars(schema_with = "connection_action_schema")]
    pub action: String,
}

fn connection_action_schema(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::String.into()),
        enum_values: Some(vec!["connect".into(), "disconnect".into(), "status".into()]),
        ..Default::default()
    };
    schema.metadata().description =
        Some("One of: connect, disconnect, status".to_string());
    Schema::Object(schema)
}

/// Input for the `query` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueryInput {
    /// SELECT statement to run. Positional `?` markers are bound from `params`.
    #[schemars(description = "SELECT statement to execute; use ? for positional parameters")]
    pub sql: String,

    /// Values for the `?` markers, in order.
    #[serde(default)]
    #[schemars(description = "Ordered parameter values for ? placeholders")]
    pub params: Option<Vec<Value>>,
}

/// Input for the `create` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreateInput {
    /// Target table.
    #[schemars(description = "Table name (letters, digits and underscores)")]
    pub table: String,

    /// Column values of the new row.
    #[schemars(description = "Column name to value map for the new row")]
    pub data: Map<String, Value>,
}

/// Input for the `update` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UpdateInput {
    /// Target table.
    #[schemars(description = "Table name (letters, digits and underscores)")]
    pub table: String,

    /// Columns to set.
    #[schemars(description = "Column name to new value map")]
    pub data: Map<String, Value>,

    /// Equality filter; a null value matches IS NULL.
    #[serde(rename = "where")]
    #[schemars(description = "Column name to value map combined with AND; null matches IS NULL")]
    pub filter: Map<String, Value>,
}

/// Input for the `delete` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DeleteInput {
    /// Target table.
    #[schemars(description = "Table name (letters, digits and underscores)")]
    pub table: String,

    /// Equality filter; a null value matches IS NULL.
    #[serde(rename = "where")]
    #[schemars(description = "Column name to value map combined with AND; null matches IS NULL")]
    pub filter: Map<String, Value>,
}

/// Input for the `readSchema` tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ReadSchemaInput {
    /// Table to describe; omit for a summary of every table.
    #[serde(default)]
    #[schemars(description = "Table to describe; omit to list all tables")]
    pub table: Option<String>,
}

/// JSON Schema of an input type as a plain JSON value.
pub fn input_schema<T: JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    let mut value = serde_json::to_value(schema).unwrap_or_else(|_| Value::Object(Map::new()));
    if let Some(obj) = value.as_object_mut() {
        // Clients expect a bare object schema.
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}
