//! MCP resources.
//!
//! One static document describing the tools and schema conventions.

use crate::error::{NotFoundKind, ServerError, ServerResult};
use crate::protocol::{ReadResourceResult, Resource, ResourceContents};

/// URI of the schema documentation resource.
pub const SCHEMA_DOCUMENTATION_URI: &str = "schema://database/documentation";

const MARKDOWN_MIME: &str = "text/markdown";

const SCHEMA_DOCUMENTATION: &str = include_str!("../templates/schema-documentation.md");

/// Build the list of available resources.
pub fn build_resource_list() -> Vec<Resource> {
    vec![Resource {
        uri: SCHEMA_DOCUMENTATION_URI.to_string(),
        name: "Database Schema Documentation".to_string(),
        description: Some(
            "Tools, identifier rules and an example table layout for this database".to_string(),
        ),
        mime_type: Some(MARKDOWN_MIME.to_string()),
    }]
}

/// Read a resource by URI.
pub fn read_resource(uri: &str) -> ServerResult<ReadResourceResult> {
    match uri {
        SCHEMA_DOCUMENTATION_URI => Ok(ReadResourceResult {
            contents: vec![ResourceContents {
                uri: uri.to_string(),
                mime_type: Some(MARKDOWN_MIME.to_string()),
                text: SCHEMA_DOCUMENTATION.to_string(),
            }],
        }),
        _ => Err(ServerError::not_found(NotFoundKind::Resource, uri)),
    }
}
