//! Input checks applied before any SQL text is built.

mod identifiers;
mod validation;

pub use identifiers::{
    escape_identifier, safe_column, safe_identifier, safe_table, validate_identifier,
    MAX_IDENTIFIER_LENGTH,
};
pub use validation::{rewrite_positional_placeholders, QueryValidator, SELECT_ONLY_MESSAGE};
