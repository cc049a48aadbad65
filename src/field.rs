//! Field-level validation errors.
//!
//! A field error is a client input problem attributed to one named field.
//! Handlers and the [`Paginator`](crate::Paginator) record them on the
//! [`Context`](crate::Context) instead of returning early; once the handler
//! finishes, every recorded error is reported together in one body:
//!
//! ```json
//! {"errors": [{"field": "limit", "message": "not a valid integer", "code": "invalid_format"}]}
//! ```
//!
//! The constructors below are the canonical set shared by the framework and
//! application code, keyed by their `code`.

use serde::Serialize;

/// Canonical error codes.
pub mod code {
    pub const INVALID_FORMAT: &str = "invalid_format";
    pub const MISSING_FIELD: &str = "missing_field";
    pub const OUT_OF_RANGE: &str = "out_of_range";
}

/// One validation failure for one input field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    pub code: String,
}

impl FieldError {
    pub fn new(
        field: impl Into<String>,
        message: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self { field: field.into(), message: message.into(), code: code.into() }
    }

    /// The field was required but absent.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(field, "this field is required", code::MISSING_FIELD)
    }

    /// The value could not be parsed as an integer.
    pub fn invalid_integer(field: impl Into<String>) -> Self {
        Self::new(field, "not a valid integer", code::INVALID_FORMAT)
    }

    pub fn invalid_format(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, message, code::INVALID_FORMAT)
    }

    pub fn out_of_range(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, message, code::OUT_OF_RANGE)
    }
}

/// Aggregated body sent when a request recorded at least one field error.
#[derive(Debug, Serialize)]
pub struct FieldErrorBody<'a> {
    pub errors: &'a [FieldError],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_keeps_every_error_in_report_order() {
        let errors = vec![
            FieldError::missing("name"),
            FieldError::invalid_format("name", "must be ascii"),
            FieldError::invalid_integer("age"),
        ];
        let json = serde_json::to_value(FieldErrorBody { errors: &errors }).unwrap();

        let listed = json["errors"].as_array().unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0]["field"], "name");
        assert_eq!(listed[0]["code"], "missing_field");
        assert_eq!(listed[1]["field"], "name");
        assert_eq!(listed[2]["message"], "not a valid integer");
        assert_eq!(listed[2]["code"], "invalid_format");
    }
}
