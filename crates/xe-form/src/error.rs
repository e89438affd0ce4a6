#![forbid(unsafe_code)]

//! Error types.

use serde_json::Value;
use thiserror::Error;

use crate::context::FieldToken;
use crate::name_path::NamePath;

/// Failures of the form container itself, as opposed to validation failures.
#[derive(Debug, Error)]
pub enum FormError {
    /// A JSON configuration document did not parse.
    #[error("invalid form config: {0}")]
    Config(#[from] serde_json::Error),
    /// No field is registered under the token.
    #[error("no field registered under {0}")]
    UnknownField(FieldToken),
}

/// Why a rule could not be evaluated at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum RuleEvalError {
    #[error("custom validator panicked: {0}")]
    ValidatorPanicked(String),
    #[error("custom validator dropped its callback without completing")]
    CallbackDropped,
    #[error("value transform panicked: {0}")]
    TransformPanicked(String),
}

/// Validation outcome of one field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldError {
    pub name: NamePath,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl FieldError {
    /// A field result with nothing to report.
    #[must_use]
    pub fn empty(name: NamePath) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }
}

/// Rejection payload of a form-level validate call.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{} field(s) failed validation", .error_fields.len())]
pub struct ValidateErrorEntity {
    /// Values of the validated fields.
    pub values: Value,
    /// Fields with at least one blocking error.
    pub error_fields: Vec<FieldError>,
    /// A newer validation run started before this one finished.
    pub out_of_date: bool,
}
