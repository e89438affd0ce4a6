#![forbid(unsafe_code)]

//! Form state and declarative rule validation.
//!
//! # Layers
//!
//! - [`value`]: copy-on-write reads, writes and deep merges over a JSON store.
//! - [`messages`]: `${key}` message templates with English and Chinese
//!   catalogues.
//! - [`rule`]: declarative rules and custom validators.
//! - [`validate`]: single-rule evaluation and per-field orchestration in
//!   sequential, parallel-first or parallel-all mode.
//! - [`aggregate`]: settle-all joining of independent validations.
//! - [`context`]: copy-on-write field registries and form item scopes.
//! - [`form`]: the form container tying the above together.
//!
//! # Feature Flags
//!
//! - `tracing`: emit `tracing` events for validation runs and diagnostics.

pub mod aggregate;
mod checker;
pub mod context;
pub mod error;
pub mod form;
pub mod messages;
pub mod name_path;
pub mod rule;
pub mod validate;
pub mod value;

pub use aggregate::await_all;
pub use context::{ComponentIdentity, FieldBinding, FieldRegistry, FieldToken, FormItemScope};
pub use error::{FieldError, FormError, ValidateErrorEntity};
pub use form::{FieldMeta, FieldSpec, Form, FormConfig, ValidationToken};
pub use messages::{ValidateMessages, render_template};
pub use name_path::{NamePath, PathKey, contains_name_path, is_equal_name, match_name_path};
pub use rule::{CustomValidator, Rule, RuleType, Transform, ValidatorCallback, ValidatorReturn};
pub use validate::{RuleError, ValidateMode, ValidateOptions, validate_rule, validate_rules};
pub use value::{Store, clone_by_name_path_list, get_value, merge_stores, set_value};

pub use xe_utils::{Diagnostics, DiagnosticsMode};
