#![forbid(unsafe_code)]

//! Declarative validation rules.
//!
//! A [`Rule`] is static configuration: a type tag, bounds, a pattern, an
//! optional value transform and an optional [`CustomValidator`]. Rules are
//! built with chained setters:
//!
//! ```rust
//! use xe_form::{Rule, RuleType};
//!
//! let adult = Rule::new().kind(RuleType::Number).min(18.0);
//! let tags = Rule::new()
//!     .kind(RuleType::Array)
//!     .default_field(Rule::new().kind(RuleType::String).max(8.0));
//! # let _ = (adult, tags);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::BoxFuture;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use xe_utils::Diagnostics;

use crate::messages::{display_value, format_number};

// ---------------------------------------------------------------------------
// RuleType
// ---------------------------------------------------------------------------

/// Built-in type tags understood by the rule checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    String,
    Number,
    Boolean,
    Regexp,
    Integer,
    Float,
    Array,
    Object,
    Enum,
    Date,
    Url,
    Hex,
    Email,
    Any,
}

impl RuleType {
    /// The tag as written in message templates.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Regexp => "regexp",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Array => "array",
            Self::Object => "object",
            Self::Enum => "enum",
            Self::Date => "date",
            Self::Url => "url",
            Self::Hex => "hex",
            Self::Email => "email",
            Self::Any => "any",
        }
    }

    /// Types whose empty string counts as "no value".
    #[must_use]
    pub fn is_native_string(self) -> bool {
        matches!(
            self,
            Self::String | Self::Url | Self::Hex | Self::Email | Self::Date
        )
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string()))
            .map_err(|_| format!("unknown rule type `{s}`"))
    }
}

// ---------------------------------------------------------------------------
// Custom validators
// ---------------------------------------------------------------------------

/// Completion handle passed to callback-style validators.
///
/// Consumed on use, so a validator can complete at most once. Dropping it
/// without completing counts as an internal failure.
pub struct ValidatorCallback {
    sender: oneshot::Sender<Result<(), Vec<String>>>,
    returned_future: Arc<AtomicBool>,
    diagnostics: Diagnostics,
}

impl ValidatorCallback {
    fn complete(self, outcome: Result<(), Vec<String>>) {
        if self.returned_future.load(Ordering::SeqCst) {
            self.diagnostics.warning(
                false,
                "Form",
                "validator returned a future; `callback` is ignored",
            );
            return;
        }
        // The receiver is gone once the rule has been settled another way.
        let _ = self.sender.send(outcome);
    }

    /// Signal that the value is valid.
    pub fn ok(self) {
        self.complete(Ok(()));
    }

    /// Signal a failure with one message.
    pub fn error(self, message: impl Into<String>) {
        self.complete(Err(vec![message.into()]));
    }

    /// Signal a failure with several messages.
    pub fn errors(self, messages: Vec<String>) {
        self.complete(Err(messages));
    }
}

impl fmt::Debug for ValidatorCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorCallback").finish_non_exhaustive()
    }
}

/// What a custom validator hands back when called.
pub enum ValidatorReturn {
    /// Completion is reported through the [`ValidatorCallback`].
    Callback,
    /// Completion is the future's output; `Err` carries the failure message.
    Future(BoxFuture<'static, Result<(), String>>),
}

impl fmt::Debug for ValidatorReturn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callback => f.write_str("Callback"),
            Self::Future(_) => f.write_str("Future(..)"),
        }
    }
}

type ValidatorFn =
    dyn Fn(&Rule, Option<&Value>, ValidatorCallback) -> ValidatorReturn + Send + Sync;

/// A user-supplied check, in either callback or future style.
#[derive(Clone)]
pub struct CustomValidator(Arc<ValidatorFn>);

impl CustomValidator {
    /// Wrap a raw validator that may use either completion style.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Rule, Option<&Value>, ValidatorCallback) -> ValidatorReturn + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// A validator that resolves through a future.
    ///
    /// ```rust
    /// use xe_form::CustomValidator;
    ///
    /// let even = CustomValidator::future(|_rule, value| {
    ///     let n = value.and_then(|v| v.as_i64()).unwrap_or(0);
    ///     async move {
    ///         if n % 2 == 0 { Ok(()) } else { Err("must be even".to_string()) }
    ///     }
    /// });
    /// # let _ = even;
    /// ```
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(&Rule, Option<&Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        Self::new(move |rule, value, _callback| ValidatorReturn::Future(Box::pin(f(rule, value))))
    }

    /// A validator that completes through its callback.
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&Rule, Option<&Value>, ValidatorCallback) + Send + Sync + 'static,
    {
        Self::new(move |rule, value, callback| {
            f(rule, value, callback);
            ValidatorReturn::Callback
        })
    }

    /// Call the validator, handing it a fresh callback.
    ///
    /// Returns what the validator returned, the receiving end of the callback
    /// and the flag that disables the callback once a future is observed.
    pub(crate) fn call(
        &self,
        rule: &Rule,
        value: Option<&Value>,
        diagnostics: &Diagnostics,
    ) -> (
        ValidatorReturn,
        oneshot::Receiver<Result<(), Vec<String>>>,
        Arc<AtomicBool>,
    ) {
        let (tx, rx) = oneshot::channel();
        let returned_future = Arc::new(AtomicBool::new(false));
        let callback = ValidatorCallback {
            sender: tx,
            returned_future: Arc::clone(&returned_future),
            diagnostics: diagnostics.clone(),
        };
        let returned = (self.0)(rule, value, callback);
        (returned, rx, returned_future)
    }
}

impl fmt::Debug for CustomValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomValidator(..)")
    }
}

/// Value rewrite applied before a rule is checked.
#[derive(Clone)]
pub struct Transform(Arc<dyn Fn(Option<&Value>) -> Option<Value> + Send + Sync>);

impl Transform {
    /// Wrap a transform function.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Option<&Value>) -> Option<Value> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Apply the transform.
    #[must_use]
    pub fn apply(&self, value: Option<&Value>) -> Option<Value> {
        (self.0)(value)
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Transform(..)")
    }
}

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// One validation constraint on a field.
#[derive(Debug, Clone, Default)]
pub struct Rule {
    /// Type tag; `None` checks as a string unless the rule only sets `required`.
    pub kind: Option<RuleType>,
    pub required: bool,
    /// Reject whitespace-only strings.
    pub whitespace: bool,
    pub len: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Allowed values for [`RuleType::Enum`].
    pub enum_values: Option<Vec<Value>>,
    pub pattern: Option<Regex>,
    /// Replaces every message the rule produces.
    pub message: Option<String>,
    pub transform: Option<Transform>,
    pub validator: Option<CustomValidator>,
    /// Failures are reported as warnings and never block the form.
    pub warning_only: bool,
    /// Triggers this rule runs on; empty means every trigger.
    pub validate_trigger: Vec<String>,
    /// Rule applied to each element of an array value.
    pub default_field: Option<Box<Rule>>,
}

impl Rule {
    /// An empty rule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a required rule.
    #[must_use]
    pub fn required() -> Self {
        Self::new().is_required(true)
    }

    /// A rule driven only by a custom validator.
    #[must_use]
    pub fn custom(validator: CustomValidator) -> Self {
        Self::new().validator(validator)
    }

    #[must_use]
    pub fn kind(mut self, kind: RuleType) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub fn is_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    #[must_use]
    pub fn whitespace(mut self, whitespace: bool) -> Self {
        self.whitespace = whitespace;
        self
    }

    #[must_use]
    pub fn len(mut self, len: f64) -> Self {
        self.len = Some(len);
        self
    }

    #[must_use]
    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    #[must_use]
    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    #[must_use]
    pub fn one_of(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.enum_values = Some(values.into_iter().collect());
        self
    }

    #[must_use]
    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    #[must_use]
    pub fn validator(mut self, validator: CustomValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    #[must_use]
    pub fn warning_only(mut self, warning_only: bool) -> Self {
        self.warning_only = warning_only;
        self
    }

    #[must_use]
    pub fn trigger(mut self, trigger: impl Into<String>) -> Self {
        self.validate_trigger.push(trigger.into());
        self
    }

    #[must_use]
    pub fn default_field(mut self, rule: Rule) -> Self {
        self.default_field = Some(Box::new(rule));
        self
    }

    /// Whether the rule runs for `trigger_name`.
    #[must_use]
    pub fn runs_on(&self, trigger_name: Option<&str>) -> bool {
        match trigger_name {
            None => true,
            Some(_) if self.validate_trigger.is_empty() => true,
            Some(name) => self.validate_trigger.iter().any(|t| t == name),
        }
    }

    /// The rule's scalar settings as message substitutions.
    #[must_use]
    pub fn template_vars(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        if let Some(kind) = self.kind {
            vars.insert("type".to_string(), kind.to_string());
        }
        vars.insert("required".to_string(), self.required.to_string());
        vars.insert("whitespace".to_string(), self.whitespace.to_string());
        vars.insert("warningOnly".to_string(), self.warning_only.to_string());
        for (key, bound) in [("len", self.len), ("min", self.min), ("max", self.max)] {
            if let Some(bound) = bound {
                vars.insert(key.to_string(), format_number(bound));
            }
        }
        if let Some(pattern) = &self.pattern {
            // Regex literal notation, as patterns are usually written.
            vars.insert("pattern".to_string(), format!("/{}/", pattern.as_str()));
        }
        if let Some(message) = &self.message {
            vars.insert("message".to_string(), message.clone());
        }
        if !self.validate_trigger.is_empty() {
            vars.insert("validateTrigger".to_string(), self.validate_trigger.join(","));
        }
        vars
    }

    /// The enum values joined with `", "`; empty when none are set.
    #[must_use]
    pub fn joined_enum(&self) -> String {
        self.enum_values
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join(", ")
    }
}
