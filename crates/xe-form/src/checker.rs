#![forbid(unsafe_code)]

//! Primitive constraint checks for a single rule.
//!
//! Produces unresolved message templates; placeholder substitution happens
//! one level up, in [`crate::validate`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::LazyLock;
use std::sync::atomic::Ordering;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use futures::FutureExt;
use regex::Regex;
use serde_json::Value;
use xe_utils::Diagnostics;

use crate::error::RuleEvalError;
use crate::messages::{ValidateMessages, display_value};
use crate::rule::{CustomValidator, Rule, RuleType, ValidatorReturn};

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^[^\s@<>()\[\]\\,;:"]+@(?:[A-Za-z0-9-]+\.)+[A-Za-z]{2,}$"#)
        .expect("email pattern is valid")
});

static URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?:https?|ftp):)?//(?:\S+(?::\S*)?@)?(?:localhost|\d{1,3}(?:\.\d{1,3}){3}|(?:[A-Za-z0-9-]+\.)+[A-Za-z]{2,})(?::\d{2,5})?(?:[/?#]\S*)?$",
    )
    .expect("url pattern is valid")
});

static HEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^#?(?:[a-f0-9]{6}|[a-f0-9]{3})$").expect("hex pattern is valid")
});

/// Why a rule did not pass.
#[derive(Debug)]
pub(crate) enum CheckError {
    /// The value broke the rule; carries message templates.
    Failed(Vec<String>),
    /// Evaluation itself went wrong.
    Internal(RuleEvalError),
}

/// How a rule is checked once custom validators are ruled out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckKind {
    Typed(RuleType),
    Pattern,
    RequiredOnly,
}

fn check_kind(rule: &Rule) -> CheckKind {
    if let Some(kind) = rule.kind {
        return CheckKind::Typed(kind);
    }
    if rule.pattern.is_some() {
        return CheckKind::Pattern;
    }
    let constrained = rule.len.is_some()
        || rule.min.is_some()
        || rule.max.is_some()
        || rule.enum_values.is_some()
        || rule.whitespace;
    if rule.required && !constrained {
        CheckKind::RequiredOnly
    } else {
        CheckKind::Typed(RuleType::String)
    }
}

/// Run `rule` against `value`.
pub(crate) async fn check(
    value: Option<&Value>,
    rule: &Rule,
    messages: &ValidateMessages,
    diagnostics: &Diagnostics,
) -> Result<(), CheckError> {
    let transformed;
    let value = match &rule.transform {
        Some(transform) => {
            transformed = panic::catch_unwind(AssertUnwindSafe(|| transform.apply(value)))
                .map_err(|payload| {
                    CheckError::Internal(RuleEvalError::TransformPanicked(panic_message(&*payload)))
                })?;
            transformed.as_ref()
        }
        None => value,
    };

    let errors = match &rule.validator {
        Some(validator) => run_custom(validator, rule, value, diagnostics)
            .await
            .map_err(CheckError::Internal)?,
        None => builtin(value, rule, messages),
    };

    if errors.is_empty() {
        return Ok(());
    }
    match &rule.message {
        Some(message) => Err(CheckError::Failed(vec![message.clone()])),
        None => Err(CheckError::Failed(errors)),
    }
}

// ---------------------------------------------------------------------------
// Custom validators
// ---------------------------------------------------------------------------

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

async fn run_custom(
    validator: &CustomValidator,
    rule: &Rule,
    value: Option<&Value>,
    diagnostics: &Diagnostics,
) -> Result<Vec<String>, RuleEvalError> {
    let (returned, mut receiver, returned_future) =
        panic::catch_unwind(AssertUnwindSafe(|| validator.call(rule, value, diagnostics)))
            .map_err(|payload| RuleEvalError::ValidatorPanicked(panic_message(&*payload)))?;

    match returned {
        ValidatorReturn::Future(future) => {
            returned_future.store(true, Ordering::SeqCst);
            if let Ok(Some(_)) = receiver.try_recv() {
                diagnostics.warning(
                    false,
                    "Form",
                    "validator returned a future; `callback` is ignored",
                );
            }
            let outcome = AssertUnwindSafe(future)
                .catch_unwind()
                .await
                .map_err(|payload| RuleEvalError::ValidatorPanicked(panic_message(&*payload)))?;
            Ok(match outcome {
                Ok(()) => Vec::new(),
                Err(message) if message.is_empty() => vec![" ".to_string()],
                Err(message) => vec![message],
            })
        }
        ValidatorReturn::Callback => {
            diagnostics.dev_warning(
                false,
                "Form",
                "synchronous `callback` is deprecated, return a future instead",
            );
            match receiver.await {
                Ok(Ok(())) => Ok(Vec::new()),
                Ok(Err(messages)) => Ok(messages),
                Err(_) => Err(RuleEvalError::CallbackDropped),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in checks
// ---------------------------------------------------------------------------

fn is_empty_value(value: Option<&Value>, kind: Option<RuleType>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Array(items)) => kind == Some(RuleType::Array) && items.is_empty(),
        Some(Value::String(s)) => kind.is_some_and(RuleType::is_native_string) && s.is_empty(),
        Some(_) => false,
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn is_integer(n: &serde_json::Number) -> bool {
    n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
}

/// Milliseconds since the epoch for a date-like value.
fn parse_date(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_f64().map(|f| f as i64),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.timestamp_millis());
            }
            for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S"] {
                if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
                    return Some(dt.and_utc().timestamp_millis());
                }
            }
            for format in ["%Y-%m-%d", "%Y/%m/%d"] {
                if let Ok(date) = NaiveDate::parse_from_str(s, format) {
                    return date
                        .and_hms_opt(0, 0, 0)
                        .map(|dt| dt.and_utc().timestamp_millis());
                }
            }
            None
        }
        _ => None,
    }
}

fn type_matches(kind: RuleType, value: &Value) -> bool {
    match kind {
        RuleType::String => value.is_string(),
        RuleType::Number => value.is_number(),
        RuleType::Boolean => value.is_boolean(),
        RuleType::Regexp => value.as_str().is_some_and(|s| Regex::new(s).is_ok()),
        RuleType::Integer => value.as_number().is_some_and(is_integer),
        RuleType::Float => value.as_number().is_some_and(|n| !is_integer(n)),
        RuleType::Array => value.is_array(),
        RuleType::Object => value.is_object(),
        RuleType::Date => parse_date(value).is_some(),
        RuleType::Email => value.as_str().is_some_and(|s| EMAIL.is_match(s)),
        RuleType::Url => value.as_str().is_some_and(|s| URL.is_match(s)),
        RuleType::Hex => value.as_str().is_some_and(|s| HEX.is_match(s)),
        RuleType::Enum | RuleType::Any => true,
    }
}

struct Checks<'a> {
    rule: &'a Rule,
    messages: &'a ValidateMessages,
    errors: Vec<String>,
}

impl Checks<'_> {
    fn push(&mut self, template: &str) {
        self.errors.push(self.messages.template(template));
    }

    fn required(&mut self, value: Option<&Value>, kind: Option<RuleType>) {
        if self.rule.required && is_empty_value(value, kind) {
            self.push("required");
        }
    }

    fn kind(&mut self, kind: RuleType, value: &Value) {
        if !type_matches(kind, value) {
            self.push(&format!("types.{kind}"));
        }
    }

    fn range_of(&mut self, group: &str, measured: f64) {
        let (len, min, max) = (self.rule.len, self.rule.min, self.rule.max);
        if let Some(len) = len {
            if measured != len {
                self.push(&format!("{group}.len"));
            }
            return;
        }
        match (min, max) {
            (Some(min), None) if measured < min => self.push(&format!("{group}.min")),
            (None, Some(max)) if measured > max => self.push(&format!("{group}.max")),
            (Some(min), Some(max)) if measured < min || measured > max => {
                self.push(&format!("{group}.range"));
            }
            _ => {}
        }
    }

    fn range(&mut self, value: &Value) {
        match value {
            Value::Number(n) => {
                if let Some(n) = n.as_f64() {
                    self.range_of("number", n);
                }
            }
            Value::String(s) => self.range_of("string", s.chars().count() as f64),
            Value::Array(items) => self.range_of("array", items.len() as f64),
            _ => {}
        }
    }

    fn pattern(&mut self, value: &Value) {
        if let Some(pattern) = &self.rule.pattern {
            let text = display_value(value);
            if !pattern.is_match(&text) {
                self.push("pattern.mismatch");
            }
        }
    }

    fn whitespace(&mut self, value: &Value) {
        if self.rule.whitespace && value.as_str().is_some_and(|s| s.trim().is_empty()) {
            self.push("whitespace");
        }
    }

    fn one_of(&mut self, value: &Value) {
        let allowed = self.rule.enum_values.as_deref().unwrap_or_default();
        if !allowed.iter().any(|candidate| loose_eq(candidate, value)) {
            self.push("enum");
        }
    }
}

fn builtin(value: Option<&Value>, rule: &Rule, messages: &ValidateMessages) -> Vec<String> {
    let mut checks = Checks {
        rule,
        messages,
        errors: Vec::new(),
    };

    let kind = match check_kind(rule) {
        CheckKind::RequiredOnly => {
            let inferred = match value {
                Some(Value::Array(_)) => Some(RuleType::Array),
                Some(Value::String(_)) => Some(RuleType::String),
                _ => None,
            };
            checks.required(value, inferred);
            return checks.errors;
        }
        CheckKind::Pattern => {
            if is_empty_value(value, Some(RuleType::String)) && !rule.required {
                return checks.errors;
            }
            checks.required(value, Some(RuleType::String));
            if let Some(v) = value.filter(|v| !is_empty_value(Some(v), Some(RuleType::String))) {
                checks.pattern(v);
            }
            return checks.errors;
        }
        CheckKind::Typed(kind) => kind,
    };

    // Numeric inputs commonly arrive as "" from empty text boxes.
    let value = match (kind, value) {
        (RuleType::Number | RuleType::Integer | RuleType::Float, Some(Value::String(s)))
            if s.is_empty() =>
        {
            None
        }
        _ => value,
    };

    if is_empty_value(value, Some(kind)) && !rule.required {
        return checks.errors;
    }
    checks.required(value, Some(kind));

    let Some(present) = value.filter(|v| !is_empty_value(Some(v), Some(kind))) else {
        return checks.errors;
    };

    match kind {
        RuleType::String => {
            checks.kind(kind, present);
            checks.range(present);
            checks.pattern(present);
            checks.whitespace(present);
        }
        RuleType::Number | RuleType::Integer | RuleType::Float | RuleType::Array => {
            checks.kind(kind, present);
            checks.range(present);
        }
        RuleType::Date => {
            checks.kind(kind, present);
            if let Some(millis) = parse_date(present) {
                checks.range_of("number", millis as f64);
            }
        }
        RuleType::Enum => checks.one_of(present),
        RuleType::Any => {}
        RuleType::Boolean
        | RuleType::Regexp
        | RuleType::Object
        | RuleType::Email
        | RuleType::Url
        | RuleType::Hex => checks.kind(kind, present),
    }
    checks.errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(rule: &Rule, value: Value) -> Vec<String> {
        builtin(Some(&value), rule, &ValidateMessages::defaults())
    }

    fn run_absent(rule: &Rule) -> Vec<String> {
        builtin(None, rule, &ValidateMessages::defaults())
    }

    // -- required --

    #[test]
    fn required_only_rule_checks_presence() {
        let rule = Rule::required();
        assert_eq!(run_absent(&rule), vec!["'${name}' is required!"]);
        assert!(run(&rule, json!(0)).is_empty(), "any present value passes");
        assert_eq!(run(&rule, Value::Null), vec!["'${name}' is required!"]);
        assert_eq!(run(&rule, json!("")), vec!["'${name}' is required!"]);
        assert_eq!(run(&rule, json!([])), vec!["'${name}' is required!"]);
    }

    #[test]
    fn required_string_rejects_empty_string() {
        let rule = Rule::required().kind(RuleType::String);
        assert_eq!(run(&rule, json!("")), vec!["'${name}' is required!"]);
    }

    #[test]
    fn required_array_rejects_empty_array() {
        let rule = Rule::required().kind(RuleType::Array);
        assert_eq!(run(&rule, json!([])), vec!["'${name}' is required!"]);
    }

    #[test]
    fn optional_empty_value_skips_checks() {
        let rule = Rule::new().kind(RuleType::Email);
        assert!(run_absent(&rule).is_empty());
        assert!(run(&rule, json!("")).is_empty());
    }

    // -- types --

    #[test]
    fn untyped_rule_checks_as_string() {
        let rule = Rule::new().min(2.0);
        assert_eq!(run(&rule, json!(5)), vec!["'${name}' is not a valid ${type}!"]);
        assert!(run(&rule, json!("ab")).is_empty());
    }

    #[test]
    fn number_type_and_bounds() {
        let rule = Rule::new().kind(RuleType::Number).min(18.0);
        assert_eq!(run(&rule, json!(10)), vec!["'${name}' must be at least ${min}!"]);
        assert!(run(&rule, json!(18)).is_empty());
        assert_eq!(run(&rule, json!("x")), vec!["'${name}' is not a valid ${type}!"]);
    }

    #[test]
    fn empty_string_number_counts_as_absent() {
        let rule = Rule::new().kind(RuleType::Number);
        assert!(run(&rule, json!("")).is_empty());
        let required = Rule::required().kind(RuleType::Number);
        assert_eq!(run(&required, json!("")), vec!["'${name}' is required!"]);
    }

    #[test]
    fn integer_and_float_are_disjoint() {
        let int = Rule::new().kind(RuleType::Integer);
        let float = Rule::new().kind(RuleType::Float);
        assert!(run(&int, json!(3)).is_empty());
        assert!(!run(&int, json!(3.5)).is_empty());
        assert!(run(&float, json!(3.5)).is_empty());
        assert!(!run(&float, json!(3)).is_empty());
    }

    #[test]
    fn string_types() {
        let email = Rule::new().kind(RuleType::Email);
        assert!(run(&email, json!("a@b.io")).is_empty());
        assert!(!run(&email, json!("not-an-email")).is_empty());

        let url = Rule::new().kind(RuleType::Url);
        assert!(run(&url, json!("https://example.com/a?b=1")).is_empty());
        assert!(!run(&url, json!("example")).is_empty());

        let hex = Rule::new().kind(RuleType::Hex);
        assert!(run(&hex, json!("#fff")).is_empty());
        assert!(run(&hex, json!("A0B1C2")).is_empty());
        assert!(!run(&hex, json!("#ggg")).is_empty());
    }

    #[test]
    fn date_accepts_common_formats() {
        let rule = Rule::new().kind(RuleType::Date);
        assert!(run(&rule, json!("2024-02-29")).is_empty());
        assert!(run(&rule, json!("2024-02-29T10:00:00Z")).is_empty());
        assert!(run(&rule, json!(1_700_000_000_000_i64)).is_empty());
        assert_eq!(run(&rule, json!("someday")), vec!["'${name}' is not a valid ${type}!"]);
    }

    // -- range --

    #[test]
    fn string_length_counts_chars() {
        let rule = Rule::new().kind(RuleType::String).len(2.0);
        assert!(run(&rule, json!("你好")).is_empty());
        assert_eq!(
            run(&rule, json!("abc")),
            vec!["'${name}' must be exactly ${len} characters!"]
        );
    }

    #[test]
    fn min_and_max_report_range() {
        let rule = Rule::new().kind(RuleType::Array).min(1.0).max(2.0);
        assert_eq!(
            run(&rule, json!([1, 2, 3])),
            vec!["'${name}' must contain between ${min} and ${max} items!"]
        );
        assert!(run(&rule, json!([1])).is_empty());
    }

    #[test]
    fn max_only() {
        let rule = Rule::new().kind(RuleType::Number).max(5.0);
        assert_eq!(run(&rule, json!(6)), vec!["'${name}' cannot be greater than ${max}!"]);
    }

    // -- enum, pattern, whitespace --

    #[test]
    fn enum_membership() {
        let rule = Rule::new()
            .kind(RuleType::Enum)
            .one_of([json!("red"), json!(1)]);
        assert!(run(&rule, json!("red")).is_empty());
        assert!(run(&rule, json!(1.0)).is_empty(), "numbers compare by value");
        assert_eq!(run(&rule, json!("blue")), vec!["'${name}' must be one of [${enum}]!"]);
    }

    #[test]
    fn pattern_without_type() {
        let rule = Rule::new().pattern(Regex::new(r"^\d+$").unwrap());
        assert!(run(&rule, json!("123")).is_empty());
        assert_eq!(
            run(&rule, json!("12a")),
            vec!["'${name}' does not match pattern ${pattern}!"]
        );
        assert!(run_absent(&rule).is_empty());
    }

    #[test]
    fn whitespace_only_string_rejected() {
        let rule = Rule::new().kind(RuleType::String).whitespace(true);
        assert_eq!(run(&rule, json!("   ")), vec!["'${name}' cannot be empty!"]);
        assert!(run(&rule, json!(" a ")).is_empty());
    }

    // -- check(): transform, message override, custom validators --

    fn block_on_check(rule: &Rule, value: Option<&Value>) -> Result<(), CheckError> {
        futures::executor::block_on(check(
            value,
            rule,
            &ValidateMessages::defaults(),
            &Diagnostics::silent(),
        ))
    }

    fn failed(result: Result<(), CheckError>) -> Vec<String> {
        match result {
            Err(CheckError::Failed(errors)) => errors,
            other => panic!("expected a rule failure, got {other:?}"),
        }
    }

    #[test]
    fn transform_runs_before_checks() {
        let rule = Rule::new()
            .kind(RuleType::Number)
            .transform(crate::rule::Transform::new(|v| {
                v.and_then(Value::as_str)
                    .and_then(|s| s.parse::<f64>().ok())
                    .map(|n| json!(n))
            }));
        assert!(block_on_check(&rule, Some(&json!("42"))).is_ok());
    }

    #[test]
    fn rule_message_replaces_all_errors() {
        let rule = Rule::required().kind(RuleType::String).message("fill ${name} in");
        assert_eq!(failed(block_on_check(&rule, None)), vec!["fill ${name} in"]);
    }

    #[test]
    fn custom_future_rejection_becomes_error() {
        let rule = Rule::custom(CustomValidator::future(|_, _| async {
            Err("nope".to_string())
        }));
        assert_eq!(failed(block_on_check(&rule, None)), vec!["nope"]);
    }

    #[test]
    fn custom_future_empty_rejection_is_blank_message() {
        let rule = Rule::custom(CustomValidator::future(|_, _| async { Err(String::new()) }));
        assert_eq!(failed(block_on_check(&rule, None)), vec![" "]);
    }

    #[test]
    fn custom_callback_completes_rule() {
        let pass = Rule::custom(CustomValidator::callback(|_, _, cb| cb.ok()));
        assert!(block_on_check(&pass, None).is_ok());

        let fail = Rule::custom(CustomValidator::callback(|_, _, cb| {
            cb.errors(vec!["a".into(), "b".into()]);
        }));
        assert_eq!(failed(block_on_check(&fail, None)), vec!["a", "b"]);
    }

    #[test]
    fn custom_validator_replaces_builtin_checks() {
        let rule = Rule::required()
            .kind(RuleType::Number)
            .validator(CustomValidator::future(|_, _| async { Ok(()) }));
        assert!(block_on_check(&rule, None).is_ok());
    }

    #[test]
    fn dropped_callback_is_internal_error() {
        let rule = Rule::custom(CustomValidator::callback(|_, _, _cb| {}));
        assert!(matches!(
            block_on_check(&rule, None),
            Err(CheckError::Internal(RuleEvalError::CallbackDropped))
        ));
    }

    #[test]
    fn panicking_validator_is_internal_error() {
        let rule = Rule::custom(CustomValidator::new(|_, _, _| panic!("validator bug")));
        match block_on_check(&rule, None) {
            Err(CheckError::Internal(RuleEvalError::ValidatorPanicked(message))) => {
                assert_eq!(message, "validator bug");
            }
            other => panic!("expected a panic report, got {other:?}"),
        }
    }

    #[test]
    fn panicking_transform_is_internal_error() {
        let rule = Rule::new()
            .kind(RuleType::Number)
            .transform(crate::rule::Transform::new(|_| panic!("transform bug")));
        match block_on_check(&rule, Some(&json!(1))) {
            Err(CheckError::Internal(RuleEvalError::TransformPanicked(message))) => {
                assert_eq!(message, "transform bug");
            }
            other => panic!("expected a panic report, got {other:?}"),
        }
    }

    #[test]
    fn callback_style_emits_deprecation_once() {
        let diagnostics = Diagnostics::new(xe_utils::DiagnosticsMode::Development);
        let rule = Rule::custom(CustomValidator::callback(|_, _, cb| cb.ok()));
        for _ in 0..2 {
            let result = futures::executor::block_on(check(
                None,
                &rule,
                &ValidateMessages::defaults(),
                &diagnostics,
            ));
            assert!(result.is_ok());
        }
        assert_eq!(
            diagnostics.emitted(),
            vec![
                "Warning: [xiaoe-uni-ui: Form] synchronous `callback` is deprecated, return a future instead"
                    .to_string()
            ]
        );
    }

    #[test]
    fn callback_called_alongside_future_warns() {
        let diagnostics = Diagnostics::new(xe_utils::DiagnosticsMode::Development);
        let rule = Rule::custom(CustomValidator::new(|_, _, cb| {
            cb.error("from callback");
            ValidatorReturn::Future(Box::pin(async { Ok(()) }))
        }));
        let result = futures::executor::block_on(check(
            None,
            &rule,
            &ValidateMessages::defaults(),
            &diagnostics,
        ));
        assert!(result.is_ok(), "the future decides the outcome");
        assert_eq!(diagnostics.emitted().len(), 1);
    }
}
