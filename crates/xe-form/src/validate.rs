#![forbid(unsafe_code)]

//! Rule orchestration.
//!
//! [`validate_rule`] evaluates one rule and renders its messages;
//! [`validate_rules`] runs a field's rules under a [`ValidateMode`] and
//! reports the failing ones.
//!
//! # Ordering
//!
//! Rules are ordered by `(warning_only, declared index)` before they run, so
//! blocking rules always come first and each group keeps its declared order.

use std::collections::HashMap;
use std::fmt;

use futures::future::{BoxFuture, FutureExt, join_all};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use xe_utils::Diagnostics;

use crate::checker::{CheckError, check};
use crate::messages::{ValidateMessages, render_template};
use crate::name_path::NamePath;
use crate::rule::{Rule, RuleType};

// ---------------------------------------------------------------------------
// ValidateMode
// ---------------------------------------------------------------------------

/// How a field's rules are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidateMode {
    /// One rule at a time; stop at the first failure.
    Sequential,
    /// All rules at once; report the first failure to finish.
    #[serde(alias = "parallel")]
    ParallelFirst,
    /// All rules at once; report every failure.
    #[default]
    ParallelAll,
}

impl ValidateMode {
    /// The mode's configuration name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::ParallelFirst => "parallel-first",
            Self::ParallelAll => "parallel-all",
        }
    }
}

impl fmt::Display for ValidateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<bool> for ValidateMode {
    /// `true` is the legacy spelling of sequential validation.
    fn from(validate_first: bool) -> Self {
        if validate_first {
            Self::Sequential
        } else {
            Self::ParallelAll
        }
    }
}

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

/// Per-call validation options.
#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    /// Only rules listening on this trigger run; `None` runs every rule.
    pub trigger_name: Option<String>,
    /// Template overrides merged over the defaults.
    pub validate_messages: Option<ValidateMessages>,
    /// Substitutions that win over everything derived from the rule.
    pub message_variables: HashMap<String, String>,
    pub diagnostics: Diagnostics,
}

impl ValidateOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn trigger(mut self, trigger_name: impl Into<String>) -> Self {
        self.trigger_name = Some(trigger_name.into());
        self
    }

    #[must_use]
    pub fn messages(mut self, messages: ValidateMessages) -> Self {
        self.validate_messages = Some(messages);
        self
    }

    #[must_use]
    pub fn variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.message_variables.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }
}

/// Messages produced by one rule.
#[derive(Debug, Clone)]
pub struct RuleError {
    pub rule: Rule,
    /// Position of the rule in the list it was declared in.
    pub rule_index: usize,
    pub errors: Vec<String>,
}

/// Pair rules with their declared index and order them for execution.
#[must_use]
pub fn ordered_rules(rules: &[Rule]) -> Vec<(usize, &Rule)> {
    let mut ordered: Vec<_> = rules.iter().enumerate().collect();
    // Stable: declared order survives inside each group.
    ordered.sort_by_key(|(_, rule)| rule.warning_only);
    ordered
}

// ---------------------------------------------------------------------------
// Single rule
// ---------------------------------------------------------------------------

fn substitutions(name: &str, rule: &Rule, options: &ValidateOptions) -> HashMap<String, String> {
    let mut vars = rule.template_vars();
    vars.entry("type".to_string())
        .or_insert_with(|| RuleType::String.to_string());
    vars.insert("name".to_string(), name.to_string());
    vars.insert("enum".to_string(), rule.joined_enum());
    vars.extend(
        options
            .message_variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    vars
}

/// Validate `value` against one rule, returning rendered messages.
///
/// Never fails: a validator that panics or abandons its callback is logged
/// and reported with the `default` message. For array rules with a
/// `default_field`, a passing array has each element checked under the name
/// `{name}.{index}`, and the element messages are returned instead.
pub fn validate_rule<'a>(
    name: &'a str,
    value: Option<&'a Value>,
    rule: &'a Rule,
    options: &'a ValidateOptions,
) -> BoxFuture<'a, Vec<String>> {
    async move {
        let messages = ValidateMessages::defaults().merged(options.validate_messages.as_ref());
        let errors = match check(value, rule, &messages, &options.diagnostics).await {
            Ok(()) => Vec::new(),
            Err(CheckError::Failed(errors)) => errors,
            Err(CheckError::Internal(err)) => {
                options
                    .diagnostics
                    .error(&format!("rule on `{name}` could not be evaluated: {err}"));
                vec![messages.default_message()]
            }
        };

        let element_rule = rule
            .default_field
            .as_deref()
            .filter(|_| rule.kind == Some(RuleType::Array));
        if errors.is_empty() {
            if let (Some(element_rule), Some(Value::Array(items))) = (element_rule, value) {
                let nested = join_all(items.iter().enumerate().map(|(i, item)| async move {
                    let element_name = format!("{name}.{i}");
                    validate_rule(&element_name, Some(item), element_rule, options).await
                }))
                .await;
                return nested.into_iter().flatten().collect();
            }
        }

        let vars = substitutions(name, rule, options);
        errors
            .iter()
            .map(|template| render_template(template, &vars))
            .collect()
    }
    .boxed()
}

// ---------------------------------------------------------------------------
// Rule list
// ---------------------------------------------------------------------------

async fn run_rule(
    name: &str,
    value: Option<&Value>,
    rule_index: usize,
    rule: &Rule,
    options: &ValidateOptions,
) -> RuleError {
    RuleError {
        rule: rule.clone(),
        rule_index,
        errors: validate_rule(name, value, rule, options).await,
    }
}

/// Validate `value` against every rule of the field at `name_path`.
///
/// Rules not listening on `options.trigger_name` are skipped. Returns
/// `Ok(())` when nothing failed, otherwise the failing rules:
///
/// - [`ValidateMode::Sequential`]: just the first failing rule; later rules
///   never start.
/// - [`ValidateMode::ParallelFirst`]: the first failure to complete; rules
///   still pending are dropped.
/// - [`ValidateMode::ParallelAll`]: every failing rule, in execution order.
pub async fn validate_rules(
    name_path: &NamePath,
    value: Option<&Value>,
    rules: &[Rule],
    options: &ValidateOptions,
    mode: ValidateMode,
) -> Result<(), Vec<RuleError>> {
    let name = name_path.to_string();
    let name = name.as_str();
    let trigger = options.trigger_name.as_deref();
    let ordered: Vec<_> = ordered_rules(rules)
        .into_iter()
        .filter(|(_, rule)| rule.runs_on(trigger))
        .collect();

    xe_utils::debug!(
        target: "xe_form",
        field = name,
        mode = mode.as_str(),
        rules = ordered.len(),
        "validating field"
    );

    let failures: Vec<RuleError> = match mode {
        ValidateMode::Sequential => {
            let mut failures = Vec::new();
            for (rule_index, rule) in ordered {
                let result = run_rule(name, value, rule_index, rule, options).await;
                if !result.errors.is_empty() {
                    failures.push(result);
                    break;
                }
            }
            failures
        }
        ValidateMode::ParallelFirst => {
            let mut pending: FuturesUnordered<_> = ordered
                .into_iter()
                .map(|(rule_index, rule)| run_rule(name, value, rule_index, rule, options))
                .collect();
            let mut failures = Vec::new();
            while let Some(result) = pending.next().await {
                if !result.errors.is_empty() {
                    failures.push(result);
                    break;
                }
            }
            failures
        }
        ValidateMode::ParallelAll => join_all(
            ordered
                .into_iter()
                .map(|(rule_index, rule)| run_rule(name, value, rule_index, rule, options)),
        )
        .await
        .into_iter()
        .filter(|result| !result.errors.is_empty())
        .collect(),
    };

    xe_utils::debug!(
        target: "xe_form",
        field = name,
        failed = failures.len(),
        "field validated"
    );

    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::CustomValidator;
    use futures::executor::block_on;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn options() -> ValidateOptions {
        ValidateOptions::new().diagnostics(Diagnostics::silent())
    }

    fn counting_failure(counter: &Arc<AtomicUsize>, message: &'static str) -> Rule {
        let counter = Arc::clone(counter);
        Rule::custom(CustomValidator::future(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Err(message.to_string()) }
        }))
    }

    // -- ordering --

    #[test]
    fn warning_only_rules_sort_last() {
        let rules = vec![Rule::new().warning_only(true), Rule::required()];
        let order: Vec<usize> = ordered_rules(&rules).into_iter().map(|(i, _)| i).collect();
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn ordering_is_stable_within_groups() {
        let rules = vec![
            Rule::new().warning_only(true),
            Rule::required(),
            Rule::new().warning_only(true),
            Rule::required(),
        ];
        let order: Vec<usize> = ordered_rules(&rules).into_iter().map(|(i, _)| i).collect();
        assert_eq!(order, vec![1, 3, 0, 2]);
    }

    // -- mode config --

    #[test]
    fn mode_names_and_legacy_bool() {
        let parsed: ValidateMode = serde_json::from_str(r#""parallel-first""#).unwrap();
        assert_eq!(parsed, ValidateMode::ParallelFirst);
        assert_eq!(ValidateMode::from(true), ValidateMode::Sequential);
        assert_eq!(ValidateMode::from(false), ValidateMode::ParallelAll);
        assert_eq!(ValidateMode::default(), ValidateMode::ParallelAll);
    }

    // -- validate_rule --

    #[test]
    fn messages_are_rendered() {
        let rule = Rule::new().kind(RuleType::Number).min(18.0);
        let errors = block_on(validate_rule("age", Some(&json!(10)), &rule, &options()));
        assert_eq!(errors, vec!["'age' must be at least 18!"]);
    }

    #[test]
    fn message_variables_win() {
        let rule = Rule::required();
        let opts = options().variable("name", "Your age");
        let errors = block_on(validate_rule("age", None, &rule, &opts));
        assert_eq!(errors, vec!["'Your age' is required!"]);
    }

    #[test]
    fn untyped_type_failure_names_string() {
        let rule = Rule::new().min(1.0);
        let errors = block_on(validate_rule("nick", Some(&json!(3)), &rule, &options()));
        assert_eq!(errors, vec!["'nick' is not a valid string!"]);
    }

    #[test]
    fn enum_values_are_joined() {
        let rule = Rule::new()
            .kind(RuleType::Enum)
            .one_of([json!("a"), json!("b")]);
        let errors = block_on(validate_rule("pick", Some(&json!("c")), &rule, &options()));
        assert_eq!(errors, vec!["'pick' must be one of [a, b]!"]);
    }

    #[test]
    fn custom_message_overrides() {
        let opts = options().messages(ValidateMessages::empty().with("required", "${name}?"));
        let errors = block_on(validate_rule("email", None, &Rule::required(), &opts));
        assert_eq!(errors, vec!["email?"]);
    }

    #[test]
    fn array_elements_checked_by_default_field() {
        let rule = Rule::new()
            .kind(RuleType::Array)
            .default_field(Rule::new().kind(RuleType::Number));
        let errors = block_on(validate_rule(
            "list",
            Some(&json!([1, "x", 3])),
            &rule,
            &options(),
        ));
        assert_eq!(errors, vec!["'list.1' is not a valid number!"]);
    }

    #[test]
    fn failing_array_skips_element_checks() {
        let rule = Rule::new()
            .kind(RuleType::Array)
            .min(5.0)
            .default_field(Rule::new().kind(RuleType::Number));
        let errors = block_on(validate_rule("list", Some(&json!(["x"])), &rule, &options()));
        assert_eq!(errors, vec!["'list' must contain at least 5 items!"]);
    }

    #[test]
    fn internal_failure_uses_default_message() {
        let diagnostics = Diagnostics::silent();
        let rule = Rule::custom(CustomValidator::callback(|_, _, _cb| {}));
        let opts = options().diagnostics(diagnostics.clone());
        let errors = block_on(validate_rule("x", None, &rule, &opts));
        assert_eq!(errors, vec!["Validation error on field 'x'!"]);
        assert_eq!(
            diagnostics.emitted().len(),
            1,
            "internal failures are reported even in production"
        );
    }

    #[test]
    fn panicking_transform_fails_the_rule() {
        let diagnostics = Diagnostics::silent();
        let rule = Rule::new()
            .kind(RuleType::Number)
            .transform(crate::rule::Transform::new(|_| panic!("transform bug")));
        let opts = options().diagnostics(diagnostics.clone());
        let failures = block_on(validate_rules(
            &"f".into(),
            Some(&json!(1)),
            &[rule],
            &opts,
            ValidateMode::ParallelAll,
        ))
        .unwrap_err();
        assert_eq!(failures[0].errors, vec!["Validation error on field 'f'!"]);
        assert_eq!(
            diagnostics.emitted(),
            vec!["Error: rule on `f` could not be evaluated: value transform panicked: transform bug".to_string()]
        );
    }

    // -- validate_rules --

    #[test]
    fn success_is_ok() {
        let rules = vec![Rule::required(), Rule::new().kind(RuleType::Number)];
        let result = block_on(validate_rules(
            &"age".into(),
            Some(&json!(20)),
            &rules,
            &options(),
            ValidateMode::ParallelAll,
        ));
        assert!(result.is_ok());
    }

    #[test]
    fn sequential_stops_at_first_failure() {
        let counter = Arc::new(AtomicUsize::new(0));
        let rules = vec![
            counting_failure(&counter, "first"),
            counting_failure(&counter, "second"),
        ];
        let failures = block_on(validate_rules(
            &"f".into(),
            None,
            &rules,
            &options(),
            ValidateMode::Sequential,
        ))
        .unwrap_err();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].errors, vec!["first"]);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "second rule never ran");
    }

    #[test]
    fn parallel_all_reports_only_failures() {
        let rules = vec![
            Rule::new().kind(RuleType::Number),
            Rule::new().kind(RuleType::Number).max(3.0),
            Rule::new().kind(RuleType::Number).min(10.0),
        ];
        let failures = block_on(validate_rules(
            &"n".into(),
            Some(&json!(5)),
            &rules,
            &options(),
            ValidateMode::ParallelAll,
        ))
        .unwrap_err();
        let indices: Vec<usize> = failures.iter().map(|f| f.rule_index).collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn trigger_filters_rules() {
        let rules = vec![
            Rule::required().trigger("blur"),
            Rule::new().kind(RuleType::Number).trigger("change"),
        ];
        let opts = options().trigger("change");
        let result = block_on(validate_rules(
            &"n".into(),
            None,
            &rules,
            &opts,
            ValidateMode::ParallelAll,
        ));
        assert!(result.is_ok(), "required rule listens on blur only");
    }
}
