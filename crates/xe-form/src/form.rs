#![forbid(unsafe_code)]

//! The form container.
//!
//! A [`Form`] owns the value store, the registered fields and their
//! metadata. Every value update replaces the store with a new version; see
//! [`crate::value`]. Validation runs are versioned with [`ValidationToken`]s:
//! a run that completes after a newer run started has its field results
//! discarded and reports [`ValidateErrorEntity::out_of_date`].
//!
//! # Example
//!
//! ```rust
//! use futures::executor::block_on;
//! use serde_json::json;
//! use xe_form::{FieldSpec, Form, FormConfig, Rule, RuleType, ValidateOptions, name_path};
//!
//! let form = Form::new(FormConfig::default()).with_initial_values(json!({"user": {"age": 10}}));
//! form.add_field(
//!     FieldSpec::new(name_path!["user", "age"]).rule(Rule::new().kind(RuleType::Number).min(18.0)),
//! );
//!
//! let rejected = block_on(form.validate_fields(None, ValidateOptions::new())).unwrap_err();
//! assert_eq!(rejected.error_fields[0].errors, vec!["'user.age' must be at least 18!"]);
//!
//! form.set_field_value(name_path!["user", "age"], json!(30));
//! let values = block_on(form.validate_fields(None, ValidateOptions::new())).unwrap();
//! assert_eq!(values, json!({"user": {"age": 30}}));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use xe_utils::{Diagnostics, DiagnosticsMode};

use crate::aggregate::await_all;
use crate::context::{FieldRegistry, FieldToken, lock};
use crate::error::{FieldError, FormError, ValidateErrorEntity};
use crate::messages::ValidateMessages;
use crate::name_path::{NamePath, contains_name_path, match_name_path};
use crate::rule::Rule;
use crate::validate::{ValidateMode, ValidateOptions, validate_rules};
use crate::value::{clone_by_name_path_list, get_value, merge_stores, set_value};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum ModeRepr {
    Flag(bool),
    Mode(ValidateMode),
}

fn de_validate_mode<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ValidateMode, D::Error> {
    Ok(match ModeRepr::deserialize(deserializer)? {
        ModeRepr::Flag(flag) => flag.into(),
        ModeRepr::Mode(mode) => mode,
    })
}

fn de_diagnostics_mode<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DiagnosticsMode>, D::Error> {
    Option::<String>::deserialize(deserializer)?
        .map(|name| {
            DiagnosticsMode::parse(&name)
                .ok_or_else(|| D::Error::custom(format!("unknown diagnostics mode `{name}`")))
        })
        .transpose()
}

/// Form-wide settings.
///
/// Deserializes from the camelCase JSON form:
///
/// ```json
/// { "validateMessages": { "required": "..." }, "validateFirst": "parallel-first", "diagnostics": "production" }
/// ```
///
/// `validateFirst` also accepts a boolean (`true` is sequential).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FormConfig {
    /// Template overrides applied to every validation of this form.
    pub validate_messages: Option<ValidateMessages>,
    /// Scheduling for fields that do not choose their own.
    #[serde(deserialize_with = "de_validate_mode")]
    pub validate_first: ValidateMode,
    /// Diagnostics mode; `None` reads `XE_UI_ENV`.
    #[serde(deserialize_with = "de_diagnostics_mode")]
    pub diagnostics: Option<DiagnosticsMode>,
}

impl FormConfig {
    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, FormError> {
        Ok(serde_json::from_str(json)?)
    }
}

// ---------------------------------------------------------------------------
// Fields
// ---------------------------------------------------------------------------

/// What a field registers with its form.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: NamePath,
    pub rules: Vec<Rule>,
    /// Overrides [`FormConfig::validate_first`] for this field.
    pub validate_first: Option<ValidateMode>,
    /// Substitutions for this field's messages, e.g. a display label.
    pub message_variables: HashMap<String, String>,
}

impl FieldSpec {
    #[must_use]
    pub fn new(name: impl Into<NamePath>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
            validate_first: None,
            message_variables: HashMap::new(),
        }
    }

    #[must_use]
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    #[must_use]
    pub fn rules(mut self, rules: impl IntoIterator<Item = Rule>) -> Self {
        self.rules.extend(rules);
        self
    }

    #[must_use]
    pub fn validate_first(mut self, mode: impl Into<ValidateMode>) -> Self {
        self.validate_first = Some(mode.into());
        self
    }

    #[must_use]
    pub fn variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.message_variables.insert(key.into(), value.into());
        self
    }
}

/// Interaction and validation state of one field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMeta {
    pub name: NamePath,
    /// The user changed the value.
    pub touched: bool,
    /// A validation run is in flight.
    pub validating: bool,
    pub errors: Vec<String>,
    /// Failures of warning-only rules.
    pub warnings: Vec<String>,
}

impl FieldMeta {
    #[must_use]
    pub fn new(name: NamePath) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    fn reset(&mut self) {
        *self = Self::new(std::mem::take(&mut self.name));
    }
}

// ---------------------------------------------------------------------------
// ValidationToken
// ---------------------------------------------------------------------------

/// Version of a validation run. Later runs carry larger tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValidationToken(u64);

impl ValidationToken {
    /// No run has started.
    pub const NONE: Self = Self(0);

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ValidationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Form
// ---------------------------------------------------------------------------

type OnValidate = Arc<dyn Fn(&NamePath, bool, &[String]) + Send + Sync>;

struct FormState {
    store: Value,
    initial: Value,
    fields: FieldRegistry<FieldSpec>,
    metas: HashMap<FieldToken, FieldMeta>,
    /// Latest run that touched each field.
    runs: HashMap<FieldToken, ValidationToken>,
    next_token: u64,
    last_validate: ValidationToken,
    on_validate: Option<OnValidate>,
}

impl FormState {
    fn issue_token(&mut self) -> ValidationToken {
        self.next_token += 1;
        ValidationToken(self.next_token)
    }

    fn selected(&self, names: Option<&[NamePath]>) -> Vec<(FieldToken, FieldSpec)> {
        self.fields
            .iter()
            .filter(|(_, spec)| names.is_none_or(|names| contains_name_path(names, &spec.name)))
            .map(|(token, spec)| (token, spec.clone()))
            .collect()
    }

    fn metas_named<'a>(
        &'a mut self,
        names: Option<&'a [NamePath]>,
    ) -> impl Iterator<Item = &'a mut FieldMeta> + 'a {
        self.metas
            .values_mut()
            .filter(move |meta| names.is_none_or(|names| contains_name_path(names, &meta.name)))
    }
}

struct FieldJob {
    token: FieldToken,
    spec: FieldSpec,
    value: Option<Value>,
}

/// Shared handle to a form. Clones refer to the same form.
#[derive(Clone)]
pub struct Form {
    state: Arc<Mutex<FormState>>,
    config: Arc<FormConfig>,
    diagnostics: Diagnostics,
}

impl fmt::Debug for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Form")
            .field("store", &state.store)
            .field("fields", &state.fields.len())
            .field("last_validate", &state.last_validate)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Form {
    /// An empty form.
    #[must_use]
    pub fn new(config: FormConfig) -> Self {
        let mode = config.diagnostics.unwrap_or_else(DiagnosticsMode::from_env);
        Self {
            state: Arc::new(Mutex::new(FormState {
                store: Value::Object(serde_json::Map::new()),
                initial: Value::Object(serde_json::Map::new()),
                fields: FieldRegistry::new(),
                metas: HashMap::new(),
                runs: HashMap::new(),
                next_token: 0,
                last_validate: ValidationToken::NONE,
                on_validate: None,
            })),
            config: Arc::new(config),
            diagnostics: Diagnostics::new(mode),
        }
    }

    /// Set the values [`Form::reset_fields`] returns to, and start from them.
    #[must_use]
    pub fn with_initial_values(self, initial: Value) -> Self {
        {
            let mut state = self.lock();
            state.store = initial.clone();
            state.initial = initial;
        }
        self
    }

    fn lock(&self) -> MutexGuard<'_, FormState> {
        lock(&self.state)
    }

    #[must_use]
    pub fn config(&self) -> &FormConfig {
        &self.config
    }

    /// The form's diagnostics sink; its dedup set lives as long as the form.
    #[must_use]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Call `callback(name, ok, errors)` whenever a field finishes validating.
    pub fn set_on_validate<F>(&self, callback: F)
    where
        F: Fn(&NamePath, bool, &[String]) + Send + Sync + 'static,
    {
        self.lock().on_validate = Some(Arc::new(callback));
    }

    // -- registration --

    /// Register a field; it stays registered until [`Form::remove_field`].
    pub fn add_field(&self, spec: FieldSpec) -> FieldToken {
        let token = FieldToken::new();
        let mut state = self.lock();
        state.metas.insert(token, FieldMeta::new(spec.name.clone()));
        state.fields.add_field(token, spec);
        xe_utils::trace!(target: "xe_form", %token, "field added");
        token
    }

    /// Unregister a field. Its value stays in the store.
    pub fn remove_field(&self, token: FieldToken) -> Result<FieldSpec, FormError> {
        let mut state = self.lock();
        state.metas.remove(&token);
        state.runs.remove(&token);
        let removed = state
            .fields
            .remove_field(token)
            .ok_or(FormError::UnknownField(token))?;
        xe_utils::trace!(target: "xe_form", %token, "field removed");
        Ok(removed)
    }

    /// Registered fields in registration order.
    #[must_use]
    pub fn fields(&self) -> Vec<(FieldToken, NamePath)> {
        self.lock()
            .fields
            .iter()
            .map(|(token, spec)| (token, spec.name.clone()))
            .collect()
    }

    // -- values --

    /// The whole store.
    #[must_use]
    pub fn store(&self) -> Value {
        self.lock().store.clone()
    }

    #[must_use]
    pub fn get_field_value(&self, name: impl Into<NamePath>) -> Option<Value> {
        let name = name.into();
        get_value(&self.lock().store, &name).cloned()
    }

    /// Values of `names`, or of every registered field when `None`.
    #[must_use]
    pub fn get_fields_value(&self, names: Option<&[NamePath]>) -> Value {
        let state = self.lock();
        match names {
            Some(names) => clone_by_name_path_list(&state.store, names),
            None => {
                let all: Vec<NamePath> = state.fields.iter().map(|(_, s)| s.name.clone()).collect();
                clone_by_name_path_list(&state.store, &all)
            }
        }
    }

    pub fn set_field_value(&self, name: impl Into<NamePath>, value: Value) {
        let name = name.into();
        let mut state = self.lock();
        state.store = set_value(&state.store, &name, Some(value), false);
    }

    /// Deep-merge `values` into the store.
    pub fn set_fields_value(&self, values: &Value) {
        let mut state = self.lock();
        state.store = merge_stores(&state.store, [values]);
    }

    /// Restore initial values and clear metadata of `names`, or of the
    /// whole form when `None`.
    pub fn reset_fields(&self, names: Option<&[NamePath]>) {
        let mut state = self.lock();
        match names {
            None => state.store = state.initial.clone(),
            Some(names) => {
                for name in names {
                    let initial = get_value(&state.initial, name).cloned();
                    state.store = set_value(&state.store, name, initial, true);
                }
            }
        }
        // A reset supersedes any run in flight for these fields.
        let reset: Vec<FieldToken> = state.selected(names).into_iter().map(|(t, _)| t).collect();
        for token in reset {
            state.runs.remove(&token);
        }
        state.metas_named(names).for_each(FieldMeta::reset);
    }

    /// Drop errors and warnings of `names`, or of every field.
    pub fn clear_validate(&self, names: Option<&[NamePath]>) {
        let mut state = self.lock();
        state.metas_named(names).for_each(|meta| {
            meta.errors.clear();
            meta.warnings.clear();
        });
    }

    /// Metadata of the first field registered under `name`.
    #[must_use]
    pub fn field_meta(&self, name: impl Into<NamePath>) -> Option<FieldMeta> {
        let name = name.into();
        let state = self.lock();
        state
            .fields
            .iter()
            .find(|(_, spec)| match_name_path(&spec.name, &name))
            .and_then(|(token, _)| state.metas.get(&token).cloned())
    }

    // -- events --

    /// A user edit: store the value, mark the field touched and run its
    /// `change` rules.
    pub async fn on_field_change(
        &self,
        name: impl Into<NamePath>,
        value: Value,
    ) -> Result<Value, ValidateErrorEntity> {
        let name = name.into();
        {
            let mut state = self.lock();
            state.store = set_value(&state.store, &name, Some(value), false);
            let names = std::slice::from_ref(&name);
            state.metas_named(Some(names)).for_each(|meta| meta.touched = true);
        }
        self.validate_field(name, ValidateOptions::new().trigger("change"))
            .await
    }

    /// The field lost focus: run its `blur` rules.
    pub async fn on_field_blur(
        &self,
        name: impl Into<NamePath>,
    ) -> Result<Value, ValidateErrorEntity> {
        self.validate_field(name, ValidateOptions::new().trigger("blur"))
            .await
    }

    // -- validation --

    /// Validate the fields registered under `name`.
    pub async fn validate_field(
        &self,
        name: impl Into<NamePath>,
        options: ValidateOptions,
    ) -> Result<Value, ValidateErrorEntity> {
        let names = [name.into()];
        self.validate_fields(Some(&names), options).await
    }

    fn effective_options(&self, mut options: ValidateOptions) -> ValidateOptions {
        if let Some(form_messages) = &self.config.validate_messages {
            options.validate_messages =
                Some(form_messages.merged(options.validate_messages.as_ref()));
        }
        options.diagnostics = self.diagnostics.clone();
        options
    }

    /// Validate `names`, or every registered field when `None`.
    ///
    /// Resolves with the values of the validated names. Rejects when a field
    /// has a blocking error, or when another validation started before this
    /// one finished; warning-only failures land in [`FieldMeta::warnings`]
    /// and never reject.
    pub async fn validate_fields(
        &self,
        names: Option<&[NamePath]>,
        options: ValidateOptions,
    ) -> Result<Value, ValidateErrorEntity> {
        let options = self.effective_options(options);
        let (run, jobs, name_list) = {
            let mut state = self.lock();
            let run = state.issue_token();
            state.last_validate = run;
            let mut name_list = names.map(<[NamePath]>::to_vec).unwrap_or_default();
            let mut jobs = Vec::new();
            for (token, spec) in state.selected(names) {
                if names.is_none() {
                    name_list.push(spec.name.clone());
                }
                if spec.rules.is_empty() {
                    continue;
                }
                let value = get_value(&state.store, &spec.name).cloned();
                if let Some(meta) = state.metas.get_mut(&token) {
                    meta.validating = true;
                }
                state.runs.insert(token, run);
                jobs.push(FieldJob { token, spec, value });
            }
            (run, jobs, name_list)
        };

        xe_utils::debug!(target: "xe_form", %run, fields = jobs.len(), "validation started");

        let outcomes = await_all(jobs.into_iter().map(|job| self.run_field(job, run, &options))).await;

        let (values, out_of_date) = {
            let state = self.lock();
            (
                clone_by_name_path_list(&state.store, &name_list),
                state.last_validate != run,
            )
        };

        xe_utils::debug!(
            target: "xe_form",
            %run,
            ok = outcomes.is_ok(),
            out_of_date,
            "validation finished"
        );

        match outcomes {
            Ok(_) if !out_of_date => Ok(values),
            Ok(_) => Err(ValidateErrorEntity {
                values,
                error_fields: Vec::new(),
                out_of_date,
            }),
            Err(fields) => Err(ValidateErrorEntity {
                values,
                error_fields: fields.into_iter().filter(|f| !f.errors.is_empty()).collect(),
                out_of_date,
            }),
        }
    }

    async fn run_field(
        &self,
        job: FieldJob,
        run: ValidationToken,
        options: &ValidateOptions,
    ) -> Result<FieldError, FieldError> {
        let mut field_options = options.clone();
        let mut variables = job.spec.message_variables.clone();
        variables.extend(options.message_variables.clone());
        field_options.message_variables = variables;
        let mode = job.spec.validate_first.unwrap_or(self.config.validate_first);

        let result = validate_rules(
            &job.spec.name,
            job.value.as_ref(),
            &job.spec.rules,
            &field_options,
            mode,
        )
        .await;

        let mut outcome = FieldError::empty(job.spec.name);
        if let Err(failures) = result {
            for failure in failures {
                if failure.rule.warning_only {
                    outcome.warnings.extend(failure.errors);
                } else {
                    outcome.errors.extend(failure.errors);
                }
            }
        }

        let on_validate = {
            let mut state = self.lock();
            if state.runs.get(&job.token) == Some(&run) {
                if let Some(meta) = state.metas.get_mut(&job.token) {
                    meta.validating = false;
                    meta.errors = outcome.errors.clone();
                    meta.warnings = outcome.warnings.clone();
                }
                state.on_validate.clone()
            } else {
                xe_utils::debug!(target: "xe_form", %run, field = %outcome.name, "stale result discarded");
                None
            }
        };
        if let Some(callback) = on_validate {
            callback(&outcome.name, outcome.errors.is_empty(), &outcome.errors);
        }

        if outcome.errors.is_empty() {
            Ok(outcome)
        } else {
            Err(outcome)
        }
    }
}
