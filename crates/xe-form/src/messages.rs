#![forbid(unsafe_code)]

//! Validation message templates.
//!
//! Templates use `${identifier}` placeholders, resolved against a flat
//! dictionary of substitutions built from the failing rule.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::value::merge_stores;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{((?-u:\w)+)\}").expect("placeholder pattern is valid"));

/// Replace every `${key}` in `template` with `substitutions[key]`.
///
/// Keys missing from the dictionary render as the empty string.
///
/// ```rust
/// use std::collections::HashMap;
/// use xe_form::render_template;
///
/// let vars = HashMap::from([
///     ("name".to_string(), "age".to_string()),
///     ("min".to_string(), "18".to_string()),
/// ]);
/// assert_eq!(
///     render_template("'${name}' must be at least ${min}!", &vars),
///     "'age' must be at least 18!"
/// );
/// ```
#[must_use]
pub fn render_template(template: &str, substitutions: &HashMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            substitutions.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// Format a number the way it reads in a message: `18`, not `18.0`.
#[must_use]
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Render a JSON value as message text. Strings are not quoted.
#[must_use]
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.as_f64().map_or_else(|| n.to_string(), format_number),
        Value::Null => "null".to_string(),
        Value::Array(items) => items.iter().map(display_value).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// ValidateMessages
// ---------------------------------------------------------------------------

const TYPE_NAMES: [&str; 14] = [
    "string", "method", "array", "object", "number", "date", "boolean", "integer", "float",
    "regexp", "email", "url", "hex", "enum",
];

/// A tree of message templates, looked up by dotted group and key.
///
/// Overrides are deep-merged, so a partial tree only replaces the templates
/// it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidateMessages(Value);

impl Default for ValidateMessages {
    fn default() -> Self {
        Self::defaults()
    }
}

impl ValidateMessages {
    /// An empty tree; every lookup falls through.
    #[must_use]
    pub fn empty() -> Self {
        Self(Value::Object(serde_json::Map::new()))
    }

    /// Wrap an arbitrary JSON template tree.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// The raw template tree.
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Built-in English templates.
    #[must_use]
    pub fn defaults() -> Self {
        let type_template = "'${name}' is not a valid ${type}!";
        let types: serde_json::Map<String, Value> = TYPE_NAMES
            .iter()
            .map(|t| (t.to_string(), json!(type_template)))
            .collect();
        Self(json!({
            "default": "Validation error on field '${name}'!",
            "required": "'${name}' is required!",
            "enum": "'${name}' must be one of [${enum}]!",
            "whitespace": "'${name}' cannot be empty!",
            "date": {
                "format": "'${name}' is an invalid date format!",
                "parse": "'${name}' could not be parsed as a date!",
                "invalid": "'${name}' is an invalid date!"
            },
            "types": types,
            "string": {
                "len": "'${name}' must be exactly ${len} characters!",
                "min": "'${name}' must be at least ${min} characters!",
                "max": "'${name}' cannot be longer than ${max} characters!",
                "range": "'${name}' must be between ${min} and ${max} characters!"
            },
            "number": {
                "len": "'${name}' must equal ${len}!",
                "min": "'${name}' must be at least ${min}!",
                "max": "'${name}' cannot be greater than ${max}!",
                "range": "'${name}' must be between ${min} and ${max}!"
            },
            "array": {
                "len": "'${name}' must contain exactly ${len} items!",
                "min": "'${name}' must contain at least ${min} items!",
                "max": "'${name}' cannot contain more than ${max} items!",
                "range": "'${name}' must contain between ${min} and ${max} items!"
            },
            "pattern": {
                "mismatch": "'${name}' does not match pattern ${pattern}!"
            }
        }))
    }

    /// Simplified Chinese templates.
    #[must_use]
    pub fn zh_cn() -> Self {
        let type_template = "'${name}'类型错误, 需要的类型是: ${type}!";
        let types: serde_json::Map<String, Value> = TYPE_NAMES
            .iter()
            .map(|t| (t.to_string(), json!(type_template)))
            .collect();
        Self(json!({
            "default": "字段'${name}'验证错误!",
            "required": "'${name}'是必填的!",
            "enum": "'${name}'必须是[${enum}]其中之一!",
            "whitespace": "'${name}'不能为空!",
            "date": {
                "format": "'${name}'格式日期无效!",
                "parse": "'${name}'无法被解析为日期!",
                "invalid": "'${name}'日期无效!"
            },
            "types": types,
            "string": {
                "len": "'${name}'恰好需要${len}个字符!",
                "min": "'${name}'至少有${min}个字符!",
                "max": "'${name}'不能超过${max}个字符!",
                "range": "'${name}'字符长度在${min}和${max}之间!"
            },
            "number": {
                "len": "'${name}'必须等于${len}!",
                "min": "'${name}'不能少于${min}!",
                "max": "'${name}'不能大于${max}!",
                "range": "'${name}'必须在${min}和${max}之间!"
            },
            "array": {
                "len": "'${name}'数组的长度必须是${len}!",
                "min": "'${name}'数组的长度不能少于${min}!",
                "max": "'${name}'数组的长度不能大于${max}!",
                "range": "'${name}'数组的长度必须在${min}和${max}之间!"
            },
            "pattern": {
                "mismatch": "'${name}'不匹配${pattern}!"
            }
        }))
    }

    /// Set one template by dotted path, e.g. `"number.min"`.
    #[must_use]
    pub fn with(self, path: &str, template: impl Into<String>) -> Self {
        let keys: Vec<crate::PathKey> = path.split('.').map(crate::PathKey::from).collect();
        Self(crate::value::set_value(
            &self.0,
            &keys,
            Some(Value::String(template.into())),
            false,
        ))
    }

    /// Deep-merge `overrides` on top of `self`.
    #[must_use]
    pub fn merged(&self, overrides: Option<&ValidateMessages>) -> Self {
        match overrides {
            Some(over) => Self(merge_stores(&self.0, [&over.0])),
            None => self.clone(),
        }
    }

    /// Look up a template by dotted path.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<&str> {
        path.split('.')
            .try_fold(&self.0, |node, key| node.get(key))
            .and_then(Value::as_str)
    }

    /// The template at `path`, or the `default` template when missing.
    #[must_use]
    pub fn template(&self, path: &str) -> String {
        self.lookup(path)
            .or_else(|| self.lookup("default"))
            .unwrap_or("Validation error on field '${name}'!")
            .to_string()
    }

    /// The catch-all template.
    #[must_use]
    pub fn default_message(&self) -> String {
        self.template("default")
    }
}
