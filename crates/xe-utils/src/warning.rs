#![forbid(unsafe_code)]

//! Development diagnostics.
//!
//! A [`Diagnostics`] handle carries its own "already warned" set, so the
//! lifetime of deduplication is the lifetime of whoever owns the handle
//! (typically one form) instead of the whole process.
//!
//! # Example
//!
//! ```rust
//! use xe_utils::{Diagnostics, DiagnosticsMode};
//!
//! let diagnostics = Diagnostics::new(DiagnosticsMode::Development);
//! diagnostics.dev_warning(false, "Form.Item", "bound twice");
//! diagnostics.dev_warning(false, "Form.Item", "bound twice");
//!
//! assert_eq!(
//!     diagnostics.emitted(),
//!     vec!["Warning: [xiaoe-uni-ui: Form.Item] bound twice".to_string()]
//! );
//! ```

use std::collections::HashSet;
use std::env;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Environment variable selecting the diagnostics mode.
pub const ENV_VAR: &str = "XE_UI_ENV";

// ---------------------------------------------------------------------------
// DiagnosticsMode
// ---------------------------------------------------------------------------

/// Whether development diagnostics are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticsMode {
    /// Emit warnings.
    Development,
    /// Stay silent.
    Production,
}

impl DiagnosticsMode {
    /// Read the mode from `XE_UI_ENV`, falling back to the build profile.
    #[must_use]
    pub fn from_env() -> Self {
        match env::var(ENV_VAR) {
            Ok(value) => Self::parse(&value).unwrap_or_else(Self::from_profile),
            Err(_) => Self::from_profile(),
        }
    }

    /// Parse `production`/`development` (case-insensitive).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Some(Self::Production),
            "development" | "dev" | "test" => Some(Self::Development),
            _ => None,
        }
    }

    fn from_profile() -> Self {
        if cfg!(debug_assertions) {
            Self::Development
        } else {
            Self::Production
        }
    }
}

impl Default for DiagnosticsMode {
    fn default() -> Self {
        Self::from_env()
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

struct DiagnosticsInner {
    mode: DiagnosticsMode,
    warned: Mutex<HashSet<String>>,
    emitted: Mutex<Vec<String>>,
}

/// Shared diagnostics sink with per-instance deduplication.
///
/// Cloning is cheap and clones share the dedup set.
#[derive(Clone)]
pub struct Diagnostics {
    inner: Arc<DiagnosticsInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Diagnostics {
    /// Create a diagnostics sink in the given mode.
    #[must_use]
    pub fn new(mode: DiagnosticsMode) -> Self {
        Self {
            inner: Arc::new(DiagnosticsInner {
                mode,
                warned: Mutex::new(HashSet::new()),
                emitted: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A sink that never emits anything.
    #[must_use]
    pub fn silent() -> Self {
        Self::new(DiagnosticsMode::Production)
    }

    /// The mode this sink was created with.
    #[must_use]
    pub fn mode(&self) -> DiagnosticsMode {
        self.inner.mode
    }

    /// Whether anything will be emitted.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.mode == DiagnosticsMode::Development
    }

    fn record(&self, line: String) {
        lock(&self.inner.emitted).push(line);
    }

    fn base_warning(&self, valid: bool, message: &str) {
        if valid || !self.is_enabled() {
            return;
        }
        let line = format!("Warning: {message}");
        crate::warn!(target: "xe_ui", "{}", line);
        self.record(line);
    }

    /// Emit `message` for `component` whenever `valid` is false.
    pub fn warning(&self, valid: bool, component: &str, message: &str) {
        self.base_warning(valid, &format!("[xiaoe-uni-ui: {component}] {message}"));
    }

    /// Emit `message` the first time it fails; later repeats are dropped.
    pub fn warning_once(&self, valid: bool, message: &str) {
        if valid {
            return;
        }
        let first = lock(&self.inner.warned).insert(message.to_string());
        if first {
            self.base_warning(false, message);
        }
    }

    /// Deduplicated component warning.
    pub fn dev_warning(&self, valid: bool, component: &str, message: &str) {
        self.warning_once(valid, &format!("[xiaoe-uni-ui: {component}] {message}"));
    }

    /// Emit a raw trail line, e.g. one step of an ownership walk.
    pub fn note(&self, message: &str) {
        if !self.is_enabled() {
            return;
        }
        crate::warn!(target: "xe_ui", "{}", message);
        self.record(message.to_string());
    }

    /// Report a recovered internal failure.
    ///
    /// Errors are emitted regardless of mode.
    pub fn error(&self, message: &str) {
        crate::error!(target: "xe_ui", "{}", message);
        self.record(format!("Error: {message}"));
    }

    /// Every line emitted so far, oldest first.
    #[must_use]
    pub fn emitted(&self) -> Vec<String> {
        lock(&self.inner.emitted).clone()
    }

    /// Forget the dedup set and the emitted log.
    pub fn reset(&self) {
        lock(&self.inner.warned).clear();
        lock(&self.inner.emitted).clear();
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(DiagnosticsMode::default())
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("mode", &self.inner.mode)
            .field("warned", &lock(&self.inner.warned).len())
            .finish()
    }
}
