#![forbid(unsafe_code)]

//! Field registration.
//!
//! A [`FieldRegistry`] maps per-mount [`FieldToken`]s to values. Every
//! mutation swaps in a fresh map, so observers detect changes by comparing
//! [`FieldRegistry::snapshot`] pointers instead of diffing contents.
//!
//! [`FormItemScope`] is the registry a form item exposes to the inputs
//! rendered inside it. Inputs bind through [`FormItemScope::bind`] and stay
//! registered for as long as they hold the returned [`FieldBinding`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use xe_utils::{Diagnostics, get_id};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// FieldToken
// ---------------------------------------------------------------------------

/// Identity of one field mount. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldToken(u64);

impl FieldToken {
    /// Allocate a fresh token.
    #[must_use]
    pub fn new() -> Self {
        Self(get_id())
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl Default for FieldToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FieldToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// FieldRegistry
// ---------------------------------------------------------------------------

/// Copy-on-write map from field token to `V`.
#[derive(Debug, Clone)]
pub struct FieldRegistry<V> {
    entries: Arc<BTreeMap<FieldToken, V>>,
}

impl<V> Default for FieldRegistry<V> {
    fn default() -> Self {
        Self {
            entries: Arc::new(BTreeMap::new()),
        }
    }
}

impl<V: Clone> FieldRegistry<V> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `value` under `token`, replacing the map.
    pub fn add_field(&mut self, token: FieldToken, value: V) {
        let mut next = (*self.entries).clone();
        next.insert(token, value);
        self.entries = Arc::new(next);
    }

    /// Remove `token`, replacing the map. Unknown tokens leave it untouched.
    pub fn remove_field(&mut self, token: FieldToken) -> Option<V> {
        if !self.entries.contains_key(&token) {
            return None;
        }
        let mut next = (*self.entries).clone();
        let removed = next.remove(&token);
        self.entries = Arc::new(next);
        removed
    }

    /// The current map. A later mutation never changes a snapshot already
    /// handed out.
    #[must_use]
    pub fn snapshot(&self) -> Arc<BTreeMap<FieldToken, V>> {
        Arc::clone(&self.entries)
    }

    #[must_use]
    pub fn get(&self, token: FieldToken) -> Option<&V> {
        self.entries.get(&token)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (FieldToken, &V)> {
        self.entries.iter().map(|(token, value)| (*token, value))
    }
}

// ---------------------------------------------------------------------------
// ComponentIdentity
// ---------------------------------------------------------------------------

/// A named component and the chain of components that own it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentIdentity {
    name: String,
    parent: Option<Arc<ComponentIdentity>>,
}

impl ComponentIdentity {
    /// A root component.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
        }
    }

    /// A component owned by `parent`.
    #[must_use]
    pub fn with_parent(name: impl Into<String>, parent: &ComponentIdentity) -> Self {
        Self {
            name: name.into(),
            parent: Some(Arc::new(parent.clone())),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owners from the nearest outwards.
    pub fn ancestors(&self) -> impl Iterator<Item = &ComponentIdentity> {
        std::iter::successors(self.parent.as_deref(), |c| c.parent.as_deref())
    }
}

impl fmt::Display for ComponentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// ---------------------------------------------------------------------------
// FormItemScope
// ---------------------------------------------------------------------------

/// Registry of the inputs bound to one form item.
///
/// A form item that collects a value expects exactly one bound input; a
/// second binding produces a development warning listing every bound
/// component, followed by the owner chain of the form item.
#[derive(Debug, Clone)]
pub struct FormItemScope {
    owner: ComponentIdentity,
    collects_value: bool,
    fields: Arc<Mutex<FieldRegistry<ComponentIdentity>>>,
    diagnostics: Diagnostics,
}

impl FormItemScope {
    /// A scope owned by `owner` that collects a value.
    #[must_use]
    pub fn new(owner: ComponentIdentity, diagnostics: Diagnostics) -> Self {
        Self {
            owner,
            collects_value: true,
            fields: Arc::new(Mutex::new(FieldRegistry::new())),
            diagnostics,
        }
    }

    /// Whether the item collects a value; purely decorative items may hold
    /// any number of inputs.
    #[must_use]
    pub fn collects_value(mut self, collects_value: bool) -> Self {
        self.collects_value = collects_value;
        self
    }

    /// Register `component` until the returned binding is dropped.
    #[must_use = "dropping the binding unregisters the component immediately"]
    pub fn bind(&self, component: ComponentIdentity) -> FieldBinding {
        let token = FieldToken::new();
        let bound = {
            let mut fields = lock(&self.fields);
            fields.add_field(token, component);
            fields.snapshot()
        };
        self.check_single_binding(&bound);
        FieldBinding {
            token,
            fields: Arc::clone(&self.fields),
        }
    }

    /// The components currently bound.
    #[must_use]
    pub fn bound(&self) -> Vec<ComponentIdentity> {
        lock(&self.fields).iter().map(|(_, c)| c.clone()).collect()
    }

    /// The current registry snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<BTreeMap<FieldToken, ComponentIdentity>> {
        lock(&self.fields).snapshot()
    }

    fn check_single_binding(&self, bound: &BTreeMap<FieldToken, ComponentIdentity>) {
        if !self.collects_value || bound.len() <= 1 || !self.diagnostics.is_enabled() {
            return;
        }
        let names: Vec<&str> = bound.values().map(ComponentIdentity::name).collect();
        self.diagnostics.dev_warning(
            false,
            "Form.Item",
            &format!(
                "a form item collects a single field value, but {} are bound",
                names.join(", ")
            ),
        );
        for component in std::iter::once(&self.owner).chain(self.owner.ancestors()) {
            self.diagnostics.note(&format!("at {component}"));
        }
    }
}

/// Keeps a component registered in a [`FormItemScope`].
#[derive(Debug)]
pub struct FieldBinding {
    token: FieldToken,
    fields: Arc<Mutex<FieldRegistry<ComponentIdentity>>>,
}

impl FieldBinding {
    #[must_use]
    pub fn token(&self) -> FieldToken {
        self.token
    }
}

impl Drop for FieldBinding {
    fn drop(&mut self) {
        lock(&self.fields).remove_field(self.token);
    }
}
