//! Scenario-scoped setting overrides.
//!
//! Scenarios often flip an application setting ("login required", "enable
//! passkeys"). [`SettingOverrides`] remembers the value each setting had
//! before its first override and puts them all back, newest first, when the
//! scenario ends. Nothing here is process-global; two scenarios with two
//! guards never see each other's overrides.

use crate::result::{HarnessError, HarnessResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Where application settings live
pub trait SettingsStore: Send + Sync + fmt::Debug {
    /// Current value, `None` when unset
    fn get(&self, name: &str) -> HarnessResult<Option<String>>;

    /// Set a value; `None` unsets it
    fn set(&self, name: &str, value: Option<&str>) -> HarnessResult<()>;
}

/// Settings kept in memory
#[derive(Debug, Default, Clone)]
pub struct InMemorySettings {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemorySettings {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `values`
    #[must_use]
    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        if let Ok(mut map) = store.values.lock() {
            map.extend(values.into_iter().map(|(k, v)| (k.into(), v.into())));
        }
        store
    }

    fn lock(&self) -> HarnessResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.values
            .lock()
            .map_err(|_| HarnessError::config("settings store poisoned"))
    }
}

impl SettingsStore for InMemorySettings {
    fn get(&self, name: &str) -> HarnessResult<Option<String>> {
        Ok(self.lock()?.get(name).cloned())
    }

    fn set(&self, name: &str, value: Option<&str>) -> HarnessResult<()> {
        let mut map = self.lock()?;
        match value {
            Some(v) => map.insert(name.to_string(), v.to_string()),
            None => map.remove(name),
        };
        Ok(())
    }
}

/// Guard restoring overridden settings on [`restore`](Self::restore) or drop
#[derive(Debug)]
pub struct SettingOverrides {
    store: Arc<dyn SettingsStore>,
    originals: Vec<(String, Option<String>)>,
}

impl SettingOverrides {
    /// Guard over `store`
    #[must_use]
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self {
            store,
            originals: Vec::new(),
        }
    }

    /// Store behind the guard
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SettingsStore> {
        &self.store
    }

    /// Override `name`; the first override of a name records its original value
    pub fn set(&mut self, name: &str, value: &str) -> HarnessResult<()> {
        self.apply(name, Some(value))
    }

    /// Unset `name` for the rest of the scenario
    pub fn unset(&mut self, name: &str) -> HarnessResult<()> {
        self.apply(name, None)
    }

    fn apply(&mut self, name: &str, value: Option<&str>) -> HarnessResult<()> {
        if !self.originals.iter().any(|(n, _)| n == name) {
            let original = self.store.get(name)?;
            self.originals.push((name.to_string(), original));
        }
        tracing::debug!(setting = name, value = ?value, "overriding setting");
        self.store.set(name, value)
    }

    /// Names overridden so far, oldest first
    #[must_use]
    pub fn overridden(&self) -> Vec<&str> {
        self.originals.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Whether nothing has been overridden
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.originals.is_empty()
    }

    /// Put every original value back, newest override first.
    ///
    /// All settings are attempted; failures come back as `ContextTeardown`.
    pub fn restore(&mut self) -> HarnessResult<()> {
        let mut failures = Vec::new();
        while let Some((name, original)) = self.originals.pop() {
            if let Err(e) = self.store.set(&name, original.as_deref()) {
                failures.push(format!("restore setting {name}: {e}"));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::ContextTeardown { failures })
        }
    }
}

impl Drop for SettingOverrides {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            tracing::warn!(error = %e, "setting overrides not fully restored");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct ReadOnly;

    impl SettingsStore for ReadOnly {
        fn get(&self, _name: &str) -> HarnessResult<Option<String>> {
            Ok(Some("x".into()))
        }

        fn set(&self, name: &str, _value: Option<&str>) -> HarnessResult<()> {
            Err(HarnessError::config(format!("{name} is read-only")))
        }
    }

    mod restore_tests {
        use super::*;

        #[test]
        fn test_restore_puts_back_first_original() {
            let store = InMemorySettings::with_values([("title", "Forum")]);
            let mut overrides = SettingOverrides::new(Arc::new(store.clone()));
            overrides.set("title", "Staging").unwrap();
            overrides.set("title", "Other").unwrap();
            overrides.set("login_required", "true").unwrap();
            assert_eq!(overrides.overridden(), vec!["title", "login_required"]);
            assert_eq!(store.get("title").unwrap().as_deref(), Some("Other"));

            overrides.restore().unwrap();
            assert_eq!(store.get("title").unwrap().as_deref(), Some("Forum"));
            assert_eq!(store.get("login_required").unwrap(), None);
            assert!(overrides.is_empty());
        }

        #[test]
        fn test_drop_restores() {
            let store = InMemorySettings::with_values([("enable_passkeys", "false")]);
            {
                let mut overrides = SettingOverrides::new(Arc::new(store.clone()));
                overrides.set("enable_passkeys", "true").unwrap();
                overrides.unset("title").unwrap();
            }
            assert_eq!(store.get("enable_passkeys").unwrap().as_deref(), Some("false"));
        }

        #[test]
        fn test_guards_are_independent() {
            let shared = InMemorySettings::new();
            let mut a = SettingOverrides::new(Arc::new(shared.clone()));
            let b = SettingOverrides::new(Arc::new(InMemorySettings::new()));
            a.set("title", "A").unwrap();
            assert!(b.is_empty());
            drop(a);
            assert_eq!(shared.get("title").unwrap(), None);
        }

        #[test]
        fn test_restore_failure_is_reported() {
            let mut overrides = SettingOverrides::new(Arc::new(ReadOnly));
            assert!(overrides.set("title", "y").is_err());
            let err = overrides.restore().unwrap_err();
            assert!(matches!(err, HarnessError::ContextTeardown { .. }));
            assert!(err.to_string().contains("read-only"));
        }
    }
}
