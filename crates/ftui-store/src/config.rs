#![forbid(unsafe_code)]

//! Store and runtime configuration.
//!
//! [`StoreOptions`] is per container and may be changed after construction
//! (`Store::set_options`). [`RuntimeConfig`] is fixed when the runtime is
//! built and can be read from the environment or, with the `policy-config`
//! feature, from TOML/JSON policy files.

use serde::Deserialize;

use crate::error::{Result, StoreError};

/// Default bound on tasks executed by one `Runtime::run_until_idle` drain.
pub const DEFAULT_MAX_FLUSH_DEPTH: usize = 10_000;

/// Per-store options.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreOptions {
    /// Restore every field to its initial value once the last consumer
    /// unsubscribes. Disable for process-wide singletons (session, auth).
    pub unmount_restore: bool,
    /// Unique name within the runtime; enables `Runtime::store_by_namespace`.
    pub namespace: Option<String>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            unmount_restore: true,
            namespace: None,
        }
    }
}

impl StoreOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn unmount_restore(mut self, enabled: bool) -> Self {
        self.unmount_restore = enabled;
        self
    }

    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// Post-construction option overrides accepted by `Store::set_options`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreOptionsPatch {
    pub unmount_restore: Option<bool>,
}

/// Runtime-wide configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Reassigning an action field is an error when set; otherwise it is
    /// logged and ignored.
    pub strict: bool,
    /// Maximum number of microtasks one drain will run.
    pub max_flush_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            strict: true,
            max_flush_depth: DEFAULT_MAX_FLUSH_DEPTH,
        }
    }
}

impl RuntimeConfig {
    /// Read `FTUI_STORE_STRICT` and `FTUI_STORE_MAX_FLUSH_DEPTH`, falling back
    /// to defaults for unset variables.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] when a variable is set but unparsable.
    pub fn from_env() -> Result<Self> {
        let strict = std::env::var("FTUI_STORE_STRICT").ok();
        let depth = std::env::var("FTUI_STORE_MAX_FLUSH_DEPTH").ok();
        Self::from_vars(strict.as_deref(), depth.as_deref())
    }

    fn from_vars(strict: Option<&str>, depth: Option<&str>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(raw) = strict {
            config.strict = parse_bool(raw).ok_or_else(|| {
                StoreError::config(format!("FTUI_STORE_STRICT: expected a boolean, got `{raw}`"))
            })?;
        }
        if let Some(raw) = depth {
            config.max_flush_depth = raw.trim().parse().map_err(|_| {
                StoreError::config(format!(
                    "FTUI_STORE_MAX_FLUSH_DEPTH: expected a positive integer, got `{raw}`"
                ))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML policy document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] on parse or validation failure.
    #[cfg(feature = "policy-config")]
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).map_err(|e| StoreError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON policy document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] on parse or validation failure.
    #[cfg(feature = "policy-config")]
    pub fn from_json_str(input: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(input).map_err(|e| StoreError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_flush_depth == 0 {
            return Err(StoreError::config("max_flush_depth must be at least 1"));
        }
        Ok(())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
