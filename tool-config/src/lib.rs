//! Settings for the script sandbox.
//!
//! Settings come from a YAML document, optionally refined by environment
//! variables, and convert into a [`SandboxConfig`].
//!
//! ```yaml
//! workers: 8
//! timeout_ms: 5000
//! max_call_depth: 4
//! thread_name_prefix: "${SERVICE_NAME}-js"
//! ```

#![warn(missing_docs, clippy::pedantic)]

mod expand;

use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use script_sandbox::SandboxConfig;
use serde::{Deserialize, Serialize};

pub use expand::expand_env;

/// Prefix of the environment variables read by
/// [`SandboxSettings::apply_env_overrides`].
pub const ENV_PREFIX: &str = "SCRIPT_TOOLS_";

/// Serializable sandbox settings.
///
/// Every field has a default, so a partial document (or an empty one) is a
/// valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    /// Worker threads, each owning one interpreter.
    pub workers: usize,
    /// Per-invocation wall-clock limit in milliseconds. `0` disables it.
    pub timeout_ms: u64,
    /// Interpreter heap limit in bytes. `0` disables it.
    pub memory_limit_bytes: usize,
    /// Interpreter stack limit in bytes. `0` disables it.
    pub max_stack_bytes: usize,
    /// Maximum nesting of `callTool` invocations.
    pub max_call_depth: usize,
    /// Run the parent tool before evaluation and expose its output.
    pub prefetch_parent: bool,
    /// Worker thread name prefix.
    pub thread_name_prefix: String,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        let config = SandboxConfig::default();
        Self {
            workers: config.workers().get(),
            timeout_ms: config
                .timeout()
                .map_or(0, |limit| u64::try_from(limit.as_millis()).unwrap_or(u64::MAX)),
            memory_limit_bytes: config.memory_limit().unwrap_or(0),
            max_stack_bytes: config.max_stack_size().unwrap_or(0),
            max_call_depth: config.max_call_depth(),
            prefetch_parent: config.prefetch_parent(),
            thread_name_prefix: config.thread_name_prefix().to_owned(),
        }
    }
}

impl SandboxSettings {
    /// Parses a YAML document. `${VAR}` references are expanded first.
    ///
    /// # Errors
    ///
    /// Fails on an unset variable, malformed YAML, or settings rejected by
    /// [`Self::validate`].
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let expanded = expand_env(content, |name| std::env::var(name).ok())?;
        let settings: Self = if expanded.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&expanded).context("failed to parse sandbox settings")?
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from a YAML file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, or for any reason listed on
    /// [`Self::from_yaml_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read sandbox settings from {}", path.display()))?;
        let settings = Self::from_yaml_str(&content)
            .with_context(|| format!("invalid sandbox settings in {}", path.display()))?;
        tracing::info!(path = %path.display(), "loaded sandbox settings");
        Ok(settings)
    }

    /// Applies `SCRIPT_TOOLS_*` variables from the process environment.
    ///
    /// # Errors
    ///
    /// See [`Self::apply_overrides`].
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(std::env::vars())
    }

    /// Applies overrides from `(name, value)` pairs.
    ///
    /// Names are matched case-sensitively after stripping [`ENV_PREFIX`], for
    /// example `SCRIPT_TOOLS_WORKERS` or `SCRIPT_TOOLS_TIMEOUT_MS`. Unrelated
    /// names are ignored.
    ///
    /// # Errors
    ///
    /// Fails when a recognised variable holds an unparsable value.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in vars {
            let Some(field) = name.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();
            let parsed = match field {
                "WORKERS" => parse(value).map(|v| self.workers = v),
                "TIMEOUT_MS" => parse(value).map(|v| self.timeout_ms = v),
                "MEMORY_LIMIT_BYTES" => parse(value).map(|v| self.memory_limit_bytes = v),
                "MAX_STACK_BYTES" => parse(value).map(|v| self.max_stack_bytes = v),
                "MAX_CALL_DEPTH" => parse(value).map(|v| self.max_call_depth = v),
                "PREFETCH_PARENT" => parse_bool(value).map(|v| self.prefetch_parent = v),
                "THREAD_NAME_PREFIX" => {
                    self.thread_name_prefix = value.to_owned();
                    Ok(())
                }
                _ => {
                    tracing::debug!(variable = name.as_ref(), "ignoring unknown sandbox override");
                    Ok(())
                }
            };
            parsed.with_context(|| format!("invalid value for {}", name.as_ref()))?;
        }
        Ok(())
    }

    /// Checks the settings for values the sandbox cannot run with.
    ///
    /// # Errors
    ///
    /// Fails on zero workers, zero call depth or an empty thread prefix.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.max_call_depth == 0 {
            bail!("max_call_depth must be at least 1");
        }
        if self.thread_name_prefix.trim().is_empty() {
            bail!("thread_name_prefix cannot be empty");
        }
        Ok(())
    }

    /// Per-invocation time limit, `None` when disabled.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        if self.timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.timeout_ms))
        }
    }
}

fn parse<T>(value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(value.parse::<T>()?)
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got `{other}`"),
    }
}

fn non_zero(bytes: usize) -> Option<usize> {
    (bytes > 0).then_some(bytes)
}

impl From<&SandboxSettings> for SandboxConfig {
    fn from(settings: &SandboxSettings) -> Self {
        let workers = NonZeroUsize::new(settings.workers).unwrap_or(NonZeroUsize::MIN);
        SandboxConfig::new()
            .with_workers(workers)
            .with_timeout(settings.timeout())
            .with_memory_limit(non_zero(settings.memory_limit_bytes))
            .with_max_stack_size(non_zero(settings.max_stack_bytes))
            .with_max_call_depth(settings.max_call_depth.max(1))
            .with_prefetch_parent(settings.prefetch_parent)
            .with_thread_name_prefix(settings.thread_name_prefix.clone())
    }
}

impl From<SandboxSettings> for SandboxConfig {
    fn from(settings: SandboxSettings) -> Self {
        Self::from(&settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_sandbox() {
        let settings = SandboxSettings::default();
        assert_eq!(settings.workers, 4);
        assert_eq!(settings.timeout_ms, 30_000);
        assert_eq!(settings.max_call_depth, 8);
        assert!(!settings.prefetch_parent);
        assert_eq!(settings.thread_name_prefix, "script-worker");
        settings.validate().unwrap();
    }

    #[test]
    fn partial_document_keeps_defaults() {
        let settings = SandboxSettings::from_yaml_str("workers: 2\nprefetch_parent: true\n").unwrap();
        assert_eq!(settings.workers, 2);
        assert!(settings.prefetch_parent);
        assert_eq!(settings.timeout_ms, 30_000);
    }

    #[test]
    fn empty_document_is_default() {
        assert_eq!(SandboxSettings::from_yaml_str("").unwrap(), SandboxSettings::default());
    }

    #[test]
    fn rejects_zero_workers() {
        let err = SandboxSettings::from_yaml_str("workers: 0").unwrap_err();
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn overrides_apply_by_prefix() {
        let mut settings = SandboxSettings::default();
        settings
            .apply_overrides([
                ("SCRIPT_TOOLS_WORKERS", "6"),
                ("SCRIPT_TOOLS_TIMEOUT_MS", "0"),
                ("SCRIPT_TOOLS_PREFETCH_PARENT", "yes"),
                ("SCRIPT_TOOLS_THREAD_NAME_PREFIX", "js"),
                ("PATH", "/usr/bin"),
            ])
            .unwrap();
        assert_eq!(settings.workers, 6);
        assert_eq!(settings.timeout(), None);
        assert!(settings.prefetch_parent);
        assert_eq!(settings.thread_name_prefix, "js");
    }

    #[test]
    fn bad_override_names_the_variable() {
        let mut settings = SandboxSettings::default();
        let err = settings
            .apply_overrides([("SCRIPT_TOOLS_MAX_CALL_DEPTH", "deep")])
            .unwrap_err();
        assert!(err.to_string().contains("SCRIPT_TOOLS_MAX_CALL_DEPTH"));
    }

    #[test]
    fn converts_into_sandbox_config() {
        let settings = SandboxSettings {
            workers: 3,
            timeout_ms: 0,
            memory_limit_bytes: 0,
            max_stack_bytes: 512 * 1024,
            max_call_depth: 2,
            prefetch_parent: true,
            thread_name_prefix: "tools".into(),
        };
        let config = SandboxConfig::from(&settings);
        assert_eq!(config.workers().get(), 3);
        assert_eq!(config.timeout(), None);
        assert_eq!(config.memory_limit(), None);
        assert_eq!(config.max_stack_size(), Some(512 * 1024));
        assert_eq!(config.max_call_depth(), 2);
        assert!(config.prefetch_parent());
        assert_eq!(config.thread_name_prefix(), "tools");
    }
}
