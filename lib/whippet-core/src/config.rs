//! Engine configuration.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use whippet_config::{ConfigurationError, GenericConfiguration};

use crate::definitions::DeclaredDefinition;

const fn default_period_ms() -> u64 {
    60_000
}

const MINIMUM_POLLING_INTERVAL: Duration = Duration::from_secs(1);

/// Engine configuration.
///
/// Controls buffering, aggregation, and submission behavior for one [`Engine`][crate::Engine] instance.
#[derive(Deserialize)]
pub struct EngineConfiguration {
    /// Default source tag applied when a sample is recorded without one.
    ///
    /// Defaults to `default`.
    #[serde(default)]
    pub(crate) source: Option<String>,

    /// Declared metric definitions, keyed by metric key.
    ///
    /// The reserved `__default` key overrides the definition used for keys that were never declared.
    #[serde(default)]
    pub(crate) definitions: HashMap<String, DeclaredDefinition>,

    /// Default submission period, in milliseconds, for definitions that do not declare their own.
    ///
    /// Defaults to 60000 (one minute).
    #[serde(default = "default_period_ms")]
    pub(crate) period_ms: u64,

    /// Prefix joined to every emitted metric name with a `.` separator.
    #[serde(default, alias = "librato_name_prefix")]
    pub(crate) name_prefix: Option<String>,

    /// Patterns (regular expressions) of keys to silently drop at record time.
    #[serde(default)]
    pub(crate) blacklist: Vec<String>,

    /// Diagnostic verbosity toggles.
    ///
    /// Recognized for compatibility but carry no behavioral effect; log filtering is handled by the `tracing`
    /// subscriber.
    #[serde(default)]
    pub(crate) logging: bool,

    /// See `logging`.
    #[serde(default, alias = "log_verbose")]
    pub(crate) logging_verbose: bool,

    /// Whether to bypass the transport entirely.
    ///
    /// Buffers are still aggregated, drained, and rescheduled on every flush cycle; only the transport call is
    /// skipped. Useful when running disconnected, such as in tests.
    ///
    /// Defaults to `false`.
    #[serde(default)]
    pub(crate) skip_submit: bool,
}

impl EngineConfiguration {
    /// Creates a new `EngineConfiguration` from the given configuration.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, ConfigurationError> {
        Ok(config.as_typed()?)
    }

    /// Creates a new `EngineConfiguration` with default values.
    pub fn with_defaults() -> Self {
        Self {
            source: None,
            definitions: HashMap::new(),
            period_ms: default_period_ms(),
            name_prefix: None,
            blacklist: Vec::new(),
            logging: false,
            logging_verbose: false,
            skip_submit: false,
        }
    }

    /// Sets the default source tag.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the declared metric definitions.
    pub fn with_definitions(mut self, definitions: HashMap<String, DeclaredDefinition>) -> Self {
        self.definitions = definitions;
        self
    }

    /// Sets the default submission period, in milliseconds.
    pub fn with_period_ms(mut self, period_ms: u64) -> Self {
        self.period_ms = period_ms;
        self
    }

    /// Sets the emitted metric name prefix.
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    /// Sets the record-time key blacklist patterns.
    pub fn with_blacklist(mut self, patterns: Vec<String>) -> Self {
        self.blacklist = patterns;
        self
    }

    /// Sets whether the transport is bypassed entirely.
    pub fn with_skip_submit(mut self, skip_submit: bool) -> Self {
        self.skip_submit = skip_submit;
        self
    }

    /// Default submission period.
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    /// Cadence of the polling loop that drives flush cycles.
    ///
    /// One twentieth of the default period, floored at one second, so no key is detected ready more than one
    /// cadence tick late.
    pub fn polling_interval(&self) -> Duration {
        (self.period() / 20).max(MINIMUM_POLLING_INTERVAL)
    }
}
