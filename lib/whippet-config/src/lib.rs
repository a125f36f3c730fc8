//! Primitives for working with typed and untyped configuration data.
#![deny(warnings)]
#![deny(missing_docs)]

use std::borrow::Cow;

use figment::providers::{Env, Serialized};
use figment::{error::Kind, Figment, Provider as _};
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use tracing::debug;

/// A configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConfigurationError {
    /// Environment variable prefix was empty.
    #[snafu(display("Environment variable prefix must not be empty."))]
    EmptyPrefix,

    /// Requested field was missing from the configuration.
    #[snafu(display("Missing field '{}' in configuration. {}", field, help_text))]
    MissingField {
        /// Help text describing how to set the missing field.
        help_text: String,

        /// Name of the missing field.
        field: Cow<'static, str>,
    },

    /// Requested field's data type was not the expected data type.
    #[snafu(display(
        "Expected value for field '{}' to be '{}', got '{}' instead.",
        field,
        expected_ty,
        actual_ty
    ))]
    InvalidFieldType {
        /// Name of the invalid field.
        ///
        /// This is a period-separated path to the field.
        field: String,

        /// Expected data type.
        expected_ty: String,

        /// Actual data type.
        actual_ty: String,
    },

    /// Requested field held a value outside of its allowed set.
    #[snafu(display("Invalid value for field '{}': {}.", field, reason))]
    InvalidFieldValue {
        /// Name of the invalid field.
        field: String,

        /// Why the value was rejected.
        reason: String,
    },

    /// Generic configuration error.
    #[snafu(display("Failed to query configuration."))]
    Generic {
        /// Error source.
        source: figment::Error,
    },
}

impl From<figment::Error> for ConfigurationError {
    fn from(e: figment::Error) -> Self {
        match e.kind {
            Kind::MissingField(field) => Self::MissingField {
                help_text: String::new(),
                field,
            },
            Kind::InvalidType(actual_ty, expected_ty) => Self::InvalidFieldType {
                field: e.path.join("."),
                expected_ty,
                actual_ty: actual_ty.to_string(),
            },
            _ => Self::Generic { source: e },
        }
    }
}

/// A configuration loader that can pull from various sources.
///
/// This loader provides a wrapper around a lower-level library, `figment`, to expose a simpler and focused API for
/// both loading configuration data and querying it. Sources added later take precedence over sources added prior.
#[derive(Default)]
pub struct ConfigurationLoader {
    figment: Figment,
    env_prefix: Option<String>,
}

impl ConfigurationLoader {
    /// Merges in default values from the given serializable value.
    ///
    /// Defaults have the lowest precedence, regardless of when they are added.
    pub fn with_defaults<T>(mut self, defaults: T) -> Self
    where
        T: Serialize,
    {
        self.figment = self.figment.admerge(Serialized::defaults(defaults));
        self
    }

    /// Loads configuration from environment variables.
    ///
    /// The prefix given will have an underscore appended to it if it does not already end with one. For example,
    /// with a prefix of `app`, any environment variable starting with `APP_` would be matched.
    ///
    /// # Errors
    ///
    /// If the prefix is empty, an error will be returned.
    pub fn from_environment(mut self, prefix: &str) -> Result<Self, ConfigurationError> {
        if prefix.is_empty() {
            return Err(ConfigurationError::EmptyPrefix);
        }

        let prefix = if prefix.ends_with('_') {
            prefix.to_uppercase()
        } else {
            format!("{}_", prefix.to_uppercase())
        };

        // Snapshot the environment into a serialized provider, since `Env` itself isn't `Send + Sync`.
        let values = Env::prefixed(&prefix).data()?;
        if let Some(dict) = values.get(&figment::Profile::Default) {
            self.figment = self.figment.admerge(Serialized::defaults(dict.clone()));
            self.env_prefix = Some(prefix);
        } else {
            debug!(prefix = %prefix, "No matching environment variables found.");
        }

        Ok(self)
    }

    /// Consumes the configuration loader and wraps it in a generic wrapper.
    pub fn into_generic(self) -> GenericConfiguration {
        GenericConfiguration {
            figment: self.figment,
            env_prefix: self.env_prefix,
        }
    }
}

/// A generic configuration object.
///
/// This represents the merged configuration derived from [`ConfigurationLoader`] in its raw form. Values can be
/// queried by key, and can be extracted either as typed values or in their raw form. Keys must be in the form of
/// `a.b.c`, where periods (`.`) are used to indicate a nested lookup.
#[derive(Clone, Debug)]
pub struct GenericConfiguration {
    figment: Figment,
    env_prefix: Option<String>,
}

impl GenericConfiguration {
    fn get<'a, T>(&self, key: &str) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        match self.figment.extract_inner(key) {
            Ok(value) => Ok(value),
            Err(e) => {
                if matches!(e.kind, Kind::MissingField(_)) {
                    // The key may use nested notation -- `foo.bar` -- but only be present in the environment
                    // variables, where nested separators are flattened to underscores. Try again with the
                    // flattened form before giving up.
                    let fallback_key = key.replace('.', "_");
                    self.figment
                        .extract_inner(&fallback_key)
                        .map_err(|fallback_e| self.from_figment_error(fallback_e))
                } else {
                    Err(self.from_figment_error(e))
                }
            }
        }
    }

    fn from_figment_error(&self, e: figment::Error) -> ConfigurationError {
        match e.kind {
            Kind::MissingField(field) => {
                let mut valid_keys = vec![field.to_string()];
                if let Some(prefix) = &self.env_prefix {
                    valid_keys.push(format!("{}{}", prefix, field.replace('.', "_").to_uppercase()));
                }

                let help_text = format!("Try setting `{}`.", valid_keys.join("` or `"));

                ConfigurationError::MissingField { help_text, field }
            }
            _ => e.into(),
        }
    }

    /// Gets a configuration value by key.
    ///
    /// The key must be in the form of `a.b.c`, where periods (`.`) are used to indicate a nested lookup.
    ///
    /// # Errors
    ///
    /// If the key does not exist in the configuration, or if the value could not be deserialized into `T`, an error
    /// will be returned.
    pub fn get_typed<'a, T>(&self, key: &str) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        self.get(key)
    }

    /// Gets a configuration value by key, or the default value if the key does not exist.
    ///
    /// The `Default` implementation of `T` will be used both if the key could not be found, as well as for any
    /// error during deserialization. This effectively swallows any errors and should generally be used sparingly.
    pub fn get_typed_or_default<'a, T>(&self, key: &str) -> T
    where
        T: Default + Deserialize<'a>,
    {
        self.get(key).unwrap_or_default()
    }

    /// Gets a configuration value by key, if it exists.
    ///
    /// If the key exists in the configuration, and can be deserialized, `Ok(Some(value))` is returned. Otherwise,
    /// `Ok(None)` will be returned.
    ///
    /// # Errors
    ///
    /// If the value could not be deserialized into `T`, an error will be returned.
    pub fn try_get_typed<'a, T>(&self, key: &str) -> Result<Option<T>, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        match self.get(key) {
            Ok(value) => Ok(Some(value)),
            Err(ConfigurationError::MissingField { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Attempts to deserialize the entire configuration as `T`.
    ///
    /// # Errors
    ///
    /// If the configuration could not be deserialized into `T`, an error will be returned.
    pub fn as_typed<'a, T>(&self) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        self.figment.extract().map_err(|e| self.from_figment_error(e))
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Deserialize)]
    struct TestConfig {
        period_ms: u64,
        name_prefix: Option<String>,
    }

    #[test]
    fn typed_extraction_with_defaults() {
        let config = ConfigurationLoader::default()
            .with_defaults(serde_json::json!({ "period_ms": 60000 }))
            .into_generic();

        let typed = config.as_typed::<TestConfig>().unwrap();
        assert_eq!(typed.period_ms, 60000);
        assert_eq!(typed.name_prefix, None);
    }

    #[test]
    fn later_sources_take_precedence() {
        let config = ConfigurationLoader::default()
            .with_defaults(serde_json::json!({ "period_ms": 60000 }))
            .with_defaults(serde_json::json!({ "period_ms": 1000 }))
            .into_generic();

        assert_eq!(config.get_typed::<u64>("period_ms").unwrap(), 1000);
    }

    #[test]
    fn missing_field_is_distinguishable() {
        let config = ConfigurationLoader::default()
            .with_defaults(serde_json::json!({ "period_ms": 60000 }))
            .into_generic();

        assert!(matches!(
            config.get_typed::<String>("email"),
            Err(ConfigurationError::MissingField { .. })
        ));
        assert_eq!(config.try_get_typed::<String>("email").unwrap(), None);
    }

    #[test]
    fn empty_prefix_is_rejected() {
        assert!(matches!(
            ConfigurationLoader::default().from_environment(""),
            Err(ConfigurationError::EmptyPrefix)
        ));
    }
}
