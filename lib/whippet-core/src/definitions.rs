//! Metric definitions and the registry that resolves them.
//!
//! A [`MetricDefinition`] describes how a single metric key is aggregated: the reduction applied locally to buffered
//! samples, the reduction hint passed to the backend, the submission period, and so on. Definitions are declared up
//! front in configuration, validated once at construction, and are immutable afterwards. Keys that were never
//! declared resolve to a synthesized default definition, and the recording API may lazily register definitions for
//! such keys through a single, explicit mutation path ([`DefinitionRegistry::auto_register`]).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use serde::Deserialize;
use whippet_config::ConfigurationError;

/// Reserved definitions key that overrides the synthesized default definition.
pub const DEFAULT_DEFINITION_KEY: &str = "__default";

const DEFAULT_QUANTILES: [f64; 5] = [0.0, 0.25, 0.5, 0.75, 1.0];

/// Reduction applied locally to a key's buffered samples before submission.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ClientAggFunction {
    /// Sum of all samples.
    Sum,

    /// Arithmetic mean of all samples.
    Mean,

    /// Median of all samples.
    Median,

    /// Smallest sample.
    Min,

    /// Largest sample.
    Max,

    /// Population standard deviation of all samples.
    StdDev,

    /// A configured set of quantiles, emitting one output metric per quantile.
    Quantiles,
}

impl ClientAggFunction {
    /// Returns the server-side function implied by this client function, where one exists.
    ///
    /// `median`, `std_dev` and `quantiles` have no server-side equivalent and must be paired with an explicitly
    /// declared server function.
    fn implied_server(self) -> Option<ServerAggFunction> {
        match self {
            Self::Sum => Some(ServerAggFunction::Sum),
            Self::Mean => Some(ServerAggFunction::Average),
            Self::Min => Some(ServerAggFunction::Min),
            Self::Max => Some(ServerAggFunction::Max),
            Self::Median | Self::StdDev | Self::Quantiles => None,
        }
    }
}

impl fmt::Display for ClientAggFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Median => "median",
            Self::Min => "min",
            Self::Max => "max",
            Self::StdDev => "std_dev",
            Self::Quantiles => "quantiles",
        };
        f.write_str(s)
    }
}

/// Reduction hint passed to the backend, describing how submitted points should be combined over time.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ServerAggFunction {
    /// Sum of submitted points.
    Sum,

    /// Average of submitted points.
    Average,

    /// Count of submitted points.
    Count,

    /// Smallest submitted point.
    Min,

    /// Largest submitted point.
    Max,
}

impl ServerAggFunction {
    /// Returns the client-side function implied by this server function, where one exists.
    ///
    /// `count` has no client-side equivalent.
    fn implied_client(self) -> Option<ClientAggFunction> {
        match self {
            Self::Sum => Some(ClientAggFunction::Sum),
            Self::Average => Some(ClientAggFunction::Mean),
            Self::Min => Some(ClientAggFunction::Min),
            Self::Max => Some(ClientAggFunction::Max),
            Self::Count => None,
        }
    }
}

impl fmt::Display for ServerAggFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sum => "sum",
            Self::Average => "average",
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
        };
        f.write_str(s)
    }
}

/// Declared type of a metric.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// A point-in-time measurement.
    #[default]
    Gauge,

    /// A monotonically accumulated count. Forces both aggregation functions to `sum`.
    Counter,
}

/// A metric definition as declared in configuration, before validation.
///
/// Every field is optional; [`DeclaredDefinition::resolve`] derives the missing pieces and validates the
/// cross-field invariants.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DeclaredDefinition {
    /// Declared metric type.
    ///
    /// Declaring `counter` forces both aggregation functions to `sum`.
    #[serde(rename = "type", default)]
    pub kind: Option<MetricKind>,

    /// Reduction applied locally to buffered samples.
    #[serde(default)]
    pub client_agg_function: Option<ClientAggFunction>,

    /// Reduction hint passed to the backend.
    ///
    /// When unset, derived from the client function (`mean` maps to `average`).
    #[serde(default, alias = "librato_agg_function")]
    pub server_agg_function: Option<ServerAggFunction>,

    /// Submission period for this key, in milliseconds.
    ///
    /// Defaults to the engine-wide period.
    #[serde(default)]
    pub period_ms: Option<u64>,

    /// Quantiles to emit, each in `[0, 1]`.
    ///
    /// Only meaningful when the client function is `quantiles`. Defaults to `[0, 0.25, 0.5, 0.75, 1]`.
    #[serde(default)]
    pub quantiles: Option<Vec<f64>>,

    /// Source tag override for samples recorded without one.
    #[serde(default)]
    pub source: Option<String>,

    /// Opaque attributes passed through to the backend.
    #[serde(default, alias = "librato_options")]
    pub metric_properties: serde_json::Map<String, serde_json::Value>,
}

impl DeclaredDefinition {
    /// Resolves this declaration into a validated [`MetricDefinition`] for the given key.
    ///
    /// # Errors
    ///
    /// If neither aggregation function is declared (for a non-counter metric), if a missing function cannot be
    /// derived from its counterpart, if the period is zero, or if a quantile falls outside `[0, 1]`, an error is
    /// returned.
    pub fn resolve(&self, key: &str, default_period: Duration) -> Result<MetricDefinition, ConfigurationError> {
        let kind = self.kind.unwrap_or_default();

        let (client_agg, server_agg) = if kind == MetricKind::Counter {
            (ClientAggFunction::Sum, ServerAggFunction::Sum)
        } else {
            match (self.client_agg_function, self.server_agg_function) {
                (Some(client), Some(server)) => (client, server),
                (Some(client), None) => {
                    let server = client.implied_server().ok_or_else(|| {
                        invalid_definition(
                            key,
                            format!(
                                "no server aggregation function can be derived from client function '{}'; declare server_agg_function explicitly",
                                client
                            ),
                        )
                    })?;
                    (client, server)
                }
                (None, Some(server)) => {
                    let client = server.implied_client().ok_or_else(|| {
                        invalid_definition(
                            key,
                            format!(
                                "no client aggregation function can be derived from server function '{}'; declare client_agg_function explicitly",
                                server
                            ),
                        )
                    })?;
                    (client, server)
                }
                (None, None) => {
                    return Err(invalid_definition(
                        key,
                        "a client or server aggregation function must be declared".to_string(),
                    ))
                }
            }
        };

        let period = match self.period_ms {
            Some(0) => return Err(invalid_definition(key, "period_ms must be positive".to_string())),
            Some(ms) => Duration::from_millis(ms),
            None => default_period,
        };

        let quantiles = self.quantiles.clone().unwrap_or_else(|| DEFAULT_QUANTILES.to_vec());
        for q in &quantiles {
            if !(0.0..=1.0).contains(q) {
                return Err(invalid_definition(key, format!("quantile {} is outside [0, 1]", q)));
            }
        }

        Ok(MetricDefinition {
            key: key.to_string(),
            kind,
            client_agg,
            server_agg,
            period,
            quantiles,
            source: self.source.clone(),
            properties: self.metric_properties.clone(),
        })
    }
}

fn invalid_definition(key: &str, reason: String) -> ConfigurationError {
    ConfigurationError::InvalidFieldValue {
        field: format!("definitions.{}", key),
        reason,
    }
}

/// A validated, fully-resolved metric definition.
///
/// Immutable once constructed.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricDefinition {
    key: String,
    kind: MetricKind,
    client_agg: ClientAggFunction,
    server_agg: ServerAggFunction,
    period: Duration,
    quantiles: Vec<f64>,
    source: Option<String>,
    properties: serde_json::Map<String, serde_json::Value>,
}

impl MetricDefinition {
    /// Metric key this definition applies to.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Declared metric type.
    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Reduction applied locally to buffered samples.
    pub fn client_agg(&self) -> ClientAggFunction {
        self.client_agg
    }

    /// Reduction hint passed to the backend.
    pub fn server_agg(&self) -> ServerAggFunction {
        self.server_agg
    }

    /// Submission period for this key.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Quantiles to emit when the client function is `quantiles`.
    pub fn quantiles(&self) -> &[f64] {
        &self.quantiles
    }

    /// Source tag override for samples recorded without one.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Opaque attributes passed through to the backend.
    pub fn properties(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.properties
    }
}

/// Registry of metric definitions for one engine instance.
pub struct DefinitionRegistry {
    definitions: AHashMap<String, Arc<MetricDefinition>>,
    default_template: Arc<MetricDefinition>,
    default_period: Duration,
}

impl DefinitionRegistry {
    /// Builds a registry from declared definitions, validating each one.
    ///
    /// The reserved `__default` key, if present, overrides the synthesized default definition used for
    /// never-declared keys; it defaults to `mean` aggregation when it declares no function itself.
    ///
    /// # Errors
    ///
    /// If any declared definition fails validation, an error is returned.
    pub fn from_declared(
        declared: &HashMap<String, DeclaredDefinition>, default_period: Duration,
    ) -> Result<Self, ConfigurationError> {
        let mut definitions = AHashMap::default();
        let mut default_template = None;

        for (key, declaration) in declared {
            if key == DEFAULT_DEFINITION_KEY {
                let mut declaration = declaration.clone();
                if declaration.client_agg_function.is_none()
                    && declaration.server_agg_function.is_none()
                    && declaration.kind != Some(MetricKind::Counter)
                {
                    declaration.client_agg_function = Some(ClientAggFunction::Mean);
                }
                default_template = Some(Arc::new(declaration.resolve(key, default_period)?));
            } else {
                definitions.insert(key.clone(), Arc::new(declaration.resolve(key, default_period)?));
            }
        }

        let default_template = match default_template {
            Some(template) => template,
            None => Arc::new(MetricDefinition {
                key: DEFAULT_DEFINITION_KEY.to_string(),
                kind: MetricKind::Gauge,
                client_agg: ClientAggFunction::Mean,
                server_agg: ServerAggFunction::Average,
                period: default_period,
                quantiles: DEFAULT_QUANTILES.to_vec(),
                source: None,
                properties: serde_json::Map::new(),
            }),
        };

        Ok(Self {
            definitions,
            default_template,
            default_period,
        })
    }

    /// Returns the declared (or lazily registered) definition for the given key, if any.
    pub fn get(&self, key: &str) -> Option<Arc<MetricDefinition>> {
        self.definitions.get(key).map(Arc::clone)
    }

    /// Resolves the definition for a key.
    ///
    /// Undeclared keys resolve to the default definition stamped with the requested key; the synthesized value is
    /// not persisted into the registry.
    pub fn resolve(&self, key: &str) -> Arc<MetricDefinition> {
        match self.definitions.get(key) {
            Some(definition) => Arc::clone(definition),
            None => {
                let mut definition = (*self.default_template).clone();
                definition.key = key.to_string();
                Arc::new(definition)
            }
        }
    }

    /// Registers a definition for a previously-undeclared key with the given client aggregation function.
    ///
    /// Returns the existing definition when the key is already registered. This is the only mutation path after
    /// construction; it is used by the recording API to register keys on first use.
    pub fn auto_register(&mut self, key: &str, client_agg: ClientAggFunction) -> Arc<MetricDefinition> {
        if let Some(definition) = self.definitions.get(key) {
            return Arc::clone(definition);
        }

        let server_agg = client_agg.implied_server().unwrap_or(ServerAggFunction::Average);
        let definition = Arc::new(MetricDefinition {
            key: key.to_string(),
            kind: MetricKind::Gauge,
            client_agg,
            server_agg,
            period: self.default_period,
            quantiles: DEFAULT_QUANTILES.to_vec(),
            source: None,
            properties: serde_json::Map::new(),
        });
        self.definitions.insert(key.to_string(), Arc::clone(&definition));

        definition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Duration = Duration::from_millis(60_000);

    fn registry(declared: &[(&str, DeclaredDefinition)]) -> DefinitionRegistry {
        let declared = declared
            .iter()
            .map(|(key, def)| (key.to_string(), def.clone()))
            .collect::<HashMap<_, _>>();
        DefinitionRegistry::from_declared(&declared, PERIOD).unwrap()
    }

    #[test]
    fn counter_kind_forces_sum_aggregation() {
        let declaration = DeclaredDefinition {
            kind: Some(MetricKind::Counter),
            client_agg_function: Some(ClientAggFunction::Mean),
            server_agg_function: Some(ServerAggFunction::Average),
            ..Default::default()
        };

        let definition = declaration.resolve("requests", PERIOD).unwrap();
        assert_eq!(definition.client_agg(), ClientAggFunction::Sum);
        assert_eq!(definition.server_agg(), ServerAggFunction::Sum);
    }

    #[test]
    fn server_function_derived_from_client() {
        let declaration = DeclaredDefinition {
            client_agg_function: Some(ClientAggFunction::Mean),
            ..Default::default()
        };

        let definition = declaration.resolve("latency", PERIOD).unwrap();
        assert_eq!(definition.server_agg(), ServerAggFunction::Average);
    }

    #[test]
    fn client_function_derived_from_server() {
        let declaration = DeclaredDefinition {
            server_agg_function: Some(ServerAggFunction::Average),
            ..Default::default()
        };

        let definition = declaration.resolve("latency", PERIOD).unwrap();
        assert_eq!(definition.client_agg(), ClientAggFunction::Mean);
    }

    #[test]
    fn underivable_functions_fail_resolution() {
        // `median` has no server-side equivalent.
        let median_only = DeclaredDefinition {
            client_agg_function: Some(ClientAggFunction::Median),
            ..Default::default()
        };
        assert!(median_only.resolve("latency", PERIOD).is_err());

        // `count` has no client-side equivalent.
        let count_only = DeclaredDefinition {
            server_agg_function: Some(ServerAggFunction::Count),
            ..Default::default()
        };
        assert!(count_only.resolve("latency", PERIOD).is_err());

        // Declaring neither function is invalid.
        assert!(DeclaredDefinition::default().resolve("latency", PERIOD).is_err());
    }

    #[test]
    fn period_and_quantiles_are_defaulted_and_validated() {
        let declaration = DeclaredDefinition {
            client_agg_function: Some(ClientAggFunction::Quantiles),
            server_agg_function: Some(ServerAggFunction::Min),
            ..Default::default()
        };

        let definition = declaration.resolve("latency", PERIOD).unwrap();
        assert_eq!(definition.period(), PERIOD);
        assert_eq!(definition.quantiles(), &[0.0, 0.25, 0.5, 0.75, 1.0]);

        let zero_period = DeclaredDefinition {
            client_agg_function: Some(ClientAggFunction::Sum),
            period_ms: Some(0),
            ..Default::default()
        };
        assert!(zero_period.resolve("latency", PERIOD).is_err());

        let bad_quantile = DeclaredDefinition {
            client_agg_function: Some(ClientAggFunction::Quantiles),
            server_agg_function: Some(ServerAggFunction::Min),
            quantiles: Some(vec![0.5, 1.5]),
            ..Default::default()
        };
        assert!(bad_quantile.resolve("latency", PERIOD).is_err());
    }

    #[test]
    fn resolve_synthesizes_defaults_without_persisting() {
        let registry = registry(&[]);

        let definition = registry.resolve("undeclared");
        assert_eq!(definition.key(), "undeclared");
        assert_eq!(definition.client_agg(), ClientAggFunction::Mean);
        assert_eq!(definition.period(), PERIOD);

        assert!(registry.get("undeclared").is_none());
    }

    #[test]
    fn default_definition_key_overrides_synthesized_default() {
        let registry = registry(&[(
            DEFAULT_DEFINITION_KEY,
            DeclaredDefinition {
                client_agg_function: Some(ClientAggFunction::Max),
                ..Default::default()
            },
        )]);

        let definition = registry.resolve("undeclared");
        assert_eq!(definition.key(), "undeclared");
        assert_eq!(definition.client_agg(), ClientAggFunction::Max);

        // The reserved key itself is not a resolvable metric definition.
        assert!(registry.get(DEFAULT_DEFINITION_KEY).is_none());
    }

    #[test]
    fn auto_register_persists_and_is_idempotent() {
        let mut registry = registry(&[]);

        let first = registry.auto_register("hits", ClientAggFunction::Sum);
        assert_eq!(first.client_agg(), ClientAggFunction::Sum);
        assert_eq!(first.server_agg(), ServerAggFunction::Sum);
        assert!(registry.get("hits").is_some());

        // A second registration with a different function does not overwrite the first.
        let second = registry.auto_register("hits", ClientAggFunction::Mean);
        assert_eq!(second.client_agg(), ClientAggFunction::Sum);
    }
}
