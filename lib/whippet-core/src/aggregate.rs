//! Reduction of buffered samples into named output values.

use std::sync::Arc;

use ahash::AHashMap;

use crate::buffer::{DrainedSamples, Sample};
use crate::definitions::{ClientAggFunction, DefinitionRegistry, MetricDefinition};
use crate::stats;

/// A single named output value produced by reducing one (key, source) sample set.
///
/// Scalar aggregation functions produce exactly one `AggregatedMetric` per (key, source) pair, named after the key
/// itself. A `quantiles` definition produces one per configured quantile, named `{key}.q{round(q * 100)}`.
#[derive(Clone, Debug)]
pub struct AggregatedMetric {
    name: String,
    value: f64,
    definition: Arc<MetricDefinition>,
}

impl AggregatedMetric {
    /// Output metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Aggregated value.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Definition the value was produced from.
    pub fn definition(&self) -> &Arc<MetricDefinition> {
        &self.definition
    }
}

/// Results of reducing a set of keys: key, then source, then the output values for that pair.
pub type AggregatedKeys = AHashMap<String, AHashMap<String, Vec<AggregatedMetric>>>;

/// Reduces one sample set according to the definition's client aggregation function.
///
/// An empty sample set yields no results. The quantile list of a `quantiles` definition may be empty (yielding
/// nothing) or contain duplicates; one output is produced per requested quantile, in request order.
pub fn aggregate_samples(samples: &[Sample], definition: &Arc<MetricDefinition>) -> Vec<AggregatedMetric> {
    if samples.is_empty() {
        return Vec::new();
    }

    let values = samples.iter().map(|sample| sample.value).collect::<Vec<_>>();

    match definition.client_agg() {
        ClientAggFunction::Quantiles => {
            let quantiles = definition.quantiles();
            stats::quantiles(&values, quantiles)
                .into_iter()
                .zip(quantiles)
                .map(|(value, q)| AggregatedMetric {
                    name: format!("{}.q{}", definition.key(), (q * 100.0).round() as u32),
                    value,
                    definition: Arc::clone(definition),
                })
                .collect()
        }
        scalar => {
            let value = match scalar {
                ClientAggFunction::Sum => stats::sum(&values),
                ClientAggFunction::Mean => stats::mean(&values),
                ClientAggFunction::Median => stats::median(&values),
                ClientAggFunction::Min => stats::min(&values),
                ClientAggFunction::Max => stats::max(&values),
                ClientAggFunction::StdDev => stats::std_dev(&values),
                ClientAggFunction::Quantiles => unreachable!("handled above"),
            };

            vec![AggregatedMetric {
                name: definition.key().to_string(),
                value,
                definition: Arc::clone(definition),
            }]
        }
    }
}

/// Reduces every (key, source) sample set in the given snapshot, each source independently.
pub fn aggregate_keys(samples: &DrainedSamples, registry: &DefinitionRegistry) -> AggregatedKeys {
    let mut results = AggregatedKeys::default();

    for (key, by_source) in samples {
        let definition = registry.resolve(key);

        for (source, samples) in by_source {
            let aggregated = aggregate_samples(samples, &definition);
            if !aggregated.is_empty() {
                results
                    .entry(key.clone())
                    .or_default()
                    .insert(source.clone(), aggregated);
            }
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::definitions::DeclaredDefinition;

    const PERIOD: Duration = Duration::from_millis(60_000);

    fn definition(client_agg: ClientAggFunction, quantiles: Option<Vec<f64>>) -> Arc<MetricDefinition> {
        let declaration = DeclaredDefinition {
            client_agg_function: Some(client_agg),
            server_agg_function: Some(crate::definitions::ServerAggFunction::Max),
            quantiles,
            ..Default::default()
        };
        Arc::new(declaration.resolve("foo", PERIOD).unwrap())
    }

    fn samples(values: &[f64]) -> Vec<Sample> {
        values
            .iter()
            .enumerate()
            .map(|(i, value)| Sample {
                value: *value,
                collected_at: i as u64,
            })
            .collect()
    }

    #[test]
    fn empty_sample_set_yields_nothing() {
        let definition = definition(ClientAggFunction::Sum, None);
        assert!(aggregate_samples(&[], &definition).is_empty());
    }

    #[test]
    fn scalar_functions_emit_one_result_named_after_the_key() {
        let cases = [
            (ClientAggFunction::Sum, 10.0),
            (ClientAggFunction::Mean, 2.5),
            (ClientAggFunction::Median, 2.5),
            (ClientAggFunction::Min, 1.0),
            (ClientAggFunction::Max, 4.0),
        ];

        for (function, expected) in cases {
            let definition = definition(function, None);
            let results = aggregate_samples(&samples(&[1.0, 2.0, 3.0, 4.0]), &definition);

            assert_eq!(results.len(), 1, "function {}", function);
            assert_eq!(results[0].name(), "foo");
            assert_eq!(results[0].value(), expected, "function {}", function);
        }
    }

    #[test]
    fn quantiles_emit_one_result_per_requested_quantile() {
        let definition = definition(ClientAggFunction::Quantiles, Some(vec![0.0, 0.25, 0.5, 0.75, 1.0]));
        let values = (0..=100).map(|v| v as f64).collect::<Vec<_>>();

        let results = aggregate_samples(&samples(&values), &definition);
        let named = results
            .iter()
            .map(|r| (r.name().to_string(), r.value()))
            .collect::<Vec<_>>();

        assert_eq!(
            named,
            vec![
                ("foo.q0".to_string(), 0.0),
                ("foo.q25".to_string(), 25.0),
                ("foo.q50".to_string(), 50.0),
                ("foo.q75".to_string(), 75.0),
                ("foo.q100".to_string(), 100.0),
            ]
        );
    }

    #[test]
    fn quantile_list_may_be_empty_or_contain_duplicates() {
        let empty = definition(ClientAggFunction::Quantiles, Some(Vec::new()));
        assert!(aggregate_samples(&samples(&[1.0, 2.0]), &empty).is_empty());

        let duplicated = definition(ClientAggFunction::Quantiles, Some(vec![0.5, 0.5]));
        let results = aggregate_samples(&samples(&[1.0, 2.0, 3.0]), &duplicated);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name(), "foo.q50");
        assert_eq!(results[1].name(), "foo.q50");
        assert_eq!(results[0].value(), 2.0);
    }

    #[test]
    fn sources_are_reduced_independently() {
        let declared = HashMap::from([(
            "foo_sum".to_string(),
            DeclaredDefinition {
                client_agg_function: Some(ClientAggFunction::Sum),
                ..Default::default()
            },
        )]);
        let registry = DefinitionRegistry::from_declared(&declared, PERIOD).unwrap();

        let mut buffered = DrainedSamples::default();
        let mut by_source = AHashMap::default();
        by_source.insert("bar".to_string(), samples(&[2.0]));
        by_source.insert("baz".to_string(), samples(&[3.0]));
        buffered.insert("foo_sum".to_string(), by_source);

        let results = aggregate_keys(&buffered, &registry);
        assert_eq!(results["foo_sum"]["bar"][0].value(), 2.0);
        assert_eq!(results["foo_sum"]["baz"][0].value(), 3.0);
    }
}
