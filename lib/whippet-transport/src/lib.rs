//! Transport boundary for shipping aggregated metrics to a remote metrics backend.
//!
//! The engine in `whippet-core` hands finished batches to a [`Transport`] implementation and otherwise knows nothing
//! about the backend. [`LibratoClient`] is the production implementation, speaking the Librato metrics API over
//! HTTPS with basic authentication.
#![deny(warnings)]
#![deny(missing_docs)]

use async_trait::async_trait;
use serde::Serialize;
use snafu::Snafu;

mod librato;
pub use self::librato::{LibratoClient, LibratoConfiguration};

/// A single wire-ready gauge reading.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Gauge {
    /// Full emitted metric name, including any configured prefix.
    pub name: String,

    /// Aggregated value.
    pub value: f64,

    /// Source tag partitioning readings within a metric name.
    pub source: String,
}

/// A malformed batch error.
///
/// Raised while constructing a wire payload, before any request is made. Distinct from [`TransportError`] failures,
/// which describe problems talking to the backend: a payload error is a programming error on the sending side.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum PayloadError {
    /// A gauge in the batch had an empty name.
    #[snafu(display("Gauge at index {} has an empty name.", index))]
    EmptyGaugeName {
        /// Position of the offending gauge within the batch.
        index: usize,
    },

    /// A single-metric operation was attempted without a metric name.
    #[snafu(display("Metric operations require a non-empty metric name."))]
    MissingMetricName,
}

/// A transport error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum TransportError {
    /// The batch was malformed and no request was attempted.
    #[snafu(display("Failed to construct payload."))]
    Payload {
        /// Error source.
        source: PayloadError,
    },

    /// The HTTP client could not be constructed.
    #[snafu(display("Failed to construct HTTP client."))]
    Client {
        /// Error source.
        source: reqwest::Error,
    },

    /// The request could not be sent, or the response could not be read.
    #[snafu(display("Failed to send request to metrics backend."))]
    Request {
        /// Error source.
        source: reqwest::Error,
    },

    /// The backend rejected the request.
    #[snafu(display("Metrics backend returned HTTP {}: {}", status, body))]
    Http {
        /// HTTP status code of the response.
        status: u16,

        /// Response body, if one could be read.
        body: String,
    },
}

/// A transport that delivers batches of aggregated gauge readings to a remote metrics backend.
///
/// The submit call always settles: it resolves with an opaque acknowledgement on success, or an error describing the
/// failure. Callers own the policy for failed submissions; the transport never retries on its own.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Submits a batch of gauges.
    ///
    /// # Errors
    ///
    /// If the batch is malformed, or if the backend could not be reached or rejected the batch, an error is
    /// returned. The batch is never partially submitted.
    async fn submit(&self, gauges: &[Gauge]) -> Result<(), TransportError>;
}
