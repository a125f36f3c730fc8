use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::ResultExt as _;
use tracing::debug;
use whippet_config::{ConfigurationError, GenericConfiguration};

use crate::{Client, EmptyGaugeName, Gauge, Http, MissingMetricName, Payload, Request, Transport, TransportError};

const DEFAULT_ENDPOINT: &str = "https://metrics-api.librato.com";

const USER_AGENT: &str = concat!("whippet/", env!("CARGO_PKG_VERSION"));

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

/// Librato API client configuration.
#[derive(Clone, Deserialize)]
pub struct LibratoConfiguration {
    /// Account email, used for HTTP basic authentication.
    email: String,

    /// API token, used for HTTP basic authentication.
    token: String,

    /// Base endpoint of the metrics API.
    ///
    /// Defaults to `https://metrics-api.librato.com`.
    #[serde(default = "default_endpoint")]
    endpoint: String,
}

impl LibratoConfiguration {
    /// Creates a new `LibratoConfiguration` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the required credential fields (`email`, `token`) are missing, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, ConfigurationError> {
        let this: Self = config.as_typed()?;
        this.validated()
    }

    /// Creates a new `LibratoConfiguration` from the given credentials, targeting the default endpoint.
    ///
    /// # Errors
    ///
    /// If either credential is empty, an error is returned.
    pub fn from_credentials(email: impl Into<String>, token: impl Into<String>) -> Result<Self, ConfigurationError> {
        let this = Self {
            email: email.into(),
            token: token.into(),
            endpoint: default_endpoint(),
        };
        this.validated()
    }

    /// Overrides the base endpoint that payloads are sent to.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn validated(self) -> Result<Self, ConfigurationError> {
        if self.email.is_empty() {
            return Err(ConfigurationError::InvalidFieldValue {
                field: "email".to_string(),
                reason: "credentials must not be empty".to_string(),
            });
        }
        if self.token.is_empty() {
            return Err(ConfigurationError::InvalidFieldValue {
                field: "token".to_string(),
                reason: "credentials must not be empty".to_string(),
            });
        }
        Ok(self)
    }
}

/// Librato metrics API client.
///
/// Implements [`Transport`] for gauge batch submission, along with the ancillary single-metric operations the API
/// exposes: updating a metric's stored attributes and creating annotation events.
pub struct LibratoClient {
    client: reqwest::Client,
    config: LibratoConfiguration,
}

impl LibratoClient {
    /// Creates a new `LibratoClient` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the underlying HTTP client could not be constructed, an error is returned.
    pub fn from_configuration(config: LibratoConfiguration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build().context(Client)?;

        Ok(Self { client, config })
    }

    async fn post_json<B>(&self, url: String, body: &B) -> Result<(), TransportError>
    where
        B: Serialize + Sync + ?Sized,
    {
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.email, Some(&self.config.token))
            .json(body)
            .send()
            .await
            .context(Request)?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Http {
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        Ok(())
    }

    /// Submits a batch of gauges to the metrics ingestion endpoint.
    ///
    /// Empty batches return immediately without making a request.
    ///
    /// # Errors
    ///
    /// If the batch is malformed, or the request fails or is rejected, an error is returned.
    pub async fn post_gauges(&self, gauges: &[Gauge]) -> Result<(), TransportError> {
        if gauges.is_empty() {
            return Ok(());
        }

        let payload = GaugePayload::from_gauges(gauges).context(Payload)?;

        debug!(gauges_len = gauges.len(), "Posting gauge batch.");

        self.post_json(format!("{}/v1/metrics", self.config.endpoint), &payload).await
    }

    /// Updates the stored attributes of a single metric.
    ///
    /// The attributes value is passed through opaquely, as the backend's attribute schema evolves independently of
    /// this client.
    ///
    /// # Errors
    ///
    /// If the metric name is empty, or the request fails or is rejected, an error is returned.
    pub async fn update_metric(&self, name: &str, attributes: &serde_json::Value) -> Result<(), TransportError> {
        if name.is_empty() {
            return MissingMetricName.fail().context(Payload);
        }

        self.post_json(format!("{}/v1/metrics/{}", self.config.endpoint, name), attributes)
            .await
    }

    /// Creates an annotation event in the given annotation stream.
    ///
    /// # Errors
    ///
    /// If the stream name is empty, or the request fails or is rejected, an error is returned.
    pub async fn create_annotation(&self, stream: &str, annotation: &serde_json::Value) -> Result<(), TransportError> {
        if stream.is_empty() {
            return MissingMetricName.fail().context(Payload);
        }

        self.post_json(format!("{}/v1/annotations/{}", self.config.endpoint, stream), annotation)
            .await
    }
}

#[async_trait]
impl Transport for LibratoClient {
    async fn submit(&self, gauges: &[Gauge]) -> Result<(), TransportError> {
        self.post_gauges(gauges).await
    }
}

#[derive(Serialize)]
struct GaugePayload<'a> {
    gauges: &'a [Gauge],
}

impl<'a> GaugePayload<'a> {
    fn from_gauges(gauges: &'a [Gauge]) -> Result<Self, crate::PayloadError> {
        for (index, gauge) in gauges.iter().enumerate() {
            if gauge.name.is_empty() {
                return EmptyGaugeName { index }.fail();
            }
        }

        Ok(Self { gauges })
    }
}
