use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{instrument, warn};

use relay_core::{Capability, CapabilityError, Context, HandlerOutput};

use crate::error::{parse_endpoint, Result};

/// Capability implemented by an external service.
///
/// Each invocation POSTs `{"input": ..., "context": ...}` to the endpoint
/// and expects the handler envelope `{response, context, complete, error?}`
/// back. Missing envelope fields take their defaults.
pub struct HttpCapability {
    name: String,
    description: String,
    endpoint: reqwest::Url,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct InvokeRequest<'a> {
    input: &'a str,
    context: &'a Context,
}

impl HttpCapability {
    pub fn new(name: &str, endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Self::with_client(name, endpoint, client)
    }

    /// Build with a shared HTTP client.
    pub fn with_client(name: &str, endpoint: &str, client: reqwest::Client) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            description: String::new(),
            endpoint: parse_endpoint(endpoint)?,
            client,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn endpoint(&self) -> &reqwest::Url {
        &self.endpoint
    }
}

#[async_trait]
impl Capability for HttpCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    #[instrument(skip_all, fields(capability = %self.name, endpoint = %self.endpoint))]
    async fn invoke(
        &self,
        input: &str,
        context: &Context,
    ) -> std::result::Result<HandlerOutput, CapabilityError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&InvokeRequest { input, context })
            .send()
            .await
            .map_err(|e| CapabilityError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "capability endpoint returned an error");
            return Err(CapabilityError::Failed(format!(
                "{} returned {}: {}",
                self.name,
                status.as_u16(),
                body.trim()
            )));
        }

        response
            .json::<HandlerOutput>()
            .await
            .map_err(|e| CapabilityError::InvalidResponse(e.to_string()))
    }
}
