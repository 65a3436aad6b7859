//! Reqwest-based HTTP client for the remote license server.
//!
//! Only the online [`crate::validator::Validator`] receives a
//! [`LicenseServer`]. The air-gap manager has no field that could hold one.

use crate::config::ValidatorConfig;
use crate::protocol::models::{
    parse_activation_response, ActivationRequest, ActivationResponse, DeactivationRequest,
};
use crate::TierwardenError;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::StatusCode;

/// Remote license server operations used by the validator.
///
/// Calls are blocking; the validator runs them off the async executor.
pub trait LicenseServer: Send + Sync {
    /// Activate or re-validate a license key.
    ///
    /// `Ok` with `valid = false` means the server no longer honors the key.
    /// `Err` means the server could not be asked (transient).
    fn activate(&self, license_key: &str) -> Result<ActivationResponse, TierwardenError>;

    /// Release the activation of a license key.
    fn deactivate(&self, license_key: &str) -> Result<(), TierwardenError>;

    /// Base URL of the license server.
    fn server_url(&self) -> &str;
}

/// License server client over HTTPS.
pub struct HttpLicenseServer {
    client: Client,
    user_agent: String,
    base_url: String,
    product: String,
}

impl HttpLicenseServer {
    /// Create a new client from config.
    pub fn new(config: &ValidatorConfig) -> Result<Self, TierwardenError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                TierwardenError::ServerTransport(format!("Failed to create client: {}", e))
            })?;

        Ok(Self {
            client,
            user_agent: build_user_agent(config),
            base_url: config.server_url.trim_end_matches('/').to_string(),
            product: config.product.to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn post_json<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<(StatusCode, Vec<u8>), TierwardenError> {
        let response = self
            .client
            .post(self.endpoint(path))
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/json")
            .json(body)
            .send()
            .map_err(|e| TierwardenError::ServerTransport(format!("Request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .bytes()
            .map_err(|e| TierwardenError::ServerTransport(format!("Failed to read body: {}", e)))?
            .to_vec();

        Ok((status, body))
    }
}

impl LicenseServer for HttpLicenseServer {
    fn activate(&self, license_key: &str) -> Result<ActivationResponse, TierwardenError> {
        let request = ActivationRequest {
            license_key,
            product: &self.product,
        };
        let (status, body) = self.post_json("activate", &request)?;
        interpret_activation(status, &body)
    }

    fn deactivate(&self, license_key: &str) -> Result<(), TierwardenError> {
        let (status, _) = self.post_json("deactivate", &DeactivationRequest { license_key })?;
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(TierwardenError::ProtocolError(format!(
                "deactivate returned HTTP {}",
                status.as_u16()
            )))
        }
    }

    fn server_url(&self) -> &str {
        &self.base_url
    }
}

/// Map an activation HTTP response onto the server's verdict.
///
/// 403 and 410 are definitive refusals; any other non-2xx is treated as the
/// server being unavailable.
pub fn interpret_activation(
    status: StatusCode,
    body: &[u8],
) -> Result<ActivationResponse, TierwardenError> {
    if status == StatusCode::FORBIDDEN || status == StatusCode::GONE {
        let message = parse_activation_response(body)
            .ok()
            .and_then(|r| r.message)
            .or_else(|| Some(format!("HTTP {}", status.as_u16())));
        return Ok(ActivationResponse {
            valid: false,
            license_key: None,
            message,
        });
    }

    if !status.is_success() {
        return Err(TierwardenError::ProtocolError(format!(
            "activate returned HTTP {}",
            status.as_u16()
        )));
    }

    parse_activation_response(body)
}

/// Pricing endpoint for a product, proxied verbatim by the HTTP layer.
pub fn pricing_url(server_url: &str, product: &str) -> String {
    format!(
        "{}/products/{}/pricing",
        server_url.trim_end_matches('/'),
        product
    )
}

/// Build a User-Agent string from config.
///
/// Format: `<product>/tierwarden-<version>`
pub fn build_user_agent(config: &ValidatorConfig) -> String {
    format!(
        "{}/tierwarden-{}",
        config.user_agent_product,
        env!("CARGO_PKG_VERSION")
    )
}
