//! HTTP client for the device registry.
//!
//! Thin request/response wrapper: it knows the routes and the auth header,
//! and turns non-success responses into [`RegistryError::Rejected`] carrying
//! the server's body verbatim. Reconciling local state is left to callers.

use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{Device, DevicePatch, NewDevice};

// ---

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Non-success status. Displays the server's message as-is.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("registry request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed registry response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid registry URL: {0}")]
    InvalidUrl(String),
}

impl RegistryError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RegistryError::Rejected { status, .. } => Some(*status),
            RegistryError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Identity claim returned alongside the access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

/// Body of `POST /auth/google`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub user: Option<Identity>,
}

#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: Client,
    base: Url,
}

impl RegistryClient {
    // ---
    /// Build a client for the registry rooted at `base_url`
    /// (e.g. `http://127.0.0.1:8000/api`).
    pub fn new(base_url: &str) -> Result<Self, RegistryError> {
        // ---
        let base =
            Url::parse(base_url).map_err(|e| RegistryError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(RegistryError::InvalidUrl(base_url.to_string()));
        }

        Ok(Self {
            http: Client::new(),
            base,
        })
    }

    /// Join path segments onto the base, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Result<Url, RegistryError> {
        // ---
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RegistryError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// `GET /devices`
    pub async fn list_devices(&self) -> Result<Vec<Device>, RegistryError> {
        // ---
        let req = self.http.get(self.url(&["devices"])?);
        let body = send(req).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// `POST /device`
    pub async fn create_device(
        &self,
        token: &str,
        payload: &NewDevice,
    ) -> Result<Device, RegistryError> {
        // ---
        let req = self
            .http
            .post(self.url(&["device"])?)
            .bearer_auth(token)
            .json(payload);
        let body = send(req).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// `PATCH /device/{dev_eui}`
    pub async fn update_device(
        &self,
        token: &str,
        dev_eui: &str,
        patch: &DevicePatch,
    ) -> Result<Device, RegistryError> {
        // ---
        let req = self
            .http
            .patch(self.url(&["device", dev_eui])?)
            .bearer_auth(token)
            .json(patch);
        let body = send(req).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// `DELETE /device/{dev_eui}`
    pub async fn delete_device(&self, token: &str, dev_eui: &str) -> Result<(), RegistryError> {
        // ---
        let req = self
            .http
            .delete(self.url(&["device", dev_eui])?)
            .bearer_auth(token);
        send(req).await?;
        Ok(())
    }

    /// `GET /readings/{dev_eui}?limit=N`, returned undecoded: the payload shape
    /// has not always been a list and the caller decides how to treat it.
    pub async fn recent_readings(
        &self,
        dev_eui: &str,
        limit: u32,
    ) -> Result<serde_json::Value, RegistryError> {
        // ---
        let req = self
            .http
            .get(self.url(&["readings", dev_eui])?)
            .query(&[("limit", limit)]);
        let body = send(req).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// `GET /readings/latest/{dev_eui}`. The registry answers `{"error": ...}`
    /// rather than 404 when a device has no readings.
    pub async fn latest_reading(
        &self,
        dev_eui: &str,
    ) -> Result<Option<serde_json::Value>, RegistryError> {
        // ---
        let req = self.http.get(self.url(&["readings", "latest", dev_eui])?);
        let body = send(req).await?.text().await?;
        let value: serde_json::Value = serde_json::from_str(&body)?;

        if value.is_null() || value.get("error").is_some() {
            return Ok(None);
        }
        Ok(Some(value))
    }

    /// `GET /export/{dev_eui}`: CSV bytes, passed through untouched.
    pub async fn export_csv(&self, dev_eui: &str) -> Result<Vec<u8>, RegistryError> {
        // ---
        let req = self
            .http
            .get(self.url(&["export", dev_eui])?)
            .header(ACCEPT, "text/csv");
        Ok(send(req).await?.bytes().await?.to_vec())
    }

    /// `POST /auth/google`: trade an identity-provider ID token for a
    /// registry access token.
    pub async fn exchange_google_token(&self, id_token: &str) -> Result<AuthResponse, RegistryError> {
        // ---
        let req = self
            .http
            .post(self.url(&["auth", "google"])?)
            .json(&serde_json::json!({ "id_token": id_token }));
        let body = send(req).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Send a request and map non-success statuses to `Rejected`.
async fn send(req: RequestBuilder) -> Result<Response, RegistryError> {
    // ---
    let resp = req.send().await?;
    let status = resp.status();
    debug!("{} {}", status.as_u16(), resp.url());

    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        format!(
            "HTTP {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("error")
        )
    } else {
        body
    };
    Err(RegistryError::Rejected {
        status: status.as_u16(),
        message,
    })
}
