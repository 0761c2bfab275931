//! Spreadsheet endpoint client
//!
//! The web app behind the endpoint does not send CORS headers, so a browser
//! can only talk to it in opaque mode. We keep the same contract here: the
//! record is POSTed and the response is dropped unread. A request that leaves
//! without a transport error counts as dispatched; nothing is ever confirmed
//! by the server.

use anyhow::Context;
use reqwest::Client;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::config::EndpointConfig;
use crate::form::FormRecord;

/// Transport failures, classified for user-facing advice.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Endpoint URL is not configured")]
    NotConfigured,

    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("Request rejected by endpoint: {0}")]
    CrossOriginRejected(String),

    #[error("Transport error: {0}")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    NotConfigured,
    NetworkUnreachable,
    CrossOriginRejected,
    Unknown,
}

impl TransportError {
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            TransportError::NotConfigured => TransportErrorKind::NotConfigured,
            TransportError::NetworkUnreachable(_) => TransportErrorKind::NetworkUnreachable,
            TransportError::CrossOriginRejected(_) => TransportErrorKind::CrossOriginRejected,
            TransportError::Unknown(_) => TransportErrorKind::Unknown,
        }
    }

    pub fn advisory(&self) -> String {
        let hint = match self {
            TransportError::NotConfigured => {
                "The spreadsheet endpoint is not set up yet. Put your web app URL in the config file or CONTACT_FORM_ENDPOINT_URL."
            }
            TransportError::NetworkUnreachable(_) => {
                "Check your internet connection and make sure the endpoint URL is correct."
            }
            TransportError::CrossOriginRejected(_) => {
                "The endpoint refused the request. The web app might not be deployed for access by anyone."
            }
            TransportError::Unknown(_) => "Please try again or check the setup guide.",
        };
        format!("Failed to save data. {hint}")
    }
}

/// Proof that a record left this process. Never implies the server stored it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchReceipt {
    pub dispatched: bool,
    pub server_confirmed: bool,
}

impl DispatchReceipt {
    /// Receipt for an opaque request: sent, but unacknowledged.
    pub fn opaque() -> Self {
        Self {
            dispatched: true,
            server_confirmed: false,
        }
    }
}

/// Sends form records somewhere.
pub trait Dispatcher: Send + Sync + 'static {
    fn dispatch(
        &self,
        record: &FormRecord,
    ) -> impl Future<Output = Result<DispatchReceipt, TransportError>> + Send;
}

/// reqwest-backed client for the spreadsheet web app.
pub struct SheetClient {
    client: Client,
    url: String,
    configured: bool,
}

impl SheetClient {
    pub fn from_config(endpoint: &EndpointConfig) -> anyhow::Result<Self> {
        let mut builder = Client::builder().danger_accept_invalid_certs(!endpoint.verify_ssl);
        if let Some(secs) = endpoint.timeout_seconds {
            builder = builder.timeout(Duration::from_secs(secs.max(1)));
        }
        let client = builder.build().context("Failed to build HTTP client")?;

        Ok(SheetClient {
            client,
            url: endpoint.url.trim().to_string(),
            configured: endpoint.is_configured(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// HEAD the endpoint. Reachable means the request completed; status is ignored.
    pub async fn probe(&self) -> Result<(), TransportError> {
        if !self.configured {
            return Err(TransportError::NotConfigured);
        }
        self.client
            .head(&self.url)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }
}

impl Dispatcher for SheetClient {
    async fn dispatch(&self, record: &FormRecord) -> Result<DispatchReceipt, TransportError> {
        if !self.configured {
            return Err(TransportError::NotConfigured);
        }

        // `.json()` sets `Content-Type: application/json`.
        let _response = self
            .client
            .post(&self.url)
            .json(record)
            .send()
            .await
            .map_err(classify)?;

        tracing::debug!(url = %self.url, "record dispatched");
        Ok(DispatchReceipt::opaque())
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    let detail = err.to_string();
    if err.is_connect() || err.is_timeout() {
        TransportError::NetworkUnreachable(detail)
    } else if err.is_redirect() || detail.to_ascii_lowercase().contains("cors") {
        TransportError::CrossOriginRejected(detail)
    } else {
        TransportError::Unknown(detail)
    }
}
