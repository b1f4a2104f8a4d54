use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::QueuedLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Network error, timeout or a non-2xx, non-401 status.
    Retry,
    /// The bearer token was rejected.
    Unauthorized,
}

/// Delivers one queued location. Implementations never fail past this
/// boundary; every problem is folded into a [`SendOutcome`].
#[async_trait]
pub trait Uplink: Send + Sync {
    async fn send(&self, item: &QueuedLocation, token: &str) -> SendOutcome;
}

pub struct HttpUplink {
    client: Client,
    endpoint: String,
}

impl HttpUplink {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Uplink for HttpUplink {
    async fn send(&self, item: &QueuedLocation, token: &str) -> SendOutcome {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&item.to_payload())
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                debug!(
                    kind = %item.kind,
                    session_id = %item.session_id,
                    status = resp.status().as_u16(),
                    "Location delivered"
                );
                SendOutcome::Sent
            }
            Ok(resp) if resp.status() == StatusCode::UNAUTHORIZED => {
                warn!(session_id = %item.session_id, "Location rejected: token expired");
                SendOutcome::Unauthorized
            }
            Ok(resp) => {
                warn!(
                    kind = %item.kind,
                    status = resp.status().as_u16(),
                    "Location not accepted, keeping it queued"
                );
                SendOutcome::Retry
            }
            Err(e) if e.is_timeout() => {
                warn!(kind = %item.kind, "Location upload timed out");
                SendOutcome::Retry
            }
            Err(e) => {
                warn!(kind = %item.kind, error = %e, "Location upload failed");
                SendOutcome::Retry
            }
        }
    }
}
