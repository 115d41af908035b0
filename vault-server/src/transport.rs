use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use safe_vault::{PeerInfo, Result, VaultError};

/// Delivers encoded wire messages to other vaults' peer ports.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn send(&self, address: &str, body: Bytes) -> Result<()>;

    /// Asks the vault at `address` for its name.
    async fn identity(&self, address: &str) -> Result<PeerInfo>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VaultError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn send(&self, address: &str, body: Bytes) -> Result<()> {
        let url = format!("http://{}/v1/message", address);
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| VaultError::Routing(format!("Failed to reach {}: {}", address, e)))?;

        if !response.status().is_success() {
            return Err(VaultError::Routing(format!(
                "Peer {} rejected message: {}",
                address,
                response.status()
            )));
        }
        Ok(())
    }

    async fn identity(&self, address: &str) -> Result<PeerInfo> {
        let url = format!("http://{}/v1/identity", address);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| VaultError::Routing(format!("Failed to reach {}: {}", address, e)))?;

        if !response.status().is_success() {
            return Err(VaultError::Routing(format!(
                "Contact {} returned {}",
                address,
                response.status()
            )));
        }
        response
            .json::<PeerInfo>()
            .await
            .map_err(|e| VaultError::Codec(format!("Invalid identity from {}: {}", address, e)))
    }
}
