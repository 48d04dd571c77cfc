use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue};
use reqwest::{Client, Url};
use serde::Deserialize;

use crate::common::{ChatMessage, OutgoingMessage, Peer};
use crate::error::ClientError;

/// Cookie the server reads the session token from.
pub const ACCESS_TOKEN_COOKIE: &str = "user_access_token";

/// Server-side conversation storage.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Full ordered history between us and `peer_id`.
    async fn history(&self, peer_id: &str) -> Result<Vec<ChatMessage>, ClientError>;
    async fn send_message(&self, message: &OutgoingMessage) -> Result<(), ClientError>;
    async fn roster(&self) -> Result<Vec<Peer>, ClientError>;
}

/// The part of the auth service the client calls.
#[async_trait]
pub trait AuthService: Send + Sync {
    async fn logout(&self) -> Result<(), ClientError>;
}

#[derive(Debug, Deserialize)]
struct SendAck {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// JSON-over-HTTP client for the chat server.
#[derive(Debug, Clone)]
pub struct HttpStore {
    client: Client,
    base: Url,
}

impl HttpStore {
    pub fn new(
        base: Url,
        access_token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = access_token {
            let cookie = HeaderValue::from_str(&format!("{ACCESS_TOKEN_COOKIE}={token}"))
                .map_err(|err| ClientError::Config(format!("access token: {err}")))?;
            headers.insert(COOKIE, cookie);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self { client, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base.join(path).map_err(|err| ClientError::InvalidUrl {
            url: format!("{}{path}", self.base),
            reason: err.to_string(),
        })
    }
}

#[async_trait]
impl ConversationStore for HttpStore {
    async fn history(&self, peer_id: &str) -> Result<Vec<ChatMessage>, ClientError> {
        let url = self.endpoint(&format!("chat/messages/{peer_id}"))?;
        let messages = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<ChatMessage>>()
            .await?;
        Ok(messages)
    }

    async fn send_message(&self, message: &OutgoingMessage) -> Result<(), ClientError> {
        let url = self.endpoint("chat/messages")?;
        let ack = self
            .client
            .post(url)
            .json(message)
            .send()
            .await?
            .error_for_status()?
            .json::<SendAck>()
            .await?;

        match ack.status.as_deref() {
            None | Some("ok") => Ok(()),
            Some(status) => Err(ClientError::Rejected(
                ack.message.unwrap_or_else(|| status.to_string()),
            )),
        }
    }

    async fn roster(&self) -> Result<Vec<Peer>, ClientError> {
        let url = self.endpoint("auth/users")?;
        let peers = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<Peer>>()
            .await?;
        Ok(peers)
    }
}

#[async_trait]
impl AuthService for HttpStore {
    async fn logout(&self) -> Result<(), ClientError> {
        let url = self.endpoint("auth/logout/")?;
        self.client.post(url).send().await?.error_for_status()?;
        Ok(())
    }
}
