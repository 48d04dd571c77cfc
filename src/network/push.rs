use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future;
use futures::stream::BoxStream;
use futures::{Sink, SinkExt, StreamExt};
use reqwest::Url;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::common::OutgoingMessage;
use crate::error::ClientError;

use super::store::ACCESS_TOKEN_COOKIE;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = ClientError> + Send>>;
pub type FrameStream = BoxStream<'static, Result<String, ClientError>>;

/// An open duplex connection, reduced to text frames.
pub struct PushLink {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens the push connection for one peer.
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self, peer_id: &str) -> Result<PushLink, ClientError>;
}

/// What a push channel task reports back.
#[derive(Debug)]
pub enum PushEvent {
    Opened,
    Frame(String),
    Closed { reason: Option<String> },
}

/// WebSocket connector for `/chat/ws/{peer_id}`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    base: Url,
    access_token: Option<String>,
}

impl WsConnector {
    /// `server_url` is the http(s) base of the chat server.
    pub fn new(server_url: &Url, access_token: Option<String>) -> Result<Self, ClientError> {
        let mut base = server_url.clone();
        let scheme = match server_url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => {
                return Err(ClientError::InvalidUrl {
                    url: server_url.to_string(),
                    reason: format!("unsupported scheme `{other}`"),
                });
            }
        };
        base.set_scheme(scheme).map_err(|()| ClientError::InvalidUrl {
            url: server_url.to_string(),
            reason: format!("cannot switch to `{scheme}`"),
        })?;
        Ok(Self { base, access_token })
    }

    pub fn endpoint(&self, peer_id: &str) -> Result<Url, ClientError> {
        let path = format!("chat/ws/{peer_id}");
        self.base.join(&path).map_err(|err| ClientError::InvalidUrl {
            url: format!("{}{path}", self.base),
            reason: err.to_string(),
        })
    }
}

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(&self, peer_id: &str) -> Result<PushLink, ClientError> {
        let url = self.endpoint(peer_id)?;
        let mut request = url.as_str().into_client_request()?;
        if let Some(token) = &self.access_token {
            let cookie = HeaderValue::from_str(&format!("{ACCESS_TOKEN_COOKIE}={token}"))
                .map_err(|err| ClientError::Config(format!("access token: {err}")))?;
            request.headers_mut().insert(COOKIE, cookie);
        }

        let (socket, _response) = connect_async(request).await?;
        let (write, read) = socket.split();

        let sink = write
            .sink_map_err(ClientError::from)
            .with(|text: String| future::ready(Ok::<_, ClientError>(Message::text(text))));
        let stream = read.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => Some(Ok(text)),
                    Err(err) => {
                        log::warn!("Dropping non-utf8 binary push frame: {err}");
                        None
                    }
                },
                Ok(_) => None,
                Err(err) => Some(Err(ClientError::from(err))),
            })
        });

        Ok(PushLink {
            sink: Box::pin(sink),
            stream: stream.boxed(),
        })
    }
}

/// Handle to the push channel task of one conversation.
///
/// Closing is fire-and-forget: the task finishes the close handshake on its
/// own. Dropping the handle closes it too.
pub struct PushChannel {
    peer_id: String,
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl PushChannel {
    pub fn open<F>(connector: Arc<dyn PushConnector>, peer_id: &str, notify: F) -> Self
    where
        F: Fn(PushEvent) -> bool + Send + 'static,
    {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(run_channel(
            connector,
            peer_id.to_string(),
            outbound_rx,
            cancel.clone(),
            notify,
        ));

        Self {
            peer_id: peer_id.to_string(),
            outbound,
            cancel,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Queue a frame for relay to the peer's listener.
    pub fn transmit(&self, message: &OutgoingMessage) -> Result<(), ClientError> {
        let payload = serde_json::to_string(message)?;
        self.outbound
            .send(payload)
            .map_err(|_| ClientError::ChannelNotOpen)
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_channel<F>(
    connector: Arc<dyn PushConnector>,
    peer_id: String,
    mut outbound: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
    notify: F,
) where
    F: Fn(PushEvent) -> bool + Send + 'static,
{
    let link = tokio::select! {
        _ = cancel.cancelled() => {
            log::debug!("Push channel for {peer_id} cancelled before connecting");
            return;
        }
        link = connector.connect(&peer_id) => link,
    };

    let PushLink {
        mut sink,
        mut stream,
    } = match link {
        Ok(link) => link,
        Err(err) => {
            log::warn!("Push channel for {peer_id} failed to open: {err}");
            notify(PushEvent::Closed {
                reason: Some(err.to_string()),
            });
            return;
        }
    };

    log::info!("Push channel for {peer_id} opened");
    if !notify(PushEvent::Opened) {
        return;
    }

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(err) = sink.close().await {
                    log::debug!("Push channel for {peer_id} close handshake failed: {err}");
                }
                break None;
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else { break None };
                if let Err(err) = sink.send(frame).await {
                    break Some(err.to_string());
                }
            }
            inbound = stream.next() => match inbound {
                Some(Ok(payload)) => {
                    if !notify(PushEvent::Frame(payload)) {
                        break None;
                    }
                }
                Some(Err(err)) => break Some(err.to_string()),
                None => break None,
            },
        }
    };

    match &reason {
        Some(reason) => log::warn!("Push channel for {peer_id} closed: {reason}"),
        None => log::info!("Push channel for {peer_id} closed"),
    }
    notify(PushEvent::Closed { reason });
}
