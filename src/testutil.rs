//! In-memory stand-ins for the chat server, shared by unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::common::{ChatMessage, OutgoingMessage, Peer};
use crate::error::ClientError;
use crate::network::push::PushLink;
use crate::network::{AuthService, ConversationStore, PushConnector};
use crate::session::conversation::{Completion, ConversationSession};
use crate::session::{Backends, SessionSettings};

pub fn peer(id: &str, name: &str) -> Peer {
    Peer {
        id: id.to_string(),
        name: name.to_string(),
        online: true,
    }
}

/// A message from `sender` to `me`.
pub fn theirs(sender: &str, content: &str) -> ChatMessage {
    ChatMessage {
        id: None,
        sender_id: Some(sender.to_string()),
        recipient_id: "me".to_string(),
        content: content.to_string(),
        created_at: None,
    }
}

/// A message from `me` to `recipient`.
pub fn mine(recipient: &str, content: &str) -> ChatMessage {
    ChatMessage {
        id: None,
        sender_id: Some("me".to_string()),
        recipient_id: recipient.to_string(),
        content: content.to_string(),
        created_at: None,
    }
}

#[derive(Default)]
struct StoreState {
    histories: HashMap<String, Vec<ChatMessage>>,
    delays: HashMap<String, Duration>,
    roster: Vec<Peer>,
    sent: Vec<OutgoingMessage>,
    history_calls: Vec<String>,
    fail_history: bool,
    fail_send: bool,
}

type SendHook = Box<dyn Fn(&OutgoingMessage) + Send + Sync>;

/// Conversation store that persists sends into the recipient's history.
pub struct FakeStore {
    local_user: String,
    state: Mutex<StoreState>,
    on_send: Mutex<Option<SendHook>>,
}

impl FakeStore {
    pub fn new(local_user: &str) -> Arc<Self> {
        Arc::new(Self {
            local_user: local_user.to_string(),
            state: Mutex::new(StoreState::default()),
            on_send: Mutex::new(None),
        })
    }

    /// Run `hook` after a send is persisted and before it is acknowledged,
    /// the way the server notifies listeners before answering the POST.
    pub fn on_send(&self, hook: impl Fn(&OutgoingMessage) + Send + Sync + 'static) {
        *self.on_send.lock() = Some(Box::new(hook));
    }

    pub fn set_history(&self, peer_id: &str, messages: Vec<ChatMessage>) {
        self.state
            .lock()
            .histories
            .insert(peer_id.to_string(), messages);
    }

    pub fn push_history(&self, peer_id: &str, message: ChatMessage) {
        self.state
            .lock()
            .histories
            .entry(peer_id.to_string())
            .or_default()
            .push(message);
    }

    pub fn set_delay(&self, peer_id: &str, delay: Duration) {
        self.state.lock().delays.insert(peer_id.to_string(), delay);
    }

    pub fn set_roster(&self, peers: Vec<Peer>) {
        self.state.lock().roster = peers;
    }

    pub fn fail_history(&self, fail: bool) {
        self.state.lock().fail_history = fail;
    }

    pub fn fail_send(&self, fail: bool) {
        self.state.lock().fail_send = fail;
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.state.lock().sent.clone()
    }

    pub fn history_calls(&self) -> Vec<String> {
        self.state.lock().history_calls.clone()
    }
}

#[async_trait]
impl ConversationStore for FakeStore {
    async fn history(&self, peer_id: &str) -> Result<Vec<ChatMessage>, ClientError> {
        let delay = {
            let mut state = self.state.lock();
            state.history_calls.push(peer_id.to_string());
            state.delays.get(peer_id).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock();
        if state.fail_history {
            return Err(ClientError::Rejected("store unavailable".to_string()));
        }
        Ok(state.histories.get(peer_id).cloned().unwrap_or_default())
    }

    async fn send_message(&self, message: &OutgoingMessage) -> Result<(), ClientError> {
        {
            let mut state = self.state.lock();
            if state.fail_send {
                return Err(ClientError::Rejected("store unavailable".to_string()));
            }
            state.sent.push(message.clone());
            let persisted = ChatMessage::outgoing(&self.local_user, message);
            state
                .histories
                .entry(message.recipient_id.clone())
                .or_default()
                .push(persisted);
        }

        let hooked = match self.on_send.lock().as_ref() {
            Some(hook) => {
                hook(message);
                true
            }
            None => false,
        };
        if hooked {
            // Let the notification overtake the acknowledgement.
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        Ok(())
    }

    async fn roster(&self) -> Result<Vec<Peer>, ClientError> {
        Ok(self.state.lock().roster.clone())
    }
}

#[derive(Default)]
pub struct FakeAuth {
    logouts: Mutex<usize>,
}

impl FakeAuth {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn logouts(&self) -> usize {
        *self.logouts.lock()
    }
}

#[async_trait]
impl AuthService for FakeAuth {
    async fn logout(&self) -> Result<(), ClientError> {
        *self.logouts.lock() += 1;
        Ok(())
    }
}

/// Server end of one fake push connection.
pub struct FakeLink {
    pub peer_id: String,
    inbound: fmpsc::UnboundedSender<Result<String, ClientError>>,
    relayed: Arc<Mutex<Vec<String>>>,
}

impl FakeLink {
    /// Deliver a frame to the client. Returns `false` once the client closed.
    pub fn push(&self, payload: &str) -> bool {
        self.inbound.unbounded_send(Ok(payload.to_string())).is_ok()
    }

    /// Drop the connection from the server side.
    pub fn disconnect(&self) {
        self.inbound.close_channel();
    }

    pub fn is_live(&self) -> bool {
        !self.inbound.is_closed()
    }

    pub fn relayed(&self) -> Vec<String> {
        self.relayed.lock().clone()
    }
}

#[derive(Default)]
pub struct FakeConnector {
    links: Mutex<Vec<Arc<FakeLink>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn links(&self) -> Vec<Arc<FakeLink>> {
        self.links.lock().clone()
    }

    pub fn last(&self) -> Arc<FakeLink> {
        self.links.lock().last().cloned().expect("a link was opened")
    }

    pub fn live_links(&self) -> usize {
        self.links.lock().iter().filter(|link| link.is_live()).count()
    }
}

#[async_trait]
impl PushConnector for FakeConnector {
    async fn connect(&self, peer_id: &str) -> Result<PushLink, ClientError> {
        let (inbound, stream) = fmpsc::unbounded();
        let relayed = Arc::new(Mutex::new(Vec::new()));
        let log = relayed.clone();
        let sink = futures::sink::unfold((), move |(), frame: String| {
            let log = log.clone();
            async move {
                log.lock().push(frame);
                Ok::<_, ClientError>(())
            }
        });

        self.links.lock().push(Arc::new(FakeLink {
            peer_id: peer_id.to_string(),
            inbound,
            relayed,
        }));

        Ok(PushLink {
            sink: Box::pin(sink),
            stream: stream.boxed(),
        })
    }
}

/// A session wired to fakes, plus the receiving end of its completions.
pub struct Harness {
    pub session: ConversationSession,
    pub completions: mpsc::UnboundedReceiver<Completion>,
    pub store: Arc<FakeStore>,
    pub auth: Arc<FakeAuth>,
    pub connector: Arc<FakeConnector>,
}

impl Harness {
    pub fn new() -> Self {
        let store = FakeStore::new("me");
        let auth = FakeAuth::new();
        let connector = FakeConnector::new();
        let (sender, completions) = mpsc::unbounded_channel();
        let backends = Backends {
            store: store.clone(),
            auth: auth.clone(),
            connector: connector.clone(),
        };
        let session = ConversationSession::new("me", SessionSettings::default(), backends, sender);
        Self {
            session,
            completions,
            store,
            auth,
            connector,
        }
    }

    /// Apply completions until nothing arrives for a few milliseconds.
    pub async fn settle(&mut self) {
        while let Ok(Some(completion)) =
            tokio::time::timeout(Duration::from_millis(10), self.completions.recv()).await
        {
            self.session.handle_completion(completion);
        }
    }

    /// Let `duration` of timer time pass, applying completions on the way.
    pub async fn advance(&mut self, duration: Duration) {
        tokio::time::advance(duration).await;
        self.settle().await;
    }
}
