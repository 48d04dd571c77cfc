use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::common::{
    ChatMessage, ClientCommand, ClientEvent, Direction, NoticeKind, OutgoingMessage, Peer,
    Perspective, UserNotice,
};
use crate::error::ClientError;
use crate::network::{AuthService, ConversationStore, PushChannel, PushConnector, PushEvent};
use crate::render::{Fragment, MessageView, OutgoingState, Provenance, RosterView};

use super::poller::PollTimer;

/// Expected echoes kept per conversation; the oldest is forgotten first.
const MAX_PENDING_ECHOES: usize = 64;

/// Identifies the selection an async operation was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub generation: u64,
    pub peer_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Activating,
    Active,
    Switching,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Initial,
    Poll,
}

/// Results of async work, fed back into the client loop.
#[derive(Debug)]
pub enum Completion {
    HistoryTick(Ticket),
    HistoryLoaded {
        ticket: Ticket,
        seq: u64,
        kind: FetchKind,
        result: Result<Vec<ChatMessage>, ClientError>,
    },
    Push {
        ticket: Ticket,
        event: PushEvent,
    },
    SendFinished {
        ticket: Ticket,
        local_id: u64,
        message: OutgoingMessage,
        result: Result<(), ClientError>,
    },
    RosterTick,
    RosterLoaded {
        seq: u64,
        result: Result<Vec<Peer>, ClientError>,
    },
    LogoutFinished(Result<(), ClientError>),
}

/// What the UI needs to draw the conversation pane.
#[derive(Debug, Clone)]
pub struct ConversationSnapshot {
    pub phase: SessionPhase,
    pub peer: Option<Peer>,
    pub messages: Vec<Fragment>,
    /// Row to bring into view after this change.
    pub scroll_anchor: Option<usize>,
    pub revision: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub history_interval: Duration,
    pub roster_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            history_interval: Duration::from_millis(1000),
            roster_interval: Duration::from_millis(10_000),
        }
    }
}

/// External services the session talks to.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn ConversationStore>,
    pub auth: Arc<dyn AuthService>,
    pub connector: Arc<dyn PushConnector>,
}

struct ActiveConversation {
    peer: Peer,
    ticket: Ticket,
    channel: Option<PushChannel>,
    history_timer: Option<PollTimer>,
    history_issued: u64,
    history_applied: u64,
    history_in_flight: bool,
    pending_echoes: VecDeque<String>,
    next_local_id: u64,
}

impl ActiveConversation {
    fn new(peer: Peer, ticket: Ticket) -> Self {
        Self {
            peer,
            ticket,
            channel: None,
            history_timer: None,
            history_issued: 0,
            history_applied: 0,
            history_in_flight: false,
            pending_echoes: VecDeque::new(),
            next_local_id: 0,
        }
    }

    fn perspective(&self, local_user: &str) -> Perspective {
        Perspective::new(local_user, self.peer.id.as_str())
    }

    fn next_history_seq(&mut self) -> u64 {
        self.history_issued += 1;
        self.history_in_flight = true;
        self.history_issued
    }

    fn next_local_id(&mut self) -> u64 {
        self.next_local_id += 1;
        self.next_local_id
    }

    fn remember_echo(&mut self, content: &str) {
        if self.pending_echoes.len() >= MAX_PENDING_ECHOES {
            self.pending_echoes.pop_front();
        }
        self.pending_echoes.push_back(content.to_string());
    }

    fn take_echo(&mut self, content: &str) -> bool {
        match self.pending_echoes.iter().position(|echo| echo == content) {
            Some(index) => {
                self.pending_echoes.remove(index);
                true
            }
            None => false,
        }
    }

    /// Close the channel (without waiting) and stop the history timer.
    fn release(mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        if let Some(timer) = self.history_timer.take() {
            timer.cancel();
        }
        log::info!("Left conversation with {}", self.peer.id);
    }
}

#[derive(Default)]
struct Changes {
    conversation: bool,
    roster: bool,
    notices: Vec<UserNotice>,
    logged_out: bool,
}

/// The single conversation state of the client.
///
/// Only the client loop mutates it. Spawned work reports back through
/// `Completion`s, and every completion tied to a conversation is checked
/// against the current `Ticket` before it may touch the view.
pub struct ConversationSession {
    local_user: String,
    settings: SessionSettings,
    backends: Backends,
    completions: mpsc::UnboundedSender<Completion>,
    phase: SessionPhase,
    generation: u64,
    active: Option<ActiveConversation>,
    roster_timer: Option<PollTimer>,
    roster_issued: u64,
    roster_applied: u64,
    messages: MessageView,
    roster: RosterView,
    changes: Changes,
}

impl ConversationSession {
    pub fn new(
        local_user: impl Into<String>,
        settings: SessionSettings,
        backends: Backends,
        completions: mpsc::UnboundedSender<Completion>,
    ) -> Self {
        Self {
            local_user: local_user.into(),
            settings,
            backends,
            completions,
            phase: SessionPhase::Idle,
            generation: 0,
            active: None,
            roster_timer: None,
            roster_issued: 0,
            roster_applied: 0,
            messages: MessageView::new(),
            roster: RosterView::new(),
            changes: Changes::default(),
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn active_peer(&self) -> Option<&Peer> {
        self.active.as_ref().map(|conversation| &conversation.peer)
    }

    #[cfg(test)]
    pub fn ticket(&self) -> Option<&Ticket> {
        self.active.as_ref().map(|conversation| &conversation.ticket)
    }

    #[cfg(test)]
    pub fn messages(&self) -> &MessageView {
        &self.messages
    }

    #[cfg(test)]
    pub fn roster(&self) -> &RosterView {
        &self.roster
    }

    #[cfg(test)]
    pub fn has_open_channel(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|conversation| conversation.channel.is_some())
    }

    #[cfg(test)]
    pub fn is_history_polling(&self) -> bool {
        self.active
            .as_ref()
            .and_then(|conversation| conversation.history_timer.as_ref())
            .is_some_and(PollTimer::is_running)
    }

    #[cfg(test)]
    pub fn is_roster_polling(&self) -> bool {
        self.roster_timer.as_ref().is_some_and(PollTimer::is_running)
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            phase: self.phase,
            peer: self.active_peer().cloned(),
            messages: self.messages.fragments().cloned().collect(),
            scroll_anchor: self.messages.scroll_anchor(),
            revision: self.messages.revision(),
            error: self.messages.last_error().map(str::to_string),
        }
    }

    /// Drain what changed since the last call as UI events.
    pub fn take_events(&mut self) -> Vec<ClientEvent> {
        let changes = std::mem::take(&mut self.changes);
        let mut events = Vec::new();
        if changes.conversation {
            events.push(ClientEvent::ConversationUpdated(self.snapshot()));
        }
        if changes.roster {
            events.push(ClientEvent::RosterUpdated(self.roster.entries().to_vec()));
        }
        events.extend(changes.notices.into_iter().map(ClientEvent::Notice));
        if changes.logged_out {
            events.push(ClientEvent::LoggedOut);
        }
        events
    }

    pub fn handle_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::SelectPeer(peer) => self.select_peer(peer),
            ClientCommand::SendMessage(input) => self.send(&input),
            ClientCommand::Logout => self.logout(),
        }
    }

    pub fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::HistoryTick(ticket) => self.on_history_tick(ticket),
            Completion::HistoryLoaded {
                ticket,
                seq,
                kind,
                result,
            } => self.on_history_loaded(ticket, seq, kind, result),
            Completion::Push { ticket, event } => self.on_push_event(ticket, event),
            Completion::SendFinished {
                ticket,
                local_id,
                message,
                result,
            } => self.on_send_finished(ticket, local_id, message, result),
            Completion::RosterTick => {
                if self.roster_timer.is_some() {
                    self.refresh_roster();
                }
            }
            Completion::RosterLoaded { seq, result } => self.on_roster_loaded(seq, result),
            Completion::LogoutFinished(result) => self.on_logout_finished(result),
        }
    }

    /// Fetch the roster now and then on every roster interval.
    pub fn start_roster_polling(&mut self) {
        if self.roster_timer.is_some() {
            return;
        }
        self.refresh_roster();
        let completions = self.completions.clone();
        self.roster_timer = Some(PollTimer::start(self.settings.roster_interval, move || {
            completions.send(Completion::RosterTick).is_ok()
        }));
    }

    /// Switch the conversation to `peer`.
    ///
    /// The previous channel and history timer are released before anything
    /// is issued for the new peer. The channel and the history timer for
    /// `peer` start once its initial history fetch has completed.
    pub fn select_peer(&mut self, peer: Peer) {
        if peer.id == self.local_user {
            log::warn!("Ignoring selection of the local user");
            return;
        }

        let previous = self.active.take();
        self.phase = if previous.is_some() {
            SessionPhase::Switching
        } else {
            SessionPhase::Activating
        };
        if let Some(previous) = previous {
            previous.release();
        }

        self.generation += 1;
        let ticket = Ticket {
            generation: self.generation,
            peer_id: peer.id.clone(),
        };
        log::info!("Opening conversation with {} ({})", peer.name, peer.id);

        self.messages.clear();
        self.roster.mark_selected(Some(peer.id.as_str()));

        let mut conversation = ActiveConversation::new(peer, ticket.clone());
        let seq = conversation.next_history_seq();
        self.active = Some(conversation);
        self.spawn_history_fetch(ticket, seq, FetchKind::Initial);

        self.changes.conversation = true;
        self.changes.roster = true;
    }

    /// Optimistically render and submit a composed message.
    pub fn send(&mut self, input: &str) {
        let content = input.trim();
        if content.is_empty() {
            return;
        }
        let ready = self.phase == SessionPhase::Active;
        let Some(conversation) = self.active.as_mut().filter(|_| ready) else {
            log::debug!("No active conversation; dropping composed message");
            return;
        };

        let outgoing = OutgoingMessage {
            recipient_id: conversation.peer.id.clone(),
            content: content.to_string(),
        };
        let local_id = conversation.next_local_id();
        let perspective = conversation.perspective(&self.local_user);
        self.messages.append_one(
            &ChatMessage::outgoing(&self.local_user, &outgoing),
            &perspective,
            Provenance::Outgoing {
                local_id,
                state: OutgoingState::Sending,
            },
        );
        conversation.remember_echo(&outgoing.content);
        self.changes.conversation = true;

        let ticket = conversation.ticket.clone();
        let store = self.backends.store.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = store.send_message(&outgoing).await;
            let _ = completions.send(Completion::SendFinished {
                ticket,
                local_id,
                message: outgoing,
                result,
            });
        });
    }

    /// Tear everything down and sign out through the auth service.
    pub fn logout(&mut self) {
        if let Some(conversation) = self.active.take() {
            conversation.release();
        }
        if let Some(timer) = self.roster_timer.take() {
            timer.cancel();
        }
        self.roster_applied = self.roster_issued;
        self.phase = SessionPhase::Idle;
        self.messages.clear();
        self.roster.clear();
        self.changes.conversation = true;
        self.changes.roster = true;

        let auth = self.backends.auth.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = auth.logout().await;
            let _ = completions.send(Completion::LogoutFinished(result));
        });
    }

    /// Release every channel and timer without contacting the server.
    pub fn shutdown(&mut self) {
        if let Some(conversation) = self.active.take() {
            conversation.release();
        }
        if let Some(timer) = self.roster_timer.take() {
            timer.cancel();
        }
        self.phase = SessionPhase::Idle;
    }

    fn current_mut(&mut self, ticket: &Ticket) -> Option<&mut ActiveConversation> {
        self.active
            .as_mut()
            .filter(|conversation| conversation.ticket == *ticket)
    }

    fn spawn_history_fetch(&self, ticket: Ticket, seq: u64, kind: FetchKind) {
        let store = self.backends.store.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = store.history(&ticket.peer_id).await;
            let _ = completions.send(Completion::HistoryLoaded {
                ticket,
                seq,
                kind,
                result,
            });
        });
    }

    fn on_history_tick(&mut self, ticket: Ticket) {
        let Some(conversation) = self.current_mut(&ticket) else {
            log::debug!("Ignoring history tick for {}", ticket.peer_id);
            return;
        };
        if conversation.history_in_flight {
            log::debug!("History fetch for {} still in flight; skipping tick", ticket.peer_id);
            return;
        }
        let seq = conversation.next_history_seq();
        self.spawn_history_fetch(ticket, seq, FetchKind::Poll);
    }

    fn on_history_loaded(
        &mut self,
        ticket: Ticket,
        seq: u64,
        kind: FetchKind,
        result: Result<Vec<ChatMessage>, ClientError>,
    ) {
        let Some(conversation) = self
            .active
            .as_mut()
            .filter(|conversation| conversation.ticket == ticket)
        else {
            log::debug!("Dropping history for {} from a previous selection", ticket.peer_id);
            return;
        };
        if seq == conversation.history_issued {
            conversation.history_in_flight = false;
        }
        if seq <= conversation.history_applied {
            log::debug!("Dropping out-of-order history response #{seq} for {}", ticket.peer_id);
            return;
        }

        let perspective = conversation.perspective(&self.local_user);
        match result {
            Ok(history) => {
                conversation.history_applied = seq;
                match kind {
                    FetchKind::Initial => self.messages.render_all(&history, &perspective),
                    FetchKind::Poll => self.messages.replace_history(&history, &perspective, seq),
                }
                self.messages.clear_history_error();
                self.changes.conversation = true;
            }
            Err(err) if kind == FetchKind::Initial => {
                log::warn!("Loading history for {} failed: {err}", ticket.peer_id);
                self.messages.clear();
                self.messages
                    .set_history_error(format!("Could not load messages: {err}"));
                self.changes.notices.push(UserNotice::new(
                    NoticeKind::HistoryUnavailable,
                    format!("Could not load messages with {}: {err}", conversation.peer.name),
                ));
                self.changes.conversation = true;
            }
            Err(err) => {
                log::warn!("History poll for {} failed: {err}", ticket.peer_id);
            }
        }

        if kind == FetchKind::Initial {
            conversation.channel = Some(open_channel(
                &self.backends.connector,
                &self.completions,
                &conversation.ticket,
            ));
            conversation.history_timer = Some(start_history_timer(
                self.settings.history_interval,
                &self.completions,
                &conversation.ticket,
            ));
            self.phase = SessionPhase::Active;
            self.changes.conversation = true;
        }
    }

    fn on_push_event(&mut self, ticket: Ticket, event: PushEvent) {
        let Some(conversation) = self
            .active
            .as_mut()
            .filter(|conversation| conversation.ticket == ticket)
        else {
            log::debug!("Dropping push event from a closed channel for {}", ticket.peer_id);
            return;
        };

        let payload = match event {
            PushEvent::Opened => return,
            PushEvent::Closed { reason } => {
                conversation.channel = None;
                log::info!(
                    "Push channel for {} is down until the peer is selected again ({})",
                    ticket.peer_id,
                    reason.as_deref().unwrap_or("closed")
                );
                return;
            }
            PushEvent::Frame(payload) => payload,
        };

        let message: ChatMessage = match serde_json::from_str(&payload) {
            Ok(message) => message,
            Err(err) => {
                log::warn!("Dropping malformed push frame: {err}");
                return;
            }
        };
        if message.recipient_id != conversation.peer.id {
            log::debug!("Dropping push frame addressed to {}", message.recipient_id);
            return;
        }

        let perspective = conversation.perspective(&self.local_user);
        if perspective.direction_of(&message) == Some(Direction::Mine)
            && conversation.take_echo(&message.content)
        {
            log::debug!("Suppressed push echo of an optimistic message");
            return;
        }

        let stamp = conversation.history_issued;
        if self
            .messages
            .append_one(&message, &perspective, Provenance::Pushed { stamp })
        {
            self.changes.conversation = true;
        }
    }

    fn on_send_finished(
        &mut self,
        ticket: Ticket,
        local_id: u64,
        message: OutgoingMessage,
        result: Result<(), ClientError>,
    ) {
        let Some(conversation) = self
            .active
            .as_mut()
            .filter(|conversation| conversation.ticket == ticket)
        else {
            if let Err(err) = result {
                log::warn!("Sending to {} failed: {err}", message.recipient_id);
                self.changes.notices.push(UserNotice::new(
                    NoticeKind::SendFailed,
                    format!("Message to {} was not sent: {err}", message.recipient_id),
                ));
            }
            return;
        };

        match result {
            Ok(()) => {
                self.messages.mark_sent(local_id, conversation.history_issued);
                self.messages.clear_send_error();
                match &conversation.channel {
                    Some(channel) => {
                        if let Err(err) = channel.transmit(&message) {
                            log::warn!("Relay to {} failed: {err}", channel.peer_id());
                        }
                    }
                    None => log::debug!("Push channel not open; relay skipped"),
                }
            }
            Err(err) => {
                log::warn!("Sending to {} failed: {err}", message.recipient_id);
                self.messages.mark_failed(local_id);
                conversation.take_echo(&message.content);
                self.messages.set_send_error(format!("Message not sent: {err}"));
                self.changes.notices.push(UserNotice::new(
                    NoticeKind::SendFailed,
                    format!("Message to {} was not sent: {err}", conversation.peer.name),
                ));
            }
        }
        self.changes.conversation = true;
    }

    fn refresh_roster(&mut self) {
        self.roster_issued += 1;
        let seq = self.roster_issued;
        let store = self.backends.store.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = store.roster().await;
            let _ = completions.send(Completion::RosterLoaded { seq, result });
        });
    }

    fn on_roster_loaded(&mut self, seq: u64, result: Result<Vec<Peer>, ClientError>) {
        if seq <= self.roster_applied {
            log::debug!("Dropping stale roster response #{seq}");
            return;
        }
        match result {
            Ok(peers) => {
                self.roster_applied = seq;
                let active = self.active.as_ref().map(|c| c.peer.id.as_str());
                self.roster.rebuild(peers, &self.local_user, active);
                self.changes.roster = true;
            }
            Err(err) => log::warn!("Roster refresh failed: {err}"),
        }
    }

    fn on_logout_finished(&mut self, result: Result<(), ClientError>) {
        match result {
            Ok(()) => {
                log::info!("Logged out");
                self.changes.logged_out = true;
            }
            Err(err) => {
                log::warn!("Logout failed: {err}");
                self.changes.notices.push(UserNotice::new(
                    NoticeKind::LogoutFailed,
                    format!("Logout failed: {err}"),
                ));
                self.start_roster_polling();
            }
        }
    }
}

fn open_channel(
    connector: &Arc<dyn PushConnector>,
    completions: &mpsc::UnboundedSender<Completion>,
    ticket: &Ticket,
) -> PushChannel {
    let completions = completions.clone();
    let tagged = ticket.clone();
    PushChannel::open(connector.clone(), &ticket.peer_id, move |event| {
        completions
            .send(Completion::Push {
                ticket: tagged.clone(),
                event,
            })
            .is_ok()
    })
}

fn start_history_timer(
    period: Duration,
    completions: &mpsc::UnboundedSender<Completion>,
    ticket: &Ticket,
) -> PollTimer {
    let completions = completions.clone();
    let ticket = ticket.clone();
    PollTimer::start(period, move || {
        completions
            .send(Completion::HistoryTick(ticket.clone()))
            .is_ok()
    })
}
