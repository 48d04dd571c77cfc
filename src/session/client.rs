use tokio::sync::mpsc;

use crate::common::{ClientCommand, ClientEvent};

use super::conversation::{Backends, Completion, ConversationSession, SessionSettings};

/// Background task owning the conversation session.
///
/// UI commands and async completions are applied one at a time, which makes
/// the session the only writer of conversation state.
pub struct ChatClient {
    event_sender: mpsc::Sender<ClientEvent>,
    command_receiver: mpsc::Receiver<ClientCommand>,
    completion_receiver: mpsc::UnboundedReceiver<Completion>,
    session: ConversationSession,
}

impl ChatClient {
    pub fn new(
        local_user: &str,
        settings: SessionSettings,
        backends: Backends,
        event_sender: mpsc::Sender<ClientEvent>,
        command_receiver: mpsc::Receiver<ClientCommand>,
    ) -> Self {
        let (completion_sender, completion_receiver) = mpsc::unbounded_channel();
        Self {
            event_sender,
            command_receiver,
            completion_receiver,
            session: ConversationSession::new(local_user, settings, backends, completion_sender),
        }
    }

    pub async fn run(mut self) {
        log::info!("Client loop started");
        self.session.start_roster_polling();
        self.publish().await;

        loop {
            tokio::select! {
                command = self.command_receiver.recv() => {
                    match command {
                        Some(command) => self.session.handle_command(command),
                        None => break,
                    }
                }
                Some(completion) = self.completion_receiver.recv() => {
                    self.session.handle_completion(completion);
                }
            }
            self.publish().await;
        }

        self.session.shutdown();
        log::info!("Client loop stopped");
    }

    async fn publish(&mut self) {
        for event in self.session.take_events() {
            if let Err(err) = self.event_sender.send(event).await {
                log::warn!("Failed to deliver event to UI: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::render::DeliveryStatus;
    use crate::session::{ConversationSnapshot, SessionPhase};
    use crate::testutil::{FakeAuth, FakeConnector, FakeStore, peer, theirs};

    async fn next_conversation(events: &mut mpsc::Receiver<ClientEvent>) -> ConversationSnapshot {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("event within timeout")
                .expect("client alive");
            if let ClientEvent::ConversationUpdated(snapshot) = event {
                return snapshot;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn loop_applies_commands_and_publishes_snapshots() {
        let store = FakeStore::new("me");
        store.set_roster(vec![peer("me", "Me"), peer("42", "Alice")]);
        store.set_history("42", vec![theirs("42", "hi")]);
        let connector = FakeConnector::new();
        let backends = Backends {
            store: store.clone(),
            auth: FakeAuth::new(),
            connector: connector.clone(),
        };

        let (event_tx, mut event_rx) = mpsc::channel(100);
        let (cmd_tx, cmd_rx) = mpsc::channel(100);
        let client = ChatClient::new("me", SessionSettings::default(), backends, event_tx, cmd_rx);
        let handle = tokio::spawn(client.run());

        let roster = loop {
            match event_rx.recv().await.expect("client alive") {
                ClientEvent::RosterUpdated(entries) if !entries.is_empty() => break entries,
                _ => {}
            }
        };
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].peer.id, "42");

        cmd_tx.send(roster[0].select_command()).await.unwrap();
        let snapshot = loop {
            let snapshot = next_conversation(&mut event_rx).await;
            if snapshot.phase == SessionPhase::Active {
                break snapshot;
            }
        };
        assert_eq!(snapshot.peer.map(|p| p.id), Some("42".to_string()));
        assert_eq!(snapshot.messages.len(), 1);

        cmd_tx
            .send(ClientCommand::SendMessage("hello".to_string()))
            .await
            .unwrap();
        let snapshot = next_conversation(&mut event_rx).await;
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[1].content, "hello");
        assert_eq!(snapshot.messages[1].status, DeliveryStatus::Pending);

        drop(cmd_tx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop exits when the UI hangs up")
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(connector.live_links(), 0);
    }
}
