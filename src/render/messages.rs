use std::collections::HashMap;

use crate::common::{ChatMessage, Direction, Perspective};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    Pending,
    Failed,
}

/// One row of the message list, already resolved to a side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub direction: Direction,
    pub content: String,
    pub status: DeliveryStatus,
}

/// Where a row came from. Everything except `History` is local and may be
/// superseded by a later history fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    History,
    /// Appended from the push channel; `stamp` is the number of history
    /// requests issued when the frame arrived.
    Pushed { stamp: u64 },
    Outgoing { local_id: u64, state: OutgoingState },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutgoingState {
    Sending,
    /// Persisted by the store; `stamp` as for `Provenance::Pushed`.
    Sent { stamp: u64 },
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    fragment: Fragment,
    provenance: Provenance,
}

impl Entry {
    fn key(&self) -> (Direction, &str) {
        (self.fragment.direction, self.fragment.content.as_str())
    }

    fn is_failed_send(&self) -> bool {
        matches!(
            self.provenance,
            Provenance::Outgoing {
                state: OutgoingState::Failed,
                ..
            }
        )
    }

    /// Whether a history response issued as request `request_seq` may still
    /// be missing this row.
    fn may_be_missing_from(&self, request_seq: u64) -> bool {
        match self.provenance {
            Provenance::History => false,
            Provenance::Pushed { stamp } => stamp >= request_seq,
            Provenance::Outgoing { state, .. } => match state {
                OutgoingState::Sending | OutgoingState::Failed => true,
                OutgoingState::Sent { stamp } => stamp >= request_seq,
            },
        }
    }
}

/// The scrollable message list of the active conversation.
///
/// Every mutation bumps `revision` and re-anchors the scroll position on the
/// newest row. History and send failures are kept in separate slots so a
/// successful poll does not hide a failed send.
#[derive(Debug, Clone, Default)]
pub struct MessageView {
    entries: Vec<Entry>,
    scroll_anchor: Option<usize>,
    revision: u64,
    history_loaded: bool,
    history_error: Option<String>,
    send_error: Option<String>,
}

impl MessageView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the list with exactly `messages`.
    pub fn render_all(&mut self, messages: &[ChatMessage], perspective: &Perspective) {
        self.entries = history_entries(messages, perspective);
        self.history_loaded = true;
        self.touch();
    }

    /// Append a single message. Returns `false` if the message does not
    /// belong to the conversation seen from `perspective`.
    pub fn append_one(
        &mut self,
        message: &ChatMessage,
        perspective: &Perspective,
        provenance: Provenance,
    ) -> bool {
        let Some(direction) = perspective.direction_of(message) else {
            return false;
        };
        let status = match provenance {
            Provenance::Outgoing {
                state: OutgoingState::Sending,
                ..
            } => DeliveryStatus::Pending,
            Provenance::Outgoing {
                state: OutgoingState::Failed,
                ..
            } => DeliveryStatus::Failed,
            _ => DeliveryStatus::Delivered,
        };
        self.entries.push(Entry {
            fragment: Fragment {
                direction,
                content: message.content.clone(),
                status,
            },
            provenance,
        });
        self.touch();
        true
    }

    /// Replace the list with a fetched history while keeping local rows the
    /// history cannot contain yet.
    ///
    /// A local row is dropped when the fetch carries a newly persisted copy
    /// of it (same side and content, beyond what the previous history
    /// showed), or when it was already persisted before `request_seq` was
    /// issued. Failed sends persisted nothing and are never matched. Until
    /// one history has been loaded there is no previous history to compare
    /// against, so no local row is matched.
    pub fn replace_history(
        &mut self,
        messages: &[ChatMessage],
        perspective: &Perspective,
        request_seq: u64,
    ) {
        let fresh = history_entries(messages, perspective);

        let mut newly_persisted: HashMap<(Direction, &str), usize> = HashMap::new();
        for entry in &fresh {
            *newly_persisted.entry(entry.key()).or_default() += 1;
        }
        for entry in self.entries.iter().filter(|e| e.provenance == Provenance::History) {
            if let Some(count) = newly_persisted.get_mut(&entry.key()) {
                *count = count.saturating_sub(1);
            }
        }

        let mut retained = Vec::new();
        for entry in self.entries.iter().filter(|e| e.provenance != Provenance::History) {
            if self.history_loaded && !entry.is_failed_send() {
                if let Some(count) = newly_persisted.get_mut(&entry.key()) {
                    if *count > 0 {
                        *count -= 1;
                        continue;
                    }
                }
            }
            if entry.may_be_missing_from(request_seq) {
                retained.push(entry.clone());
            }
        }

        let mut entries = fresh;
        entries.extend(retained);
        self.entries = entries;
        self.history_loaded = true;
        self.touch();
    }

    /// Record that the optimistic row `local_id` was persisted.
    pub fn mark_sent(&mut self, local_id: u64, stamp: u64) -> bool {
        self.update_outgoing(local_id, OutgoingState::Sent { stamp }, DeliveryStatus::Delivered)
    }

    pub fn mark_failed(&mut self, local_id: u64) -> bool {
        self.update_outgoing(local_id, OutgoingState::Failed, DeliveryStatus::Failed)
    }

    fn update_outgoing(&mut self, local_id: u64, next: OutgoingState, status: DeliveryStatus) -> bool {
        let found = self.entries.iter_mut().find(|entry| {
            matches!(entry.provenance, Provenance::Outgoing { local_id: id, .. } if id == local_id)
        });
        let Some(entry) = found else {
            return false;
        };
        entry.provenance = Provenance::Outgoing {
            local_id,
            state: next,
        };
        entry.fragment.status = status;
        self.touch();
        true
    }

    /// Empty the list and forget the loaded history and both errors.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.history_loaded = false;
        self.history_error = None;
        self.send_error = None;
        self.touch();
    }

    pub fn set_history_error(&mut self, error: impl Into<String>) {
        self.history_error = Some(error.into());
        self.revision += 1;
    }

    pub fn clear_history_error(&mut self) {
        if self.history_error.take().is_some() {
            self.revision += 1;
        }
    }

    pub fn set_send_error(&mut self, error: impl Into<String>) {
        self.send_error = Some(error.into());
        self.revision += 1;
    }

    pub fn clear_send_error(&mut self) {
        if self.send_error.take().is_some() {
            self.revision += 1;
        }
    }

    /// The error to show, a failed send taking precedence.
    pub fn last_error(&self) -> Option<&str> {
        self.send_error.as_deref().or(self.history_error.as_deref())
    }

    pub fn fragments(&self) -> impl Iterator<Item = &Fragment> {
        self.entries.iter().map(|entry| &entry.fragment)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Index of the row the view is scrolled to; always the newest one.
    pub fn scroll_anchor(&self) -> Option<usize> {
        self.scroll_anchor
    }

    fn touch(&mut self) {
        self.scroll_anchor = self.entries.len().checked_sub(1);
        self.revision += 1;
    }
}

fn history_entries(messages: &[ChatMessage], perspective: &Perspective) -> Vec<Entry> {
    messages
        .iter()
        .filter_map(|message| {
            let direction = perspective.direction_of(message)?;
            Some(Entry {
                fragment: Fragment {
                    direction,
                    content: message.content.clone(),
                    status: DeliveryStatus::Delivered,
                },
                provenance: Provenance::History,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perspective() -> Perspective {
        Perspective::new("me", "42")
    }

    fn mine(content: &str) -> ChatMessage {
        ChatMessage {
            id: None,
            sender_id: Some("me".to_string()),
            recipient_id: "42".to_string(),
            content: content.to_string(),
            created_at: None,
        }
    }

    fn theirs(content: &str) -> ChatMessage {
        ChatMessage {
            id: None,
            sender_id: Some("42".to_string()),
            recipient_id: "me".to_string(),
            content: content.to_string(),
            created_at: None,
        }
    }

    fn contents(view: &MessageView) -> Vec<(Direction, String, DeliveryStatus)> {
        view.fragments()
            .map(|f| (f.direction, f.content.clone(), f.status))
            .collect()
    }

    #[test]
    fn render_all_replaces_and_scrolls_to_newest() {
        let mut view = MessageView::new();
        view.render_all(&[mine("a"), theirs("b")], &perspective());
        assert_eq!(view.len(), 2);
        assert_eq!(view.scroll_anchor(), Some(1));

        view.render_all(&[theirs("c")], &perspective());
        assert_eq!(
            contents(&view),
            vec![(Direction::Theirs, "c".to_string(), DeliveryStatus::Delivered)]
        );
        assert_eq!(view.scroll_anchor(), Some(0));

        view.render_all(&[], &perspective());
        assert!(view.is_empty());
        assert_eq!(view.scroll_anchor(), None);
    }

    #[test]
    fn rendering_same_history_twice_is_idempotent() {
        let history = vec![mine("a"), theirs("b"), mine("a")];
        let mut once = MessageView::new();
        once.render_all(&history, &perspective());

        let mut twice = MessageView::new();
        twice.render_all(&history, &perspective());
        twice.render_all(&history, &perspective());
        assert_eq!(contents(&once), contents(&twice));
        assert_eq!(once.scroll_anchor(), twice.scroll_anchor());

        let mut replaced = once.clone();
        replaced.replace_history(&history, &perspective(), 2);
        replaced.replace_history(&history, &perspective(), 2);
        assert_eq!(contents(&once), contents(&replaced));
    }

    #[test]
    fn append_one_rejects_foreign_messages() {
        let mut view = MessageView::new();
        let foreign = ChatMessage {
            recipient_id: "99".to_string(),
            ..mine("x")
        };

        assert!(!view.append_one(&foreign, &perspective(), Provenance::Pushed { stamp: 0 }));
        assert!(view.is_empty());
        assert_eq!(view.revision(), 0);

        assert!(view.append_one(&theirs("y"), &perspective(), Provenance::Pushed { stamp: 0 }));
        assert_eq!(view.scroll_anchor(), Some(0));
    }

    #[test]
    fn pending_send_survives_history_until_persisted() {
        let mut view = MessageView::new();
        view.render_all(&[theirs("hi")], &perspective());
        view.append_one(
            &mine("hello"),
            &perspective(),
            Provenance::Outgoing {
                local_id: 1,
                state: OutgoingState::Sending,
            },
        );

        // Poll raced the POST: history does not have it yet.
        view.replace_history(&[theirs("hi")], &perspective(), 2);
        assert_eq!(
            contents(&view),
            vec![
                (Direction::Theirs, "hi".to_string(), DeliveryStatus::Delivered),
                (Direction::Mine, "hello".to_string(), DeliveryStatus::Pending),
            ]
        );

        assert!(view.mark_sent(1, 2));
        view.replace_history(&[theirs("hi"), mine("hello")], &perspective(), 3);
        assert_eq!(
            contents(&view),
            vec![
                (Direction::Theirs, "hi".to_string(), DeliveryStatus::Delivered),
                (Direction::Mine, "hello".to_string(), DeliveryStatus::Delivered),
            ]
        );
    }

    #[test]
    fn sent_row_is_dropped_once_a_later_request_must_contain_it() {
        let mut view = MessageView::new();
        view.append_one(
            &mine("hello"),
            &perspective(),
            Provenance::Outgoing {
                local_id: 7,
                state: OutgoingState::Sending,
            },
        );
        view.mark_sent(7, 1);

        // Request 2 was issued after the POST completed, so its answer is
        // authoritative even though the text repeats an older message.
        view.replace_history(&[mine("hello")], &perspective(), 2);
        assert_eq!(view.len(), 1);
        view.replace_history(&[mine("hello")], &perspective(), 3);
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn repeated_text_is_not_collapsed() {
        let mut view = MessageView::new();
        view.render_all(&[mine("ok")], &perspective());
        view.append_one(
            &mine("ok"),
            &perspective(),
            Provenance::Outgoing {
                local_id: 1,
                state: OutgoingState::Sending,
            },
        );

        // Old copy only: the pending one is not covered.
        view.replace_history(&[mine("ok")], &perspective(), 2);
        assert_eq!(view.len(), 2);

        view.mark_sent(1, 2);
        view.replace_history(&[mine("ok"), mine("ok")], &perspective(), 3);
        assert_eq!(view.len(), 2);
        assert!(view.fragments().all(|f| f.status == DeliveryStatus::Delivered));
    }

    #[test]
    fn pushed_row_is_kept_only_while_history_may_lag() {
        let mut view = MessageView::new();
        view.render_all(&[], &perspective());
        view.append_one(&theirs("new"), &perspective(), Provenance::Pushed { stamp: 4 });

        // Request 4 was already in flight when the frame arrived.
        view.replace_history(&[], &perspective(), 4);
        assert_eq!(view.len(), 1);

        // Request 5 was issued afterwards and must contain it.
        view.replace_history(&[], &perspective(), 5);
        assert!(view.is_empty());
    }

    #[test]
    fn failed_send_stays_visible_and_marked() {
        let mut view = MessageView::new();
        view.append_one(
            &mine("lost"),
            &perspective(),
            Provenance::Outgoing {
                local_id: 3,
                state: OutgoingState::Sending,
            },
        );
        assert!(view.mark_failed(3));
        view.replace_history(&[], &perspective(), 9);

        assert_eq!(
            contents(&view),
            vec![(Direction::Mine, "lost".to_string(), DeliveryStatus::Failed)]
        );
        assert!(!view.mark_failed(4));
    }

    #[test]
    fn error_slots_are_retrievable_and_cleared_by_clear() {
        let mut view = MessageView::new();
        view.set_history_error("history unavailable");
        assert_eq!(view.last_error(), Some("history unavailable"));

        view.set_send_error("not sent");
        view.clear_history_error();
        assert_eq!(view.last_error(), Some("not sent"));

        view.clear();
        assert_eq!(view.last_error(), None);
    }

    #[test]
    fn failed_send_is_never_taken_for_a_persisted_copy() {
        let mut view = MessageView::new();
        view.render_all(&[], &perspective());
        view.append_one(
            &mine("hi"),
            &perspective(),
            Provenance::Outgoing {
                local_id: 1,
                state: OutgoingState::Failed,
            },
        );

        view.replace_history(&[mine("hi")], &perspective(), 2);
        assert_eq!(
            contents(&view),
            vec![
                (Direction::Mine, "hi".to_string(), DeliveryStatus::Delivered),
                (Direction::Mine, "hi".to_string(), DeliveryStatus::Failed),
            ]
        );
    }

    #[test]
    fn nothing_is_matched_before_a_history_was_loaded() {
        let mut view = MessageView::new();
        view.append_one(
            &mine("hi"),
            &perspective(),
            Provenance::Outgoing {
                local_id: 1,
                state: OutgoingState::Sending,
            },
        );

        // An old "hi" on the server is not the pending one.
        view.replace_history(&[mine("hi")], &perspective(), 1);
        assert_eq!(
            contents(&view),
            vec![
                (Direction::Mine, "hi".to_string(), DeliveryStatus::Delivered),
                (Direction::Mine, "hi".to_string(), DeliveryStatus::Pending),
            ]
        );
    }
}
