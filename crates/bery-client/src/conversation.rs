//! Client-local message state.
//!
//! Outbound messages are added optimistically with status `sent` and then
//! moved forward by the receipts the relay sends back. Receipts can arrive
//! duplicated, out of order, or for messages the UI already discarded, so
//! applying them is idempotent and never moves a message backwards.

use std::collections::HashMap;

use bery_shared::protocol::{ChatMessage, MediaAttachment, StatusUpdate};
use bery_shared::{DeliveryStatus, MessageId};

use crate::events::SessionEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalMessage {
    pub id: MessageId,
    pub text: Option<String>,
    pub media: Option<MediaAttachment>,
    pub direction: Direction,
    pub timestamp: String,
    pub status: DeliveryStatus,
    /// Shown in group contexts.
    pub sender_name: Option<String>,
    /// Relay explanation when `status` is `failed`.
    pub error: Option<String>,
}

/// Message threads keyed by contact identity.
#[derive(Debug, Default)]
pub struct Conversations {
    threads: HashMap<String, Vec<LocalMessage>>,
}

impl Conversations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message we are about to send. Its thread is the recipient.
    pub fn push_outbound(&mut self, message: &ChatMessage) {
        let thread = self.threads.entry(message.contact_id.clone()).or_default();
        if thread
            .iter()
            .any(|m| m.direction == Direction::Outbound && m.id == message.message_id)
        {
            return;
        }
        thread.push(LocalMessage {
            id: message.message_id.clone(),
            text: message.text.clone(),
            media: message.media(),
            direction: Direction::Outbound,
            timestamp: message.timestamp.clone(),
            status: DeliveryStatus::Sent,
            sender_name: message.sender_name.clone(),
            error: None,
        });
    }

    /// Record a message the relay delivered to us. Its thread is the sender.
    /// Returns `false` for a duplicate.
    pub fn push_inbound(&mut self, message: ChatMessage) -> bool {
        let media = message.media();
        let thread = self.threads.entry(message.contact_id).or_default();
        if thread
            .iter()
            .any(|m| m.direction == Direction::Inbound && m.id == message.message_id)
        {
            return false;
        }
        thread.push(LocalMessage {
            id: message.message_id,
            text: message.text,
            media,
            direction: Direction::Inbound,
            timestamp: message.timestamp,
            status: DeliveryStatus::Delivered,
            sender_name: message.sender_name,
            error: None,
        });
        true
    }

    /// Apply a receipt to the matching outbound message.
    ///
    /// `failed` wins over everything and sticks; otherwise a status only
    /// replaces a lower one. Returns whether anything changed.
    pub fn apply_status(&mut self, update: &StatusUpdate) -> bool {
        let Some(message) = self
            .threads
            .get_mut(&update.contact_id)
            .and_then(|thread| {
                thread
                    .iter_mut()
                    .find(|m| m.direction == Direction::Outbound && m.id == update.message_id)
            })
        else {
            return false;
        };

        if message.status == DeliveryStatus::Failed {
            return false;
        }
        if update.status.rank() <= message.status.rank() {
            return false;
        }

        message.status = update.status;
        if update.status == DeliveryStatus::Failed {
            message.error = update.error.clone();
        }
        true
    }

    /// Fold a session event into local state. Returns whether it changed.
    pub fn apply(&mut self, event: &SessionEvent) -> bool {
        match event {
            SessionEvent::Message(message) => self.push_inbound(message.clone()),
            SessionEvent::Status(update) => self.apply_status(update),
            _ => false,
        }
    }

    pub fn thread(&self, contact: &str) -> &[LocalMessage] {
        self.threads.get(contact).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, contact: &str, id: &MessageId) -> Option<&LocalMessage> {
        self.thread(contact).iter().find(|m| &m.id == id)
    }

    pub fn contacts(&self) -> impl Iterator<Item = &str> {
        self.threads.keys().map(String::as_str)
    }

    /// Forget a message, e.g. when the user deletes it. Late receipts for it
    /// are then ignored.
    pub fn remove(&mut self, contact: &str, id: &MessageId) -> Option<LocalMessage> {
        let thread = self.threads.get_mut(contact)?;
        let index = thread.iter().position(|m| &m.id == id)?;
        Some(thread.remove(index))
    }
}
