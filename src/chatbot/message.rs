//! Message types exchanged with the transport.

use std::path::PathBuf;

use crate::chatbot::menu::{Menu, MenuOption};

/// A message received from a WhatsApp user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub message_id: String,
    /// Sender's WhatsApp ID (phone number in international format, digits only).
    pub sender: String,
    /// Text body, button title or media caption. Empty for other media.
    pub body: String,
    /// Menu button the message selects, resolved at the transport boundary.
    pub selection: Option<MenuOption>,
}

impl InboundMessage {
    /// Build a message from typed text, resolving a menu selection from the body.
    pub fn new(message_id: impl Into<String>, sender: impl Into<String>, body: impl Into<String>) -> Self {
        let body = body.into();
        let selection = MenuOption::resolve(&body);
        Self {
            message_id: message_id.into(),
            sender: sender.into(),
            body,
            selection,
        }
    }

    /// Build a message whose selection came from an interactive reply.
    pub fn with_selection(
        message_id: impl Into<String>,
        sender: impl Into<String>,
        body: impl Into<String>,
        selection: Option<MenuOption>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            sender: sender.into(),
            body: body.into(),
            selection,
        }
    }

    /// Lowercased body with surrounding whitespace removed.
    pub fn normalized_body(&self) -> String {
        self.body.trim().to_lowercase()
    }
}

/// A reply handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundReply {
    Text(String),
    Menu(Menu),
    /// Image file sent as a separate media message.
    Image(PathBuf),
}
