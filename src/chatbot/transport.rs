//! Messaging transport seam: outbound sends and inbound lifecycle events.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::chatbot::message::{InboundMessage, OutboundReply};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("WhatsApp API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("failed to read media file '{}': {source}", .path.display())]
    Media {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse response: {0}")]
    Parse(String),
}

/// Events a transport feeds into the bot loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Operator-facing linking code, shown as a terminal QR.
    LinkCode(String),
    /// Transport is connected and accepting messages.
    Ready,
    Message(InboundMessage),
}

/// Outbound side of a messaging transport.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, to: &str, reply: OutboundReply) -> Result<(), TransportError>;
}
