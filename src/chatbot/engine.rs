//! Message router - decides how the bot answers each inbound message.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::chatbot::knowledge::KnowledgeBase;
use crate::chatbot::menu::{present_menu, MenuOption, MENU_COMMAND};
use crate::chatbot::message::{InboundMessage, OutboundReply};
use crate::chatbot::qr;
use crate::chatbot::session::SessionStore;
use crate::chatbot::transport::{Transport, TransportError, TransportEvent};
use crate::openai::{Completer, Completion, Unavailable};

/// Sent when the completion service cannot answer.
pub const FALLBACK_REPLY: &str =
    "Saat ini bot belum bisa menjawab pertanyaan ini. Silakan coba lagi nanti atau ketik *menu*.";

/// Which branch handled a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Unseen sender: menu sent, nothing else.
    FirstContact,
    /// Menu command.
    Menu,
    Selection(MenuOption),
    /// Knowledge entry at this index.
    Knowledge(usize),
    Generated,
    Fallback(Unavailable),
    /// Nothing to answer (no text).
    Ignored,
}

pub struct MessageRouter {
    knowledge: Arc<KnowledgeBase>,
    sessions: Arc<dyn SessionStore>,
    completer: Arc<dyn Completer>,
    transport: Arc<dyn Transport>,
}

impl MessageRouter {
    pub fn new(
        knowledge: Arc<KnowledgeBase>,
        sessions: Arc<dyn SessionStore>,
        completer: Arc<dyn Completer>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            knowledge,
            sessions,
            completer,
            transport,
        }
    }

    async fn reply(&self, to: &str, text: impl Into<String>) -> Result<(), TransportError> {
        self.transport.send(to, OutboundReply::Text(text.into())).await
    }

    /// Route one message and send the replies it calls for.
    pub async fn handle(&self, msg: &InboundMessage) -> Result<Route, TransportError> {
        let sender = msg.sender.as_str();

        if self.sessions.begin(sender).await {
            info!("👋 New sender {}, sending menu", sender);
            if let Err(e) = present_menu(self.transport.as_ref(), sender).await {
                // Only senders that got a menu stay active
                self.sessions.forget(sender).await;
                return Err(e);
            }
            return Ok(Route::FirstContact);
        }

        let text = msg.normalized_body();

        if text == MENU_COMMAND {
            present_menu(self.transport.as_ref(), sender).await?;
            return Ok(Route::Menu);
        }

        if let Some(option) = msg.selection {
            self.reply(sender, option.reply()).await?;
            return Ok(Route::Selection(option));
        }

        if text.is_empty() {
            debug!("Ignoring message {} from {} without text", msg.message_id, sender);
            return Ok(Route::Ignored);
        }

        if let Some((index, entry)) = self.knowledge.find(&text) {
            self.reply(sender, entry.response.as_str()).await?;
            if let Some(ref image) = entry.image {
                self.transport
                    .send(sender, OutboundReply::Image(image.clone()))
                    .await?;
            }
            return Ok(Route::Knowledge(index));
        }

        match self.completer.complete(msg.body.trim()).await {
            Completion::Text(generated) => {
                self.reply(sender, generated).await?;
                Ok(Route::Generated)
            }
            Completion::Unavailable(reason) => {
                self.reply(sender, FALLBACK_REPLY).await?;
                Ok(Route::Fallback(reason))
            }
        }
    }

    /// Handle a message and log the outcome. Send failures are logged, never raised.
    pub async fn dispatch(&self, msg: InboundMessage) {
        let preview: String = msg.body.chars().take(50).collect();
        info!("📨 {} ({}): \"{}\"", msg.sender, msg.message_id, preview);

        match self.handle(&msg).await {
            Ok(route) => debug!("✅ Handled {} via {:?}", msg.message_id, route),
            Err(e) => error!("Failed to reply to {}: {}", msg.sender, e),
        }
    }
}

/// Consume transport events until the channel closes, then wait for in-flight replies.
pub async fn run(router: Arc<MessageRouter>, mut events: mpsc::Receiver<TransportEvent>) {
    let mut in_flight = JoinSet::new();

    while let Some(event) = events.recv().await {
        while let Some(joined) = in_flight.try_join_next() {
            log_join(joined);
        }

        match event {
            TransportEvent::LinkCode(code) => match qr::render(&code) {
                Some(rendered) => {
                    info!("📲 Scan to open a chat with the bot: {}", code);
                    println!("{rendered}");
                }
                None => warn!("Could not render linking code as QR: {}", code),
            },
            TransportEvent::Ready => info!("✅ Bot active and ready for messages"),
            TransportEvent::Message(msg) => {
                let router = router.clone();
                in_flight.spawn(async move { router.dispatch(msg).await });
            }
        }
    }

    info!("Event channel closed, finishing {} in-flight message(s)", in_flight.len());
    while let Some(joined) = in_flight.join_next().await {
        log_join(joined);
    }
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        error!("💥 Message handler crashed: {}", e);
    }
}
