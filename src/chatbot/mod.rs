//! Chatbot module - answers WhatsApp messages from a menu, a keyword
//! knowledge base, or OpenAI.

pub mod engine;
pub mod knowledge;
pub mod menu;
pub mod message;
pub mod qr;
pub mod session;
pub mod transport;
pub mod webhook;
pub mod whatsapp;


pub use engine::{MessageRouter, Route, FALLBACK_REPLY};
pub use knowledge::{KnowledgeBase, KnowledgeEntry};
pub use menu::{Menu, MenuOption};
pub use message::{InboundMessage, OutboundReply};
pub use session::{MemorySessionStore, SessionStore};
pub use transport::{Transport, TransportError, TransportEvent};
pub use whatsapp::WhatsAppClient;
