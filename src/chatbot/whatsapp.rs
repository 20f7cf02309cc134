//! WhatsApp Business Cloud API client (Graph API).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::chatbot::menu::Menu;
use crate::chatbot::message::OutboundReply;
use crate::chatbot::transport::{Transport, TransportError};

pub const GRAPH_BASE_URL: &str = "https://graph.facebook.com";

/// Cloud API limit for a text message body.
pub const MAX_TEXT_CHARS: usize = 4096;

/// The business phone number behind the configured phone number ID.
#[derive(Debug, Clone, Deserialize)]
pub struct PhoneNumber {
    pub id: String,
    #[serde(default)]
    pub display_phone_number: String,
    #[serde(default)]
    pub verified_name: Option<String>,
}

impl PhoneNumber {
    /// Click-to-chat link for this number.
    pub fn chat_link(&self) -> String {
        let digits: String = self
            .display_phone_number
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        format!("https://wa.me/{digits}")
    }
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Deserialize)]
struct SentMessage {
    id: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    id: String,
}

/// WhatsApp Cloud API client.
pub struct WhatsAppClient {
    access_token: String,
    phone_number_id: String,
    api_version: String,
    base_url: String,
    http: reqwest::Client,
}

impl WhatsAppClient {
    pub fn new(access_token: String, phone_number_id: String, api_version: String) -> Self {
        Self {
            access_token,
            phone_number_id,
            api_version,
            base_url: GRAPH_BASE_URL.to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Point the client at another Graph API host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn phone_url(&self) -> String {
        format!("{}/{}/{}", self.base_url, self.api_version, self.phone_number_id)
    }

    /// Check the access token by fetching the phone number node.
    pub async fn verify_credentials(&self) -> Result<PhoneNumber, TransportError> {
        let url = format!("{}?fields=id,display_phone_number,verified_name", self.phone_url());
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .timeout(Duration::from_secs(30))
            .send()
            .await?;

        let body = read_success(response).await?;
        let phone: PhoneNumber =
            serde_json::from_str(&body).map_err(|e| TransportError::Parse(e.to_string()))?;

        info!(
            "📱 WhatsApp number {} ({})",
            phone.display_phone_number,
            phone.verified_name.as_deref().unwrap_or("unverified")
        );
        Ok(phone)
    }

    async fn post_message(&self, payload: &Value) -> Result<String, TransportError> {
        let response = self
            .http
            .post(format!("{}/messages", self.phone_url()))
            .bearer_auth(&self.access_token)
            .timeout(Duration::from_secs(30))
            .json(payload)
            .send()
            .await?;

        let body = read_success(response).await?;
        let sent: SendResponse =
            serde_json::from_str(&body).map_err(|e| TransportError::Parse(e.to_string()))?;

        sent.messages
            .into_iter()
            .next()
            .map(|m| m.id)
            .ok_or_else(|| TransportError::Parse("no message id in response".to_string()))
    }

    /// Send text, split into several messages when over the length limit.
    pub async fn send_text(&self, to: &str, text: &str) -> Result<Vec<String>, TransportError> {
        let mut ids = Vec::new();
        for chunk in split_message(text, MAX_TEXT_CHARS) {
            ids.push(self.post_message(&text_payload(to, &chunk)).await?);
        }
        let preview: String = text.chars().take(50).collect();
        info!("📤 Sent to {}: \"{}\"", to, preview);
        Ok(ids)
    }

    /// Send the interactive button menu.
    pub async fn send_menu(&self, to: &str, menu: &Menu) -> Result<String, TransportError> {
        let id = self.post_message(&menu_payload(to, menu)).await?;
        info!("📋 Sent menu to {}", to);
        Ok(id)
    }

    /// Upload a local image and send it.
    pub async fn send_image(&self, to: &str, path: &Path) -> Result<String, TransportError> {
        let media_id = self.upload_media(path).await?;
        let id = self.post_message(&image_payload(to, &media_id)).await?;
        info!("📷 Sent image {} to {}", path.display(), to);
        Ok(id)
    }

    async fn upload_media(&self, path: &Path) -> Result<String, TransportError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| TransportError::Media { path: path.to_path_buf(), source: e })?;
        let mime = media_type(path);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());

        debug!("Uploading {} ({} bytes, {})", path.display(), data.len(), mime);

        let part = Part::bytes(data).file_name(file_name).mime_str(mime)?;
        let form = Form::new()
            .text("messaging_product", "whatsapp")
            .text("type", mime)
            .part("file", part);

        let response = self
            .http
            .post(format!("{}/media", self.phone_url()))
            .bearer_auth(&self.access_token)
            .timeout(Duration::from_secs(60))
            .multipart(form)
            .send()
            .await?;

        let body = read_success(response).await?;
        let uploaded: UploadResponse =
            serde_json::from_str(&body).map_err(|e| TransportError::Parse(e.to_string()))?;
        Ok(uploaded.id)
    }
}

#[async_trait]
impl Transport for WhatsAppClient {
    async fn send(&self, to: &str, reply: OutboundReply) -> Result<(), TransportError> {
        match reply {
            OutboundReply::Text(text) => self.send_text(to, &text).await.map(|_| ()),
            OutboundReply::Menu(menu) => self.send_menu(to, &menu).await.map(|_| ()),
            OutboundReply::Image(path) => self.send_image(to, &path).await.map(|_| ()),
        }
    }
}

/// Return the body of a 2xx response, or an API error carrying it.
async fn read_success(response: reqwest::Response) -> Result<String, TransportError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        warn!("WhatsApp API error {status}: {body}");
        return Err(TransportError::Api { status: status.as_u16(), body });
    }
    Ok(body)
}

pub fn text_payload(to: &str, body: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": "text",
        "text": {
            "preview_url": false,
            "body": body,
        }
    })
}

pub fn menu_payload(to: &str, menu: &Menu) -> Value {
    let buttons: Vec<Value> = menu
        .options
        .iter()
        .map(|o| {
            json!({
                "type": "reply",
                "reply": { "id": o.id(), "title": o.label() }
            })
        })
        .collect();

    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": "interactive",
        "interactive": {
            "type": "button",
            "header": { "type": "text", "text": menu.header },
            "body": { "text": menu.body },
            "footer": { "text": menu.footer },
            "action": { "buttons": buttons }
        }
    })
}

pub fn image_payload(to: &str, media_id: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": "image",
        "image": { "id": media_id }
    })
}

/// MIME type from the file extension.
fn media_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}

/// Split `text` into chunks of at most `max_chars` characters, preferring newline breaks.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.chars().count() > max_chars {
        let limit = rest
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let cut = rest[..limit].rfind('\n').filter(|&i| i > 0).unwrap_or(limit);
        chunks.push(rest[..cut].to_string());
        rest = rest[cut..].trim_start_matches('\n');
    }

    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}
