//! Webhook endpoint receiving WhatsApp Cloud API events.
//!
//! `GET /webhook` answers Meta's verification handshake, `POST /webhook`
//! accepts message deliveries and forwards them to the bot loop. Deliveries
//! are acknowledged right away; replies happen asynchronously.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::Router;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::chatbot::menu::MenuOption;
use crate::chatbot::message::InboundMessage;
use crate::chatbot::transport::TransportEvent;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

#[derive(Clone)]
pub struct WebhookState {
    verify_token: Arc<str>,
    app_secret: Option<Arc<str>>,
    events: mpsc::Sender<TransportEvent>,
}

impl WebhookState {
    pub fn new(verify_token: String, app_secret: Option<String>, events: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            verify_token: verify_token.into(),
            app_secret: app_secret.map(Into::into),
            events,
        }
    }
}

pub fn routes(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook", get(verify).post(receive))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

async fn verify(State(state): State<WebhookState>, Query(q): Query<VerifyQuery>) -> Result<String, StatusCode> {
    if q.mode.as_deref() != Some("subscribe") {
        return Err(StatusCode::FORBIDDEN);
    }

    match q.verify_token {
        Some(token) if token.as_str() == &*state.verify_token => {
            info!("✅ Webhook verification successful");
            Ok(q.challenge.unwrap_or_default())
        }
        _ => {
            warn!("Webhook verification failed: invalid token");
            Err(StatusCode::FORBIDDEN)
        }
    }
}

async fn receive(State(state): State<WebhookState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    if let Some(ref secret) = state.app_secret {
        let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
        if !verify_signature(secret, signature, &body) {
            warn!("Rejected webhook delivery with bad signature");
            return StatusCode::UNAUTHORIZED;
        }
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            warn!("Malformed webhook payload: {e}");
            return StatusCode::BAD_REQUEST;
        }
    };

    // Acknowledgement never waits for queue space
    for msg in payload.into_messages() {
        match state.events.try_send(TransportEvent::Message(msg)) {
            Ok(()) => {}
            Err(TrySendError::Full(TransportEvent::Message(msg))) => {
                warn!("Event queue full, dropping message {} from {}", msg.message_id, msg.sender);
            }
            Err(TrySendError::Full(_)) => warn!("Event queue full, dropping event"),
            Err(TrySendError::Closed(_)) => warn!("Event channel closed, dropping message"),
        }
    }

    StatusCode::OK
}

/// Check `sha256=<hex>` against the HMAC-SHA256 of `body`.
pub fn verify_signature(app_secret: &str, signature_header: Option<&str>, body: &[u8]) -> bool {
    let signature = signature_header.unwrap_or("").trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature).trim();
    if signature.is_empty() {
        return false;
    }
    let Ok(signature_bytes) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature_bytes).is_ok()
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
struct Change {
    #[serde(default)]
    value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
struct ChangeValue {
    #[serde(default)]
    messages: Vec<WaMessage>,
}

#[derive(Debug, Deserialize)]
struct WaMessage {
    from: String,
    id: String,
    #[serde(rename = "type")]
    kind: String,
    text: Option<TextBody>,
    interactive: Option<Interactive>,
    button: Option<ButtonBody>,
    image: Option<MediaBody>,
    video: Option<MediaBody>,
    document: Option<MediaBody>,
}

#[derive(Debug, Deserialize)]
struct TextBody {
    body: String,
}

#[derive(Debug, Deserialize)]
struct Interactive {
    button_reply: Option<ReplyBody>,
    list_reply: Option<ReplyBody>,
}

#[derive(Debug, Deserialize)]
struct ReplyBody {
    id: String,
    title: String,
}

#[derive(Debug, Deserialize)]
struct ButtonBody {
    payload: Option<String>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaBody {
    caption: Option<String>,
}

impl WebhookPayload {
    /// Flatten every delivered message. Status callbacks carry no messages and yield nothing.
    pub fn into_messages(self) -> Vec<InboundMessage> {
        self.entry
            .into_iter()
            .flat_map(|e| e.changes)
            .flat_map(|c| c.value.messages)
            .map(WaMessage::into_inbound)
            .collect()
    }
}

impl WaMessage {
    fn into_inbound(self) -> InboundMessage {
        match self.kind.as_str() {
            "text" => {
                let body = self.text.map(|t| t.body).unwrap_or_default();
                InboundMessage::new(self.id, self.from, body)
            }
            "interactive" => {
                let reply = self.interactive.and_then(|i| i.button_reply.or(i.list_reply));
                match reply {
                    Some(r) => {
                        let selection = MenuOption::resolve(&r.id).or_else(|| MenuOption::resolve(&r.title));
                        InboundMessage::with_selection(self.id, self.from, r.title, selection)
                    }
                    None => InboundMessage::with_selection(self.id, self.from, "", None),
                }
            }
            "button" => {
                let (payload, text) = self
                    .button
                    .map(|b| (b.payload, b.text.unwrap_or_default()))
                    .unwrap_or_default();
                let selection = payload
                    .as_deref()
                    .and_then(MenuOption::resolve)
                    .or_else(|| MenuOption::resolve(&text));
                InboundMessage::with_selection(self.id, self.from, text, selection)
            }
            "image" | "video" | "document" => {
                let caption = [self.image, self.video, self.document]
                    .into_iter()
                    .flatten()
                    .find_map(|m| m.caption)
                    .unwrap_or_default();
                InboundMessage::new(self.id, self.from, caption)
            }
            other => {
                debug!("Unsupported WhatsApp message type {other} from {}", self.from);
                InboundMessage::with_selection(self.id, self.from, "", None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn envelope(message: &str) -> String {
        format!(
            r#"{{"object":"whatsapp_business_account","entry":[{{"id":"1","changes":[{{"field":"messages","value":{{"messaging_product":"whatsapp","metadata":{{"display_phone_number":"6282212345678","phone_number_id":"1065403"}},"contacts":[{{"profile":{{"name":"Budi"}},"wa_id":"6281234"}}],"messages":[{message}]}}}}]}}]}}"#
        )
    }

    fn parse(json: &str) -> Vec<InboundMessage> {
        serde_json::from_str::<WebhookPayload>(json).unwrap().into_messages()
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    // =========================================================================
    // PAYLOAD PARSING
    // =========================================================================

    #[test]
    fn test_parse_text_message() {
        let msgs = parse(&envelope(
            r#"{"from":"6281234","id":"wamid.1","timestamp":"1700000000","type":"text","text":{"body":"Apa itu TA Cilacap"}}"#,
        ));
        assert_eq!(msgs, vec![InboundMessage::new("wamid.1", "6281234", "Apa itu TA Cilacap")]);
        assert_eq!(msgs[0].selection, None);
    }

    #[test]
    fn test_parse_button_reply() {
        let msgs = parse(&envelope(
            r#"{"from":"6281234","id":"wamid.2","type":"interactive","interactive":{"type":"button_reply","button_reply":{"id":"cek_order","title":"📦 Cek Order"}}}"#,
        ));
        assert_eq!(msgs[0].selection, Some(MenuOption::OrderStatus));
        assert_eq!(msgs[0].body, "📦 Cek Order");
    }

    #[test]
    fn test_parse_unknown_interactive_reply() {
        let msgs = parse(&envelope(
            r#"{"from":"6281234","id":"wamid.3","type":"interactive","interactive":{"type":"list_reply","list_reply":{"id":"promo","title":"Promo"}}}"#,
        ));
        assert_eq!(msgs[0].selection, None);
        assert_eq!(msgs[0].body, "Promo");
    }

    #[test]
    fn test_parse_legacy_button() {
        let msgs = parse(&envelope(
            r#"{"from":"6281234","id":"wamid.4","type":"button","button":{"payload":"kontak_cs","text":"Kontak CS"}}"#,
        ));
        assert_eq!(msgs[0].selection, Some(MenuOption::ContactSupport));
    }

    #[test]
    fn test_parse_image_caption_and_bare_media() {
        let msgs = parse(&envelope(
            r#"{"from":"6281234","id":"wamid.5","type":"image","image":{"id":"m1","mime_type":"image/jpeg","caption":"gangguan modem"}}"#,
        ));
        assert_eq!(msgs[0].body, "gangguan modem");

        let msgs = parse(&envelope(
            r#"{"from":"6281234","id":"wamid.6","type":"sticker","sticker":{"id":"s1"}}"#,
        ));
        assert_eq!(msgs[0].body, "");
        assert_eq!(msgs[0].selection, None);
    }

    #[test]
    fn test_status_callbacks_yield_nothing() {
        let json = r#"{"object":"whatsapp_business_account","entry":[{"id":"1","changes":[{"field":"messages","value":{"messaging_product":"whatsapp","statuses":[{"id":"wamid.9","status":"delivered","recipient_id":"6281234"}]}}]}]}"#;
        assert!(parse(json).is_empty());
    }

    // =========================================================================
    // SIGNATURES
    // =========================================================================

    #[test]
    fn test_signature_roundtrip_and_tamper() {
        let body = br#"{"entry":[]}"#;
        let header = sign("app-secret", body);
        assert!(verify_signature("app-secret", Some(&header), body));
        assert!(!verify_signature("app-secret", Some(&header), br#"{"entry":[1]}"#));
        assert!(!verify_signature("other-secret", Some(&header), body));
        assert!(!verify_signature("app-secret", None, body));
        assert!(!verify_signature("app-secret", Some("sha256=zz"), body));
    }

    // =========================================================================
    // HTTP ROUTES
    // =========================================================================

    fn state(app_secret: Option<&str>) -> (WebhookState, mpsc::Receiver<TransportEvent>) {
        let (tx, rx) = mpsc::channel(8);
        (WebhookState::new("verify-me".to_string(), app_secret.map(str::to_string), tx), rx)
    }

    #[tokio::test]
    async fn test_verification_handshake() {
        let (state, _rx) = state(None);
        let response = routes(state)
            .oneshot(
                Request::get("/webhook?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=1158201444")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"1158201444");
    }

    #[tokio::test]
    async fn test_verification_wrong_token() {
        let (state, _rx) = state(None);
        let response = routes(state)
            .oneshot(
                Request::get("/webhook?hub.mode=subscribe&hub.verify_token=nope&hub.challenge=1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_signed_delivery_forwarded() {
        let (state, mut rx) = state(Some("app-secret"));
        let body = envelope(r#"{"from":"6281234","id":"wamid.1","type":"text","text":{"body":"menu"}}"#);
        let response = routes(state)
            .oneshot(
                Request::post("/webhook")
                    .header("content-type", "application/json")
                    .header(SIGNATURE_HEADER, sign("app-secret", body.as_bytes()))
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Message(InboundMessage::new("wamid.1", "6281234", "menu")))
        );
    }

    #[tokio::test]
    async fn test_bad_signature_rejected() {
        let (state, mut rx) = state(Some("app-secret"));
        let body = envelope(r#"{"from":"6281234","id":"wamid.1","type":"text","text":{"body":"menu"}}"#);
        let response = routes(state)
            .oneshot(
                Request::post("/webhook")
                    .header(SIGNATURE_HEADER, sign("wrong", body.as_bytes()))
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_still_acknowledged() {
        let (tx, mut rx) = mpsc::channel(1);
        tx.try_send(TransportEvent::Ready).unwrap();
        let state = WebhookState::new("verify-me".to_string(), None, tx);
        let body = envelope(r#"{"from":"6281234","id":"wamid.1","type":"text","text":{"body":"halo"}}"#);

        let response = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            routes(state).oneshot(Request::post("/webhook").body(Body::from(body)).unwrap()),
        )
        .await
        .expect("delivery should not wait for queue space")
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(rx.recv().await, Some(TransportEvent::Ready));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_body_rejected() {
        let (state, _rx) = state(None);
        let response = routes(state)
            .oneshot(Request::post("/webhook").body(Body::from("not json")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
