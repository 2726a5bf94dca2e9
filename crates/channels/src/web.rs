//! Web channel — WebSocket transport over axum.
//!
//! Clients connect to `/ws`, receive the session's history (with images
//! hydrated) as a first frame, then exchange JSON frames: inbound
//! `{text, images[]}` payloads become normalized messages; outbound content
//! blocks, signals and a terminal `done` marker stream back as they are
//! produced. One writer task per connection serializes socket writes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, error, info, warn};

use ariadne_config::SystemConfig;
use ariadne_core::{
    ChannelAdapter, ChannelContext, ChannelError, ContentBlock, Error, FileAttachment,
    InboundMessage, SessionContext,
};
use ariadne_sessions::SessionManager;

use crate::ChannelFactory;

fn default_port() -> u16 {
    9453
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// Inbound frame shape from web clients.
#[derive(Debug, Deserialize)]
struct IncomingFrame {
    #[serde(default)]
    text: String,
    #[serde(default)]
    images: Vec<IncomingImage>,
}

#[derive(Debug, Deserialize)]
struct IncomingImage {
    #[serde(default)]
    name: String,
    #[serde(default)]
    mime: String,
    /// Base64-encoded bytes.
    #[serde(default)]
    data: String,
}

pub struct WebChannel {
    inner: Arc<WebInner>,
}

struct WebInner {
    config: WebConfig,
    sessions: Arc<SessionManager>,
    /// user id → serialized-frame sender of the connection's writer task.
    connections: RwLock<HashMap<String, mpsc::Sender<String>>>,
    shutdown: watch::Sender<bool>,
}

#[derive(Clone)]
struct WsState {
    inner: Arc<WebInner>,
    ctx: Arc<dyn ChannelContext>,
}

impl WebChannel {
    pub fn new(config: WebConfig, sessions: Arc<SessionManager>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(WebInner {
                config,
                sessions,
                connections: RwLock::new(HashMap::new()),
                shutdown,
            }),
        }
    }

    async fn connection(&self, user_id: &str) -> Result<mpsc::Sender<String>, ChannelError> {
        self.inner
            .connections
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| ChannelError::ConnectionLost(format!("web user {user_id} not connected")))
    }
}

#[async_trait]
impl ChannelAdapter for WebChannel {
    fn id(&self) -> &str {
        "web"
    }

    async fn start(&self, ctx: Arc<dyn ChannelContext>) -> Result<(), ChannelError> {
        let state = WsState {
            inner: Arc::clone(&self.inner),
            ctx,
        };
        let app = Router::new()
            .route("/ws", get(ws_handler))
            .with_state(state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.inner.config.port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ChannelError::ConnectionLost(format!("bind {addr}: {e}")))?;
        info!(port = self.inner.config.port, "Web channel listening");

        let mut shutdown = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            let serve = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            });
            if let Err(e) = serve.await {
                error!(error = %e, "Web server error");
            }
        });

        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        let _ = self.inner.shutdown.send(true);
        Ok(())
    }

    async fn send(&self, session: &SessionContext, text: &str) -> Result<(), ChannelError> {
        let conn = self.connection(&session.user_id).await?;
        let frame = json!({ "type": "text", "text": text }).to_string();
        conn.send(frame).await.map_err(|_| {
            ChannelError::ConnectionLost(format!("web user {} disconnected", session.user_id))
        })
    }

    async fn stream(
        &self,
        session: &SessionContext,
        mut blocks: mpsc::Receiver<ContentBlock>,
    ) -> Result<(), ChannelError> {
        let conn = self.connection(&session.user_id).await?;

        while let Some(block) = blocks.recv().await {
            let Some(frame) = block_to_frame(&block) else {
                continue;
            };
            if conn.send(frame.to_string()).await.is_err() {
                return Err(ChannelError::ConnectionLost(format!(
                    "web user {} disconnected mid-stream",
                    session.user_id
                )));
            }
        }

        conn.send(json!({ "type": "done" }).to_string())
            .await
            .map_err(|_| ChannelError::ConnectionLost("stream finish frame failed".into()))
    }

    async fn send_signal(
        &self,
        session: &SessionContext,
        signal: &str,
    ) -> Result<(), ChannelError> {
        let conn = self.connection(&session.user_id).await?;
        let frame = json!({ "type": "signal", "value": signal }).to_string();
        conn.send(frame).await.map_err(|_| {
            ChannelError::ConnectionLost(format!("web user {} disconnected", session.user_id))
        })
    }
}

async fn ws_handler(
    State(state): State<WsState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

async fn handle_socket(socket: WebSocket, state: WsState, addr: SocketAddr) {
    let user_id = addr.to_string();
    let session = SessionContext::new("web", user_id.clone(), user_id.clone(), user_id.clone());

    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
    state
        .inner
        .connections
        .write()
        .await
        .insert(user_id.clone(), out_tx.clone());
    info!(user = %user_id, "Web client connected");

    // Single writer task per connection keeps socket writes serialized.
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if sink.send(WsMessage::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    // Replay the session so a reconnecting client sees its context. Image
    // paths are local to the server, so hydrate to inline bytes.
    let history = state.inner.sessions.get_history(&session.session_id());
    let replay = json!({ "type": "history", "messages": history.snapshot_ui() });
    let _ = out_tx.send(replay.to_string()).await;

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(WsMessage::Text(raw)) => {
                let frame: IncomingFrame = match serde_json::from_str(raw.as_str()) {
                    Ok(f) => f,
                    Err(e) => {
                        warn!(user = %user_id, error = %e, "Invalid inbound frame");
                        continue;
                    }
                };

                let mut inbound = InboundMessage::new(session.clone(), frame.text);
                for image in frame.images {
                    match BASE64.decode(image.data.as_bytes()) {
                        Ok(bytes) => inbound.files.push(FileAttachment {
                            filename: image.name,
                            mime_type: if image.mime.is_empty() {
                                "image/png".into()
                            } else {
                                image.mime
                            },
                            data: Some(bytes),
                            path: None,
                        }),
                        Err(e) => warn!(user = %user_id, error = %e, "Dropping undecodable image"),
                    }
                }

                state.ctx.on_message("web", inbound);
            }
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    state.inner.connections.write().await.remove(&user_id);
    writer.abort();
    debug!(user = %user_id, "Web client disconnected");
}

/// Render one content block as an outbound JSON frame. Returns `None` for
/// blocks this transport cannot represent.
fn block_to_frame(block: &ContentBlock) -> Option<serde_json::Value> {
    match block {
        ContentBlock::Text { text } => Some(json!({ "type": "text", "text": text })),
        ContentBlock::Thinking { text, .. } => Some(json!({ "type": "thinking", "text": text })),
        ContentBlock::Error { text } => Some(json!({ "type": "error", "text": text })),
        ContentBlock::Image { source } => {
            if let Some(data) = &source.data {
                return Some(json!({
                    "type": "image",
                    "data": BASE64.encode(data),
                    "mime": source.media_type,
                }));
            }
            if let Some(path) = source.file_path() {
                return match std::fs::read(path) {
                    Ok(bytes) => Some(json!({
                        "type": "image",
                        "data": BASE64.encode(bytes),
                        "mime": source.media_type,
                    })),
                    Err(e) => {
                        error!(path = %path.display(), error = %e, "Failed to read local image for stream");
                        None
                    }
                };
            }
            source
                .url
                .as_ref()
                .map(|url| json!({ "type": "image", "url": url }))
        }
    }
}

pub(crate) struct WebFactory;

impl ChannelFactory for WebFactory {
    fn create(
        &self,
        raw_config: &serde_json::Value,
        sessions: &Arc<SessionManager>,
        _system: &SystemConfig,
    ) -> Result<Arc<dyn ChannelAdapter>, Error> {
        let config: WebConfig = serde_json::from_value(raw_config.clone())
            .map_err(|e| Error::Config(format!("web channel config: {e}")))?;
        Ok(Arc::new(WebChannel::new(config, Arc::clone(sessions))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_port() {
        let config: WebConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.port, 9453);

        let config: WebConfig = serde_json::from_str(r#"{"port": 8080}"#).unwrap();
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn text_blocks_become_typed_frames() {
        let frame = block_to_frame(&ContentBlock::text("hi")).unwrap();
        assert_eq!(frame["type"], "text");
        assert_eq!(frame["text"], "hi");

        let frame = block_to_frame(&ContentBlock::thinking("mulling")).unwrap();
        assert_eq!(frame["type"], "thinking");

        let frame = block_to_frame(&ContentBlock::error("boom")).unwrap();
        assert_eq!(frame["type"], "error");
    }

    #[test]
    fn inline_images_encode_base64() {
        let frame = block_to_frame(&ContentBlock::image(vec![1, 2, 3], "image/png")).unwrap();
        assert_eq!(frame["type"], "image");
        assert_eq!(frame["mime"], "image/png");
        assert_eq!(frame["data"], BASE64.encode([1, 2, 3]));
    }

    #[test]
    fn url_images_pass_the_reference() {
        let frame =
            block_to_frame(&ContentBlock::image_from_url("https://x/y.png", "image/png")).unwrap();
        assert_eq!(frame["url"], "https://x/y.png");
    }

    #[test]
    fn missing_file_image_is_skipped() {
        let block = ContentBlock::image_from_file("/nonexistent/img.png", "image/png");
        assert!(block_to_frame(&block).is_none());
    }

    #[test]
    fn incoming_frame_tolerates_missing_fields() {
        let frame: IncomingFrame = serde_json::from_str(r#"{"text":"hello"}"#).unwrap();
        assert_eq!(frame.text, "hello");
        assert!(frame.images.is_empty());
    }

    #[tokio::test]
    async fn sending_without_connection_errors() {
        let sessions = Arc::new(SessionManager::new(None));
        let channel = WebChannel::new(WebConfig::default(), sessions);
        let session = SessionContext::new("web", "1.2.3.4:5", "1.2.3.4:5", "1.2.3.4:5");
        let err = channel.send(&session, "hi").await.unwrap_err();
        assert!(matches!(err, ChannelError::ConnectionLost(_)));
    }
}
