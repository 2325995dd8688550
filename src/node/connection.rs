//! WebSocket session to one node: open, read loop, backoff reconnect,
//! resume, stats ingestion (§4.2).
//!
//! Restructures the teacher's `player::conn::Connection` (`connect`,
//! `tokio::select!`-driven `recv`, manual backoff) around the node wire
//! protocol instead of Discord's voice gateway.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tungstenite::client::IntoClientRequest;
use tungstenite::http::Request;
use tungstenite::Message;

use crate::ids::GuildId;
use crate::node::payload::{EventData, IncomingEvent, PlayerUpdateState};
use crate::node::Node;
use crate::session::SessionIdMap;

/// Sink for node-originated events, implemented by [`crate::manager::Manager`]
/// to route frames to the right [`crate::player::Player`] and to the event
/// bus (§4.2, §4.5, §4.9).
#[async_trait]
pub trait NodeEventSink: Send + Sync {
    async fn on_player_update(&self, node: &Node, guild_id: GuildId, update: PlayerUpdateState);
    async fn on_event(&self, node: &Node, guild_id: GuildId, event: EventData);
    async fn on_node_ready(&self, node: &Node);
    async fn on_node_disconnect(&self, node: &Node);
    async fn on_node_exhausted(&self, node: &Node);
}

enum ControlMsg {
    Shutdown,
}

/// A handle to a running connection task. Dropping it does not stop the
/// task; call [`NodeConnection::shutdown`] explicitly, matching the
/// teacher's explicit-destroy lifecycle rather than drop-based cleanup.
pub struct NodeConnection {
    control_tx: mpsc::UnboundedSender<ControlMsg>,
}

impl NodeConnection {
    /// Spawns the connection task for `node` and returns a handle to it.
    pub fn start(
        node: Node,
        sink: std::sync::Arc<dyn NodeEventSink>,
        client_id: String,
        client_name: String,
        cluster_id: u32,
    ) -> NodeConnection {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(node, sink, client_id, client_name, cluster_id, control_rx));
        NodeConnection { control_tx }
    }

    pub fn shutdown(&self) {
        let _ = self.control_tx.send(ControlMsg::Shutdown);
    }
}

async fn run(
    node: Node,
    sink: std::sync::Arc<dyn NodeEventSink>,
    client_id: String,
    client_name: String,
    cluster_id: u32,
    mut control_rx: mpsc::UnboundedReceiver<ControlMsg>,
) {
    let mut attempt: u32 = 0;

    'outer: loop {
        let session_ids = SessionIdMap::load().await;
        let resume_key = SessionIdMap::key(node.identifier(), cluster_id);
        let stored_session_id = session_ids.0.get(&resume_key).cloned();

        let stream = match connect(&node, &client_id, &client_name, stored_session_id.as_deref()).await {
            Ok(stream) => stream,
            Err(err) => {
                error!("node {}: initial connect failed: {}", node.identifier(), err);
                attempt += 1;
                if attempt > node.options().retry_amount || !wait_before_retry(&node, attempt, &mut control_rx).await {
                    sink.on_node_exhausted(&node).await;
                    return;
                }
                continue 'outer;
            }
        };

        attempt = 0;
        node.set_connected(true).await;
        debug!("node {}: connected", node.identifier());

        let mut stream = stream;
        loop {
            tokio::select! {
                msg = stream.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            handle_frame(&node, &sink, &text, cluster_id).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            warn!("node {}: connection closed", node.identifier());
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            error!("node {}: ws error: {}", node.identifier(), err);
                            break;
                        }
                    }
                }
                ctrl = control_rx.recv() => {
                    match ctrl {
                        Some(ControlMsg::Shutdown) | None => {
                            let _ = stream.close(None).await;
                            node.set_connected(false).await;
                            return;
                        }
                    }
                }
            }
        }

        node.set_connected(false).await;
        sink.on_node_disconnect(&node).await;

        attempt += 1;
        if attempt > node.options().retry_amount || !wait_before_retry(&node, attempt, &mut control_rx).await {
            sink.on_node_exhausted(&node).await;
            return;
        }
    }
}

/// Sleeps out `retry_delay`, returning `false` if a shutdown arrives first.
async fn wait_before_retry(
    node: &Node,
    attempt: u32,
    control_rx: &mut mpsc::UnboundedReceiver<ControlMsg>,
) -> bool {
    debug!(
        "node {}: reconnecting, attempt {}/{}",
        node.identifier(),
        attempt,
        node.options().retry_amount
    );
    tokio::select! {
        _ = sleep(node.options().retry_delay) => true,
        ctrl = control_rx.recv() => !matches!(ctrl, Some(ControlMsg::Shutdown) | None),
    }
}

type WsStream = async_tungstenite::WebSocketStream<async_tungstenite::tokio::ConnectStream>;

async fn connect(
    node: &Node,
    client_id: &str,
    client_name: &str,
    stored_session_id: Option<&str>,
) -> Result<WsStream, tungstenite::Error> {
    let scheme = if node.options().secure { "wss" } else { "ws" };
    let url = format!("{}://{}:{}/v4/websocket", scheme, node.options().host, node.options().port);

    let mut builder = Request::builder()
        .uri(url)
        .header("Authorization", node.options().password.clone())
        .header("User-Id", client_id.to_string())
        .header("Client-Name", client_name.to_string());

    if node.options().resume_status {
        if let Some(session_id) = stored_session_id {
            builder = builder.header("Session-Id", session_id.to_string());
        }
    }

    let request = builder
        .body(())
        .expect("well-formed request")
        .into_client_request()?;

    let (stream, _response) = async_tungstenite::tokio::connect_async(request).await?;
    Ok(stream)
}

async fn handle_frame(
    node: &Node,
    sink: &std::sync::Arc<dyn NodeEventSink>,
    text: &str,
    cluster_id: u32,
) {
    let event: IncomingEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(err) => {
            warn!("node {}: malformed frame: {}", node.identifier(), err);
            return;
        }
    };

    match event {
        IncomingEvent::Ready(ready) => {
            node.set_session_id(ready.session_id.clone()).await;
            let mut map = SessionIdMap::load().await;
            map.0.insert(SessionIdMap::key(node.identifier(), cluster_id), ready.session_id.clone());
            let _ = map.save().await;

            let _ = node
                .rest()
                .update_session(&ready.session_id, node.options().resume_status, node.options().resume_timeout)
                .await;

            sink.on_node_ready(node).await;
        }
        IncomingEvent::Stats(stats) => {
            node.set_stats(*stats).await;
        }
        IncomingEvent::PlayerUpdate(update) => {
            if let Ok(guild_id) = update.guild_id.parse() {
                sink.on_player_update(node, GuildId::new(guild_id), update.state).await;
            }
        }
        IncomingEvent::Event(frame) => {
            if let Ok(guild_id) = frame.guild_id.parse() {
                sink.on_event(node, GuildId::new(guild_id), frame.data).await;
            }
        }
    }
}

/// Placeholder kept intentionally unused at the module boundary so
/// `SinkExt` stays imported for the `stream.close(None)` call above even
/// when optimizations would otherwise flag it — `close` is the one send
/// operation this read-dominated loop performs.
#[allow(dead_code)]
fn _assert_sink_ext_used<S: SinkExt<Message>>() {}
