//! tokio-tungstenite push-channel source.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use inbox_follow::{EventSource, FollowError};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};

const LIVE_CHANNEL_NAME: &str = "RoomChannel";

type LiveSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, PartialEq, Eq)]
enum LiveFrame {
    Data(String),
    Control,
    Rejected,
    Closed,
}

/// One subscribed live channel connection. Ends when the socket closes;
/// reconnecting is left to the caller.
pub(crate) struct LiveChannelSource {
    socket: LiveSocket,
    closed: bool,
}

impl LiveChannelSource {
    pub(crate) async fn connect(url: &str, pubsub_token: &str, account_id: u64) -> Result<Self> {
        let (mut socket, _response) = connect_async(url)
            .await
            .with_context(|| format!("failed to connect live channel {url}"))?;
        socket
            .send(WsMessage::Text(
                subscribe_command(pubsub_token, account_id).into(),
            ))
            .await
            .context("failed to send live channel subscribe command")?;
        tracing::info!(url, "live channel connected");
        Ok(Self {
            socket,
            closed: false,
        })
    }
}

#[async_trait]
impl EventSource for LiveChannelSource {
    async fn next_frame(&mut self) -> Option<Result<String, FollowError>> {
        if self.closed {
            return None;
        }
        loop {
            let message = match self.socket.next().await {
                Some(Ok(message)) => message,
                Some(Err(error)) => {
                    self.closed = true;
                    return Some(Err(FollowError::Transport(format!(
                        "live channel read failed: {error}"
                    ))));
                }
                None => {
                    self.closed = true;
                    return None;
                }
            };
            match classify_frame(message) {
                LiveFrame::Data(text) => return Some(Ok(text)),
                LiveFrame::Control => continue,
                LiveFrame::Rejected => {
                    self.closed = true;
                    return Some(Err(FollowError::Transport(
                        "live channel rejected the subscription".to_string(),
                    )));
                }
                LiveFrame::Closed => {
                    self.closed = true;
                    return None;
                }
            }
        }
    }
}

fn subscribe_command(pubsub_token: &str, account_id: u64) -> String {
    let identifier = json!({
        "channel": LIVE_CHANNEL_NAME,
        "pubsub_token": pubsub_token.trim(),
        "account_id": account_id,
    })
    .to_string();
    json!({ "command": "subscribe", "identifier": identifier }).to_string()
}

fn classify_frame(message: WsMessage) -> LiveFrame {
    let text = match message {
        WsMessage::Text(text) => text.as_str().to_owned(),
        WsMessage::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => text,
            Err(_) => return LiveFrame::Control,
        },
        WsMessage::Close(_) => return LiveFrame::Closed,
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {
            return LiveFrame::Control
        }
    };
    let frame_type = serde_json::from_str::<Value>(&text).ok().and_then(|frame| {
        frame
            .get("type")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
    });
    match frame_type.as_deref() {
        Some("welcome" | "ping" | "confirm_subscription") => LiveFrame::Control,
        Some("reject_subscription") => LiveFrame::Rejected,
        Some("disconnect") => LiveFrame::Closed,
        _ => LiveFrame::Data(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_subscribe_command_embeds_identifier_as_string() {
        let command: Value =
            serde_json::from_str(&subscribe_command(" token-1 ", 3)).expect("command json");
        assert_eq!(command["command"], "subscribe");
        let identifier: Value = serde_json::from_str(
            command["identifier"]
                .as_str()
                .expect("identifier is a string"),
        )
        .expect("identifier json");
        assert_eq!(identifier["channel"], "RoomChannel");
        assert_eq!(identifier["pubsub_token"], "token-1");
        assert_eq!(identifier["account_id"], 3);
    }

    #[test]
    fn functional_classify_frame_filters_control_frames() {
        assert_eq!(
            classify_frame(WsMessage::Text(r#"{"type":"welcome"}"#.into())),
            LiveFrame::Control
        );
        assert_eq!(
            classify_frame(WsMessage::Text(
                r#"{"type":"ping","message":1700000000}"#.into()
            )),
            LiveFrame::Control
        );
        assert_eq!(
            classify_frame(WsMessage::Text(
                r#"{"identifier":"{}","type":"confirm_subscription"}"#.into()
            )),
            LiveFrame::Control
        );
        assert_eq!(
            classify_frame(WsMessage::Text(r#"{"type":"reject_subscription"}"#.into())),
            LiveFrame::Rejected
        );
    }

    #[test]
    fn functional_classify_frame_passes_data_frames_through() {
        let raw = r#"{"identifier":"{}","message":{"event":"message.created","data":{"id":1}}}"#;
        assert_eq!(
            classify_frame(WsMessage::Text(raw.into())),
            LiveFrame::Data(raw.to_string())
        );
        assert_eq!(
            classify_frame(WsMessage::Text("not json".into())),
            LiveFrame::Data("not json".to_string())
        );
    }

    #[test]
    fn regression_close_frame_ends_the_source() {
        assert_eq!(classify_frame(WsMessage::Close(None)), LiveFrame::Closed);
    }
}
