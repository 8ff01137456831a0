use crate::error::AppError;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{SinkExt, StreamExt};
use simd_json::{OwnedValue, StaticNode};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};

const SOCKET_IO_PATH: &str = "socket.io/?EIO=4&transport=websocket";
const SOCKET_IO_CONNECT_PACKET: &str = "40";
const ENGINE_IO_PONG_PACKET: &str = "3";

pub type SocketIoWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A named push event as delivered by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    pub channel: String,
    pub payload: OwnedValue,
}

impl PushEvent {
    pub fn new(channel: impl Into<String>, payload: OwnedValue) -> Self {
        Self {
            channel: channel.into(),
            payload,
        }
    }
}

/// Items are decoded events; an `Err` item reports a bad frame without ending
/// the stream. The stream ending means the connection is gone.
pub type PushStream = BoxStream<'static, Result<PushEvent, AppError>>;

pub trait PushTransport: Send + Sync {
    fn open<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, Result<PushStream, AppError>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open,
    Ping,
    Event(PushEvent),
    Disconnect,
    ConnectError(String),
    Ignored,
}

/// socket.io v4 client over a plain websocket.
#[derive(Debug, Default, Clone)]
pub struct SocketIoTransport;

impl PushTransport for SocketIoTransport {
    fn open<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, Result<PushStream, AppError>> {
        Box::pin(async move {
            let url = socket_io_endpoint(endpoint)?;
            let ws_config = WebSocketConfig {
                max_message_size: Some(1 << 20),
                max_frame_size: Some(1 << 20),
                ..Default::default()
            };
            let (stream, _) = connect_async_with_config(url, Some(ws_config), true)
                .await
                .map_err(|error| AppError::TransportUnavailable(error.to_string()))?;
            Ok(socket_io_events(stream))
        })
    }
}

pub fn socket_io_endpoint(base_url: &str) -> Result<String, AppError> {
    let base_url = base_url.trim().trim_end_matches('/');
    let (scheme, authority) = [
        ("https://", "wss"),
        ("http://", "ws"),
        ("wss://", "wss"),
        ("ws://", "ws"),
    ]
    .iter()
    .find_map(|(prefix, scheme)| {
        base_url
            .strip_prefix(*prefix)
            .map(|authority| (*scheme, authority))
    })
    .ok_or_else(|| {
        AppError::InvalidArgument(format!("unsupported push endpoint '{base_url}'"))
    })?;

    if authority.is_empty() {
        return Err(AppError::InvalidArgument(
            "push endpoint is missing a host".to_string(),
        ));
    }
    Ok(format!("{scheme}://{authority}/{SOCKET_IO_PATH}"))
}

fn socket_io_events(websocket: SocketIoWsStream) -> PushStream {
    futures_util::stream::unfold(Some(websocket), |state| async move {
        let mut websocket = state?;
        loop {
            let message = match websocket.next().await? {
                Ok(message) => message,
                Err(error) => return Some((Err(error.into()), None)),
            };

            let text_payload = match message {
                Message::Text(text_payload) => text_payload,
                Message::Close(_) => return None,
                _ => continue,
            };

            let reply = match decode_packet(&text_payload) {
                Ok(EnginePacket::Event(event)) => return Some((Ok(event), Some(websocket))),
                Ok(EnginePacket::Open) => SOCKET_IO_CONNECT_PACKET,
                Ok(EnginePacket::Ping) => ENGINE_IO_PONG_PACKET,
                Ok(EnginePacket::Ignored) => continue,
                Ok(EnginePacket::Disconnect) => return None,
                Ok(EnginePacket::ConnectError(reason)) => {
                    return Some((Err(AppError::TransportUnavailable(reason)), None))
                }
                Err(error) => return Some((Err(error), Some(websocket))),
            };

            if let Err(error) = websocket.send(Message::Text(reply.to_string())).await {
                return Some((Err(error.into()), None));
            }
        }
    })
    .boxed()
}

/// Decodes one Engine.IO text frame (with an embedded socket.io packet).
pub fn decode_packet(text: &str) -> Result<EnginePacket, AppError> {
    let mut chars = text.chars();
    match chars.next() {
        Some('0') => Ok(EnginePacket::Open),
        Some('1') => Ok(EnginePacket::Disconnect),
        Some('2') => Ok(EnginePacket::Ping),
        Some('4') => decode_socket_io_packet(chars.as_str()),
        Some(_) => Ok(EnginePacket::Ignored),
        None => Err(AppError::InvalidArgument("empty push frame".to_string())),
    }
}

fn decode_socket_io_packet(body: &str) -> Result<EnginePacket, AppError> {
    let mut chars = body.chars();
    match chars.next() {
        Some('1') => Ok(EnginePacket::Disconnect),
        Some('2') => decode_event(chars.as_str()),
        Some('4') => Ok(EnginePacket::ConnectError(
            chars.as_str().trim().to_string(),
        )),
        _ => Ok(EnginePacket::Ignored),
    }
}

fn decode_event(body: &str) -> Result<EnginePacket, AppError> {
    // Optional "/namespace," prefix, then an optional numeric ack id.
    let body = match body.strip_prefix('/') {
        Some(namespaced) => namespaced
            .split_once(',')
            .map(|(_, rest)| rest)
            .unwrap_or_default(),
        None => body,
    };
    let body = body.trim_start_matches(|ch: char| ch.is_ascii_digit());

    let mut owned_payload = body.as_bytes().to_vec();
    let mut items = simd_json::serde::from_slice::<Vec<OwnedValue>>(owned_payload.as_mut_slice())?
        .into_iter();

    let channel = match items.next() {
        Some(OwnedValue::String(channel)) => channel,
        _ => {
            return Err(AppError::InvalidArgument(
                "event packet is missing an event name".to_string(),
            ))
        }
    };
    let payload = items
        .next()
        .unwrap_or(OwnedValue::Static(StaticNode::Null));

    Ok(EnginePacket::Event(PushEvent::new(channel, payload)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    type ServerSocket = WebSocketStream<TcpStream>;

    async fn local_server() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("loopback listener should bind");
        let address = listener.local_addr().expect("listener has an address");
        (listener, format!("http://{address}"))
    }

    async fn accept(listener: &TcpListener) -> ServerSocket {
        let (tcp, _) = listener.accept().await.expect("client should connect");
        tokio_tungstenite::accept_async(tcp)
            .await
            .expect("websocket handshake should succeed")
    }

    async fn send_text(socket: &mut ServerSocket, text: &str) {
        socket
            .send(Message::Text(text.to_string()))
            .await
            .expect("server frame should send");
    }

    async fn next_text(socket: &mut ServerSocket) -> String {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => return text,
                Some(Ok(_)) => continue,
                other => panic!("expected a text frame, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn stream_answers_handshake_and_ping_then_ends_on_disconnect() {
        let (listener, base_url) = local_server().await;
        let server = tokio::spawn(async move {
            let mut socket = accept(&listener).await;
            let mut replies = Vec::new();
            send_text(&mut socket, r#"0{"sid":"abc","pingInterval":25000,"pingTimeout":20000}"#).await;
            replies.push(next_text(&mut socket).await);
            send_text(&mut socket, "2").await;
            replies.push(next_text(&mut socket).await);
            send_text(
                &mut socket,
                r#"42["temperature:update",{"value":21.5,"unit":"C","timestamp":"2025-03-01T12:00:00Z"}]"#,
            )
            .await;
            send_text(&mut socket, "41").await;
            replies
        });

        let stream = SocketIoTransport
            .open(&base_url)
            .await
            .expect("transport should connect");
        let items: Vec<Result<PushEvent, AppError>> = stream.collect().await;

        let replies = server.await.expect("server task joins");
        assert_eq!(replies, vec!["40".to_string(), "3".to_string()]);
        assert_eq!(items.len(), 1);
        let event = items
            .into_iter()
            .next()
            .expect("one item")
            .expect("event should decode");
        assert_eq!(event.channel, "temperature:update");
    }

    #[tokio::test]
    async fn connect_error_packet_fails_and_ends_stream() {
        let (listener, base_url) = local_server().await;
        let server = tokio::spawn(async move {
            let mut socket = accept(&listener).await;
            send_text(&mut socket, r#"0{"sid":"abc"}"#).await;
            let reply = next_text(&mut socket).await;
            send_text(&mut socket, r#"44{"message":"unauthorized"}"#).await;
            reply
        });

        let stream = SocketIoTransport
            .open(&base_url)
            .await
            .expect("transport should connect");
        let items: Vec<Result<PushEvent, AppError>> = stream.collect().await;

        assert_eq!(server.await.expect("server task joins"), "40");
        assert_eq!(items.len(), 1);
        assert!(matches!(
            items.first(),
            Some(Err(AppError::TransportUnavailable(reason))) if reason.contains("unauthorized")
        ));
    }

    #[test]
    fn endpoint_maps_http_schemes_to_websocket() {
        assert_eq!(
            socket_io_endpoint("http://localhost:3000/").expect("http should map"),
            "ws://localhost:3000/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            socket_io_endpoint("https://sensors.example.com").expect("https should map"),
            "wss://sensors.example.com/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn endpoint_rejects_unknown_scheme_and_empty_host() {
        assert!(socket_io_endpoint("ftp://localhost").is_err());
        assert!(socket_io_endpoint("http://").is_err());
    }

    #[test]
    fn decodes_event_packet() {
        let packet = decode_packet(
            r#"42["temperature:update",{"value":21.5,"unit":"C","timestamp":"2025-03-01T12:00:00Z"}]"#,
        )
        .expect("event packet should decode");

        let EnginePacket::Event(event) = packet else {
            panic!("expected event packet, got {packet:?}");
        };
        assert_eq!(event.channel, "temperature:update");
        assert_eq!(
            event.payload,
            simd_json::json!({"value": 21.5, "unit": "C", "timestamp": "2025-03-01T12:00:00Z"})
        );
    }

    #[test]
    fn decodes_namespaced_event_with_ack_id() {
        let packet = decode_packet(r#"42/sensors,17["humidity:update",{"value":40}]"#)
            .expect("namespaced packet should decode");

        let EnginePacket::Event(event) = packet else {
            panic!("expected event packet, got {packet:?}");
        };
        assert_eq!(event.channel, "humidity:update");
    }

    #[test]
    fn decodes_control_packets() {
        assert!(matches!(
            decode_packet(r#"0{"sid":"abc","pingInterval":25000}"#),
            Ok(EnginePacket::Open)
        ));
        assert!(matches!(decode_packet("2"), Ok(EnginePacket::Ping)));
        assert!(matches!(decode_packet("3"), Ok(EnginePacket::Ignored)));
        assert!(matches!(
            decode_packet(r#"40{"sid":"xyz"}"#),
            Ok(EnginePacket::Ignored)
        ));
        assert!(matches!(decode_packet("41"), Ok(EnginePacket::Disconnect)));
        assert!(matches!(
            decode_packet(r#"44{"message":"unauthorized"}"#),
            Ok(EnginePacket::ConnectError(_))
        ));
    }

    #[test]
    fn rejects_malformed_event_packets() {
        assert!(decode_packet("").is_err());
        assert!(decode_packet("42not-json").is_err());
        assert!(decode_packet("42[12,{}]").is_err());
    }
}
