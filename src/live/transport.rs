//! # Live Transport
//!
//! WebSocket client for the speech service. [`Connector::connect`] returns
//! immediately with a [`LiveLink`]; the actual connection runs in background
//! tasks that report back through a [`LiveEventSink`]:
//!
//! - **writer**: sends the setup message, then every [`ClientMessage`] pushed
//!   into `LiveLink::outbound`, then a close frame once the channel closes
//! - **reader**: parses text and binary frames as [`ServerMessage`]s
//!
//! Failures are reported as `Error` followed by `Closed`. There is no
//! reconnection.

use crate::live::protocol::{ClientMessage, ServerContent, ServerMessage, SetupPayload};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Outbound messages that may wait for the socket before senders block.
pub const OUTBOUND_CAPACITY: usize = 32;

/// What the transport tells the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// The service acknowledged the setup message
    Opened,
    /// Server content (audio, transcriptions, interruption flags)
    Content(ServerContent),
    /// Connect, read or write failure
    Error(String),
    /// The stream ended; no more events follow
    Closed(Option<String>),
}

pub type LiveEventSink = Arc<dyn Fn(LiveEvent) + Send + Sync>;

/// Handle on a running connection.
pub struct LiveLink {
    pub outbound: mpsc::Sender<ClientMessage>,
    tasks: Vec<JoinHandle<()>>,
}

impl LiveLink {
    pub fn new(outbound: mpsc::Sender<ClientMessage>, tasks: Vec<JoinHandle<()>>) -> Self {
        Self { outbound, tasks }
    }

    /// Tear the connection down without emitting further events.
    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

/// Opens connections to the speech service.
pub trait Connector: Send {
    fn connect(&self, url: &str, setup: SetupPayload, events: LiveEventSink) -> LiveLink;
}

/// Connector backed by tokio-tungstenite.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, url: &str, setup: SetupPayload, events: LiveEventSink) -> LiveLink {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let url = url.to_string();

        let task = tokio::spawn(run_connection(url, setup, outbound_rx, events));
        LiveLink::new(outbound_tx, vec![task])
    }
}

/// Strip the query string so the API key never reaches the logs.
fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

async fn run_connection(
    url: String,
    setup: SetupPayload,
    mut outbound: mpsc::Receiver<ClientMessage>,
    events: LiveEventSink,
) {
    info!(endpoint = redact(&url), model = %setup.model, "Connecting to speech service");

    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            error!(error = %e, "Speech service connection failed");
            events(LiveEvent::Error(e.to_string()));
            events(LiveEvent::Closed(None));
            return;
        }
    };
    let (mut sink, mut source) = stream.split();

    let setup_text = match serde_json::to_string(&ClientMessage::Setup(setup)) {
        Ok(text) => text,
        Err(e) => {
            events(LiveEvent::Error(format!("cannot serialize setup: {}", e)));
            events(LiveEvent::Closed(None));
            return;
        }
    };
    if let Err(e) = sink.send(Message::Text(setup_text)).await {
        events(LiveEvent::Error(e.to_string()));
        events(LiveEvent::Closed(None));
        return;
    }
    debug!("Setup message sent");

    let writer_events = Arc::clone(&events);
    let mut writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Dropping unserializable outbound message");
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text)).await {
                writer_events(LiveEvent::Error(e.to_string()));
                return;
            }
        }
        debug!("Outbound channel closed, sending close frame");
        let _ = sink.send(Message::Close(None)).await;
    });

    let close_reason = loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => dispatch(text.as_bytes(), &events),
                Some(Ok(Message::Binary(bytes))) => dispatch(&bytes, &events),
                Some(Ok(Message::Close(frame))) => {
                    break frame.map(|f| format!("{} {}", u16::from(f.code), f.reason));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = %e, "Speech service stream error");
                    events(LiveEvent::Error(e.to_string()));
                    break None;
                }
                None => break None,
            },
            _ = &mut writer => {
                // writer failed or the link was shut down from our side
                break None;
            }
        }
    };

    writer.abort();
    info!(reason = ?close_reason, "Speech service stream closed");
    events(LiveEvent::Closed(close_reason));
}

/// Parse one inbound frame and forward what it carries.
fn dispatch(raw: &[u8], events: &LiveEventSink) {
    let message: ServerMessage = match serde_json::from_slice(raw) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, bytes = raw.len(), "Ignoring unparseable server message");
            return;
        }
    };

    if message.is_setup_complete() {
        events(LiveEvent::Opened);
    }
    if let Some(content) = message.server_content {
        events(LiveEvent::Content(content));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::WireBlob;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn channel_sink() -> (LiveEventSink, mpsc::UnboundedReceiver<LiveEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink: LiveEventSink = Arc::new(move |event| {
            let _ = tx.send(event);
        });
        (sink, rx)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<LiveEvent>) -> LiveEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    fn setup() -> SetupPayload {
        SetupPayload::new(&crate::config::AppConfig::default().live, "instruction")
    }

    #[test]
    fn test_redact_hides_key() {
        assert_eq!(redact("wss://host/path?key=secret"), "wss://host/path");
        assert_eq!(redact("ws://localhost:1"), "ws://localhost:1");
    }

    #[test]
    fn test_dispatch_setup_and_content() {
        let (sink, mut rx) = channel_sink();
        dispatch(br#"{"setupComplete":{}}"#, &sink);
        dispatch(br#"{"serverContent":{"interrupted":true}}"#, &sink);
        dispatch(b"not json", &sink);

        assert_eq!(rx.try_recv().unwrap(), LiveEvent::Opened);
        match rx.try_recv().unwrap() {
            LiveEvent::Content(content) => assert!(content.interrupted),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connection_refused_reports_error_then_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (sink, mut rx) = channel_sink();
        let _link = WsConnector.connect(&format!("ws://{}", addr), setup(), sink);

        assert!(matches!(next_event(&mut rx).await, LiveEvent::Error(_)));
        assert_eq!(next_event(&mut rx).await, LiveEvent::Closed(None));
    }

    #[tokio::test]
    async fn test_full_exchange_with_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();

            let first = ws.next().await.unwrap().unwrap();
            let value: serde_json::Value = serde_json::from_str(first.to_text().unwrap()).unwrap();
            assert!(value.get("setup").is_some());

            ws.send(Message::Text(r#"{"setupComplete":{}}"#.to_string()))
                .await
                .unwrap();

            let audio = ws.next().await.unwrap().unwrap();
            let value: serde_json::Value = serde_json::from_str(audio.to_text().unwrap()).unwrap();
            assert_eq!(value["realtimeInput"]["media"]["data"], "AAA=");

            ws.send(Message::Binary(
                br#"{"serverContent":{"outputTranscription":{"text":"hola"}}}"#.to_vec(),
            ))
            .await
            .unwrap();
            ws.close(None).await.unwrap();
        });

        let (sink, mut rx) = channel_sink();
        let link = WsConnector.connect(&format!("ws://{}", addr), setup(), sink);

        assert_eq!(next_event(&mut rx).await, LiveEvent::Opened);
        link.outbound
            .send(ClientMessage::audio(WireBlob {
                data: "AAA=".to_string(),
                mime_type: "audio/pcm;rate=16000".to_string(),
            }))
            .await
            .unwrap();

        match next_event(&mut rx).await {
            LiveEvent::Content(content) => assert_eq!(content.output_text(), Some("hola")),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(next_event(&mut rx).await, LiveEvent::Closed(_)));
        server.await.unwrap();
    }
}
