//! # Avatar State Feed
//!
//! The renderer connects to `/ws/avatar` and receives the companion snapshot
//! as JSON every time it changes: emotion, speaking flag, transcripts,
//! session state and the last user-facing error.
//!
//! ## Protocol:
//! - **Server → Client**: `{"type": "snapshot", ...}` right after connecting
//!   and after every change, `{"type": "ping"}` every 30 seconds
//! - **Client → Server**: `{"type": "set_sensitivity", "sensitivity": 1.4}` from
//!   the configuration panel, or `{"type": "ping"}`
//!
//! One connection never owns a session. Starting and stopping goes through
//! the HTTP API, so any number of renderers can watch the same avatar.

use crate::companion::CompanionSnapshot;
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Messages pushed to the renderer.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    Snapshot {
        #[serde(flatten)]
        snapshot: CompanionSnapshot,
    },
    Ping {
        timestamp: i64,
    },
    Pong {
        timestamp: i64,
    },
    Error {
        code: String,
        message: String,
    },
}

/// Messages accepted from the renderer.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedCommand {
    SetSensitivity { sensitivity: f32 },
    Ping,
}

pub struct AvatarFeed {
    app_state: web::Data<AppState>,
    last_heartbeat: Instant,
}

impl AvatarFeed {
    pub fn new(app_state: web::Data<AppState>) -> Self {
        Self {
            app_state,
            last_heartbeat: Instant::now(),
        }
    }

    fn send(&self, ctx: &mut ws::WebsocketContext<Self>, message: &FeedMessage) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(e) => error!(error = %e, "Failed to serialize feed message"),
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: String) {
        self.send(
            ctx,
            &FeedMessage::Error {
                code: code.to_string(),
                message,
            },
        );
    }

    fn handle_command(&mut self, command: FeedCommand, ctx: &mut ws::WebsocketContext<Self>) {
        match command {
            FeedCommand::SetSensitivity { sensitivity } => {
                let change = self.app_state.modify_config(|config| {
                    config.audio.sensitivity = sensitivity;
                    Ok(())
                });
                match change {
                    Ok(_) => debug!(sensitivity, "Sensitivity changed from avatar feed"),
                    Err(e) => self.send_error(ctx, "validation_error", e),
                }
            }
            FeedCommand::Ping => {
                let pong = FeedMessage::Pong {
                    timestamp: chrono::Utc::now().timestamp_millis(),
                };
                self.send(ctx, &pong);
            }
        }
    }
}

impl Actor for AvatarFeed {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.app_state.feed_connected();
        info!("Avatar feed connected");

        // yields the current snapshot first, then one item per change
        ctx.add_stream(WatchStream::new(self.app_state.companion.subscribe()));

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("Avatar feed heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            let ping = FeedMessage::Ping {
                timestamp: chrono::Utc::now().timestamp_millis(),
            };
            act.send(ctx, &ping);
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.app_state.feed_disconnected();
        info!("Avatar feed disconnected");
    }
}

/// Companion state changes.
impl StreamHandler<CompanionSnapshot> for AvatarFeed {
    fn handle(&mut self, snapshot: CompanionSnapshot, ctx: &mut Self::Context) {
        self.send(ctx, &FeedMessage::Snapshot { snapshot });
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        info!("Companion stopped, closing avatar feed");
        ctx.close(Some(ws::CloseCode::Away.into()));
        ctx.stop();
    }
}

/// Frames from the renderer.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for AvatarFeed {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                match serde_json::from_str::<FeedCommand>(&text) {
                    Ok(command) => self.handle_command(command, ctx),
                    Err(e) => self.send_error(ctx, "bad_request", format!("Unknown command: {}", e)),
                }
            }
            Ok(ws::Message::Binary(_)) => {
                self.send_error(ctx, "bad_request", "Binary frames are not accepted".to_string());
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("Avatar feed closed by client: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("Avatar feed protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// GET /ws/avatar
pub async fn avatar_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    debug!(peer = ?req.connection_info().peer_addr(), "Avatar feed upgrade requested");
    ws::start(AvatarFeed::new(app_state), &req, stream)
}
