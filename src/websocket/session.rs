//! Actix actors behind each socket.
//!
//! `WsSession` is fan-out only: it writes what the registry pushes, answers
//! pings and otherwise waits for the transport to go away. There is no idle
//! timeout. `RejectedSession` exists for one frame, the close sent to a
//! refused handshake.

use actix::{Actor, ActorContext, Addr, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web_actors::ws;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{ConversationId, Principal};

use super::{ConnectionId, ConnectionSink, HandshakeSupervisor, SinkError};

/// Text frame pushed by a broadcast
#[derive(ActixMessage)]
#[rtype(result = "()")]
pub struct Push(pub Arc<str>);

/// Server-side close (eviction or shutdown)
#[derive(ActixMessage)]
#[rtype(result = "()")]
pub struct Disconnect;

pub struct WsSession {
    connection_id: ConnectionId,
    conversation_id: ConversationId,
    principal: Principal,
    supervisor: HandshakeSupervisor,
    ping_interval: Option<Duration>,
}

impl WsSession {
    pub fn new(
        connection_id: ConnectionId,
        conversation_id: ConversationId,
        principal: Principal,
        supervisor: HandshakeSupervisor,
        ping_interval: Option<Duration>,
    ) -> Self {
        Self {
            connection_id,
            conversation_id,
            principal,
            supervisor,
            ping_interval,
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::debug!(
            connection_id = %self.connection_id,
            conversation_id = self.conversation_id,
            user_id = self.principal.user_id,
            "websocket session started"
        );

        if let Some(interval) = self.ping_interval {
            ctx.run_interval(interval, |_act, ctx| {
                ctx.ping(b"");
            });
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::debug!(
            connection_id = %self.connection_id,
            conversation_id = self.conversation_id,
            user_id = self.principal.user_id,
            "websocket session stopped"
        );

        let supervisor = self.supervisor.clone();
        let conversation_id = self.conversation_id;
        let connection_id = self.connection_id;
        actix::spawn(async move {
            supervisor.release(conversation_id, connection_id).await;
        });
    }
}

impl Handler<Push> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: Push, ctx: &mut Self::Context) {
        ctx.text(msg.0.to_string());
    }
}

impl Handler<Disconnect> for WsSession {
    type Result = ();

    fn handle(&mut self, _msg: Disconnect, ctx: &mut Self::Context) {
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Away,
            description: Some("server closed the connection".into()),
        }));
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => ctx.pong(&msg),
            Ok(ws::Message::Pong(_)) | Ok(ws::Message::Nop) => {}
            Ok(ws::Message::Text(_))
            | Ok(ws::Message::Binary(_))
            | Ok(ws::Message::Continuation(_)) => {
                tracing::trace!(
                    connection_id = %self.connection_id,
                    "ignoring inbound frame on fan-out socket"
                );
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::debug!(connection_id = %self.connection_id, ?reason, "client closed");
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                tracing::warn!(connection_id = %self.connection_id, error = %e, "websocket protocol error");
                ctx.stop();
            }
        }
    }
}

/// Registry-facing handle to a [`WsSession`]
pub struct SessionSink {
    addr: Addr<WsSession>,
}

impl SessionSink {
    pub fn new(addr: Addr<WsSession>) -> Self {
        Self { addr }
    }
}

#[async_trait]
impl ConnectionSink for SessionSink {
    async fn deliver(&self, payload: Arc<str>) -> Result<(), SinkError> {
        self.addr
            .send(Push(payload))
            .await
            .map_err(|e| SinkError::Closed(e.to_string()))
    }

    fn close(&self) {
        self.addr.do_send(Disconnect);
    }

    fn is_open(&self) -> bool {
        self.addr.connected()
    }
}

/// Upgrades a refused handshake only to close it with a reason.
pub struct RejectedSession {
    reason: ws::CloseReason,
}

impl RejectedSession {
    pub fn new(code: ws::CloseCode, description: impl Into<String>) -> Self {
        Self {
            reason: ws::CloseReason {
                code,
                description: Some(description.into()),
            },
        }
    }
}

impl Actor for RejectedSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        ctx.close(Some(self.reason.clone()));
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RejectedSession {
    fn handle(&mut self, _msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        ctx.stop();
    }
}
