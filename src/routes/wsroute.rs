use actix_web::{error::ErrorInternalServerError, get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use std::sync::Arc;

use crate::{
    models::ConversationId,
    state::AppState,
    websocket::{
        session::{RejectedSession, SessionSink, WsSession},
        AdmissionError, ConnectionSink,
    },
};

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// GET /ws/{conversation_id}?token=
///
/// Rejected attempts still complete the upgrade so the client receives a
/// close frame carrying the reason.
#[get("/ws/{conversation_id}")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    conversation_id: web::Path<ConversationId>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    let conversation_id = conversation_id.into_inner();
    let params = query.into_inner();
    let ping_interval = state.config.ws_ping_interval;
    let supervisor = state.supervisor.clone();

    let mut payload = Some(stream);
    let mut response = None;
    let mut upgrade_error = None;

    let admitted = state
        .supervisor
        .admit(
            conversation_id,
            params.token.as_deref(),
            |connection_id, principal| {
                let stream = payload
                    .take()
                    .ok_or_else(|| AdmissionError::Transport("payload already consumed".into()))?;
                let session = WsSession::new(
                    connection_id,
                    conversation_id,
                    principal,
                    supervisor,
                    ping_interval,
                );
                match ws::WsResponseBuilder::new(session, &req, stream).start_with_addr() {
                    Ok((addr, resp)) => {
                        response = Some(resp);
                        Ok(Arc::new(SessionSink::new(addr)) as Arc<dyn ConnectionSink>)
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        upgrade_error = Some(e);
                        Err(AdmissionError::Transport(reason))
                    }
                }
            },
        )
        .await;

    match admitted {
        Ok(_) => response.ok_or_else(|| ErrorInternalServerError("websocket upgrade missing")),
        Err(AdmissionError::Transport(reason)) => {
            tracing::warn!(conversation_id, %reason, "websocket upgrade failed");
            Err(upgrade_error.unwrap_or_else(|| ErrorInternalServerError(reason)))
        }
        Err(e) => {
            let stream = payload
                .take()
                .ok_or_else(|| ErrorInternalServerError("websocket payload missing"))?;
            ws::start(RejectedSession::new(e.close_code(), e.to_string()), &req, stream)
        }
    }
}
