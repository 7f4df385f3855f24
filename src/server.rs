//! HTTP webhook server
//!
//! `POST /sms` receives the transport's form-encoded callback. The reply
//! goes out through the SMS transport and the webhook acknowledges with an
//! empty envelope; in echo mode the reply is returned as JSON instead,
//! which is how the test harness observes the gateway.

use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::transport::SmsSender;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Empty acknowledgement envelope for the transport
const EMPTY_ENVELOPE: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Response></Response>"#;

/// Application state shared with all routes
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub sender: Arc<dyn SmsSender>,
    pub echo_mode: bool,
}

/// Inbound webhook payload; field names follow the transport's callback
#[derive(Debug, Deserialize)]
pub struct InboundSms {
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "Body")]
    pub body: String,
}

/// JSON echo returned in observability mode
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EchoResponse {
    pub response: String,
    pub from: String,
    pub original_message: String,
}

/// Start the webhook server
pub async fn run_server(addr: SocketAddr, state: AppState) -> Result<()> {
    info!("Starting webhook server on {}", addr);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(health))
        .route("/sms", post(handle_inbound))
        .layer(cors)
        .with_state(state);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .map_err(|e| Error::Transport(format!("webhook server failed: {}", e)))
}

/// Health check handler
async fn health() -> impl IntoResponse {
    "nutrition gateway is running"
}

/// Single entry point per inbound message. No failure inside may cross the
/// transport boundary: the gateway itself degrades to an apology, and a
/// failed outbound send is logged but still acknowledged, since a 5xx would
/// make the transport redeliver and double-process the message.
async fn handle_inbound(
    State(state): State<AppState>,
    Form(inbound): Form<InboundSms>,
) -> Response {
    info!(from = %inbound.from, "inbound SMS");

    let reply = match state
        .gateway
        .handle_message(&inbound.from, &inbound.body)
        .await
    {
        Some(reply) => reply,
        // Own-number guard: acknowledge without replying
        None => return envelope_response(),
    };

    if state.echo_mode {
        return Json(EchoResponse {
            response: reply,
            from: inbound.from,
            original_message: inbound.body,
        })
        .into_response();
    }

    if let Err(e) = state.sender.send(&inbound.from, &reply).await {
        error!(to = %inbound.from, error = %e, "outbound send failed");
    }

    envelope_response()
}

fn envelope_response() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/xml")],
        EMPTY_ENVELOPE,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_is_a_noop_response() {
        assert!(EMPTY_ENVELOPE.contains("<Response></Response>"));
    }

    #[test]
    fn test_inbound_field_names_match_transport() {
        // The transport posts capitalized `From`/`Body` fields
        let inbound: InboundSms =
            serde_json::from_str(r#"{"From":"+15555550123","Body":"had a banana"}"#).unwrap();
        assert_eq!(inbound.from, "+15555550123");
        assert_eq!(inbound.body, "had a banana");
    }

    #[test]
    fn test_echo_response_wire_shape() {
        let echo = EchoResponse {
            response: "Banana: 105 cal. Reply Y".to_string(),
            from: "+15555550123".to_string(),
            original_message: "had a banana".to_string(),
        };
        let json = serde_json::to_value(&echo).unwrap();
        assert_eq!(json["response"], "Banana: 105 cal. Reply Y");
        assert_eq!(json["from"], "+15555550123");
        assert_eq!(json["originalMessage"], "had a banana");
    }
}
