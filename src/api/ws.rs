//! WebSocket endpoint: one socket per client, envelopes in both
//! directions.
//!
//! Outbound traffic is drained from the hub queue by a writer task;
//! the reader loop parses inbound envelopes and routes them into the
//! pipeline. Valid JSON that is not a recognized envelope is echoed
//! back; non-JSON frames are dropped.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};

use crate::hub::{ConnectionId, Envelope};

use super::state::AppState;

/// Upgrade handler for `/ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let hub = state.pipeline.hub().clone();
    let (connection_id, mut outbound_rx) = hub.connect();

    hub.send_to_connection(
        connection_id,
        Envelope::Welcome {
            message: "Connected. Send register_client to receive targeted updates.".to_string(),
            timestamp: Utc::now(),
        },
    );

    let writer = tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&envelope) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode envelope");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        match serde_json::from_str::<Envelope>(&text) {
            Ok(envelope) => handle_envelope(&state, connection_id, envelope).await,
            Err(_) => match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(original) => {
                    hub.send_to_connection(
                        connection_id,
                        Envelope::Echo {
                            original,
                            timestamp: Utc::now(),
                        },
                    );
                }
                Err(_) => {
                    tracing::debug!(connection_id = %connection_id, "Dropping non-JSON frame");
                }
            },
        }
    }

    hub.disconnect(connection_id);
    writer.abort();
}

async fn handle_envelope(state: &AppState, connection_id: ConnectionId, envelope: Envelope) {
    let pipeline = &state.pipeline;
    let hub = pipeline.hub();
    match envelope {
        Envelope::RegisterClient { client_id, role } => {
            hub.register(connection_id, &client_id, role);
            hub.send_to_connection(
                connection_id,
                Envelope::RegistrationConfirm {
                    client_id: client_id.clone(),
                    message: format!("Registered as {client_id}"),
                },
            );
        }
        Envelope::Heartbeat => {
            hub.heartbeat(connection_id);
            hub.send_to_connection(
                connection_id,
                Envelope::HeartbeatResponse {
                    timestamp: Utc::now(),
                },
            );
        }
        Envelope::StartDetection => {
            hub.send_to_connection(
                connection_id,
                Envelope::status_update(
                    None,
                    None,
                    "detection_started",
                    Some("video: running, audio: running".to_string()),
                ),
            );
        }
        Envelope::StopDetection => {
            hub.send_to_connection(
                connection_id,
                Envelope::status_update(
                    None,
                    None,
                    "detection_stopped",
                    Some("video: stopped, audio: stopped".to_string()),
                ),
            );
        }
        Envelope::EmergencyAlert {
            user_id,
            location,
            note,
        } => {
            if let Err(e) = pipeline.trigger_manual(user_id.clone(), location, note) {
                tracing::warn!(user_id = %user_id, error = %e, "Manual trigger rejected");
                hub.send_to_connection(
                    connection_id,
                    Envelope::status_update(None, Some(user_id), "error", Some(e.to_string())),
                );
            }
        }
        Envelope::GuidanceAck { alert_id } => {
            if let Err(e) = pipeline.guidance_ack(alert_id).await {
                tracing::debug!(alert_id = %alert_id, error = %e, "Guidance ack ignored");
            }
        }
        Envelope::AlertAck { alert_id, by } => {
            if let Err(e) = pipeline.acknowledge(alert_id, by).await {
                tracing::warn!(alert_id = %alert_id, error = %e, "Acknowledge rejected");
                hub.send_to_connection(
                    connection_id,
                    Envelope::status_update(Some(alert_id), None, "error", Some(e.to_string())),
                );
            }
        }
        Envelope::ResponderReply {
            alert_id,
            responder_id,
            accepted,
        } => {
            if let Err(e) = pipeline
                .responder_reply(alert_id, responder_id, accepted)
                .await
            {
                tracing::warn!(alert_id = %alert_id, error = %e, "Responder reply rejected");
            }
        }
        // Server-to-client envelopes arriving inbound are treated as
        // unrecognized and echoed back.
        other => {
            let original = serde_json::to_value(&other).unwrap_or_default();
            hub.send_to_connection(
                connection_id,
                Envelope::Echo {
                    original,
                    timestamp: Utc::now(),
                },
            );
        }
    }
}
