//! Request gateway
//!
//! Decodes producer requests, routes them to the queue engine or the
//! notification topic, and encodes the result. Every failure becomes an
//! `error` response carrying the status code and kind of the underlying
//! error, so a caller never has to parse free-form text.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::broker::{NotificationEnvelope, Topic};
use crate::queue::QueueEngine;
use crate::transport::message::{Request, Response};
use crate::utils::error::ErrorKind;

#[derive(Debug, Clone)]
pub struct Gateway {
    queue: QueueEngine,
    topic: Arc<Topic>,
}

impl Gateway {
    pub fn new(queue: QueueEngine, topic: Arc<Topic>) -> Self {
        Self { queue, topic }
    }

    pub async fn handle(&self, request: Request) -> Response {
        let result = match request {
            Request::Enqueue { body } => self
                .queue
                .enqueue(body)
                .map(|message_id| Response::Enqueued { message_id }),
            Request::Publish {
                subject,
                body,
                recipient,
            } => self
                .topic
                .publish(NotificationEnvelope::new(&subject, &body, &recipient))
                .await
                .map(|report| Response::Published {
                    delivered: report.delivered(),
                    dead_lettered: report.dead_lettered(),
                    envelope_id: report.envelope_id,
                }),
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                warn!("request rejected: {e}");
                Response::from(&e)
            }
        }
    }

    /// Decode a JSON request and handle it. Malformed input is answered
    /// with a 400 `invalid_request` response.
    pub async fn handle_text(&self, text: &str) -> Response {
        match serde_json::from_str::<Request>(text) {
            Ok(request) => {
                debug!(?request, "decoded request");
                self.handle(request).await
            }
            Err(e) => Response::Error {
                status: 400,
                kind: ErrorKind::InvalidRequest,
                message: format!("malformed request: {e}"),
            },
        }
    }
}
