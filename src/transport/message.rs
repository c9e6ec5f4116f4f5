use serde::{Deserialize, Serialize};

use crate::utils::error::{Error, ErrorKind};

/// Requests a producer may submit, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum Request {
    #[serde(rename = "enqueue")]
    Enqueue { body: String },
    #[serde(rename = "publish")]
    Publish {
        subject: String,
        body: String,
        recipient: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum Response {
    #[serde(rename = "enqueued")]
    Enqueued { message_id: String },
    #[serde(rename = "published")]
    Published {
        envelope_id: String,
        delivered: usize,
        dead_lettered: usize,
    },
    #[serde(rename = "error")]
    Error {
        status: u16,
        kind: ErrorKind,
        message: String,
    },
}

impl Response {
    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. })
    }
}

impl From<&Error> for Response {
    fn from(e: &Error) -> Self {
        Response::Error {
            status: e.status(),
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}
