//! Line-delimited JSON framing for client requests and server responses.

use dirsess_core::{Control, RequestId};
use serde::{Deserialize, Serialize};

/// One request line: `{"id": 3, "op": "search", "base": "ou=system"}`.
#[derive(Clone, Debug, Deserialize)]
pub struct RequestEnvelope {
    pub id: RequestId,
    #[serde(flatten)]
    pub op: Operation,
    #[serde(default)]
    pub controls: Vec<Control>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Bind {
        #[serde(default)]
        dn: String,
        #[serde(default)]
        password: String,
    },
    Search {
        #[serde(default)]
        base: String,
        #[serde(default)]
        filter: Option<String>,
    },
    Whoami,
    Abandon {
        target: RequestId,
    },
    Unbind,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bind { .. } => "bind",
            Self::Search { .. } => "search",
            Self::Whoami => "whoami",
            Self::Abandon { .. } => "abandon",
            Self::Unbind => "unbind",
        }
    }

    /// Root-DSE discovery is a search against the empty base.
    pub fn is_root_dse(&self) -> bool {
        matches!(self, Self::Search { base, .. } if base.trim().is_empty())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Denied,
    Error,
    Busy,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: RequestId,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<serde_json::Value>>,
}

impl Response {
    pub fn success(id: RequestId) -> Self {
        Self {
            id,
            status: Status::Success,
            message: None,
            identity: None,
            entries: None,
        }
    }

    pub fn with_status(id: RequestId, status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
            ..Self::success(id)
        }
    }

    pub fn denied(id: RequestId, message: impl Into<String>) -> Self {
        Self::with_status(id, Status::Denied, message)
    }

    pub fn error(id: RequestId, message: impl Into<String>) -> Self {
        Self::with_status(id, Status::Error, message)
    }

    pub fn busy(id: RequestId) -> Self {
        Self::with_status(id, Status::Busy, "too many outstanding requests")
    }

    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn entries(mut self, entries: Vec<serde_json::Value>) -> Self {
        self.entries = Some(entries);
        self
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| error_line(self.id, &e.to_string()))
    }
}

fn error_line(id: RequestId, message: &str) -> String {
    serde_json::json!({ "id": id, "status": Status::Error, "message": message }).to_string()
}

pub fn parse_request(line: &str) -> Result<RequestEnvelope, serde_json::Error> {
    serde_json::from_str(line)
}
