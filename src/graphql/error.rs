//! Error types surfaced by the GraphQL client
//!
//! Server-reported errors are kept exactly as received. The client never
//! rewrites or drops them; it only decides whether they travel next to data
//! (see [`ErrorPolicy`](super::client::ErrorPolicy)).

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Location of an error inside the operation document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLocation {
    pub line: u32,
    pub column: u32,
}

/// A single entry of a response's `errors` array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<ErrorLocation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<JsonValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<JsonValue>,
}

impl GraphQLError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: None,
            path: None,
            extensions: None,
        }
    }
}

impl std::fmt::Display for GraphQLError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Transport-level failure: the server was not reached or did not answer
/// with a GraphQL response
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed GraphQL response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("invalid upload: {0}")]
    Upload(String),

    #[error("{0}")]
    Other(String),
}

/// The operation document could not be used
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to parse GraphQL document: {0}")]
    Parse(String),

    #[error("document contains no operation")]
    NoOperation,

    #[error("unknown variable ${0}")]
    UnknownVariable(String),
}

/// Error returned by query and mutation execution
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("GraphQL error: {}", join_messages(.0))]
    GraphQL(Vec<GraphQLError>),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("unexpected response data: {0}")]
    Data(#[source] serde_json::Error),
}

impl ClientError {
    /// Server-reported errors, if this is a GraphQL error
    pub fn graphql_errors(&self) -> &[GraphQLError] {
        match self {
            ClientError::GraphQL(errors) => errors,
            _ => &[],
        }
    }

    pub fn network_error(&self) -> Option<&NetworkError> {
        match self {
            ClientError::Network(e) => Some(e),
            _ => None,
        }
    }
}

fn join_messages(errors: &[GraphQLError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graphql_error_keeps_unknown_shapes() {
        let raw = serde_json::json!({
            "message": "Not authorised",
            "locations": [{"line": 2, "column": 3}],
            "path": ["getUserCheckouts", 0],
            "extensions": {"code": "UNAUTHENTICATED"}
        });
        let error: GraphQLError = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(error.path.as_ref().unwrap().len(), 2);
        assert_eq!(serde_json::to_value(&error).unwrap(), raw);
    }

    #[test]
    fn test_client_error_message_joins_server_errors() {
        let error = ClientError::GraphQL(vec![GraphQLError::new("first"), GraphQLError::new("second")]);
        assert_eq!(error.to_string(), "GraphQL error: first; second");
        assert_eq!(error.graphql_errors().len(), 2);
        assert!(error.network_error().is_none());
    }
}
