//! Request pipeline
//!
//! An [`Operation`] travels through a chain of [`Link`]s before a terminating
//! link hands it to the transport. The client's chain is
//! `AuthLink -> UploadLink`.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use super::document::{Document, JsonMap};
use super::error::{GraphQLError, NetworkError};
use super::upload::Upload;
use crate::services::credentials::CredentialStore;

/// One outgoing GraphQL request
#[derive(Debug, Clone)]
pub struct Operation {
    pub document: Document,
    pub variables: JsonMap,
    /// Files to send alongside the variables
    pub uploads: Vec<Upload>,
    /// Headers links attach on the way down
    pub headers: HeaderMap,
}

impl Operation {
    pub fn new(document: Document, variables: JsonMap) -> Self {
        Self {
            document,
            variables,
            uploads: Vec::new(),
            headers: HeaderMap::new(),
        }
    }

    pub fn with_uploads(mut self, uploads: Vec<Upload>) -> Self {
        self.uploads = uploads;
        self
    }

    pub fn operation_name(&self) -> Option<&str> {
        self.document.operation_name()
    }

    /// JSON body of the request (the `operations` part of a multipart request)
    pub fn body(&self) -> JsonValue {
        serde_json::json!({
            "operationName": self.document.operation_name(),
            "query": self.document.source(),
            "variables": self.variables,
        })
    }
}

/// Response body of a GraphQL request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQLResponse {
    #[serde(default)]
    pub data: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<GraphQLError>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<JsonValue>,
}

impl GraphQLResponse {
    pub fn from_data(data: JsonValue) -> Self {
        Self {
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn has_errors(&self) -> bool {
        self.errors.as_ref().is_some_and(|e| !e.is_empty())
    }
}

/// A stage of the request pipeline
#[async_trait]
pub trait Link: Send + Sync {
    async fn request(&self, operation: Operation) -> Result<GraphQLResponse, NetworkError>;
}

#[async_trait]
impl<L: Link + ?Sized> Link for Arc<L> {
    async fn request(&self, operation: Operation) -> Result<GraphQLResponse, NetworkError> {
        (**self).request(operation).await
    }
}

/// Attaches the stored bearer token to every operation
pub struct AuthLink<L> {
    credentials: CredentialStore,
    next: L,
}

impl<L: Link> AuthLink<L> {
    pub fn new(credentials: CredentialStore, next: L) -> Self {
        Self { credentials, next }
    }
}

/// `Bearer <token>`, or empty when there is no token
pub fn authorization_value(token: Option<&str>) -> HeaderValue {
    match token {
        Some(token) => match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Stored token is not a valid header value, sending anonymously");
                HeaderValue::from_static("")
            }
        },
        None => HeaderValue::from_static(""),
    }
}

#[async_trait]
impl<L: Link> Link for AuthLink<L> {
    async fn request(&self, mut operation: Operation) -> Result<GraphQLResponse, NetworkError> {
        // Must resolve before the operation is forwarded
        let token = self.credentials.get().await;
        debug!(
            operation = operation.operation_name().unwrap_or("anonymous"),
            authenticated = token.is_some(),
            "Attaching credentials"
        );
        operation
            .headers
            .insert(AUTHORIZATION, authorization_value(token.as_ref().map(|t| t.as_str())));
        self.next.request(operation).await
    }
}
