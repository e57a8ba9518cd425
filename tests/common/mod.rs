//! Shared fixtures: a scripted GraphQL server behind the real auth link

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use kemet_client::graphql::operations::lending_type_policies;
use kemet_client::graphql::{
    AuthLink, GraphQLClient, GraphQLResponse, InMemoryCache, Link, NetworkError, Operation,
};
use kemet_client::services::{CredentialStore, LendingService, Session};

pub const TOKEN_KEY: &str = "@kemetsehaftalem/token";

/// Answers operations in order from a script and records what it saw
#[derive(Default)]
pub struct FakeServer {
    script: Mutex<VecDeque<GraphQLResponse>>,
    pub seen: Mutex<Vec<Operation>>,
}

impl FakeServer {
    pub fn respond(&self, data: JsonValue) {
        self.script.lock().push_back(GraphQLResponse::from_data(data));
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn authorization(&self, call: usize) -> String {
        self.seen.lock()[call]
            .headers
            .get(reqwest::header::AUTHORIZATION)
            .map(|v| v.to_str().unwrap().to_string())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Link for FakeServer {
    async fn request(&self, operation: Operation) -> Result<GraphQLResponse, NetworkError> {
        self.seen.lock().push(operation);
        self.script
            .lock()
            .pop_front()
            .ok_or_else(|| NetworkError::Other("server has nothing scripted".into()))
    }
}

pub struct Harness {
    pub server: Arc<FakeServer>,
    pub credentials: CredentialStore,
    pub service: LendingService,
}

pub fn harness() -> Harness {
    let server = Arc::new(FakeServer::default());
    let credentials = CredentialStore::in_memory(TOKEN_KEY);
    let link = AuthLink::new(credentials.clone(), server.clone());
    let client = GraphQLClient::new(
        Arc::new(link),
        Arc::new(InMemoryCache::new(lending_type_policies())),
    );
    let session = Arc::new(Session::new(credentials.clone(), client.cache().clone()));
    Harness {
        server,
        credentials,
        service: LendingService::new(client, session),
    }
}
