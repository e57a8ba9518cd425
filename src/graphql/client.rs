//! GraphQL client: query/mutation execution over the link chain and cache
//!
//! Queries are watched: [`GraphQLClient::watch_query`] returns an
//! [`ObservableQuery`] that publishes a [`QueryResult`] whenever the network
//! answers or the cache changes underneath it. Mutations resolve once.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, warn};

use super::cache::InMemoryCache;
use super::document::{BoundOperation, Document, JsonMap};
use super::error::{ClientError, GraphQLError};
use super::link::{AuthLink, GraphQLResponse, Link, Operation};
use super::operations::lending_type_policies;
use super::upload::{Upload, UploadLink};
use crate::config::Config;
use crate::services::credentials::CredentialStore;

/// Where a query looks for data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchPolicy {
    /// Serve from cache when complete, otherwise go to the network
    #[default]
    CacheFirst,
    /// Serve cached data immediately and refresh from the network
    CacheAndNetwork,
    /// Always go to the network, still writing the result to the cache
    NetworkOnly,
    /// Always go to the network and leave the cache untouched
    NoCache,
}

/// What happens to data that arrives alongside GraphQL errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Errors replace the data
    #[default]
    None,
    /// Errors are dropped, data is kept
    Ignore,
    /// Both are reported
    All,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    pub fetch_policy: FetchPolicy,
    pub error_policy: ErrorPolicy,
}

impl QueryOptions {
    pub fn with_fetch_policy(mut self, fetch_policy: FetchPolicy) -> Self {
        self.fetch_policy = fetch_policy;
        self
    }

    pub fn with_error_policy(mut self, error_policy: ErrorPolicy) -> Self {
        self.error_policy = error_policy;
        self
    }
}

/// Why a query is (or was last) in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Loading,
    Refetch,
    FetchMore,
    Ready,
    Error,
}

/// Snapshot published by an [`ObservableQuery`]
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub loading: bool,
    pub network_status: NetworkStatus,
    pub data: Option<JsonValue>,
    pub error: Option<Arc<ClientError>>,
}

impl QueryResult {
    fn in_flight(status: NetworkStatus, data: Option<JsonValue>) -> Self {
        Self {
            loading: true,
            network_status: status,
            data,
            error: None,
        }
    }

    fn ready(data: Option<JsonValue>) -> Self {
        Self {
            loading: false,
            network_status: NetworkStatus::Ready,
            data,
            error: None,
        }
    }

    fn failed(error: ClientError, data: Option<JsonValue>) -> Self {
        Self {
            loading: false,
            network_status: NetworkStatus::Error,
            data,
            error: Some(Arc::new(error)),
        }
    }

    /// Deserialize the data into a typed value
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Option<Result<T, ClientError>> {
        self.data
            .clone()
            .map(|data| serde_json::from_value(data).map_err(ClientError::Data))
    }
}

/// Executes operations through a link chain, backed by a normalized cache
#[derive(Clone)]
pub struct GraphQLClient {
    link: Arc<dyn Link>,
    cache: Arc<InMemoryCache>,
}

impl GraphQLClient {
    pub fn new(link: Arc<dyn Link>, cache: Arc<InMemoryCache>) -> Self {
        Self { link, cache }
    }

    /// Client for the lending API: `AuthLink -> UploadLink`, with the
    /// lending cache policies
    pub fn from_config(config: &Config, credentials: CredentialStore) -> Result<Self, ClientError> {
        let transport = UploadLink::new(config.graphql_api_url.clone(), config.request_timeout)?;
        let link = AuthLink::new(credentials, transport);
        let cache = InMemoryCache::new(lending_type_policies());
        Ok(Self::new(Arc::new(link), Arc::new(cache)))
    }

    pub fn cache(&self) -> &Arc<InMemoryCache> {
        &self.cache
    }

    async fn send(
        &self,
        document: &Document,
        variables: &JsonMap,
        uploads: Vec<Upload>,
    ) -> Result<GraphQLResponse, ClientError> {
        let operation = Operation::new(document.clone(), variables.clone()).with_uploads(uploads);
        Ok(self.link.request(operation).await?)
    }

    /// Start watching a query. Must be called from within a tokio runtime.
    pub fn watch_query(
        &self,
        document: Document,
        variables: JsonMap,
        options: QueryOptions,
    ) -> ObservableQuery {
        let (state, _) = watch::channel(QueryResult::in_flight(NetworkStatus::Loading, None));
        let inner = Arc::new(QueryInner {
            client: self.clone(),
            document,
            variables: Mutex::new(variables),
            options,
            state,
        });

        let initial = inner.clone();
        tokio::spawn(async move {
            initial.start().await;
        });

        let watcher = spawn_cache_watcher(Arc::downgrade(&inner), self.cache.subscribe());

        ObservableQuery { inner, watcher }
    }

    /// Run a query once and return its first settled result
    pub async fn query(
        &self,
        document: Document,
        variables: JsonMap,
        options: QueryOptions,
    ) -> QueryResult {
        self.watch_query(document, variables, options).result().await
    }

    /// Run a mutation. Entities in the response are written to the cache.
    ///
    /// A response carrying GraphQL errors resolves to
    /// [`ClientError::GraphQL`]; any partial data next to those errors is
    /// neither returned nor cached.
    pub async fn mutate(&self, document: &Document, variables: JsonMap) -> Result<JsonValue, ClientError> {
        self.mutate_with_uploads(document, variables, Vec::new()).await
    }

    pub async fn mutate_with_uploads(
        &self,
        document: &Document,
        variables: JsonMap,
        uploads: Vec<Upload>,
    ) -> Result<JsonValue, ClientError> {
        let operation = document.bind(&variables)?;
        let generation = self.cache.generation();
        let response = self.send(document, &variables, uploads).await.inspect_err(|e| {
            warn!(operation = document.operation_name().unwrap_or("anonymous"), error = %e, "Mutation failed");
        })?;

        if let Some(errors) = response.errors.filter(|e| !e.is_empty()) {
            return Err(ClientError::GraphQL(errors));
        }

        let data = response.data.unwrap_or(JsonValue::Null);
        if data.is_object() && !self.cache.write_in_generation(generation, &operation, &data) {
            debug!(
                operation = document.operation_name().unwrap_or("anonymous"),
                "Cache reset while in flight, result not cached"
            );
        }
        Ok(data)
    }
}

struct QueryInner {
    client: GraphQLClient,
    document: Document,
    variables: Mutex<JsonMap>,
    options: QueryOptions,
    state: watch::Sender<QueryResult>,
}

impl QueryInner {
    fn publish(&self, result: QueryResult) {
        self.state.send_replace(result);
    }

    fn current_data(&self) -> Option<JsonValue> {
        self.state.borrow().data.clone()
    }

    fn bind(&self, variables: &JsonMap) -> Result<BoundOperation, ClientError> {
        Ok(self.document.bind(variables)?)
    }

    async fn start(&self) {
        let variables = self.variables.lock().clone();
        let operation = match self.bind(&variables) {
            Ok(op) => op,
            Err(e) => return self.publish(QueryResult::failed(e, None)),
        };

        let cached = match self.options.fetch_policy {
            FetchPolicy::CacheFirst | FetchPolicy::CacheAndNetwork => self.client.cache.read(&operation),
            FetchPolicy::NetworkOnly | FetchPolicy::NoCache => None,
        };

        if self.options.fetch_policy == FetchPolicy::CacheFirst {
            if let Some(data) = cached {
                debug!(operation = self.name(), "Served from cache");
                return self.publish(QueryResult::ready(Some(data)));
            }
        }

        self.publish(QueryResult::in_flight(NetworkStatus::Loading, cached));
        self.fetch(&operation, &variables, &operation).await;
    }

    fn name(&self) -> &str {
        self.document.operation_name().unwrap_or("anonymous")
    }

    /// Send `variables` to the network, write the result through `written`,
    /// and publish what `watched` reads back
    async fn fetch(&self, written: &BoundOperation, variables: &JsonMap, watched: &BoundOperation) {
        let generation = self.client.cache.generation();
        let response = match self.client.send(&self.document, variables, Vec::new()).await {
            Ok(response) => response,
            Err(e) => {
                warn!(operation = self.name(), error = %e, "Query failed");
                return self.publish(QueryResult::failed(e, None));
            }
        };

        // Answered for whoever was signed in before the cache was reset
        if self.client.cache.generation() != generation {
            debug!(operation = self.name(), "Cache reset while in flight, dropping response");
            return self.publish(QueryResult::ready(None));
        }

        let errors: Vec<GraphQLError> = response.errors.unwrap_or_default();
        let data = response.data.filter(|d| !d.is_null());

        if !errors.is_empty() && self.options.error_policy == ErrorPolicy::None {
            debug!(operation = self.name(), count = errors.len(), "Query returned errors");
            return self.publish(QueryResult::failed(ClientError::GraphQL(errors), None));
        }

        let data = match (self.options.fetch_policy, data) {
            (FetchPolicy::NoCache, data) => data,
            (_, Some(data)) => {
                if data.is_object() && !self.client.cache.write_in_generation(generation, written, &data) {
                    debug!(operation = self.name(), "Cache reset while in flight, dropping response");
                    return self.publish(QueryResult::ready(None));
                }
                self.client.cache.read(watched).or(Some(data))
            }
            (_, None) => None,
        };

        if !errors.is_empty() && self.options.error_policy == ErrorPolicy::All {
            self.publish(QueryResult::failed(ClientError::GraphQL(errors), data));
        } else {
            self.publish(QueryResult::ready(data));
        }
    }

    /// Re-read after a cache write by someone else
    fn refresh_from_cache(&self) {
        if self.options.fetch_policy == FetchPolicy::NoCache {
            return;
        }
        {
            let current = self.state.borrow();
            if current.loading || current.error.is_some() {
                return;
            }
        }
        let variables = self.variables.lock().clone();
        let Ok(operation) = self.bind(&variables) else {
            return;
        };
        if let Some(data) = self.client.cache.read(&operation) {
            if self.state.borrow().data.as_ref() != Some(&data) {
                self.publish(QueryResult::ready(Some(data)));
            }
        }
    }
}

fn spawn_cache_watcher(query: Weak<QueryInner>, mut versions: watch::Receiver<u64>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while versions.changed().await.is_ok() {
            let Some(query) = query.upgrade() else {
                break;
            };
            query.refresh_from_cache();
        }
    })
}

/// A watched query
pub struct ObservableQuery {
    inner: Arc<QueryInner>,
    watcher: JoinHandle<()>,
}

impl ObservableQuery {
    /// Latest published result
    pub fn current(&self) -> QueryResult {
        self.inner.state.borrow().clone()
    }

    /// Stream of results, starting with the latest one
    pub fn subscribe(&self) -> WatchStream<QueryResult> {
        WatchStream::new(self.inner.state.subscribe())
    }

    /// Wait for the next settled (not loading) result
    pub async fn result(&self) -> QueryResult {
        let mut receiver = self.inner.state.subscribe();
        match receiver.wait_for(|r| !r.loading).await {
            Ok(result) => result.clone(),
            // The sender lives in `self`, so this only happens mid-drop
            Err(_) => self.current(),
        }
    }

    pub fn variables(&self) -> JsonMap {
        self.inner.variables.lock().clone()
    }

    /// Fetch again from the network with the current variables
    pub async fn refetch(&self) -> QueryResult {
        self.refetch_with(None).await
    }

    /// Fetch again, optionally replacing the variables first
    pub async fn refetch_with(&self, variables: Option<JsonMap>) -> QueryResult {
        let variables = {
            let mut current = self.inner.variables.lock();
            if let Some(variables) = variables {
                *current = variables;
            }
            current.clone()
        };
        let operation = match self.inner.bind(&variables) {
            Ok(op) => op,
            Err(e) => {
                self.inner.publish(QueryResult::failed(e, None));
                return self.current();
            }
        };

        let data = self.inner.current_data();
        self.inner.publish(QueryResult::in_flight(NetworkStatus::Refetch, data));
        self.inner.fetch(&operation, &variables, &operation).await;
        self.current()
    }

    /// Fetch another page. `variables` are layered over the query's own
    /// variables for this request only; the result merges into the cache
    /// entry the query watches through its field policies.
    pub async fn fetch_more(&self, variables: JsonMap) -> QueryResult {
        let base = self.inner.variables.lock().clone();
        let mut more = base.clone();
        more.extend(variables);

        let (written, watched) = match (self.inner.bind(&more), self.inner.bind(&base)) {
            (Ok(written), Ok(watched)) => (written, watched),
            (Err(e), _) | (_, Err(e)) => {
                self.inner.publish(QueryResult::failed(e, None));
                return self.current();
            }
        };

        let data = self.inner.current_data();
        self.inner.publish(QueryResult::in_flight(NetworkStatus::FetchMore, data));
        self.inner.fetch(&written, &more, &watched).await;
        self.current()
    }
}

impl Drop for ObservableQuery {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}
