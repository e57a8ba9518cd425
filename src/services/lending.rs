//! Lending API service: typed access to books, checkouts and signup
//!
//! Wires the credential store, session and GraphQL client together the way
//! the application uses them.

use std::sync::Arc;

use serde_json::json;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

use super::credentials::{CredentialStore, FileStorage, StorageError};
use super::session::Session;
use crate::config::Config;
use crate::forms::{SignupForm, signup_form};
use crate::graphql::document::{Document, JsonMap};
use crate::graphql::operations::{
    AvailableBooksData, Book, Checkout, GET_AVAILABLE_BOOKS, GET_USER_CHECKOUTS, UserCheckoutsData,
};
use crate::graphql::{ClientError, GraphQLClient, ObservableQuery, QueryOptions, QueryResult};

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Filter arguments of `getAvailableBooks`; these form the cache key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookFilter {
    pub search_string: String,
    pub type_code: Option<String>,
}

impl BookFilter {
    fn variables(&self, offset: usize, limit: usize) -> JsonMap {
        let variables = json!({
            "searchString": self.search_string,
            "typeCode": self.type_code,
            "offset": offset,
            "limit": limit,
        });
        variables.as_object().cloned().unwrap_or_default()
    }
}

fn decode<T: serde::de::DeserializeOwned>(result: QueryResult) -> Result<Option<T>, Arc<ClientError>> {
    if let Some(error) = result.error {
        return Err(error);
    }
    result.decode::<T>().transpose().map_err(Arc::new)
}

/// A paginated, watched list of available books
pub struct BookCatalog {
    query: ObservableQuery,
    page_size: usize,
}

impl BookCatalog {
    fn books_of(result: QueryResult) -> Result<Vec<Book>, Arc<ClientError>> {
        Ok(decode::<AvailableBooksData>(result)?
            .map(|data| data.get_available_books)
            .unwrap_or_default())
    }

    /// Every page loaded so far
    pub async fn books(&self) -> Result<Vec<Book>, Arc<ClientError>> {
        Self::books_of(self.query.result().await)
    }

    /// Request the page after the books already loaded
    pub async fn load_more(&self) -> Result<Vec<Book>, Arc<ClientError>> {
        let loaded = self.books().await?.len();
        debug!(offset = loaded, limit = self.page_size, "Loading more books");
        let more = json!({ "offset": loaded, "limit": self.page_size });
        let more = more.as_object().cloned().unwrap_or_default();
        Self::books_of(self.query.fetch_more(more).await)
    }

    pub fn subscribe(&self) -> WatchStream<QueryResult> {
        self.query.subscribe()
    }
}

pub struct LendingService {
    client: GraphQLClient,
    session: Arc<Session>,
}

impl LendingService {
    pub fn new(client: GraphQLClient, session: Arc<Session>) -> Self {
        Self { client, session }
    }

    /// Service backed by the on-disk token store and the configured endpoint
    pub fn from_config(config: &Config) -> Result<Self, ClientError> {
        let storage = Arc::new(FileStorage::new(&config.token_store_path));
        let credentials = CredentialStore::new(storage, config.token_storage_key.clone());
        let client = GraphQLClient::from_config(config, credentials.clone())?;
        let session = Arc::new(Session::new(credentials, client.cache().clone()));
        Ok(Self::new(client, session))
    }

    pub fn client(&self) -> &GraphQLClient {
        &self.client
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Start the first page of books matching `filter`
    pub fn available_books(&self, filter: &BookFilter, page_size: usize) -> Result<BookCatalog, ClientError> {
        let document = Document::parse(GET_AVAILABLE_BOOKS)?;
        let query = self.client.watch_query(
            document,
            filter.variables(0, page_size),
            QueryOptions::default(),
        );
        Ok(BookCatalog { query, page_size })
    }

    pub fn watch_user_checkouts(&self) -> Result<ObservableQuery, ClientError> {
        let document = Document::parse(GET_USER_CHECKOUTS)?;
        Ok(self
            .client
            .watch_query(document, JsonMap::new(), QueryOptions::default()))
    }

    pub async fn user_checkouts(&self) -> Result<Vec<Checkout>, Arc<ClientError>> {
        let query = self.watch_user_checkouts().map_err(Arc::new)?;
        Ok(decode::<UserCheckoutsData>(query.result().await)?
            .map(|data| data.get_user_checkouts)
            .unwrap_or_default())
    }

    pub fn signup_form(&self) -> SignupForm {
        signup_form(self.client.clone(), self.session.clone())
    }

    pub async fn sign_out(&self) -> Result<(), StorageError> {
        self.session.sign_out().await
    }
}
