//! GraphQL data access for the lending API
//!
//! The request path is `GraphQLClient -> AuthLink -> UploadLink`, with
//! responses normalized into a shared [`InMemoryCache`].

pub mod cache;
pub mod client;
pub mod document;
pub mod error;
pub mod link;
pub mod operations;
pub mod upload;

pub use cache::{FieldPolicy, InMemoryCache, MergeStrategy, TypePolicies};
pub use client::{
    ErrorPolicy, FetchPolicy, GraphQLClient, NetworkStatus, ObservableQuery, QueryOptions,
    QueryResult,
};
pub use document::{Document, JsonMap, OperationKind};
pub use error::{ClientError, DocumentError, GraphQLError, NetworkError};
pub use link::{AuthLink, GraphQLResponse, Link, Operation};
pub use upload::{Upload, UploadLink};
