//! Kemet client - Rust core of the book lending client
//!
//! Talks to the lending GraphQL API through an authenticated, upload-capable
//! link chain with a normalized cache, and drives forms through validation
//! and submission.

pub mod config;
pub mod forms;
pub mod graphql;
pub mod services;

pub use config::Config;
pub use graphql::GraphQLClient;
pub use services::LendingService;
