//! Client services

pub mod credentials;
pub mod lending;
pub mod logging;
pub mod session;

pub use credentials::{CredentialStore, FileStorage, KeyValueStorage, MemoryStorage, StorageError, Token};
pub use lending::{BookCatalog, BookFilter, DEFAULT_PAGE_SIZE, LendingService};
pub use logging::init_tracing;
pub use session::{CurrentUser, Session};
