//! Auth session: the single writer of the current-user value
//!
//! Readers subscribe to a watch channel; only [`Session::sign_in`] and
//! [`Session::sign_out`] change it.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use super::credentials::{CredentialStore, StorageError, Token};
use crate::graphql::InMemoryCache;
use crate::graphql::operations::SignupUser;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub name: String,
    pub email: String,
}

impl From<SignupUser> for CurrentUser {
    fn from(user: SignupUser) -> Self {
        Self {
            name: user.name,
            email: user.email,
        }
    }
}

pub struct Session {
    credentials: CredentialStore,
    cache: Arc<InMemoryCache>,
    user: watch::Sender<Option<CurrentUser>>,
}

impl Session {
    pub fn new(credentials: CredentialStore, cache: Arc<InMemoryCache>) -> Self {
        let (user, _) = watch::channel(None);
        Self {
            credentials,
            cache,
            user,
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn current_user(&self) -> Option<CurrentUser> {
        self.user.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<CurrentUser>> {
        self.user.subscribe()
    }

    /// Whether a token is stored (the user value may not be known yet)
    pub async fn has_token(&self) -> bool {
        self.credentials.get().await.is_some()
    }

    /// Persist the token, then publish the user
    pub async fn sign_in(&self, token: &Token, user: CurrentUser) -> Result<(), StorageError> {
        self.credentials.set(token).await?;
        info!(email = %user.email, "Signed in");
        self.user.send_replace(Some(user));
        Ok(())
    }

    /// Forget the token, the user and everything cached on their behalf.
    ///
    /// The in-memory state is cleared even when the storage fails.
    pub async fn sign_out(&self) -> Result<(), StorageError> {
        let cleared = self.credentials.clear().await;
        self.user.send_replace(None);
        self.cache.reset();
        info!("Signed out");
        cleared
    }
}
