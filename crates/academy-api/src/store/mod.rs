//! Storage backends
//!
//! Both backends implement every persistence trait, so the application
//! state holds one concrete store behind several trait objects.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use crate::auth::repository::{AccountStore, CheckoutTokenStore, UserDirectory};
use crate::catalog::CategoryStore;

pub use memory::MemoryStore;
pub use postgres::{PgStore, MIGRATOR};

/// Trait-object views over one backend
#[derive(Clone)]
pub struct Stores {
    pub accounts: Arc<dyn AccountStore>,
    pub users: Arc<dyn UserDirectory>,
    pub checkouts: Arc<dyn CheckoutTokenStore>,
    pub categories: Arc<dyn CategoryStore>,
}

impl Stores {
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: AccountStore + CategoryStore + 'static,
    {
        Self {
            accounts: backend.clone(),
            users: backend.clone(),
            checkouts: backend.clone(),
            categories: backend,
        }
    }

    pub fn memory() -> Self {
        Self::from_backend(Arc::new(MemoryStore::new()))
    }
}
