//! Application state shared across handlers

use std::sync::Arc;
use std::time::Instant;

use academy_core::AppConfig;

use crate::auth::checkout::CheckoutTokens;
use crate::auth::jwt::{SignedTokenCodec, TokenError};
use crate::auth::password::{PasswordConfig, PasswordHasher};
use crate::auth::repository::UserDirectory;
use crate::auth::service::{AccountLifecycleService, LifecycleSettings};
use crate::catalog::CatalogService;
use crate::clock::Clock;
use crate::mail::Mailer;
use crate::store::Stores;

pub struct AppState {
    pub config: AppConfig,
    pub start_time: Instant,
    pub clock: Arc<dyn Clock>,
    /// Signs and verifies session tokens
    pub codec: SignedTokenCodec,
    /// Read-only account lookup used by the authentication gate
    pub users: Arc<dyn UserDirectory>,
    pub accounts: AccountLifecycleService,
    pub catalog: CatalogService,
    checkouts: CheckoutTokens,
}

impl AppState {
    /// Wire services over `stores`. Fails when the signing key is too short.
    pub fn new(
        config: AppConfig,
        stores: Stores,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TokenError> {
        let hasher = PasswordHasher::new(PasswordConfig::from_auth_config(&config.auth));
        Self::assemble(config, stores, mailer, clock, hasher)
    }

    fn assemble(
        config: AppConfig,
        stores: Stores,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
        hasher: PasswordHasher,
    ) -> Result<Self, TokenError> {
        let codec = SignedTokenCodec::new(
            config.auth.jwt_secret.as_bytes(),
            config.auth.issuer.clone(),
            clock.clone(),
        )?;
        let checkouts = CheckoutTokens::new(stores.checkouts.clone(), clock.clone());

        let accounts = AccountLifecycleService::new(
            stores.accounts.clone(),
            checkouts.clone(),
            codec.clone(),
            hasher,
            mailer,
            LifecycleSettings {
                checkout_ttl_minutes: config.auth.checkout_ttl_minutes,
                links: config.frontend.clone(),
            },
        );

        Ok(Self {
            start_time: Instant::now(),
            clock,
            codec,
            users: stores.users,
            accounts,
            catalog: CatalogService::new(stores.categories),
            checkouts,
            config,
        })
    }

    pub fn checkout_tokens(&self) -> &CheckoutTokens {
        &self.checkouts
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl AppState {
    /// Default config with cheap Argon2 parameters
    pub fn for_testing(stores: Stores, mailer: Arc<dyn Mailer>, clock: Arc<dyn Clock>) -> Self {
        let hasher = PasswordHasher::new(PasswordConfig {
            memory_cost: 8192,
            time_cost: 1,
            parallelism: 1,
            output_len: Some(32),
        });
        match Self::assemble(AppConfig::default(), stores, mailer, clock, hasher) {
            Ok(state) => state,
            Err(e) => panic!("default test config rejected: {e}"),
        }
    }
}
