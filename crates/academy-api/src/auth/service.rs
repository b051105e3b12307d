//! Account lifecycle
//!
//! Register, verify email, login, current user, forgot/reset password,
//! resend checkout mail and username change. Every failure is raised as an
//! [`AppError`] where it is detected; nothing here retries.

use std::sync::Arc;

use academy_core::FrontendConfig;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::checkout::CheckoutTokens;
use super::jwt::SignedTokenCodec;
use super::middleware::SecurityContext;
use super::models::{normalize_email, Account, AuthResponse, NewAccount, TokenPurpose, UserView};
use super::password::{password_policy, PasswordHasher};
use super::repository::AccountStore;
use crate::audit::{audit_log, AuditEvent, RequestMeta};
use crate::error::AppError;
use crate::mail::templates::{checkout_mail, token_link};
use crate::mail::Mailer;

/// Account registration request
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,

    #[validate(length(min = 1, max = 50, message = "Username is required (at most 50 characters)"))]
    pub username: String,

    #[validate(custom(function = "password_policy"))]
    pub password: String,
}

/// Login with exactly one of email or username
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,

    pub username: Option<String>,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct VerifyEmailQuery {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ForgotPasswordRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,

    #[validate(custom(function = "password_policy"))]
    pub new_password: String,
}

/// Resend a checkout mail; `purpose` is EMAIL_VERIFICATION or PASSWORD_RESET
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ResendRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,

    #[serde(alias = "type")]
    #[validate(length(min = 1, message = "Purpose is required"))]
    pub purpose: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateUsernameRequest {
    #[validate(length(min = 1, max = 50, message = "Username is required (at most 50 characters)"))]
    pub username: String,
}

/// Lifetime of checkout tokens and where their links point
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub checkout_ttl_minutes: i64,
    pub links: FrontendConfig,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            checkout_ttl_minutes: 15,
            links: FrontendConfig::default(),
        }
    }
}

/// Orchestrates the account state machine over the stores, codec and mailer
#[derive(Clone)]
pub struct AccountLifecycleService {
    store: Arc<dyn AccountStore>,
    checkouts: CheckoutTokens,
    codec: SignedTokenCodec,
    hasher: PasswordHasher,
    mailer: Arc<dyn Mailer>,
    settings: LifecycleSettings,
}

impl AccountLifecycleService {
    pub fn new(
        store: Arc<dyn AccountStore>,
        checkouts: CheckoutTokens,
        codec: SignedTokenCodec,
        hasher: PasswordHasher,
        mailer: Arc<dyn Mailer>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            store,
            checkouts,
            codec,
            hasher,
            mailer,
            settings,
        }
    }

    /// Create an unverified CLIENT account and mail its verification link.
    ///
    /// The account and its first checkout token are stored together. If the
    /// mail cannot be sent they are deleted again, so the same email and
    /// username can register once more.
    pub async fn register(
        &self,
        request: RegisterRequest,
        meta: &RequestMeta,
    ) -> Result<UserView, AppError> {
        let email = normalize_email(&request.email);
        let username = request.username.trim().to_string();
        if username.is_empty() {
            return Err(AppError::BadRequest("Username cannot be blank".to_string()));
        }

        let result = self.register_account(email.clone(), username, request.password).await;
        match &result {
            Ok(account) => audit_log(
                &AuditEvent::RegistrationSuccess {
                    user_id: account.uuid,
                    email: account.email.clone(),
                    role: account.role.to_string(),
                },
                meta,
            ),
            Err(e) => audit_log(
                &AuditEvent::RegistrationFailure {
                    email: email.clone(),
                    reason: e.code().to_string(),
                },
                meta,
            ),
        }

        Ok(result?.to_view())
    }

    async fn register_account(
        &self,
        email: String,
        username: String,
        password: String,
    ) -> Result<Account, AppError> {
        if self.store.exists_by_email(&email).await? {
            return Err(AppError::EmailAlreadyExists);
        }
        if self.store.exists_by_username(&username).await? {
            return Err(AppError::UsernameAlreadyExists);
        }

        let password_hash = self.hash_password(password).await?;

        let ttl = self.settings.checkout_ttl_minutes;
        let seed = self
            .codec
            .issue_checkout_seed(&email, TokenPurpose::EmailVerification, ttl)?;
        let pending = self
            .checkouts
            .pending(seed.clone(), TokenPurpose::EmailVerification, ttl);

        // Unique indexes catch a concurrent registration that slipped past the checks above.
        let (account, _) = self
            .store
            .register_pending(NewAccount::client(username, email, password_hash), pending)
            .await?;

        if let Err(e) = self
            .send_checkout_mail(&account, TokenPurpose::EmailVerification, &seed)
            .await
        {
            match self.store.discard_unverified(account.id).await {
                Ok(_) => tracing::warn!(user_id = account.id, "Registration rolled back"),
                Err(discard) => tracing::error!(
                    user_id = account.id,
                    error = %discard,
                    "Failed to roll back registration"
                ),
            }
            return Err(e);
        }

        tracing::info!(user_id = account.id, "Account registered");
        Ok(account)
    }

    /// Redeem an EMAIL_VERIFICATION token and start a session.
    pub async fn verify_email(
        &self,
        raw_token: &str,
        meta: &RequestMeta,
    ) -> Result<AuthResponse, AppError> {
        let token = self
            .checkouts
            .validate(raw_token, TokenPurpose::EmailVerification)
            .await?;

        let account = self
            .store
            .find_by_id(token.owner_id)
            .await?
            .ok_or(AppError::TokenInvalid)?;

        if account.verified {
            return Err(AppError::UserAlreadyVerified);
        }

        // Token, verified flag and progression commit together. A concurrent
        // redeemer loses with TokenAlreadyUsed or UserAlreadyVerified.
        let account = self
            .store
            .redeem_email_verification(token.id, account.id)
            .await?;
        let session = self.codec.issue_session_token(&account)?;

        audit_log(
            &AuditEvent::EmailVerified {
                user_id: account.uuid,
                email: account.email.clone(),
            },
            meta,
        );

        Ok(AuthResponse {
            user: account.to_view(),
            token: session,
        })
    }

    /// Authenticate with email or username plus password.
    ///
    /// Unknown email and unknown username fail identically. The verified
    /// check runs before the password is looked at.
    pub async fn login(
        &self,
        request: LoginRequest,
        meta: &RequestMeta,
    ) -> Result<AuthResponse, AppError> {
        let email = request.email.filter(|e| !e.trim().is_empty());
        let username = request.username.filter(|u| !u.trim().is_empty());

        let (identifier, account) = match (email, username) {
            (Some(email), None) => {
                let email = normalize_email(&email);
                let account = self.store.find_by_email(&email).await?;
                (email, account)
            }
            (None, Some(username)) => {
                let username = username.trim().to_string();
                let account = self.store.find_by_username(&username).await?;
                (username, account)
            }
            _ => {
                return Err(AppError::BadRequest(
                    "Provide either an email or a username, not both".to_string(),
                ))
            }
        };

        let fail = |reason: &str, error: AppError| {
            audit_log(
                &AuditEvent::LoginFailure {
                    identifier: identifier.clone(),
                    reason: reason.to_string(),
                },
                meta,
            );
            error
        };

        let Some(account) = account else {
            return Err(fail("unknown account", invalid_credentials()));
        };

        if !account.verified {
            return Err(fail("account not verified", AppError::AccountNotVerified));
        }

        let Some(hash) = account.password_hash.clone() else {
            return Err(fail("no password set", invalid_credentials()));
        };

        if !self.verify_password(request.password, hash).await? {
            return Err(fail("wrong password", invalid_credentials()));
        }

        let session = self.codec.issue_session_token(&account)?;
        audit_log(
            &AuditEvent::LoginSuccess {
                user_id: account.uuid,
                email: account.email.clone(),
            },
            meta,
        );

        Ok(AuthResponse {
            user: account.to_view(),
            token: session,
        })
    }

    /// The caller's account paired with the token they presented
    pub fn current_user(&self, ctx: &SecurityContext) -> Result<AuthResponse, AppError> {
        let token = ctx.token.clone().ok_or(AppError::MissingToken)?;
        let account = ctx.require_account()?;

        Ok(AuthResponse {
            user: account.to_view(),
            token,
        })
    }

    /// Mail a PASSWORD_RESET link.
    ///
    /// An unknown email is reported as `InvalidCredentials` with its own
    /// message, unlike login.
    pub async fn request_password_reset(
        &self,
        email: &str,
        meta: &RequestMeta,
    ) -> Result<String, AppError> {
        let email = normalize_email(email);
        let account = self.store.find_by_email(&email).await?;

        audit_log(
            &AuditEvent::PasswordResetRequested {
                email: email.clone(),
                account_found: account.is_some(),
            },
            meta,
        );

        let account = account.ok_or_else(|| {
            AppError::InvalidCredentials("No account found for this email".to_string())
        })?;

        let seed = self.mint_checkout(&account, TokenPurpose::PasswordReset).await?;
        self.send_checkout_mail(&account, TokenPurpose::PasswordReset, &seed)
            .await?;

        Ok("A password reset link has been sent to your email".to_string())
    }

    /// Redeem a PASSWORD_RESET token and store the new password.
    pub async fn confirm_password_reset(
        &self,
        raw_token: &str,
        new_password: String,
        meta: &RequestMeta,
    ) -> Result<String, AppError> {
        let token = self
            .checkouts
            .validate(raw_token, TokenPurpose::PasswordReset)
            .await?;

        let password_hash = self.hash_password(new_password).await?;

        let account = self
            .store
            .redeem_password_reset(token.id, token.owner_id, &password_hash)
            .await?;

        audit_log(
            &AuditEvent::PasswordResetCompleted {
                user_id: account.uuid,
                email: account.email,
            },
            meta,
        );

        Ok("Your password has been reset".to_string())
    }

    /// Invalidate the unused tokens for `purpose` and mail a new one.
    pub async fn resend(
        &self,
        request: ResendRequest,
        meta: &RequestMeta,
    ) -> Result<String, AppError> {
        let purpose: TokenPurpose = request.purpose.parse().map_err(AppError::BadRequest)?;

        let email = normalize_email(&request.email);
        let account = self.store.find_by_email(&email).await?.ok_or_else(|| {
            AppError::InvalidCredentials("No account found for this email".to_string())
        })?;

        if purpose == TokenPurpose::EmailVerification && account.verified {
            return Err(AppError::UserAlreadyVerified);
        }

        let seed = self.mint_checkout(&account, purpose).await?;
        self.send_checkout_mail(&account, purpose, &seed).await?;

        audit_log(
            &AuditEvent::CheckoutResent {
                user_id: account.uuid,
                email: account.email.clone(),
                purpose: purpose.to_string(),
            },
            meta,
        );

        Ok(match purpose {
            TokenPurpose::EmailVerification => "A new verification email has been sent",
            TokenPurpose::PasswordReset => "A new password reset email has been sent",
        }
        .to_string())
    }

    /// Rename the authenticated account.
    pub async fn change_username(
        &self,
        ctx: &SecurityContext,
        request: UpdateUsernameRequest,
        meta: &RequestMeta,
    ) -> Result<UserView, AppError> {
        let account = ctx.require_account()?;
        let username = request.username.trim();
        if username.is_empty() {
            return Err(AppError::BadRequest("Username cannot be blank".to_string()));
        }

        if let Some(holder) = self.store.find_by_username(username).await? {
            if holder.id != account.id {
                return Err(AppError::UsernameAlreadyExists);
            }
        }

        let updated = self.store.update_username(account.id, username).await?;
        audit_log(
            &AuditEvent::UsernameChanged {
                user_id: updated.uuid,
                username: updated.username.clone(),
            },
            meta,
        );

        Ok(updated.to_view())
    }

    async fn mint_checkout(
        &self,
        account: &Account,
        purpose: TokenPurpose,
    ) -> Result<String, AppError> {
        let ttl = self.settings.checkout_ttl_minutes;
        let seed = self.codec.issue_checkout_seed(&account.email, purpose, ttl)?;
        self.checkouts
            .reissue(account.id, purpose, ttl, seed.clone())
            .await?;
        Ok(seed)
    }

    async fn send_checkout_mail(
        &self,
        account: &Account,
        purpose: TokenPurpose,
        token: &str,
    ) -> Result<(), AppError> {
        let base = match purpose {
            TokenPurpose::EmailVerification => &self.settings.links.verify_email_url,
            TokenPurpose::PasswordReset => &self.settings.links.reset_password_url,
        };
        let link = token_link(base, token);
        let mail = checkout_mail(
            purpose,
            &account.email,
            &account.username,
            &link,
            self.settings.checkout_ttl_minutes,
        );

        self.mailer.send(mail).await.map_err(|e| {
            tracing::error!(user_id = account.id, %purpose, error = %e, "Failed to send checkout mail");
            AppError::from(e)
        })
    }

    async fn hash_password(&self, password: String) -> Result<String, AppError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AppError::Internal(format!("hashing task failed: {e}")))?
            .map_err(AppError::from)
    }

    async fn verify_password(&self, password: String, hash: String) -> Result<bool, AppError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| AppError::Internal(format!("verification task failed: {e}")))?
            .map_err(AppError::from)
    }
}

fn invalid_credentials() -> AppError {
    AppError::InvalidCredentials("Invalid credentials".to_string())
}
