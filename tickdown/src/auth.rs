//! Authentication provider seam.
//!
//! The session controller never talks to an identity backend directly; it
//! consumes the [`AuthProvider`] trait and reacts to the [`AuthState`] watch
//! stream. [`LocalAuthProvider`] is the in-process implementation used for
//! development and tests. Auth errors are surfaced verbatim to the frontend
//! as status text — no retry, nothing fatal.

use std::collections::HashMap;

use parking_lot::Mutex;
use tickdown_proto::task::UserId;
use tokio::sync::watch;

/// Minimum accepted password length, in characters.
pub const MIN_PASSWORD_LENGTH: usize = 6;

/// Errors from authentication operations. Messages are shown to the user
/// as-is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Sign-up with an email that already has an account.
    #[error("an account with this email already exists")]
    EmailTaken,

    /// Unknown email or wrong password — deliberately indistinguishable.
    #[error("invalid email or password")]
    InvalidCredentials,

    /// Password shorter than [`MIN_PASSWORD_LENGTH`].
    #[error("password must be at least {MIN_PASSWORD_LENGTH} characters")]
    WeakPassword,

    /// Email missing an `@` with non-empty parts on both sides.
    #[error("malformed email address")]
    InvalidEmail,
}

/// A signed-in identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    /// Stable identifier; scopes every store call.
    pub id: UserId,
    /// Normalized (lowercased, trimmed) email used to sign in.
    pub email: String,
}

/// Either a signed-in user or the absence of one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthState {
    /// Nobody is signed in.
    #[default]
    SignedOut,
    /// This user is signed in.
    SignedIn(AuthUser),
}

/// Async identity backend.
///
/// Implementations broadcast every state transition on the watch channel
/// returned by [`AuthProvider::watch`]; the session controller drives its
/// entire lifecycle off that stream.
pub trait AuthProvider: Send + Sync {
    /// Create an account and sign it in.
    fn sign_up(
        &self,
        email: &str,
        password: &str,
    ) -> impl std::future::Future<Output = Result<AuthUser, AuthError>> + Send;

    /// Sign in to an existing account.
    fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> impl std::future::Future<Output = Result<AuthUser, AuthError>> + Send;

    /// Sign the current user out. Signing out while signed out is a no-op.
    fn sign_out(&self) -> impl std::future::Future<Output = Result<(), AuthError>> + Send;

    /// Subscribe to auth state transitions. The receiver starts at the
    /// current state.
    fn watch(&self) -> watch::Receiver<AuthState>;
}

struct Account {
    id: UserId,
    password: String,
}

/// In-process email/password registry.
///
/// Accounts and credentials live in process memory with no hashing — this
/// is a development and test provider, not a production identity backend.
/// The same email maps to the same [`UserId`] for the provider's lifetime.
pub struct LocalAuthProvider {
    accounts: Mutex<HashMap<String, Account>>,
    state_tx: watch::Sender<AuthState>,
}

impl LocalAuthProvider {
    /// Creates an empty registry with nobody signed in.
    #[must_use]
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(AuthState::SignedOut);
        Self {
            accounts: Mutex::new(HashMap::new()),
            state_tx,
        }
    }
}

impl Default for LocalAuthProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercases and trims an address, rejecting anything without an `@`
/// surrounded by non-empty parts.
fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(AuthError::InvalidEmail),
    }
}

impl AuthProvider for LocalAuthProvider {
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        let email = normalize_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AuthError::WeakPassword);
        }

        let user = {
            let mut accounts = self.accounts.lock();
            if accounts.contains_key(&email) {
                return Err(AuthError::EmailTaken);
            }
            let id = UserId::new();
            accounts.insert(
                email.clone(),
                Account {
                    id,
                    password: password.to_string(),
                },
            );
            AuthUser { id, email }
        };

        self.state_tx.send_replace(AuthState::SignedIn(user.clone()));
        Ok(user)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        let email = normalize_email(email).map_err(|_| AuthError::InvalidCredentials)?;

        let user = {
            let accounts = self.accounts.lock();
            let account = accounts
                .get(&email)
                .ok_or(AuthError::InvalidCredentials)?;
            if account.password != password {
                return Err(AuthError::InvalidCredentials);
            }
            AuthUser {
                id: account.id,
                email,
            }
        };

        self.state_tx.send_replace(AuthState::SignedIn(user.clone()));
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.state_tx.send_replace(AuthState::SignedOut);
        Ok(())
    }

    fn watch(&self) -> watch::Receiver<AuthState> {
        self.state_tx.subscribe()
    }
}
