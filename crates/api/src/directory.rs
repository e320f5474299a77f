//! Bearer token → account resolution.
//!
//! Identity is owned by an external collaborator; the API only needs to turn
//! a token into an [`AccountContext`].

use async_trait::async_trait;
use tracing::info;

use creditscribe_infra::{Ledger, ServiceError};
use creditscribe_ledger::Plan;

use crate::context::AccountContext;

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// `Ok(None)` when the token does not identify anyone.
    async fn resolve(&self, token: &str) -> Result<Option<AccountContext>, ServiceError>;
}

/// Development directory: the token is the account's email address.
///
/// Unknown addresses get an account on first use, opened with the signup
/// grant.
pub struct EmailTokenDirectory {
    ledger: Ledger,
    signup_credits: i64,
}

impl EmailTokenDirectory {
    pub fn new(ledger: Ledger, signup_credits: i64) -> Self {
        Self { ledger, signup_credits }
    }
}

#[async_trait]
impl AccountDirectory for EmailTokenDirectory {
    async fn resolve(&self, token: &str) -> Result<Option<AccountContext>, ServiceError> {
        if !token.contains('@') {
            return Ok(None);
        }
        if let Some(account) = self.ledger.find_by_email(token).await? {
            return Ok(Some(AccountContext::new(account.id_typed(), account.email())));
        }

        let account = match self.ledger.open_account(token, Plan::Free, self.signup_credits).await {
            Ok(account) => account,
            // Lost a race with a concurrent first request for the same address.
            Err(ServiceError::Conflict(_)) => match self.ledger.find_by_email(token).await? {
                Some(account) => account,
                None => return Ok(None),
            },
            Err(e) => return Err(e),
        };
        info!(account_id = %account.id_typed(), "account opened on first sign-in");
        Ok(Some(AccountContext::new(account.id_typed(), account.email())))
    }
}
