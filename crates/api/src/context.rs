use creditscribe_core::AccountId;

/// Authenticated account for a request.
///
/// Inserted by the auth middleware; every protected route reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountContext {
    account_id: AccountId,
    email: String,
}

impl AccountContext {
    pub fn new(account_id: AccountId, email: impl Into<String>) -> Self {
        Self {
            account_id,
            email: email.into(),
        }
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn email(&self) -> &str {
        &self.email
    }
}
