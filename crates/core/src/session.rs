//! Caller context for ledger operations.
//!
//! Which account is acting, and in which role, travels explicitly with every
//! request instead of living in process-wide state.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::AccountId;

/// The side of a stream the caller acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Employer,
    Employee,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    account: AccountId,
    role: Role,
}

impl Session {
    pub fn new(account: AccountId, role: Role) -> Self {
        Self { account, role }
    }

    pub fn employer(account: AccountId) -> Self {
        Self::new(account, Role::Employer)
    }

    pub fn employee(account: AccountId) -> Self {
        Self::new(account, Role::Employee)
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    /// Require that the session acts as the employer `owner`.
    pub fn require_employer(&self, owner: &AccountId) -> DomainResult<()> {
        if self.role != Role::Employer || &self.account != owner {
            return Err(DomainError::unauthorized(format!(
                "{} is not acting as employer {owner}",
                self.account
            )));
        }
        Ok(())
    }

    /// Require that the session acts as the employee `worker`.
    pub fn require_employee(&self, worker: &AccountId) -> DomainResult<()> {
        if self.role != Role::Employee || &self.account != worker {
            return Err(DomainError::unauthorized(format!(
                "{} is not acting as employee {worker}",
                self.account
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(s: &str) -> AccountId {
        AccountId::parse(s).unwrap()
    }

    #[test]
    fn role_and_account_must_both_match() {
        let s = Session::employer(acct("acme"));
        assert!(s.require_employer(&acct("acme")).is_ok());
        assert!(matches!(
            s.require_employer(&acct("other")),
            Err(DomainError::Unauthorized(_))
        ));
        assert!(s.require_employee(&acct("acme")).is_err());
    }
}
