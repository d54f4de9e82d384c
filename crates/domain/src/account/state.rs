use serde::{Deserialize, Serialize};

/// Lifecycle of an account.
///
/// ```text
/// Unopened ──► Active ◄──► Frozen
///                │           │
///                └─────┬─────┘
///                      ▼
///                   Closed
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountStatus {
    /// No `AccountOpened` event yet.
    #[default]
    Unopened,
    Active,
    /// Deposits are accepted, withdrawals are not.
    Frozen,
    /// Terminal. Every command is rejected.
    Closed,
}

impl AccountStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, AccountStatus::Active | AccountStatus::Frozen)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Unopened => "Unopened",
            AccountStatus::Active => "Active",
            AccountStatus::Frozen => "Frozen",
            AccountStatus::Closed => "Closed",
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
