//! Caller context and the rolling usage quota.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BatchError;
use crate::style::ResolutionTier;

/// Default number of items a constrained caller may process per window.
pub const DEFAULT_DAILY_LIMIT: u32 = 5;

/// Default quota window (24 hours).
pub const DEFAULT_QUOTA_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

// =============================================================================
// Caller
// =============================================================================

/// Account plan of a caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountTier {
    #[default]
    Free,
    Premium,
    Admin,
}

impl AccountTier {
    /// Whether the daily quota applies.
    pub fn is_constrained(&self) -> bool {
        matches!(self, AccountTier::Free)
    }

    /// Whether the caller sees every asset unwatermarked.
    pub fn has_full_access(&self) -> bool {
        matches!(self, AccountTier::Premium | AccountTier::Admin)
    }

    /// Resolution tier actually granted for a requested one.
    pub fn grant_resolution(&self, requested: ResolutionTier) -> ResolutionTier {
        match self {
            AccountTier::Free => ResolutionTier::Standard,
            AccountTier::Premium | AccountTier::Admin => requested,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            AccountTier::Free => "free",
            AccountTier::Premium => "premium",
            AccountTier::Admin => "admin",
        }
    }
}

impl fmt::Display for AccountTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(AccountTier::Free),
            "premium" => Ok(AccountTier::Premium),
            "admin" => Ok(AccountTier::Admin),
            other => Err(format!("unknown account tier: {}", other)),
        }
    }
}

/// Identity and plan of the caller submitting work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    pub caller_id: String,
    pub tier: AccountTier,
}

impl CallerContext {
    pub fn new(caller_id: impl Into<String>, tier: AccountTier) -> Self {
        Self {
            caller_id: caller_id.into(),
            tier,
        }
    }
}

// =============================================================================
// Quota
// =============================================================================

/// Rolling-window usage limit for constrained callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub daily_limit: u32,
    pub window: Duration,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            daily_limit: DEFAULT_DAILY_LIMIT,
            window: DEFAULT_QUOTA_WINDOW,
        }
    }
}

impl QuotaPolicy {
    pub fn new(daily_limit: u32) -> Self {
        Self {
            daily_limit,
            ..Self::default()
        }
    }

    /// Admit `requested` more items on top of `used`, or reject the batch.
    pub fn check(
        &self,
        caller: &CallerContext,
        used: u32,
        requested: u32,
    ) -> Result<(), BatchError> {
        if !caller.tier.is_constrained() {
            return Ok(());
        }
        if used.saturating_add(requested) > self.daily_limit {
            return Err(BatchError::QuotaExceeded {
                used,
                requested,
                limit: self.daily_limit,
                window: self.window,
            });
        }
        Ok(())
    }
}
