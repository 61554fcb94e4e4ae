//! Operation requests and outcomes
//!
//! Amount vectors in join and exit requests cover the priced tokens only, in
//! registry order with the share token left out. Only initialization and
//! [`LedgerSnapshot`] carry a full registry-order vector.

use crate::errors::PoolError;
use crate::registry::TokenId;
use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// Host ledger view supplied with every call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Balances of every registered token, share token included, in registry order
    pub balances: Vec<U256>,
    /// Logical timestamp in seconds
    pub now: u64,
}

impl LedgerSnapshot {
    pub fn new(balances: Vec<U256>, now: u64) -> Self {
        Self { balances, now }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapKind {
    /// `amount` is paid in; the output is computed
    GivenIn,
    /// `amount` is paid out; the input is computed
    GivenOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRequest {
    pub kind: SwapKind,
    pub token_in: TokenId,
    pub token_out: TokenId,
    pub amount: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwapOutcome {
    pub amount_in: U256,
    pub amount_out: U256,
    /// Share tokens minted to the protocol during this call
    pub protocol_fee_share: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinRequest {
    /// One-time pool seeding
    Init {
        amounts_in_including_share: Vec<U256>,
    },
    ExactTokensInForShareOut {
        amounts_in: Vec<U256>,
        min_share_out: U256,
    },
    TokenInForExactShareOut {
        share_out: U256,
        token_index: usize,
    },
    /// Not offered by this pool
    AllTokensInForExactShareOut { share_out: U256 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitRequest {
    ExactShareInForOneTokenOut {
        share_in: U256,
        token_index: usize,
    },
    ShareInForExactTokensOut {
        amounts_out: Vec<U256>,
        max_share_in: U256,
    },
    /// Not offered by this pool outside recovery mode
    ExactShareInForAllTokensOut { share_in: U256 },
    /// Proportional withdrawal available only in recovery mode
    RecoveryProportional { share_in: U256 },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JoinOutcome {
    pub share_out: U256,
    /// Raw amounts taken in, priced-token order
    pub amounts_in: Vec<U256>,
    pub protocol_fee_share: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExitOutcome {
    pub share_in: U256,
    /// Raw amounts paid out, priced-token order
    pub amounts_out: Vec<U256>,
    pub protocol_fee_share: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializeOutcome {
    /// Shares minted into circulation, equal to the initial invariant
    pub share_out: U256,
    pub share_to_caller: U256,
    /// Permanently locked shares
    pub minimum_locked: U256,
    /// Preminted shares that stay in custody
    pub custody_remainder: U256,
    /// Registry-order amounts with the share entry set to the custody remainder
    pub amounts_in_including_share: Vec<U256>,
}

/// Numeric join kind codes used by hosts that decode raw user data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum JoinKind {
    Init = 0,
    ExactTokensInForShareOut = 1,
    TokenInForExactShareOut = 2,
    AllTokensInForExactShareOut = 3,
}

impl TryFrom<u8> for JoinKind {
    type Error = PoolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Init),
            1 => Ok(Self::ExactTokensInForShareOut),
            2 => Ok(Self::TokenInForExactShareOut),
            3 => Ok(Self::AllTokensInForExactShareOut),
            other => Err(PoolError::UnsupportedOperation(format!(
                "join kind {}",
                other
            ))),
        }
    }
}

/// Numeric exit kind codes used by hosts that decode raw user data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExitKind {
    ExactShareInForOneTokenOut = 0,
    ShareInForExactTokensOut = 1,
    ExactShareInForAllTokensOut = 2,
}

impl TryFrom<u8> for ExitKind {
    type Error = PoolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::ExactShareInForOneTokenOut),
            1 => Ok(Self::ShareInForExactTokensOut),
            2 => Ok(Self::ExactShareInForAllTokensOut),
            other => Err(PoolError::UnsupportedOperation(format!(
                "exit kind {}",
                other
            ))),
        }
    }
}

impl JoinRequest {
    pub fn kind(&self) -> JoinKind {
        match self {
            Self::Init { .. } => JoinKind::Init,
            Self::ExactTokensInForShareOut { .. } => JoinKind::ExactTokensInForShareOut,
            Self::TokenInForExactShareOut { .. } => JoinKind::TokenInForExactShareOut,
            Self::AllTokensInForExactShareOut { .. } => JoinKind::AllTokensInForExactShareOut,
        }
    }
}

impl ExitRequest {
    /// Numeric code, `None` for the recovery exit which has its own entry point
    pub fn kind(&self) -> Option<ExitKind> {
        match self {
            Self::ExactShareInForOneTokenOut { .. } => Some(ExitKind::ExactShareInForOneTokenOut),
            Self::ShareInForExactTokensOut { .. } => Some(ExitKind::ShareInForExactTokensOut),
            Self::ExactShareInForAllTokensOut { .. } => Some(ExitKind::ExactShareInForAllTokensOut),
            Self::RecoveryProportional { .. } => None,
        }
    }
}
