use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// The two parallel in-app token balances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TokenType {
    Love,
    Love2,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Love => "LOVE",
            Self::Love2 => "LOVE2",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOVE" => Ok(Self::Love),
            "LOVE2" => Ok(Self::Love2),
            other => Err(ParseEnumError::new("token type", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipTier {
    #[default]
    Standard,
    Plus,
    Premium,
}

impl MembershipTier {
    /// Likes allowed per UTC day. `None` means unlimited.
    pub fn daily_like_limit(&self) -> Option<u32> {
        match self {
            Self::Standard => Some(10),
            Self::Plus => Some(50),
            Self::Premium => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Plus => "plus",
            Self::Premium => "premium",
        }
    }
}

impl FromStr for MembershipTier {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(Self::Standard),
            "plus" => Ok(Self::Plus),
            "premium" => Ok(Self::Premium),
            other => Err(ParseEnumError::new("membership tier", other)),
        }
    }
}

/// Kind of ledger mutation recorded in the token transaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Earn,
    Spend,
    EscrowHold,
    EscrowRelease,
    Faucet,
    SignupBonus,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earn => "earn",
            Self::Spend => "spend",
            Self::EscrowHold => "escrow_hold",
            Self::EscrowRelease => "escrow_release",
            Self::Faucet => "faucet",
            Self::SignupBonus => "signup_bonus",
        }
    }

    /// Whether this kind removes tokens from the user's balance.
    pub fn is_debit(&self) -> bool {
        matches!(self, Self::Spend | Self::EscrowHold)
    }
}

impl FromStr for TransactionKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "earn" => Ok(Self::Earn),
            "spend" => Ok(Self::Spend),
            "escrow_hold" => Ok(Self::EscrowHold),
            "escrow_release" => Ok(Self::EscrowRelease),
            "faucet" => Ok(Self::Faucet),
            "signup_bonus" => Ok(Self::SignupBonus),
            other => Err(ParseEnumError::new("transaction kind", other)),
        }
    }
}

/// Escrow held against a thread.
///
/// `AwaitingReply` exists from the first message until the other
/// participant's first reply; afterwards the thread stays in `NoEscrow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EscrowState {
    NoEscrow,
    AwaitingReply { sender_id: Uuid, amount: i64 },
}

impl EscrowState {
    pub fn amount(&self) -> i64 {
        match self {
            Self::NoEscrow => 0,
            Self::AwaitingReply { amount, .. } => *amount,
        }
    }

    pub fn sender_id(&self) -> Option<Uuid> {
        match self {
            Self::NoEscrow => None,
            Self::AwaitingReply { sender_id, .. } => Some(*sender_id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: Uuid,
    pub participants: [Uuid; 2],
    pub initial_fee_paid: bool,
    pub escrow: EscrowState,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Thread {
    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.participants.contains(&user_id)
    }

    /// The participant that is not `user_id`.
    pub fn peer_of(&self, user_id: Uuid) -> Option<Uuid> {
        match self.participants {
            [a, b] if a == user_id => Some(b),
            [a, b] if b == user_id => Some(a),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balances {
    pub love: i64,
    pub love2: i64,
}

impl Balances {
    pub fn get(&self, token_type: TokenType) -> i64 {
        match token_type {
            TokenType::Love => self.love,
            TokenType::Love2 => self.love2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: TransactionKind,
    pub token_type: TokenType,
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeAllowance {
    pub allowed: bool,
    pub used: u32,
    /// `None` for unlimited tiers.
    pub limit: Option<u32>,
    pub date: NaiveDate,
}

/// What a message send did to the thread's escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscrowTransition {
    /// No escrow activity; the message was free.
    None,
    /// First message: the fee was debited from the sender and is now held.
    Opened { sender_id: Uuid, amount: i64 },
    /// First reply: the held fee was credited to the replier.
    Released { recipient_id: Uuid, amount: i64 },
}

/// A user's LOVE balance after a mutation, reported alongside the mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub user_id: Uuid,
    pub token_type: TokenType,
    pub balance: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_limits() {
        assert_eq!(MembershipTier::Standard.daily_like_limit(), Some(10));
        assert_eq!(MembershipTier::Plus.daily_like_limit(), Some(50));
        assert_eq!(MembershipTier::Premium.daily_like_limit(), None);
        assert_eq!(MembershipTier::default(), MembershipTier::Standard);
    }

    #[test]
    fn stored_names_parse_back() {
        for kind in [
            TransactionKind::Earn,
            TransactionKind::Spend,
            TransactionKind::EscrowHold,
            TransactionKind::EscrowRelease,
            TransactionKind::Faucet,
            TransactionKind::SignupBonus,
        ] {
            assert_eq!(kind.as_str().parse::<TransactionKind>().unwrap(), kind);
        }
        assert_eq!("LOVE2".parse::<TokenType>().unwrap(), TokenType::Love2);
        assert!("love".parse::<TokenType>().is_err());
        assert!("gold".parse::<MembershipTier>().is_err());
    }

    #[test]
    fn peer_of_thread() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let thread = Thread {
            id: Uuid::new_v4(),
            participants: [a, b],
            initial_fee_paid: false,
            escrow: EscrowState::NoEscrow,
            last_message_at: None,
            created_at: Utc::now(),
        };
        assert_eq!(thread.peer_of(a), Some(b));
        assert_eq!(thread.peer_of(b), Some(a));
        assert_eq!(thread.peer_of(Uuid::new_v4()), None);
    }
}
