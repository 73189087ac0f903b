use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{EscrowTransition, Message, TokenType};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// A new message was posted to a thread the recipient takes part in
    MessageCreate { message: Message },

    /// A message send changed the thread's escrow
    EscrowUpdate {
        thread_id: Uuid,
        transition: EscrowTransition,
    },

    /// The recipient's balance changed
    BalanceUpdate { token_type: TokenType, balance: i64 },

    /// A like completed a mutual match
    MatchCreate { user_id: Uuid, username: String },

    /// The other participant started typing
    TypingStart {
        thread_id: Uuid,
        user_id: Uuid,
        username: String,
    },

    /// A user came online or went offline
    PresenceUpdate {
        user_id: Uuid,
        username: String,
        online: bool,
    },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Indicate typing in a thread
    StartTyping { thread_id: Uuid },
}
