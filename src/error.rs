/*!
error module defines the error types used in bgpwatch.
*/
use crate::msg::{DataMsgType, MsgType, TableType};
use crate::models::PeerState;
use num_enum::{IntoPrimitive, TryFromPrimitive, TryFromPrimitiveError};
use std::fmt::{Display, Formatter};
use std::{error::Error, fmt, io};

/// Errors surfaced by the watcher core.
///
/// Every failure inside one event cycle bubbles to the cycle entry point as
/// one of these variants; transport errors are recoverable on the client side
/// (via reconnect) and terminal on the server side.
#[derive(Debug)]
pub enum WatcherError {
    /// Connect/send/recv failure on the underlying socket.
    Transport(io::Error),
    /// Malformed or out-of-order frames on the wire.
    Protocol(String),
    /// A well-formed message that makes no sense in the current state,
    /// e.g. a table-time mismatch or an unknown peer.
    Semantic(String),
    /// Externally signaled shutdown.
    Interrupt,
    /// Producer request retries exhausted.
    Timeout,
}

impl Error for WatcherError {}

impl Display for WatcherError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            WatcherError::Transport(e) => write!(f, "transport error: {e}"),
            WatcherError::Protocol(s) => write!(f, "protocol error: {s}"),
            WatcherError::Semantic(s) => write!(f, "error: {s}"),
            WatcherError::Interrupt => write!(f, "interrupted"),
            WatcherError::Timeout => write!(f, "request timed out"),
        }
    }
}

impl From<io::Error> for WatcherError {
    fn from(io_error: io::Error) -> Self {
        WatcherError::Transport(io_error)
    }
}

impl From<TryFromPrimitiveError<MsgType>> for WatcherError {
    fn from(value: TryFromPrimitiveError<MsgType>) -> Self {
        WatcherError::Protocol(format!("invalid message type: {}", value.number))
    }
}

impl From<TryFromPrimitiveError<DataMsgType>> for WatcherError {
    fn from(value: TryFromPrimitiveError<DataMsgType>) -> Self {
        WatcherError::Protocol(format!("invalid data message type: {}", value.number))
    }
}

impl From<TryFromPrimitiveError<TableType>> for WatcherError {
    fn from(value: TryFromPrimitiveError<TableType>) -> Self {
        WatcherError::Protocol(format!("invalid table type: {}", value.number))
    }
}

impl From<TryFromPrimitiveError<PeerState>> for WatcherError {
    fn from(value: TryFromPrimitiveError<PeerState>) -> Self {
        WatcherError::Protocol(format!("invalid peer state: {}", value.number))
    }
}

/// Return codes carried in reply envelopes.
///
/// The codes are negative on the API side; replies carry the absolute value
/// as an unsigned byte.
#[derive(Debug, TryFromPrimitive, IntoPrimitive, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum RetCode {
    None = 0,
    InitFailed = 1,
    StartFailed = 2,
    Interrupt = 3,
    Unhandled = 4,
    Protocol = 5,
    Malloc = 6,
}

impl RetCode {
    pub const fn is_ok(&self) -> bool {
        matches!(self, RetCode::None)
    }
}

impl WatcherError {
    /// The wire code a server reply carries for this error.
    pub fn ret_code(&self) -> RetCode {
        match self {
            WatcherError::Transport(_) => RetCode::StartFailed,
            WatcherError::Protocol(_) => RetCode::Protocol,
            WatcherError::Semantic(_) => RetCode::Unhandled,
            WatcherError::Interrupt => RetCode::Interrupt,
            WatcherError::Timeout => RetCode::Unhandled,
        }
    }
}

/// Translate a non-zero reply code back into an error on the client side.
pub(crate) fn reply_error(rc: u8) -> WatcherError {
    match RetCode::try_from(rc) {
        Ok(RetCode::Protocol) => WatcherError::Protocol("request rejected by server".to_string()),
        Ok(RetCode::Interrupt) => WatcherError::Interrupt,
        Ok(code) => WatcherError::Semantic(format!("server replied with code {code:?}")),
        Err(_) => WatcherError::Protocol(format!("unknown reply code {rc}")),
    }
}
