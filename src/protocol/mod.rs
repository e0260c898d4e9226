//! Client-assisted evaluation of nonlinear functions.
//!
//! The server evaluates the graph homomorphically and ships ReLU-family
//! batches to the client, which holds the secret key. Message flow:
//!
//! ```text
//! server                                  client
//!   | --------- Parameters --------------> |  Ready -> builds context, keys
//!   | <-------- EvaluationKeys ----------- |
//!   | <-------- Execute ------------------ |  -> AwaitingRequest
//!   | --------- (Bounded)ReluRequest ----> |  -> Processing
//!   | <-------- ReluResponse ------------- |  -> AwaitingRequest
//!   | --------- Result ------------------> |  -> Done
//! ```

mod client;
mod message;
mod server;
mod transport;

pub use client::Session;
pub use message::{
    MAX_RANK, Message, MessageKind, read_ciphertexts, read_shape, write_ciphertexts, write_shape,
};
pub use server::ServerSession;
pub use transport::{MAX_FRAME_BYTES, TcpTransport, Transport};

use crate::crypto::CkksError;
use crate::exec::ExecError;
use crate::kernel::KernelError;
use crate::wire::WireError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Ready,
    AwaitingRequest,
    Processing,
    Done,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
            SessionState::AwaitingRequest => "awaiting-request",
            SessionState::Processing => "processing",
            SessionState::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No message within {0:?}")]
    Timeout(Duration),

    #[error("Connection closed")]
    Closed,

    #[error("Frame of {len} bytes exceeds limit {max}")]
    FrameTooLarge { len: u64, max: u64 },

    #[error("Unknown message kind {0}")]
    UnknownMessageKind(u8),

    #[error("Unexpected {kind} message while {state}")]
    UnexpectedMessage {
        state: SessionState,
        kind: MessageKind,
    },

    #[error("Malformed payload: {0}")]
    Payload(String),

    #[error("Response element {index} came back at level {level}, scale {scale}")]
    ResponseMismatch { index: usize, level: usize, scale: f64 },

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    Ckks(#[from] CkksError),

    #[error(transparent)]
    Exec(Box<ExecError>),
}

impl From<ExecError> for SessionError {
    fn from(error: ExecError) -> Self {
        match error {
            ExecError::Session(inner) => inner,
            other => SessionError::Exec(Box::new(other)),
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
