//! Error taxonomy shared by every layer

use std::fmt;

use thiserror::Error;

use crate::auth::AuthError;
use crate::connection::ConnectionError;
use crate::rendezvous::RendezvousError;
use crate::state::StateError;

/// Broad class of a failure, independent of the layer that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An action not allowed for the current role or phase
    Protocol,
    /// Nothing to send on, or the underlying transport failed
    Transport,
    /// Bad signature or rejected state transition
    Validation,
    /// A capacity or uniqueness limit was hit
    Resource,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Protocol => "protocol",
            ErrorKind::Transport => "transport",
            ErrorKind::Validation => "validation",
            ErrorKind::Resource => "resource",
        })
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Rendezvous(#[from] RendezvousError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Rendezvous(e) => e.kind(),
            Error::Connection(e) => e.kind(),
            Error::Auth(e) => e.kind(),
            Error::State(e) => e.kind(),
            Error::Io(_) => ErrorKind::Transport,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_pass_through_the_wrapper() {
        let err: Error = AuthError::CounterpartAlreadyRegistered.into();
        assert_eq!(err.kind(), ErrorKind::Resource);

        let err: Error = StateError::InvalidTransition.into();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err: Error = ConnectionError::ChannelNotOpen.into();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.to_string(), "data channel is not open");

        let err: Error = std::io::Error::from(std::io::ErrorKind::AddrInUse).into();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }
}
