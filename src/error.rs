//! Crate-level error taxonomy.
//!
//! Each transport surface has its own error type; [`Error`] joins them and
//! adds the startup failure raised by [`crate::client::Client::login`].

use thiserror::Error;

use crate::gateway::GatewayError;
use crate::http::HttpError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Http(#[from] HttpError),

    /// HTTP start or gateway connect failed during login.
    #[error("login failed: {0}")]
    LoginFailure(#[source] Box<Error>),
}

impl Error {
    pub(crate) fn login(source: impl Into<Error>) -> Self {
        Self::LoginFailure(Box::new(source.into()))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::Error;
    use crate::gateway::GatewayError;
    use crate::http::HttpError;

    #[test]
    fn login_failure_keeps_source() {
        let err = Error::login(HttpError::NotStarted);
        assert!(err.to_string().starts_with("login failed"));
        let source = err.source().expect("source");
        assert!(source.to_string().contains("not started"));
    }

    #[test]
    fn transport_errors_convert() {
        let err: Error = GatewayError::AlreadyConnected.into();
        assert!(matches!(err, Error::Gateway(GatewayError::AlreadyConnected)));
    }
}
