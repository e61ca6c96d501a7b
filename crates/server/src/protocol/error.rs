use http::StatusCode;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid http uri")]
    InvalidUri,

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("body size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeBody { current_size: u64, max_size: u64 },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn too_large_body(current_size: u64, max_size: u64) -> Self {
        Self::TooLargeBody { current_size, max_size }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    /// The status this error asks the connection to be closed with.
    ///
    /// `None` means the parser could not classify the failure, the caller
    /// falls back to `400 Bad Request`.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::TooLargeHeader { .. } | Self::TooManyHeaders { .. } => Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE),
            Self::TooLargeBody { .. } => Some(StatusCode::PAYLOAD_TOO_LARGE),
            Self::InvalidVersion(_) => Some(StatusCode::HTTP_VERSION_NOT_SUPPORTED),
            Self::InvalidHeader { .. }
            | Self::InvalidMethod
            | Self::InvalidUri
            | Self::InvalidContentLength { .. }
            | Self::InvalidBody { .. } => Some(StatusCode::BAD_REQUEST),
            Self::Io { .. } => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("response already committed")]
    AlreadyCommitted,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classified_errors_carry_status() {
        assert_eq!(ParseError::too_large_header(9000, 8192).status(), Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE));
        assert_eq!(ParseError::too_large_body(10, 5).status(), Some(StatusCode::PAYLOAD_TOO_LARGE));
        assert_eq!(ParseError::InvalidVersion(Some(2)).status(), Some(StatusCode::HTTP_VERSION_NOT_SUPPORTED));
        assert_eq!(ParseError::invalid_header("bad").status(), Some(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn io_errors_are_unclassified() {
        let error = ParseError::io(io::Error::from(io::ErrorKind::ConnectionReset));
        assert_eq!(error.status(), None);
    }
}
