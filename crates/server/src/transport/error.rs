use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport is already started")]
    AlreadyStarted,

    #[error("can't resolve bind address {addr}: {source}")]
    Resolve { addr: String, source: io::Error },

    #[error("can't bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("can't spawn {name} thread: {source}")]
    Spawn { name: String, source: io::Error },

    #[error("can't build async runtime: {source}")]
    Runtime { source: io::Error },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("tls error: {source}")]
    Tls {
        #[from]
        source: TlsError,
    },
}

#[derive(Error, Debug)]
pub enum TlsError {
    #[error("can't read {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("invalid pem data: {source}")]
    Pem { source: io::Error },

    #[error("no certificate found in pem data")]
    NoCertificate,

    #[error("no private key found in pem data")]
    NoPrivateKey,
}
