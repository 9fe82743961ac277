// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

/// Errors the admission core can return to the embedding caller.  Per-packet
/// rejections (malformed headers, bad tokens, ...) are *not* represented
/// here: they never leave the admission core as an `Error`, only as a
/// dropped datagram or a protocol-level wire response. See `DropReason`
/// in `packet` for those.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    /// `listen`/`listen_early` was called without a TLS configuration.
    #[error("no TLS configuration supplied")]
    MissingTlsConfig,
    /// A version in `ServerConfig::versions` is not one this build supports.
    #[error("unsupported QUIC version requested in server configuration")]
    UnsupportedVersion,
    /// The listener's socket failed, or `close()` was called. Latched: every
    /// subsequent and pending `accept()` returns this same error.
    #[error("listener closed: {0}")]
    Closed(String),
    /// The caller's cancellation signal fired while awaiting `accept()`.
    #[error("accept cancelled")]
    Cancelled,
}

pub type Res<T> = Result<T, Error>;
