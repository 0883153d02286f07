//! Proxy-layer error taxonomy (§4.9). Kept distinct from `CoreError`
//! since transport/wire failures are a different concern from the
//! domain's own invariants.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProxyError {
    #[error("unsupported api version")]
    UnsupportedApiVersion,

    #[error("unsupported endpoint type")]
    UnsupportedEndpointType,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("submit over rpc is not yet defined")]
    RpcSubmitNotImplemented,

    #[error("decode error: {0}")]
    Decode(String),
}
