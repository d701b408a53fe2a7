//! Gateway error taxonomy

use net::NetError;
use thiserror::Error;

/// Order-gateway failures
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No usable credentials; the gateway refuses to start
    #[error("credentials unavailable: {0}")]
    Credentials(String),

    /// Transport failure talking to the exchange
    #[error(transparent)]
    Net(#[from] NetError),

    /// The exchange answered without a field the gateway depends on
    #[error("exchange response missing `{0}`")]
    MalformedResponse(&'static str),

    /// A request referenced an instrument the registry does not know
    #[error("no symbol configured for {0}")]
    UnknownTicker(common::TickerId),

    /// Pre-submission validation rejected the order
    #[error("order validation failed: {0}")]
    Validation(String),
}
