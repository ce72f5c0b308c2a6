//! Error taxonomy shared by every crate in the collector workspace.
//!
//! The variants mirror the error kinds named in the collector design:
//! transport failures, SOAP faults, XML parse failures, authentication
//! failures, batch-sizing failures, and fatal internal conditions. Config
//! and serialization variants round the enum out for the ambient layers
//! (configuration loading, logging) that every crate in this workspace
//! also needs.

use thiserror::Error;

/// Result alias used throughout the collector workspace.
pub type Result<T> = std::result::Result<T, CollectorError>;

/// Primary error type for the vSphere collector.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// TCP/TLS/HTTP failure reaching the endpoint.
    #[error("transport error contacting {endpoint}: {message}")]
    Transport {
        endpoint: String,
        message: String,
    },

    /// SOAP fault returned by the endpoint (`faultstring` verbatim), plus
    /// the `detail/*/object` moref when the fault's structured detail
    /// names one (e.g. which session manager rejected a login).
    #[error("SOAP fault from {endpoint}: {faultstring}")]
    Fault {
        endpoint: String,
        faultstring: String,
        object: Option<String>,
    },

    /// Malformed XML or a required element missing at a known XPath.
    #[error("failed to parse response at {xpath}: {message}")]
    Parse {
        xpath: String,
        message: String,
    },

    /// Login failure that is not a type-discovery fault.
    #[error("authentication failed for {endpoint}: {message}")]
    Auth {
        endpoint: String,
        message: String,
    },

    /// A batch sizing computation produced zero or a negative count.
    #[error("batch sizing produced an empty batch for {context}")]
    Budget { context: String },

    /// Arena allocation failed after a resize attempt. Fatal: the caller
    /// should treat this as unrecoverable for the process.
    #[error("arena allocation exhausted: {message}")]
    Internal { message: String },

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization failure at a crate boundary.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CollectorError {
    pub fn transport(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport { endpoint: endpoint.into(), message: message.into() }
    }

    pub fn fault(endpoint: impl Into<String>, faultstring: impl Into<String>) -> Self {
        Self::Fault { endpoint: endpoint.into(), faultstring: faultstring.into(), object: None }
    }

    /// Same as [`Self::fault`], but carrying the fault's structured
    /// `detail/*/object` moref when the transport parsed one out.
    pub fn fault_with_object(endpoint: impl Into<String>, faultstring: impl Into<String>, object: Option<String>) -> Self {
        Self::Fault { endpoint: endpoint.into(), faultstring: faultstring.into(), object }
    }

    pub fn parse(xpath: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse { xpath: xpath.into(), message: message.into() }
    }

    pub fn auth(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Auth { endpoint: endpoint.into(), message: message.into() }
    }

    pub fn budget(context: impl Into<String>) -> Self {
        Self::Budget { context: context.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// True for errors that, per the propagation policy, should still
    /// allow a partially-built inventory snapshot to be promoted.
    pub fn allows_partial_promotion(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Fault { .. } | Self::Parse { .. })
    }

    /// True for errors that must abort the whole cycle without promoting
    /// any snapshot.
    pub fn aborts_cycle(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

impl From<reqwest::Error> for CollectorError {
    fn from(err: reqwest::Error) -> Self {
        CollectorError::Transport {
            endpoint: err.url().map(|u| u.to_string()).unwrap_or_default(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CollectorError {
    fn from(err: serde_json::Error) -> Self {
        CollectorError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_fault_allow_partial_promotion() {
        assert!(CollectorError::transport("https://vc", "timed out").allows_partial_promotion());
        assert!(CollectorError::fault("https://vc", "bad request").allows_partial_promotion());
        assert!(CollectorError::parse("/Envelope/Body", "missing node").allows_partial_promotion());
    }

    #[test]
    fn auth_aborts_cycle_and_nothing_else_does() {
        assert!(CollectorError::auth("https://vc", "invalid login").aborts_cycle());
        assert!(!CollectorError::transport("https://vc", "timed out").aborts_cycle());
        assert!(!CollectorError::internal("arena full").aborts_cycle());
    }

    #[test]
    fn display_messages_include_context() {
        let e = CollectorError::fault("https://vc/sdk", "NotAuthenticated");
        assert!(e.to_string().contains("NotAuthenticated"));
    }
}
