//! # vSphere Collector SOAP
//!
//! SOAP/HTTPS wire-level plumbing for the vCenter/ESXi telemetry
//! collector:
//!
//! - [`envelope`] — typed `vim25` envelope/method-call builder that
//!   XML-escapes every interpolated value (C2's request side)
//! - [`transport`] — blocking HTTPS client that posts an envelope and
//!   surfaces `faultstring` errors (C2)
//! - [`xml`] — read-only accessors over a parsed response document (C3)
//! - [`property_iter`] — `RetrievePropertiesEx`/`ContinueRetrievePropertiesEx`
//!   pagination (C4)
//!
//! ## Features
//!
//! - `monitoring` — enables the [`metrics`] module's Prometheus types

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod envelope;
#[cfg(feature = "monitoring")]
pub mod metrics;
pub mod property_iter;
pub mod transport;
pub mod xml;

pub use envelope::{escape, wrap, MethodCall, SOAP_ACTION};
pub use property_iter::PropertyCollectionIterator;
pub use transport::{SoapTransport, TransportConfig};
pub use xml::{read_doc_value, read_node_value, read_values, try_read_value, Document, Element, FaultInfo};

/// Current version of the SOAP transport crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
