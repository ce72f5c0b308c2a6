//! Blocking HTTPS SOAP transport (C2).
//!
//! One [`SoapTransport`] is built per update cycle for a given Service,
//! matching the source's one-`CURL *`-handle-per-cycle lifetime. The
//! underlying `reqwest::blocking::Client` is configured with an
//! in-process cookie jar (`cookie_store(true)`) so the vendor's
//! session-id cookie survives across the several requests one cycle
//! issues, exactly like the source's `CURLOPT_COOKIEFILE`/`COOKIEJAR`
//! pointed at the same in-memory jar.
//!
//! TLS verification defaults to disabled, matching the source's
//! `CURLOPT_SSL_VERIFYPEER=0`/`CURLOPT_SSL_VERIFYHOST=0` default for
//! talking to self-signed vCenter/ESXi certificates, but is a per-endpoint
//! deployment option (`TransportConfig::tls_verify`) rather than hardwired.

use std::net::IpAddr;
use std::time::Duration;

use vsphere_collector_core::error::{CollectorError, Result};

use crate::envelope::SOAP_ACTION;
use crate::xml::{self, Document};

/// Configuration needed to build one [`SoapTransport`] for a cycle.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub endpoint_url: String,
    pub timeout: Duration,
    pub source_ip: Option<IpAddr>,
    /// When `false` (the default deployment stance), certificate and
    /// hostname verification are disabled for self-signed vCenter/ESXi
    /// certificates; when `true`, both are enforced normally.
    pub tls_verify: bool,
}

/// A synchronous SOAP/HTTPS client bound to one endpoint for the
/// duration of a single update cycle.
pub struct SoapTransport {
    client: reqwest::blocking::Client,
    endpoint_url: String,
}

impl SoapTransport {
    pub fn new(config: TransportConfig) -> Result<Self> {
        let mut builder = reqwest::blocking::Client::builder().cookie_store(true).timeout(config.timeout);
        if !config.tls_verify {
            builder = builder.danger_accept_invalid_certs(true).danger_accept_invalid_hostnames(true);
        }

        if let Some(addr) = config.source_ip {
            builder = builder.local_address(addr);
        }

        let client = builder
            .build()
            .map_err(|e| CollectorError::transport(&config.endpoint_url, format!("failed to build HTTP client: {e}")))?;

        Ok(SoapTransport { client, endpoint_url: config.endpoint_url })
    }

    /// Posts `envelope` (a complete, already-wrapped SOAP body) and
    /// returns the parsed response document. A SOAP fault present at
    /// `Fault/faultstring` produces an error even on HTTP 200, per the
    /// source's behavior of trusting the envelope over the transport
    /// status code.
    pub fn post(&self, envelope: &str) -> Result<Document> {
        let response = self
            .client
            .post(&self.endpoint_url)
            .header("Soapaction", SOAP_ACTION)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("Expect", "")
            .body(envelope.to_string())
            .send()
            .map_err(|e| CollectorError::transport(&self.endpoint_url, e.to_string()))?;

        let bytes = response.bytes().map_err(|e| CollectorError::transport(&self.endpoint_url, e.to_string()))?;

        let (doc, fault, parse_err) = xml::try_read_value(&bytes);

        if let Some(info) = fault {
            return Err(CollectorError::fault_with_object(&self.endpoint_url, info.faultstring, info.object));
        }
        if let Some(err) = parse_err {
            return Err(err);
        }
        doc.ok_or_else(|| CollectorError::parse("document root", "empty SOAP response body"))
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(url: String) -> SoapTransport {
        SoapTransport::new(TransportConfig {
            endpoint_url: url,
            timeout: Duration::from_secs(5),
            source_ip: None,
            tls_verify: false,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn posts_envelope_and_parses_success_response() {
        let server = MockServer::start().await;
        let body = r#"<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/">
            <SOAP-ENV:Body><ns0:LoginResponse><returnval><fullName>Admin</fullName></returnval></ns0:LoginResponse></SOAP-ENV:Body>
        </SOAP-ENV:Envelope>"#;
        Mock::given(method("POST"))
            .and(path("/sdk"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let url = format!("{}/sdk", server.uri());
        let result = tokio::task::spawn_blocking(move || transport(url).post("<ns0:Login/>")).await.unwrap();
        let doc = result.unwrap();
        let name = xml::read_doc_value(&doc, &["Body", "*", "returnval", "fullName"]);
        assert_eq!(name.as_deref(), Some("Admin"));
    }

    #[tokio::test]
    async fn faultstring_produces_fault_error_even_on_http_200() {
        let server = MockServer::start().await;
        let body = r#"<Envelope><Body><Fault><faultstring>NotAuthenticated</faultstring></Fault></Body></Envelope>"#;
        Mock::given(method("POST"))
            .and(path("/sdk"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let url = format!("{}/sdk", server.uri());
        let result = tokio::task::spawn_blocking(move || transport(url).post("<ns0:Login/>")).await.unwrap();
        match result {
            Err(CollectorError::Fault { faultstring, .. }) => assert_eq!(faultstring, "NotAuthenticated"),
            other => panic!("expected Fault error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn http_level_failure_surfaces_as_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sdk"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let url = format!("{}/sdk", server.uri());
        let result = tokio::task::spawn_blocking(move || transport(url).post("<ns0:Login/>")).await.unwrap();
        // A 500 with an empty body has no faultstring and no parseable
        // XML root; it resolves to a Parse error rather than Transport,
        // since reqwest itself does not treat non-2xx as a send failure.
        assert!(result.is_err());
    }
}
