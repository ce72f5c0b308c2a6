//! Paginated wrapper over the vendor's `RetrievePropertiesEx` /
//! `ContinueRetrievePropertiesEx` token protocol (C4).
//!
//! The iterator owns only the current continuation token, treated as an
//! opaque string per the design notes: once the token comes back absent
//! the sequence is exhausted and is not restartable.

use crate::envelope::{self, MethodCall};
use crate::transport::SoapTransport;
use crate::xml::{self, Document};
use vsphere_collector_core::error::Result;

const TOKEN_PATH_FIRST: &[&str] = &["Body", "*", "returnval", "token"];
const TOKEN_PATH_CONTINUE: &[&str] = &["Body", "*", "returnval", "token"];

/// Drives one `RetrievePropertiesEx`/`ContinueRetrievePropertiesEx`
/// pagination sequence against a `PropertyCollector` managed object.
pub struct PropertyCollectionIterator<'a> {
    transport: &'a SoapTransport,
    collector_id: String,
    token: Option<String>,
    exhausted: bool,
}

impl<'a> PropertyCollectionIterator<'a> {
    /// Sends `initial_request_xml` (a caller-built `RetrievePropertiesEx`
    /// envelope) and returns the iterator plus the first page's document.
    pub fn init(
        transport: &'a SoapTransport,
        collector_id: &str,
        initial_request_xml: &str,
    ) -> Result<(Self, Document)> {
        let doc = transport.post(initial_request_xml)?;
        let token = xml::read_doc_value(&doc, TOKEN_PATH_FIRST);
        let exhausted = token.is_none();
        Ok((
            PropertyCollectionIterator { transport, collector_id: collector_id.to_string(), token, exhausted },
            doc,
        ))
    }

    /// Fetches the next page, or `None` once the sequence is exhausted.
    /// Calling `next` again after exhaustion is a no-op that also
    /// returns `None`; the iterator does not resurrect a finished
    /// sequence.
    pub fn next(&mut self) -> Result<Option<Document>> {
        if self.exhausted {
            return Ok(None);
        }
        let token = match &self.token {
            Some(t) => t.clone(),
            None => {
                self.exhausted = true;
                return Ok(None);
            }
        };

        let body = MethodCall::new("ContinueRetrievePropertiesEx")
            .moref("_this", "PropertyCollector", &self.collector_id)
            .field("token", &token)
            .finish("ContinueRetrievePropertiesEx");
        let request = envelope::wrap(&body);

        let doc = self.transport.post(&request)?;
        let next_token = xml::read_doc_value(&doc, TOKEN_PATH_CONTINUE);
        self.exhausted = next_token.is_none();
        self.token = next_token;
        Ok(Some(doc))
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn page(token: Option<&str>, marker: &str) -> String {
        let token_xml = token.map(|t| format!("<token>{t}</token>")).unwrap_or_default();
        format!(
            "<Envelope><Body><FooResponse><returnval>{token_xml}<marker>{marker}</marker></returnval></FooResponse></Body></Envelope>"
        )
    }

    #[tokio::test]
    async fn iterates_until_token_absent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page(Some("tok-1"), "p1")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page(None, "p2")))
            .mount(&server)
            .await;

        let url = format!("{}/sdk", server.uri());
        let result: Result<Vec<String>> = tokio::task::spawn_blocking(move || {
            let transport = SoapTransport::new(crate::transport::TransportConfig {
                endpoint_url: url,
                timeout: Duration::from_secs(5),
                source_ip: None,
                tls_verify: false,
            })?;
            let (mut iter, first) = PropertyCollectionIterator::init(&transport, "propCollector", "<ns0:RetrievePropertiesEx/>")?;
            let mut markers = vec![xml::read_doc_value(&first, &["Body", "*", "returnval", "marker"]).unwrap()];
            while let Some(doc) = iter.next()? {
                markers.push(xml::read_doc_value(&doc, &["Body", "*", "returnval", "marker"]).unwrap());
            }
            assert!(iter.is_exhausted());
            Ok(markers)
        })
        .await
        .unwrap();

        assert_eq!(result.unwrap(), vec!["p1", "p2"]);
    }
}
