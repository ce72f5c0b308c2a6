//! Read-only view over a parsed SOAP response document (C3).
//!
//! The vendor's namespace prefixes vary across endpoint versions
//! (`SOAP-ENV`, `soapenv`, bare), so this module strips prefixes and
//! matches on local name only, mirroring the source's pervasive use of
//! `local-name()` in its XPath constants. Path segments are plain local
//! names; `"*"` matches any element, standing in for the source's
//! wildcard steps (`/*/*/*`) used to skip past the varying
//! `Envelope`/`Body`/`FooResponse` wrapper levels.
//!
//! XML parsing is deliberately permissive: malformed trailing content is
//! silenced rather than surfaced as an error, matching the source's
//! global libxml2 error handler. Every suppressed parse error is still
//! emitted as a `trace!` line carrying the byte offset, so the behavior
//! is kept but made observable.

use quick_xml::events::Event;
use quick_xml::Reader;

use vsphere_collector_core::error::{CollectorError, Result};

/// One element of a parsed [`Document`]. Attributes and text are kept
/// minimal: only what the property-collection and event parsers need.
#[derive(Debug, Clone, Default)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Direct children matching `name` ("*" matches any).
    pub fn children_named<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| name == "*" || c.name == name)
    }
}

/// A parsed XML document. Namespace prefixes have already been stripped
/// from every element's `name`.
#[derive(Debug, Clone)]
pub struct Document {
    pub root: Element,
}

fn local_name(qname: &[u8]) -> String {
    let s = String::from_utf8_lossy(qname);
    match s.find(':') {
        Some(idx) => s[idx + 1..].to_string(),
        None => s.to_string(),
    }
}

/// Parses `bytes` into a [`Document`]. Never fails on malformed trailing
/// content: parsing stops at the first error and the tree built so far
/// is returned, with a `trace!` line noting the offending byte offset.
/// Fails only if not even a root element could be read.
pub fn parse(bytes: &[u8]) -> Result<Document> {
    let mut reader = Reader::from_reader(bytes);
    reader.trim_text(true);

    let mut buf = Vec::new();
    // Stack of (element-so-far) while descending; top is the innermost
    // currently-open element.
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let mut el = Element { name: local_name(e.name().as_ref()), ..Default::default() };
                for attr in e.attributes().flatten() {
                    let key = local_name(attr.key.as_ref());
                    let value = attr.unescape_value().unwrap_or_default().into_owned();
                    el.attrs.push((key, value));
                }
                stack.push(el);
            }
            Ok(Event::Empty(ref e)) => {
                let mut el = Element { name: local_name(e.name().as_ref()), ..Default::default() };
                for attr in e.attributes().flatten() {
                    let key = local_name(attr.key.as_ref());
                    let value = attr.unescape_value().unwrap_or_default().into_owned();
                    el.attrs.push((key, value));
                }
                push_completed(&mut stack, &mut root, el);
            }
            Ok(Event::Text(e)) => {
                if let Some(top) = stack.last_mut() {
                    let text = e.unescape().unwrap_or_default();
                    top.text.push_str(text.trim());
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::End(_)) => {
                if let Some(finished) = stack.pop() {
                    push_completed(&mut stack, &mut root, finished);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                log::trace!("suppressed XML parse error at byte offset {}: {e}", reader.buffer_position());
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    root.ok_or_else(|| CollectorError::parse("document root", "no root element could be parsed"))
        .map(|root| Document { root })
}

fn push_completed(stack: &mut Vec<Element>, root: &mut Option<Element>, el: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(el),
        None => *root = Some(el),
    }
}

/// Descends from `el`'s children along `path`, returning every matching
/// element. `"*"` matches any local name at that level.
pub fn descend<'a>(el: &'a Element, path: &[&str]) -> Vec<&'a Element> {
    if path.is_empty() {
        return vec![el];
    }
    let mut out = Vec::new();
    for child in el.children_named(path[0]) {
        out.extend(descend(child, &path[1..]));
    }
    out
}

/// Depth-first search for every element named `name` anywhere under
/// `el`, regardless of depth. Used for constructs whose exact nesting
/// varies by endpoint version (e.g. `Fault`, `PerfCounterInfo`).
pub fn find_recursive<'a>(el: &'a Element, name: &str) -> Vec<&'a Element> {
    let mut out = Vec::new();
    if el.name == name {
        out.push(el);
    }
    for child in &el.children {
        out.extend(find_recursive(child, name));
    }
    out
}

/// Single value at `path` from the document root, or `None` if absent.
pub fn read_doc_value(doc: &Document, path: &[&str]) -> Option<String> {
    descend(&doc.root, path).first().map(|e| e.text.clone())
}

/// Single value at `path` relative to `node`'s children.
pub fn read_node_value(node: &Element, path: &[&str]) -> Option<String> {
    descend(node, path).first().map(|e| e.text.clone())
}

/// Every value at `path` from the document root, in document order.
pub fn read_values(doc: &Document, path: &[&str]) -> Vec<String> {
    descend(&doc.root, path).into_iter().map(|e| e.text.clone()).collect()
}

/// Structured detail extracted from a `Fault` element: the human-readable
/// `faultstring` plus, when the fault's `detail` names one, the `object`
/// moref the vendor uses to say what the fault is actually about (e.g.
/// which session manager rejected a login).
#[derive(Debug, Clone)]
pub struct FaultInfo {
    pub faultstring: String,
    pub object: Option<String>,
}

/// Parses `bytes` and, in the same pass, looks for a `Fault` element
/// anywhere in the document (the wrapping depth varies by SOAP stack).
/// Returns the parsed document regardless, so callers can extract
/// whatever else they need even when a fault is present.
pub fn try_read_value(bytes: &[u8]) -> (Option<Document>, Option<FaultInfo>, Option<CollectorError>) {
    match parse(bytes) {
        Ok(doc) => {
            let fault = find_recursive(&doc.root, "Fault").into_iter().next().map(|f| FaultInfo {
                faultstring: f.children_named("faultstring").next().map(|e| e.text.clone()).unwrap_or_default(),
                object: find_recursive(f, "object").into_iter().next().map(|e| e.text.clone()),
            });
            (Some(doc), fault, None)
        }
        Err(e) => (None, None, Some(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENVELOPE: &[u8] = br#"<?xml version="1.0"?>
        <SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/">
            <SOAP-ENV:Body>
                <ns0:RetrievePropertiesExResponse>
                    <returnval>
                        <token>abc123</token>
                        <objects>
                            <obj type="HostSystem">host-1</obj>
                        </objects>
                    </returnval>
                </ns0:RetrievePropertiesExResponse>
            </SOAP-ENV:Body>
        </SOAP-ENV:Envelope>"#;

    #[test]
    fn strips_namespace_prefixes() {
        let doc = parse(ENVELOPE).unwrap();
        assert_eq!(doc.root.name, "Envelope");
        assert_eq!(doc.root.children[0].name, "Body");
    }

    #[test]
    fn descend_matches_wildcards_across_response_wrapper() {
        let doc = parse(ENVELOPE).unwrap();
        let token = read_doc_value(&doc, &["Body", "*", "returnval", "token"]);
        assert_eq!(token.as_deref(), Some("abc123"));
    }

    #[test]
    fn read_values_collects_every_match() {
        let doc = parse(ENVELOPE).unwrap();
        let objs = read_values(&doc, &["Body", "*", "returnval", "objects", "obj"]);
        assert_eq!(objs, vec!["host-1"]);
    }

    #[test]
    fn try_read_value_extracts_faultstring() {
        let fault = br#"<Envelope><Body><Fault><faultcode>S</faultcode>
            <faultstring>NotAuthenticated</faultstring></Fault></Body></Envelope>"#;
        let (doc, err, parse_err) = try_read_value(fault);
        assert!(doc.is_some());
        assert!(parse_err.is_none());
        let info = err.unwrap();
        assert_eq!(info.faultstring, "NotAuthenticated");
        assert!(info.object.is_none());
    }

    #[test]
    fn try_read_value_extracts_fault_detail_object() {
        let fault = br#"<Envelope><Body><Fault>
            <faultstring>ServerFaultCode: NotAuthenticated (ha-sessionmgr)</faultstring>
            <detail><NotAuthenticatedFault><object type="SessionManager">ha-sessionmgr</object></NotAuthenticatedFault></detail>
        </Fault></Body></Envelope>"#;
        let (_, err, _) = try_read_value(fault);
        assert_eq!(err.unwrap().object.as_deref(), Some("ha-sessionmgr"));
    }

    #[test]
    fn try_read_value_returns_none_fault_on_success_response() {
        let (doc, err, parse_err) = try_read_value(ENVELOPE);
        assert!(doc.is_some());
        assert!(parse_err.is_none());
        assert!(err.is_none());
    }

    #[test]
    fn malformed_trailing_xml_is_silenced_not_errored() {
        let truncated = br#"<Envelope><Body><value>ok</value>"#;
        let doc = parse(truncated).unwrap();
        assert_eq!(doc.root.name, "Envelope");
    }

    #[test]
    fn attr_reads_type_attribute_on_moref() {
        let doc = parse(ENVELOPE).unwrap();
        let obj = descend(&doc.root, &["Body", "*", "returnval", "objects", "obj"]);
        assert_eq!(obj[0].attr("type"), Some("HostSystem"));
    }
}
