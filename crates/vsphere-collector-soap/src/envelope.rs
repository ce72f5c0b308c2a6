//! Typed SOAP envelope builder for the `vim25` namespace.
//!
//! The source embeds envelope header/footer and request bodies as
//! literal strings with positional `%s` substitution. This is the
//! re-architecture named in the design notes: a builder that always
//! XML-escapes interpolated values at the boundary, so a malicious or
//! merely unlucky hostname/credential can never break out of its
//! element.

use std::fmt::Write as _;

const HEADER: &str = concat!(
    "<?xml version=\"1.0\" encoding=\"UTF-8\"?>",
    "<SOAP-ENV:Envelope",
    " xmlns:ns0=\"urn:vim25\"",
    " xmlns:ns1=\"http://schemas.xmlsoap.org/soap/envelope/\"",
    " xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\"",
    " xmlns:SOAP-ENV=\"http://schemas.xmlsoap.org/soap/envelope/\">",
    "<SOAP-ENV:Header/>",
    "<ns1:Body>",
);
const FOOTER: &str = "</ns1:Body></SOAP-ENV:Envelope>";

/// SOAPAction header value required by every `vim25` request.
pub const SOAP_ACTION: &str = "urn:vim25/4.1";

/// Wraps `body` (already-built vim25 XML) in the standard envelope.
pub fn wrap(body: &str) -> String {
    let mut out = String::with_capacity(HEADER.len() + body.len() + FOOTER.len());
    out.push_str(HEADER);
    out.push_str(body);
    out.push_str(FOOTER);
    out
}

/// Escapes the five XML-significant characters. Every interned string
/// that reaches a request body (URLs, credentials, managed-object ids)
/// must pass through this before interpolation.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Small builder for a single vim25 method call, e.g.
/// `<ns0:Login><ns0:_this type="SessionManager">...</ns0:_this>...</ns0:Login>`.
pub struct MethodCall {
    buf: String,
}

impl MethodCall {
    pub fn new(method: &str) -> Self {
        let mut buf = String::new();
        let _ = write!(buf, "<ns0:{method}>");
        MethodCall { buf }
    }

    /// Appends `<ns0:{field} type="{moref_type}">{escaped id}</ns0:{field}>`,
    /// the managed-object-reference shape used for `_this`, `entity`, etc.
    pub fn moref(mut self, field: &str, moref_type: &str, id: &str) -> Self {
        let _ = write!(self.buf, "<ns0:{field} type=\"{}\">{}</ns0:{field}>", escape(moref_type), escape(id));
        self
    }

    /// Appends `<ns0:{field}>{escaped value}</ns0:{field}>`.
    pub fn field(mut self, field: &str, value: &str) -> Self {
        let _ = write!(self.buf, "<ns0:{field}>{}</ns0:{field}>", escape(value));
        self
    }

    /// Appends raw, already-escaped/well-formed XML verbatim (used for
    /// nested structures built by callers, e.g. a `PropertyFilterSpec`).
    pub fn raw(mut self, xml: &str) -> Self {
        self.buf.push_str(xml);
        self
    }

    pub fn finish(mut self, method: &str) -> String {
        let _ = write!(self.buf, "</ns0:{method}>");
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_handles_every_significant_character() {
        assert_eq!(escape("<a & b>\"'"), "&lt;a &amp; b&gt;&quot;&apos;");
    }

    #[test]
    fn wrap_produces_well_formed_soap_envelope() {
        let body = MethodCall::new("Logout").moref("_this", "SessionManager", "ha-sessionmgr").finish("Logout");
        let env = wrap(&body);
        assert!(env.starts_with("<?xml"));
        assert!(env.contains("<ns0:Logout>"));
        assert!(env.ends_with("</SOAP-ENV:Envelope>"));
    }

    #[test]
    fn method_call_escapes_field_values() {
        let body = MethodCall::new("Login").field("userName", "a&b<c>").finish("Login");
        assert!(body.contains("a&amp;b&lt;c&gt;"));
    }
}
