//! Endpoint authentication and type auto-detection (C6 step 1).
//!
//! The vendor exposes the same `SessionManager.Login` call for both vCenter
//! and a lone ESXi host; the only observable difference on a bare ESXi host
//! is that a vCenter-flavoured login attempt against it comes back with a
//! `NotAuthenticatedFault` whose `detail/NotAuthenticatedFault/object` names
//! the vCenter session manager moref. Once a [`Service`](vsphere_collector_core::model::Service)
//! has a resolved type it never changes, per the model's invariant.

use vsphere_collector_core::error::{CollectorError, Result};
use vsphere_collector_core::model::ServiceType;
use vsphere_collector_soap::envelope::{self, MethodCall};
use vsphere_collector_soap::transport::SoapTransport;
use vsphere_collector_soap::xml;

/// Moref literal the source compares `NotAuthenticatedFault/object` against
/// to distinguish "this is actually a vCenter, retry differently" from a
/// genuine credential failure.
const VCENTER_SESSION_MANAGER_OBJECT: &str = "ha-sessionmgr";

/// Outcome of one `Login` attempt, including the server's notion of what
/// kind of endpoint it is talking to.
pub struct AuthResult {
    pub service_type: ServiceType,
    pub full_name: Option<String>,
}

/// Authenticates against the endpoint, retrying once with type `vSphere`
/// if the first attempt is a vCenter-flavoured login against a bare ESXi
/// host. Returns the resolved type on success; the session id itself
/// travels via the transport's cookie jar, never touched directly here.
pub fn authenticate(
    transport: &SoapTransport,
    username: &str,
    password: &str,
    known_type: ServiceType,
) -> Result<AuthResult> {
    match known_type {
        ServiceType::Unknown => {
            match login(transport, username, password) {
                Ok(full_name) => Ok(AuthResult { service_type: ServiceType::VCenter, full_name }),
                Err(CollectorError::Fault { faultstring, endpoint, object }) => {
                    if is_vcenter_type_discovery_fault(object.as_deref()) {
                        let full_name = login(transport, username, password)?;
                        Ok(AuthResult { service_type: ServiceType::VSphere, full_name })
                    } else {
                        Err(CollectorError::auth(endpoint, faultstring))
                    }
                }
                Err(other) => Err(other),
            }
        }
        other => {
            let full_name = login(transport, username, password)?;
            Ok(AuthResult { service_type: other, full_name })
        }
    }
}

/// True when a `NotAuthenticatedFault`'s structured `detail/*/object`
/// names the vCenter session manager, the signal the source uses to
/// downgrade vCenter to vSphere and retry rather than treat the fault as
/// a hard auth failure. Reading the structured `object` rather than
/// grepping `faultstring` avoids misclassifying faults whose free-text
/// message happens to phrase things differently.
fn is_vcenter_type_discovery_fault(object: Option<&str>) -> bool {
    object == Some(VCENTER_SESSION_MANAGER_OBJECT)
}

fn login(transport: &SoapTransport, username: &str, password: &str) -> Result<Option<String>> {
    let body = MethodCall::new("Login")
        .moref("_this", "SessionManager", "ha-sessionmgr")
        .field("userName", username)
        .field("password", password)
        .finish("Login");
    let doc = transport.post(&envelope::wrap(&body))?;
    Ok(xml::read_doc_value(&doc, &["Body", "*", "returnval", "fullName"]))
}

/// Best-effort logout; failures are logged by the caller, never
/// propagated (`Logout` failing must not fail an otherwise-successful
/// cycle).
pub fn logout(transport: &SoapTransport) -> Result<()> {
    let body = MethodCall::new("Logout").moref("_this", "SessionManager", "ha-sessionmgr").finish("Logout");
    transport.post(&envelope::wrap(&body))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vcenter_discovery_fault_matches_on_session_manager_object() {
        assert!(is_vcenter_type_discovery_fault(Some("ha-sessionmgr")));
        assert!(!is_vcenter_type_discovery_fault(Some("ha-host")));
        assert!(!is_vcenter_type_discovery_fault(None));
    }

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    fn transport(url: String) -> SoapTransport {
        SoapTransport::new(vsphere_collector_soap::transport::TransportConfig {
            endpoint_url: url,
            timeout: std::time::Duration::from_secs(5),
            source_ip: None,
            tls_verify: false,
        })
        .unwrap()
    }

    /// First `Login` call returns the vCenter-flavoured `NotAuthenticatedFault`;
    /// every later call succeeds. Drives §8 scenario 1 end to end through
    /// `authenticate`, not just the pure `is_vcenter_type_discovery_fault` helper.
    struct DowngradeThenSucceed {
        calls: std::sync::Mutex<u32>,
    }

    impl Respond for DowngradeThenSucceed {
        fn respond(&self, _: &Request) -> ResponseTemplate {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                let fault = r#"<Envelope><Body><Fault>
                    <faultstring>ServerFaultCode: NotAuthenticated (ha-sessionmgr)</faultstring>
                    <detail><NotAuthenticatedFault><object type="SessionManager">ha-sessionmgr</object></NotAuthenticatedFault></detail>
                </Fault></Body></Envelope>"#;
                ResponseTemplate::new(200).set_body_string(fault)
            } else {
                let ok = r#"<Envelope><Body><LoginResponse><returnval><fullName>root</fullName></returnval></LoginResponse></Body></Envelope>"#;
                ResponseTemplate::new(200).set_body_string(ok)
            }
        }
    }

    #[tokio::test]
    async fn authenticate_downgrades_to_vsphere_on_vcenter_discovery_fault() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sdk"))
            .respond_with(DowngradeThenSucceed { calls: std::sync::Mutex::new(0) })
            .mount(&server)
            .await;

        let url = format!("{}/sdk", server.uri());
        let result = tokio::task::spawn_blocking(move || {
            let transport = transport(url);
            authenticate(&transport, "root", "secret", ServiceType::Unknown)
        })
        .await
        .unwrap();

        let auth = result.unwrap();
        assert_eq!(auth.service_type, ServiceType::VSphere);
        assert_eq!(auth.full_name.as_deref(), Some("root"));
    }
}
