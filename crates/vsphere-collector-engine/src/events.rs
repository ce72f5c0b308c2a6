//! Event-log tail reader (C7).
//!
//! Runs at the end of a successful inventory cycle. Creates a
//! vendor-side `EventHistoryCollector`, pages backwards from the newest
//! event in doubling batches until either a page returns no new events
//! or every event newer than `last_key` has been read, then destroys the
//! collector unconditionally.

use chrono::{DateTime, Utc};

use vsphere_collector_core::model::Event;
use vsphere_collector_soap::envelope::{self, MethodCall};
use vsphere_collector_soap::transport::SoapTransport;
use vsphere_collector_soap::xml::{self, Element};

const INITIAL_BATCH_SIZE: u32 = 10;
const BATCH_SIZE_CEILING: u32 = 1000;

/// Result of one tail pass: events newer than the prior `last_key`,
/// newest-first, and the new `last_key` to persist (unchanged if no new
/// events were found).
pub struct TailResult {
    pub events: Vec<Event>,
    pub last_key: i32,
}

/// Full tail: create a collector, reset it to the newest event, page
/// backwards in doubling batches, and destroy the collector before
/// returning — regardless of outcome.
pub fn tail_events(transport: &SoapTransport, last_key: Option<i32>) -> vsphere_collector_core::error::Result<TailResult> {
    let collector_id = create_collector_for_events(transport)?;
    let result = page_events(transport, &collector_id, last_key);
    // Best-effort: a failure to destroy the collector must not mask the
    // tail's own result.
    let _ = destroy_collector(transport, &collector_id);
    result
}

/// Cold-start path for a service created with `skip_old`: fetches only
/// `latestEvent` and seeds `last_key` from it, without creating a
/// collector at all.
pub fn fetch_latest_event_only(transport: &SoapTransport) -> vsphere_collector_core::error::Result<Option<Event>> {
    let body = MethodCall::new("RetrieveProperties")
        .raw(
            "<ns0:specSet><ns0:propSet><ns0:type>EventManager</ns0:type>\
             <ns0:pathSet>latestEvent</ns0:pathSet></ns0:propSet>\
             <ns0:objectSet><ns0:obj type=\"EventManager\">EventManager</ns0:obj></ns0:objectSet></ns0:specSet>",
        )
        .finish("RetrieveProperties");
    let doc = transport.post(&envelope::wrap(&body))?;
    let event_nodes = xml::find_recursive(&doc.root, "latestEvent");
    Ok(event_nodes.first().and_then(|n| parse_event(n, None)))
}

fn create_collector_for_events(transport: &SoapTransport) -> vsphere_collector_core::error::Result<String> {
    let body = MethodCall::new("CreateCollectorForEvents")
        .moref("_this", "EventManager", "EventManager")
        .raw("<ns0:filter/>")
        .finish("CreateCollectorForEvents");
    let doc = transport.post(&envelope::wrap(&body))?;
    xml::read_doc_value(&doc, &["Body", "*", "returnval"])
        .ok_or_else(|| vsphere_collector_core::error::CollectorError::parse("CreateCollectorForEventsResponse/returnval", "missing collector id"))
}

fn reset_collector(transport: &SoapTransport, collector_id: &str) -> vsphere_collector_core::error::Result<()> {
    let body = MethodCall::new("ResetCollector").moref("_this", "EventHistoryCollector", collector_id).finish("ResetCollector");
    transport.post(&envelope::wrap(&body))?;
    Ok(())
}

fn destroy_collector(transport: &SoapTransport, collector_id: &str) -> vsphere_collector_core::error::Result<()> {
    let body = MethodCall::new("DestroyCollector").moref("_this", "EventHistoryCollector", collector_id).finish("DestroyCollector");
    transport.post(&envelope::wrap(&body))?;
    Ok(())
}

fn read_previous_events(
    transport: &SoapTransport,
    collector_id: &str,
    batch_size: u32,
) -> vsphere_collector_core::error::Result<Vec<Element>> {
    let body = MethodCall::new("ReadPreviousEvents")
        .moref("_this", "EventHistoryCollector", collector_id)
        .field("maxCount", &batch_size.to_string())
        .finish("ReadPreviousEvents");
    let doc = transport.post(&envelope::wrap(&body))?;
    Ok(xml::descend(&doc.root, &["Body", "*", "returnval"]).into_iter().cloned().collect())
}

fn page_events(
    transport: &SoapTransport,
    collector_id: &str,
    last_key: Option<i32>,
) -> vsphere_collector_core::error::Result<TailResult> {
    reset_collector(transport, collector_id)?;

    let mut batch_size = INITIAL_BATCH_SIZE;
    let mut events: Vec<Event> = Vec::new();
    let mut newest_key = last_key;

    loop {
        let page = read_previous_events(transport, collector_id, batch_size)?;
        if page.is_empty() {
            break;
        }

        let mut new_in_page = 0;
        for raw in &page {
            if let Some(event) = parse_event(raw, last_key) {
                newest_key = Some(newest_key.map(|k| k.max(event.key)).unwrap_or(event.key));
                events.push(event);
                new_in_page += 1;
            }
        }
        if new_in_page == 0 {
            break;
        }

        batch_size = (batch_size.saturating_mul(2)).min(BATCH_SIZE_CEILING);
    }

    events.sort_by(|a, b| b.key.cmp(&a.key));
    Ok(TailResult { events, last_key: newest_key.unwrap_or(last_key.unwrap_or(0)) })
}

/// Parses one raw event element. `key <= last_key` and keyless/messageless
/// events are dropped (return `None`). `createdTime` absent becomes
/// timestamp `0`; malformed UTF-8 in the message is replaced with `\u{FFFD}`
/// by `String::from_utf8_lossy` upstream in the XML layer, so only an
/// entirely-missing message is filtered here.
fn parse_event(raw: &Element, last_key: Option<i32>) -> Option<Event> {
    let key_str = xml::read_node_value(raw, &["key"])?;
    let key: i32 = match key_str.parse() {
        Ok(k) if k >= 0 => k,
        Ok(_) => {
            log::warn!("skipping eventlog record with negative key '{key_str}'");
            return None;
        }
        Err(_) => {
            log::trace!("skipping eventlog key '{key_str}', not a number");
            return None;
        }
    };
    if last_key.map(|lk| key <= lk).unwrap_or(false) {
        return None;
    }

    let message = xml::read_node_value(raw, &["fullFormattedMessage"])?;
    if message.is_empty() {
        return None;
    }

    let timestamp = xml::read_node_value(raw, &["createdTime"]).and_then(|s| parse_created_time(&s)).unwrap_or(0);

    Some(Event { key, timestamp, message })
}

/// Parses `YYYY-MM-DDTHH:MM:SS.fractionZ`, tolerating an absent or
/// malformed value by returning `None` (caller substitutes `0`).
fn parse_created_time(raw: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.with_timezone(&Utc).timestamp()).or_else(|| {
        log::debug!("could not parse eventlog createdTime '{raw}'");
        None
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_elem(key: &str, time: &str, message: &str) -> Element {
        xml::parse(format!("<event><key>{key}</key><createdTime>{time}</createdTime><fullFormattedMessage>{message}</fullFormattedMessage></event>").as_bytes())
            .unwrap()
            .root
    }

    #[test]
    fn parses_well_formed_event() {
        let e = event_elem("42", "2020-01-01T00:00:00Z", "ok");
        let event = parse_event(&e, None).unwrap();
        assert_eq!(event.key, 42);
        assert_eq!(event.timestamp, 1577836800);
        assert_eq!(event.message, "ok");
    }

    #[test]
    fn drops_events_not_newer_than_last_key() {
        let e = event_elem("5", "2020-01-01T00:00:00Z", "stale");
        assert!(parse_event(&e, Some(10)).is_none());
    }

    #[test]
    fn missing_created_time_defaults_to_zero() {
        let e = xml::parse(b"<event><key>1</key><fullFormattedMessage>m</fullFormattedMessage></event>").unwrap().root;
        let event = parse_event(&e, None).unwrap();
        assert_eq!(event.timestamp, 0);
    }

    #[test]
    fn negative_key_is_skipped_not_coerced() {
        let e = event_elem("-1", "2020-01-01T00:00:00Z", "weird");
        assert!(parse_event(&e, None).is_none());
    }

    #[test]
    fn event_without_message_is_dropped() {
        let e = xml::parse(b"<event><key>9</key><createdTime>2020-01-01T00:00:00Z</createdTime></event>").unwrap().root;
        assert!(parse_event(&e, None).is_none());
    }

    #[test]
    fn malformed_created_time_defaults_to_zero() {
        let e = event_elem("3", "not-a-date", "m");
        let event = parse_event(&e, None).unwrap();
        assert_eq!(event.timestamp, 0);
    }
}
