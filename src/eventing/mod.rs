use quick_xml::events::{BytesDecl, BytesStart, BytesText, Event};

use crate::{
    xml_stream::{decode_entities, XmlEventKind, XmlStream},
    XmlWriter,
};

pub mod publisher;
pub mod subscriber;

pub use publisher::EventPublisher;
pub use subscriber::{EventSubscriber, SubscriptionState};

/// Parse a GENA `TIMEOUT` header (`Second-N` or `infinite`). Missing or
/// unparseable values fall back to `default_sec`.
pub fn parse_timeout_header(value: Option<&str>, default_sec: u32) -> u32 {
    let Some(value) = value else {
        return default_sec;
    };
    let value = value.trim();
    if value.eq_ignore_ascii_case("infinite") {
        return default_sec;
    }
    value
        .strip_prefix("Second-")
        .or_else(|| value.strip_prefix("second-"))
        .and_then(|secs| secs.parse().ok())
        .unwrap_or(default_sec)
}

/// Strip the angle brackets of a `CALLBACK: <http://...>` header value.
pub fn parse_callback_header(value: &str) -> String {
    value
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string()
}

/// NOTIFY body for a `LastChange`-evented service: the inner `<Event>`
/// document is produced by `writer` and embedded as escaped text, which is
/// how DIDL-style payloads survive inside an XML text node.
pub fn last_change_body(
    namespace_abbrev: &str,
    instance_id: u32,
    writer: &(dyn Fn(&mut XmlWriter) -> quick_xml::Result<()> + Send + Sync),
) -> anyhow::Result<String> {
    let mut inner = quick_xml::Writer::new(Vec::new());
    let xmlns = format!("urn:schemas-upnp-org:metadata-1-0/{namespace_abbrev}/");
    let event = BytesStart::new("Event").with_attributes([("xmlns", xmlns.as_str())]);
    let event_end = event.to_end().into_owned();
    inner.write_event(Event::Start(event))?;
    let instance_id = instance_id.to_string();
    let instance =
        BytesStart::new("InstanceID").with_attributes([("val", instance_id.as_str())]);
    let instance_end = instance.to_end().into_owned();
    inner.write_event(Event::Start(instance))?;
    writer(&mut inner)?;
    inner.write_event(Event::End(instance_end))?;
    inner.write_event(Event::End(event_end))?;
    let inner = String::from_utf8(inner.into_inner())?;

    let mut w = quick_xml::Writer::new(Vec::new());
    w.write_event(Event::Decl(BytesDecl::new("1.0", None, None)))?;
    let propertyset = BytesStart::new("e:propertyset")
        .with_attributes([("xmlns:e", "urn:schemas-upnp-org:metadata-1-0/events")]);
    let propertyset_end = propertyset.to_end().into_owned();
    w.write_event(Event::Start(propertyset))?;
    let property = BytesStart::new("e:property");
    let property_end = property.to_end().into_owned();
    w.write_event(Event::Start(property))?;
    // only &, < and > are substituted so the embedded document keeps its
    // quotes, the way control points expect LastChange payloads
    let escaped = quick_xml::escape::partial_escape(&inner);
    w.create_element("LastChange")
        .write_text_content(BytesText::from_escaped(escaped))?;
    w.write_event(Event::End(property_end))?;
    w.write_event(Event::End(propertyset_end))?;
    Ok(String::from_utf8(w.into_inner())?)
}

/// NOTIFY body carrying plain evented variables, one `<e:property>` each.
pub fn property_set_body(variables: &[(&str, &str)]) -> anyhow::Result<String> {
    let mut w = quick_xml::Writer::new(Vec::new());
    w.write_event(Event::Decl(BytesDecl::new("1.0", None, None)))?;
    let propertyset = BytesStart::new("e:propertyset")
        .with_attributes([("xmlns:e", "urn:schemas-upnp-org:metadata-1-0/events")]);
    let propertyset_end = propertyset.to_end().into_owned();
    w.write_event(Event::Start(propertyset))?;
    for (name, value) in variables {
        let property = BytesStart::new("e:property");
        let property_end = property.to_end().into_owned();
        w.write_event(Event::Start(property))?;
        w.create_element(*name)
            .write_text_content(BytesText::new(value))?;
        w.write_event(Event::End(property_end))?;
    }
    w.write_event(Event::End(propertyset_end))?;
    Ok(String::from_utf8(w.into_inner())?)
}

/// Extract `(variable, value)` pairs from an inbound `<e:propertyset>`
/// document: every leaf with character data inside an `<e:property>`
/// subtree counts. Values have the predefined entities decoded, so a
/// `LastChange` payload comes out as parseable XML.
pub fn parse_property_set(body: &[u8]) -> Vec<(String, String)> {
    let mut stream = XmlStream::new();
    stream.push(body);
    let mut changes = Vec::new();
    while let Some(event) = stream.next_event() {
        if event.kind != XmlEventKind::EndTag || event.text.is_empty() {
            continue;
        }
        let inside_property = event.path[..event.path.len().saturating_sub(1)]
            .iter()
            .any(|node| local_name(node) == "property");
        if inside_property && local_name(&event.node) != "property" {
            changes.push((
                local_name(&event.node).to_string(),
                decode_entities(&event.text).into_owned(),
            ));
        }
    }
    stream.end();
    changes
}

fn local_name(node: &str) -> &str {
    node.rsplit(':').next().unwrap_or(node)
}

#[cfg(test)]
mod tests {
    use quick_xml::events::BytesText;

    use super::{
        last_change_body, parse_callback_header, parse_property_set, parse_timeout_header,
        property_set_body,
    };

    #[test]
    fn timeout_header_forms() {
        assert_eq!(parse_timeout_header(Some("Second-1800"), 300), 1800);
        assert_eq!(parse_timeout_header(Some("second-60"), 300), 60);
        assert_eq!(parse_timeout_header(Some("infinite"), 300), 300);
        assert_eq!(parse_timeout_header(Some("garbage"), 300), 300);
        assert_eq!(parse_timeout_header(None, 300), 300);
    }

    #[test]
    fn callback_header_brackets() {
        assert_eq!(
            parse_callback_header("<http://192.168.1.5:9001/evt>"),
            "http://192.168.1.5:9001/evt"
        );
        assert_eq!(
            parse_callback_header("http://192.168.1.5:9001/evt"),
            "http://192.168.1.5:9001/evt"
        );
    }

    #[test]
    fn last_change_body_escapes_inner_event() {
        let body = last_change_body("AVT", 0, &|w| {
            w.create_element("TransportState")
                .with_attribute(("val", "PLAYING"))
                .write_empty()?;
            Ok(())
        })
        .unwrap();
        assert!(body.contains("<e:propertyset xmlns:e=\"urn:schemas-upnp-org:metadata-1-0/events\">"));
        assert!(body.contains("<LastChange>"));
        assert!(body.contains("&lt;Event xmlns=\"urn:schemas-upnp-org:metadata-1-0/AVT/\"&gt;"));
        assert!(body.contains("&lt;InstanceID val=\"0\"&gt;"));
        assert!(!body.contains("<Event "));
    }

    #[test]
    fn property_set_round_trip() {
        let body = property_set_body(&[("Volume", "42"), ("Mute", "0")]).unwrap();
        let changes = parse_property_set(body.as_bytes());
        assert_eq!(
            changes,
            vec![
                ("Volume".to_string(), "42".to_string()),
                ("Mute".to_string(), "0".to_string()),
            ]
        );
    }

    #[test]
    fn last_change_round_trip_decodes_event() {
        let body = last_change_body("RCS", 0, &|w| {
            w.create_element("Volume")
                .write_text_content(BytesText::new("7"))?;
            Ok(())
        })
        .unwrap();
        let changes = parse_property_set(body.as_bytes());
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, "LastChange");
        assert!(changes[0].1.contains("<Volume>7</Volume>"));
        assert!(changes[0]
            .1
            .contains("urn:schemas-upnp-org:metadata-1-0/RCS/"));
    }
}
