use std::collections::BTreeMap;

use crate::errors::ServiceError;

/// Event-key prefix the platform prepends when a not-yet-subscribed user
/// scans a QR scene. Already-subscribed scans carry the bare scene id.
pub const QR_SCENE_PREFIX: &str = "qrscene_";

/// Parsed webhook envelope. The platform delivers a flat XML document; only
/// the fields the scan flow needs are lifted out, but parsing is strict:
/// anything that is not a flat sequence of `<Tag>text</Tag>` elements under
/// an `<xml>` root is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub msg_type: String,
    pub event: Option<String>,
    pub from_user: Option<String>,
    pub event_key: Option<String>,
}

pub fn parse_envelope(xml: &str) -> Result<Envelope, ServiceError> {
    let fields = parse_flat(xml)?;
    let msg_type = fields
        .get("MsgType")
        .cloned()
        .ok_or(ServiceError::MalformedEnvelope("missing MsgType"))?;

    Ok(Envelope {
        msg_type,
        event: fields.get("Event").cloned(),
        from_user: fields.get("FromUserName").cloned(),
        event_key: fields.get("EventKey").cloned(),
    })
}

/// Returns `(scene_id, external_identity)` if the envelope reports a QR
/// scan, `None` for everything else.
///
/// `subscribe` (first-time follow via QR) carries the scene id behind
/// [`QR_SCENE_PREFIX`]; `SCAN` (already subscribed) carries it verbatim.
pub fn extract_scan(envelope: &Envelope) -> Option<(String, String)> {
    if envelope.msg_type != "event" {
        return None;
    }
    let event = envelope.event.as_deref()?;
    let from_user = envelope.from_user.as_deref()?;
    let event_key = envelope.event_key.as_deref()?;

    let scene_id = match event {
        "subscribe" => event_key.strip_prefix(QR_SCENE_PREFIX)?,
        "SCAN" => event_key,
        _ => return None,
    };
    if scene_id.is_empty() {
        return None;
    }

    Some((scene_id.to_string(), from_user.to_string()))
}

fn parse_flat(xml: &str) -> Result<BTreeMap<String, String>, ServiceError> {
    let body = xml
        .trim()
        .strip_prefix("<xml>")
        .ok_or(ServiceError::MalformedEnvelope("missing <xml> root"))?
        .strip_suffix("</xml>")
        .ok_or(ServiceError::MalformedEnvelope("unterminated <xml> root"))?;

    let mut fields = BTreeMap::new();
    let mut rest = body.trim_start();
    while !rest.is_empty() {
        let after_open = rest
            .strip_prefix('<')
            .ok_or(ServiceError::MalformedEnvelope("expected element"))?;
        let name_end = after_open
            .find('>')
            .ok_or(ServiceError::MalformedEnvelope("unterminated open tag"))?;
        let name = &after_open[..name_end];
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ServiceError::MalformedEnvelope("bad element name"));
        }
        let content = after_open[name_end + 1..].trim_start();

        let (value, after_value) = if let Some(cdata) = content.strip_prefix("<![CDATA[") {
            let end = cdata
                .find("]]>")
                .ok_or(ServiceError::MalformedEnvelope("unterminated CDATA"))?;
            (cdata[..end].to_string(), cdata[end + 3..].trim_start())
        } else {
            let end = content
                .find('<')
                .ok_or(ServiceError::MalformedEnvelope("unterminated element"))?;
            (content[..end].trim().to_string(), &content[end..])
        };

        let close = format!("</{name}>");
        let after_close = after_value
            .strip_prefix(close.as_str())
            .ok_or(ServiceError::MalformedEnvelope("mismatched close tag"))?;

        fields.insert(name.to_string(), value);
        rest = after_close.trim_start();
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_envelope(event: &str, event_key: &str) -> String {
        format!(
            "<xml>\
             <ToUserName><![CDATA[gh_bridge]]></ToUserName>\
             <FromUserName><![CDATA[ext_42]]></FromUserName>\
             <CreateTime>1700000000</CreateTime>\
             <MsgType><![CDATA[event]]></MsgType>\
             <Event><![CDATA[{event}]]></Event>\
             <EventKey><![CDATA[{event_key}]]></EventKey>\
             </xml>"
        )
    }

    #[test]
    fn subscribe_event_strips_scene_prefix() {
        let envelope = parse_envelope(&scan_envelope("subscribe", "qrscene_482913")).unwrap();
        let (scene_id, identity) = extract_scan(&envelope).unwrap();
        assert_eq!(scene_id, "482913");
        assert_eq!(identity, "ext_42");
    }

    #[test]
    fn scan_event_uses_event_key_verbatim() {
        let envelope = parse_envelope(&scan_envelope("SCAN", "482913")).unwrap();
        let (scene_id, identity) = extract_scan(&envelope).unwrap();
        assert_eq!(scene_id, "482913");
        assert_eq!(identity, "ext_42");
    }

    #[test]
    fn scan_scene_id_with_underscore_survives() {
        let envelope = parse_envelope(&scan_envelope("subscribe", "qrscene_a_b_c")).unwrap();
        let (scene_id, _) = extract_scan(&envelope).unwrap();
        assert_eq!(scene_id, "a_b_c");
    }

    #[test]
    fn unsubscribe_event_is_ignored() {
        let envelope = parse_envelope(&scan_envelope("unsubscribe", "482913")).unwrap();
        assert!(extract_scan(&envelope).is_none());
    }

    #[test]
    fn plain_subscribe_without_prefix_is_ignored() {
        let envelope = parse_envelope(&scan_envelope("subscribe", "482913")).unwrap();
        assert!(extract_scan(&envelope).is_none());
    }

    #[test]
    fn non_event_message_is_ignored() {
        let xml = "<xml>\
                   <FromUserName><![CDATA[ext_42]]></FromUserName>\
                   <MsgType><![CDATA[text]]></MsgType>\
                   <Content><![CDATA[hello]]></Content>\
                   </xml>";
        let envelope = parse_envelope(xml).unwrap();
        assert_eq!(envelope.msg_type, "text");
        assert!(extract_scan(&envelope).is_none());
    }

    #[test]
    fn plain_text_values_are_parsed() {
        let xml = "<xml><MsgType>event</MsgType><CreateTime>1700000000</CreateTime></xml>";
        let envelope = parse_envelope(xml).unwrap();
        assert_eq!(envelope.msg_type, "event");
    }

    #[test]
    fn missing_msg_type_fails_closed() {
        let xml = "<xml><Event><![CDATA[SCAN]]></Event></xml>";
        assert!(parse_envelope(xml).is_err());
    }

    #[test]
    fn malformed_documents_fail_closed() {
        assert!(parse_envelope("").is_err());
        assert!(parse_envelope("not xml at all").is_err());
        assert!(parse_envelope("<xml><MsgType>event</xml>").is_err());
        assert!(parse_envelope("<xml><MsgType><![CDATA[event]></MsgType></xml>").is_err());
        assert!(parse_envelope("<xml><A><B>nested</B></A></xml>").is_err());
    }

    #[test]
    fn whitespace_between_elements_is_tolerated() {
        let xml = "<xml>\n  <MsgType><![CDATA[event]]></MsgType>\n  \
                   <Event><![CDATA[SCAN]]></Event>\n  \
                   <FromUserName><![CDATA[ext_9]]></FromUserName>\n  \
                   <EventKey><![CDATA[123456]]></EventKey>\n</xml>";
        let envelope = parse_envelope(xml).unwrap();
        let (scene_id, identity) = extract_scan(&envelope).unwrap();
        assert_eq!(scene_id, "123456");
        assert_eq!(identity, "ext_9");
    }
}
