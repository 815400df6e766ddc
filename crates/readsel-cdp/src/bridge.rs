//! Wire format between [`CdpDocument`](crate::CdpDocument) and the injected
//! page script.

use serde::Deserialize;
use serde_json::Value;

use readsel_core::{DocumentError, DocumentResult, ListenerId, MutationRecord, NodeId, PageEvent};

/// Page script defining `window.__readsel`.
pub const SOURCE: &str = include_str!("page_bridge.js");

/// Runtime binding the page script reports events through.
pub const BINDING_NAME: &str = "__readselEmit";

/// Expression invoking `method` of the page script with `args`.
pub fn invocation(method: &str, args: &[Value]) -> String {
    // JSON literals are valid JavaScript literals.
    format!(
        "window.__readsel.invoke({}, {})",
        Value::from(method),
        Value::from(args.to_vec())
    )
}

/// Envelope every invocation resolves to.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Reply {
    Ok(Value),
    Gone(NodeId),
    Error(String),
}

impl Reply {
    pub fn into_result(self) -> DocumentResult<Value> {
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::Gone(node) => Err(DocumentError::NodeGone(node)),
            Reply::Error(message) => Err(DocumentError::Backend(message)),
        }
    }
}

/// Payload of one `__readselEmit` call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Emitted {
    Mutations { records: Vec<MutationRecord> },
    Activated { control: NodeId },
    Shortcut { listener: ListenerId },
}

impl From<Emitted> for PageEvent {
    fn from(emitted: Emitted) -> Self {
        match emitted {
            Emitted::Mutations { records } => PageEvent::Mutations(records),
            Emitted::Activated { control } => PageEvent::ControlActivated { control },
            Emitted::Shortcut { listener } => PageEvent::ShortcutTriggered { listener },
        }
    }
}

/// Decode a binding payload into a page event.
pub fn decode(payload: &str) -> Result<PageEvent, serde_json::Error> {
    serde_json::from_str::<Emitted>(payload).map(PageEvent::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_invocation_expression() {
        let expr = invocation("query", &[json!(4), json!(".RichText")]);
        assert_eq!(expr, r#"window.__readsel.invoke("query", [4,".RichText"])"#);
    }

    #[test]
    fn test_invocation_escapes_patterns() {
        let expr = invocation("queryAll", &[Value::Null, json!(r#"[data-x="a\"b"]"#)]);
        assert_eq!(
            expr,
            r#"window.__readsel.invoke("queryAll", [null,"[data-x=\"a\\\"b\"]"])"#
        );
    }

    #[test]
    fn test_reply_variants() {
        let ok: Reply = serde_json::from_value(json!({"ok": [1, 2]})).unwrap();
        assert_eq!(ok.into_result().unwrap(), json!([1, 2]));

        let null: Reply = serde_json::from_value(json!({"ok": null})).unwrap();
        assert_eq!(null.into_result().unwrap(), Value::Null);

        let gone: Reply = serde_json::from_value(json!({"gone": 12})).unwrap();
        assert!(matches!(gone.into_result(), Err(DocumentError::NodeGone(NodeId(12)))));

        let error: Reply = serde_json::from_value(json!({"error": "bad selector"})).unwrap();
        assert!(matches!(
            error.into_result(),
            Err(DocumentError::Backend(m)) if m == "bad selector"
        ));
    }

    #[test]
    fn test_decode_mutations() {
        let event = decode(
            r#"{"type":"mutations","records":[
                {"target":3,"kind":"childList"},
                {"target":5,"kind":"attributes","name":"class"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            PageEvent::Mutations(vec![
                MutationRecord::child_list(NodeId(3)),
                MutationRecord::attribute(NodeId(5), "class"),
            ])
        );
    }

    #[test]
    fn test_decode_activation_and_shortcut() {
        assert_eq!(
            decode(r#"{"type":"activated","control":9}"#).unwrap(),
            PageEvent::ControlActivated { control: NodeId(9) }
        );
        assert_eq!(
            decode(r#"{"type":"shortcut","listener":2}"#).unwrap(),
            PageEvent::ShortcutTriggered { listener: ListenerId(2) }
        );
    }

    #[test]
    fn test_decode_rejects_unknown_payloads() {
        assert!(decode(r#"{"type":"scroll"}"#).is_err());
        assert!(decode("not json").is_err());
    }

    #[test]
    fn test_source_defines_entry_points() {
        assert!(SOURCE.contains("window.__readsel ="));
        assert!(SOURCE.contains(BINDING_NAME));
        for method in ["detachedAmong", "queryAll", "observe", "disconnect"] {
            assert!(SOURCE.contains(&format!("{}(", method)), "missing {}", method);
        }
    }
}
