//! rrbot IPC
//!
//! Message types exchanged between the host platform and the plugin, plus the
//! JSON-lines framing used by the CLI harness

use serde::{Deserialize, Deserializer, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static NEXT_TRACE_COUNTER: AtomicU64 = AtomicU64::new(1);

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn generate_trace_id() -> String {
    let ts = now_unix_secs();
    let n = NEXT_TRACE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("trace-{}-{}", ts, n)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireId {
    Number(i64),
    Text(String),
}

impl From<WireId> for String {
    fn from(id: WireId) -> Self {
        match id {
            WireId::Number(n) => n.to_string(),
            WireId::Text(s) => s,
        }
    }
}

fn deserialize_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    WireId::deserialize(deserializer).map(String::from)
}

fn deserialize_optional_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(Option::<WireId>::deserialize(deserializer)?
        .map(String::from)
        .filter(|id| !id.is_empty()))
}

/// An inbound chat message as seen by the plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default = "generate_trace_id")]
    pub trace_id: String,
    #[serde(deserialize_with = "deserialize_id")]
    pub sender_id: String,
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub group_id: Option<String>,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub text: String,
}

impl InboundMessage {
    pub fn new(sender_id: &str, text: &str) -> Self {
        Self {
            trace_id: generate_trace_id(),
            sender_id: sender_id.to_string(),
            group_id: None,
            sender_name: None,
            text: text.to_string(),
        }
    }

    pub fn with_group_id(mut self, group_id: &str) -> Self {
        self.group_id = Some(group_id.to_string());
        self
    }

    pub fn with_sender_name(mut self, sender_name: &str) -> Self {
        self.sender_name = Some(sender_name.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Segment {
    #[serde(rename = "plain")]
    Plain { text: String },

    #[serde(rename = "image")]
    Image { url: String },

    #[serde(rename = "mention")]
    Mention { target: String },
}

impl Segment {
    pub fn plain(text: &str) -> Self {
        Segment::Plain {
            text: text.to_string(),
        }
    }
}

/// The reply the host is about to send, as an ordered chain of segments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutboundReply {
    #[serde(default)]
    pub chain: Vec<Segment>,
}

impl OutboundReply {
    pub fn text(text: &str) -> Self {
        Self {
            chain: vec![Segment::plain(text)],
        }
    }

    /// Replace the chain with a single empty text segment. Later stages may
    /// still index the first segment, so the chain is never left empty.
    pub fn blank(&mut self) {
        self.chain.clear();
        self.chain.push(Segment::plain(""));
    }

    /// Text rendering of the chain: mentions become `@target`, images are
    /// dropped.
    pub fn plain_text(&self) -> String {
        self.chain
            .iter()
            .filter_map(|segment| match segment {
                Segment::Plain { text } => Some(text.clone()),
                Segment::Mention { target } => Some(format!("@{}", target)),
                Segment::Image { .. } => None,
            })
            .collect()
    }

    pub fn is_blank(&self) -> bool {
        matches!(self.chain.as_slice(), [Segment::Plain { text }] if text.is_empty())
    }
}

/// Replies arrive either as a bare list of text lines or as a full chain.
#[derive(Deserialize)]
#[serde(untagged)]
enum ReplyWire {
    Texts(Vec<String>),
    Chain(OutboundReply),
}

impl From<ReplyWire> for OutboundReply {
    fn from(wire: ReplyWire) -> Self {
        match wire {
            ReplyWire::Texts(texts) => Self {
                chain: texts.iter().map(|text| Segment::plain(text)).collect(),
            },
            ReplyWire::Chain(reply) => reply,
        }
    }
}

fn deserialize_reply<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<OutboundReply>, D::Error> {
    Ok(Option::<ReplyWire>::deserialize(deserializer)?.map(OutboundReply::from))
}

/// One stdin line for the CLI harness: a message and the reply the host
/// would send for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    #[serde(flatten)]
    pub message: InboundMessage,
    #[serde(default, deserialize_with = "deserialize_reply")]
    pub reply: Option<OutboundReply>,
}

impl InboundEvent {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// One stdout line for the CLI harness.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputLine {
    Command {
        trace_id: String,
        suppressed: bool,
        text: String,
    },
    Reply {
        trace_id: String,
        suppressed: bool,
        chain: Vec<Segment>,
    },
}

impl OutputLine {
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_has_trace_id() {
        let msg = InboundMessage::new("42", "hello");
        assert!(msg.trace_id.starts_with("trace-"));
        assert!(msg.group_id.is_none());
    }

    #[test]
    fn trace_id_different_for_each_message() {
        let a = InboundMessage::new("42", "hello");
        let b = InboundMessage::new("42", "hello");
        assert_ne!(a.trace_id, b.trace_id);
    }

    #[test]
    fn event_accepts_numeric_and_string_ids() {
        let event = InboundEvent::from_json(
            r#"{"sender_id": 12345, "group_id": "678", "text": "hi", "reply": {"chain": [{"type": "plain", "text": "yo"}]}}"#,
        )
        .expect("parse");
        assert_eq!(event.message.sender_id, "12345");
        assert_eq!(event.message.group_id.as_deref(), Some("678"));
        assert!(event.message.trace_id.starts_with("trace-"));
        assert_eq!(event.reply, Some(OutboundReply::text("yo")));
    }

    #[test]
    fn empty_group_id_is_treated_as_private_chat() {
        let event = InboundEvent::from_json(r#"{"sender_id": "1", "group_id": "", "text": "x"}"#)
            .expect("parse");
        assert!(event.message.group_id.is_none());
        assert!(event.reply.is_none());
    }

    #[test]
    fn reply_may_be_a_list_of_text_lines() {
        let event = InboundEvent::from_json(
            r#"{"sender_id": "42", "group_id": null, "sender_name": "M", "text": "hi", "reply": ["hello", "world"]}"#,
        )
        .expect("parse");
        assert!(event.message.group_id.is_none());
        assert_eq!(event.message.sender_name.as_deref(), Some("M"));
        let reply = event.reply.expect("reply");
        assert_eq!(
            reply.chain,
            vec![Segment::plain("hello"), Segment::plain("world")]
        );
    }

    #[test]
    fn plain_text_renders_mentions_and_skips_images() {
        let reply = OutboundReply {
            chain: vec![
                Segment::Mention {
                    target: "alice".to_string(),
                },
                Segment::plain(" see "),
                Segment::Image {
                    url: "https://img".to_string(),
                },
                Segment::plain("above"),
            ],
        };
        assert_eq!(reply.plain_text(), "@alice see above");
    }

    #[test]
    fn blank_leaves_single_empty_segment() {
        let mut reply = OutboundReply {
            chain: vec![
                Segment::plain("hello"),
                Segment::Image {
                    url: "https://img".to_string(),
                },
            ],
        };
        assert!(!reply.is_blank());
        reply.blank();
        assert_eq!(reply.chain.len(), 1);
        assert!(reply.is_blank());
    }

    #[test]
    fn output_line_is_tagged_by_kind() {
        let line = OutputLine::Reply {
            trace_id: "t".to_string(),
            suppressed: true,
            chain: vec![Segment::plain("")],
        };
        let json = line.to_json().expect("serialize");
        assert!(json.contains(r#""kind":"reply""#));
        assert!(json.contains(r#""suppressed":true"#));
    }
}
