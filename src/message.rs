use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Discriminant field marking a payload as belonging to this protocol.
///
/// The channel is shared with arbitrary cross-document traffic (other
/// scripts, extensions), so every protocol message carries this flag set to
/// literal `true`.
pub const PROTOCOL_FLAG: &str = "isCrossOriginHtmlEmbedMessage";

/// Checks whether a value is a protocol message: a non-null object whose
/// discriminant flag is present and exactly `true` (not merely truthy).
pub fn is_valid_message(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.get(PROTOCOL_FLAG) == Some(&Value::Bool(true)),
        _ => false,
    }
}

/// Checks whether a value is a protocol message sent by the host page.
pub fn is_valid_host_message(value: &Value) -> bool {
    is_valid_message(value) && value.get("source").and_then(Value::as_str) == Some("host")
}

/// Checks whether a value is a protocol message sent by the sandbox iframe.
pub fn is_valid_iframe_message(value: &Value) -> bool {
    is_valid_message(value) && value.get("source").and_then(Value::as_str) == Some("iframe")
}

/// Content-replacement commands sent by the host into the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostMessage {
    SetHeadContent(String),
    SetBodyContent(String),
}

impl HostMessage {
    pub fn type_tag(&self) -> &'static str {
        match self {
            HostMessage::SetHeadContent(_) => "set-head-content",
            HostMessage::SetBodyContent(_) => "set-body-content",
        }
    }

    /// Parses a valid host message with a known type tag; anything else is
    /// filtered out with `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        if !is_valid_host_message(value) {
            return None;
        }
        let data = value.get("data")?.as_str()?;
        match value.get("type")?.as_str()? {
            "set-head-content" => Some(HostMessage::SetHeadContent(data.to_string())),
            "set-body-content" => Some(HostMessage::SetBodyContent(data.to_string())),
            _ => None,
        }
    }
}

/// Payload of a `dimensions-update` report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionsUpdate {
    #[serde(rename = "documentElementHeight")]
    pub document_element_height: f64,
}

/// Reports sent by the sandbox back to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum IframeMessage {
    DimensionsUpdate(DimensionsUpdate),
}

impl IframeMessage {
    pub fn type_tag(&self) -> &'static str {
        match self {
            IframeMessage::DimensionsUpdate(_) => "dimensions-update",
        }
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        if !is_valid_iframe_message(value) {
            return None;
        }
        match value.get("type")?.as_str()? {
            "dimensions-update" => {
                let height = value.get("data")?.get("documentElementHeight")?.as_f64()?;
                Some(IframeMessage::DimensionsUpdate(DimensionsUpdate {
                    document_element_height: height,
                }))
            }
            _ => None,
        }
    }
}

/// A protocol message from either side of the channel.
///
/// Messages are immutable values built fresh for every send; the wire shape
/// is a plain JSON object so it survives the cross-document messaging
/// primitive unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Host(HostMessage),
    Iframe(IframeMessage),
}

impl Message {
    pub fn source_tag(&self) -> &'static str {
        match self {
            Message::Host(_) => "host",
            Message::Iframe(_) => "iframe",
        }
    }

    pub fn type_tag(&self) -> &'static str {
        match self {
            Message::Host(host) => host.type_tag(),
            Message::Iframe(iframe) => iframe.type_tag(),
        }
    }

    /// Builds the wire object for this message.
    pub fn to_value(&self) -> Value {
        match self {
            Message::Host(host) => {
                let data = match host {
                    HostMessage::SetHeadContent(data) | HostMessage::SetBodyContent(data) => data,
                };
                json!({
                    PROTOCOL_FLAG: true,
                    "source": "host",
                    "type": host.type_tag(),
                    "data": data,
                })
            }
            Message::Iframe(IframeMessage::DimensionsUpdate(update)) => json!({
                PROTOCOL_FLAG: true,
                "source": "iframe",
                "type": "dimensions-update",
                "data": {
                    "documentElementHeight": update.document_element_height,
                },
            }),
        }
    }

    /// Parses a wire value into a typed message. Returns `None` for anything
    /// that is not a valid protocol message with a known source and type.
    pub fn from_value(value: &Value) -> Option<Self> {
        if !is_valid_message(value) {
            return None;
        }
        match value.get("source")?.as_str()? {
            "host" => HostMessage::from_value(value).map(Message::Host),
            "iframe" => IframeMessage::from_value(value).map(Message::Iframe),
            _ => None,
        }
    }
}

impl From<HostMessage> for Message {
    fn from(message: HostMessage) -> Self {
        Message::Host(message)
    }
}

impl From<IframeMessage> for Message {
    fn from(message: IframeMessage) -> Self {
        Message::Iframe(message)
    }
}
