//! Wire messages and their JSON envelopes
//!
//! Inside the crate everything travels as [`WireMessage`]. Transports that
//! speak the realtime JSON protocol use [`encode_client`] / [`decode_server`]
//! to move between the two; the loopback transport also uses the reverse pair
//! to play the remote side.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::PCM_MIME_TYPE;
use crate::error::TransportError;

/// Transport-level envelope
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    /// Encoded audio
    Media(MediaChunk),
    /// Session control
    Control(ControlEvent),
}

/// Type discriminator of a [`WireMessage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Media,
    Control,
}

/// Base64 PCM payload plus its encoding tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaChunk {
    /// Base64 text
    pub data: Bytes,
    /// e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    /// The remote agent was cut off; queued audio is stale
    Interrupted,
    /// The remote agent finished its turn
    TurnComplete,
    /// Opaque session setup payload
    Setup(Value),
}

impl WireMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            WireMessage::Media(_) => MessageKind::Media,
            WireMessage::Control(_) => MessageKind::Control,
        }
    }

    pub fn media(data: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        WireMessage::Media(MediaChunk {
            data: data.into(),
            mime_type: mime_type.into(),
        })
    }
}

/// Parsed encoding tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeTag {
    /// Lower-cased type/subtype
    pub essence: String,
    /// `rate` parameter, when present
    pub rate: Option<u32>,
}

impl MimeTag {
    pub fn parse(tag: &str) -> Result<Self, String> {
        let mut parts = tag.split(';');
        let essence = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
        if essence.is_empty() {
            return Err("empty encoding tag".into());
        }

        let mut rate = None;
        for param in parts {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            if key.trim().eq_ignore_ascii_case("rate") {
                let parsed = value
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| format!("invalid rate parameter '{}'", value.trim()))?;
                rate = Some(parsed);
            }
        }

        Ok(Self { essence, rate })
    }

    pub fn is_pcm(&self) -> bool {
        self.essence == PCM_MIME_TYPE
    }
}

/// `audio/pcm;rate=<rate>`
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("{};rate={}", PCM_MIME_TYPE, sample_rate)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realtime_input: Option<RealtimeInput>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_complete: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

fn chunk_to_blob(chunk: &MediaChunk) -> Result<Blob, TransportError> {
    let data = std::str::from_utf8(&chunk.data)
        .map_err(|_| TransportError::Protocol("media payload is not base64 text".into()))?;
    Ok(Blob {
        mime_type: chunk.mime_type.clone(),
        data: data.to_string(),
    })
}

fn blob_to_message(blob: Blob) -> WireMessage {
    WireMessage::media(Bytes::from(blob.data), blob.mime_type)
}

/// Serialize an outbound message as a client JSON frame
pub fn encode_client(message: &WireMessage) -> Result<String, TransportError> {
    let envelope = match message {
        WireMessage::Media(chunk) => ClientMessage {
            realtime_input: Some(RealtimeInput {
                media_chunks: vec![chunk_to_blob(chunk)?],
            }),
            ..ClientMessage::default()
        },
        WireMessage::Control(ControlEvent::Setup(setup)) => ClientMessage {
            setup: Some(setup.clone()),
            ..ClientMessage::default()
        },
        WireMessage::Control(other) => {
            return Err(TransportError::Protocol(format!(
                "{:?} is not a client event",
                other
            )))
        }
    };
    serde_json::to_string(&envelope).map_err(|e| TransportError::Protocol(e.to_string()))
}

/// Parse a client JSON frame
pub fn decode_client(text: &str) -> Result<Vec<WireMessage>, TransportError> {
    let envelope: ClientMessage =
        serde_json::from_str(text).map_err(|e| TransportError::Protocol(e.to_string()))?;

    let mut messages = Vec::new();
    if let Some(setup) = envelope.setup {
        messages.push(WireMessage::Control(ControlEvent::Setup(setup)));
    }
    if let Some(input) = envelope.realtime_input {
        messages.extend(input.media_chunks.into_iter().map(blob_to_message));
    }
    Ok(messages)
}

/// Serialize inbound events as one server JSON frame.
///
/// Media becomes model-turn parts; control events set the matching flags.
pub fn encode_server(messages: &[WireMessage]) -> Result<String, TransportError> {
    let mut content = ServerContent::default();
    let mut parts = Vec::new();

    for message in messages {
        match message {
            WireMessage::Media(chunk) => parts.push(Part {
                inline_data: Some(chunk_to_blob(chunk)?),
                text: None,
            }),
            WireMessage::Control(ControlEvent::Interrupted) => content.interrupted = true,
            WireMessage::Control(ControlEvent::TurnComplete) => content.turn_complete = true,
            WireMessage::Control(ControlEvent::Setup(_)) => {
                return Err(TransportError::Protocol("setup is not a server event".into()))
            }
        }
    }
    if !parts.is_empty() {
        content.model_turn = Some(Content { parts });
    }

    let envelope = ServerMessage {
        server_content: Some(content),
        setup_complete: None,
    };
    serde_json::to_string(&envelope).map_err(|e| TransportError::Protocol(e.to_string()))
}

/// Parse a server JSON frame into inbound events.
///
/// Audio parts come first in part order, then `Interrupted`, then
/// `TurnComplete`. Text parts and setup acknowledgements produce nothing.
pub fn decode_server(text: &str) -> Result<Vec<WireMessage>, TransportError> {
    let envelope: ServerMessage =
        serde_json::from_str(text).map_err(|e| TransportError::Protocol(e.to_string()))?;

    let mut messages = Vec::new();
    let Some(content) = envelope.server_content else {
        return Ok(messages);
    };

    if let Some(turn) = content.model_turn {
        messages.extend(
            turn.parts
                .into_iter()
                .filter_map(|part| part.inline_data)
                .map(blob_to_message),
        );
    }
    if content.interrupted {
        messages.push(WireMessage::Control(ControlEvent::Interrupted));
    }
    if content.turn_complete {
        messages.push(WireMessage::Control(ControlEvent::TurnComplete));
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mime_tag_parse() {
        let tag = MimeTag::parse("audio/pcm;rate=24000").unwrap();
        assert!(tag.is_pcm());
        assert_eq!(tag.rate, Some(24_000));

        let tag = MimeTag::parse(" Audio/PCM ").unwrap();
        assert!(tag.is_pcm());
        assert_eq!(tag.rate, None);

        let tag = MimeTag::parse("audio/opus; rate=48000; channels=2").unwrap();
        assert!(!tag.is_pcm());
        assert_eq!(tag.rate, Some(48_000));
    }

    #[test]
    fn test_mime_tag_rejects_bad_rate() {
        assert!(MimeTag::parse("audio/pcm;rate=fast").is_err());
        assert!(MimeTag::parse("").is_err());
    }

    #[test]
    fn test_pcm_mime_type() {
        assert_eq!(pcm_mime_type(16_000), "audio/pcm;rate=16000");
    }

    #[test]
    fn test_encode_client_media() {
        let message = WireMessage::media("AAAA", pcm_mime_type(16_000));
        let text = encode_client(&message).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({
                "realtimeInput": {
                    "mediaChunks": [{ "mimeType": "audio/pcm;rate=16000", "data": "AAAA" }]
                }
            })
        );
        assert_eq!(decode_client(&text).unwrap(), vec![message]);
    }

    #[test]
    fn test_encode_client_setup() {
        let setup = json!({ "model": "native-audio" });
        let message = WireMessage::Control(ControlEvent::Setup(setup.clone()));
        let text = encode_client(&message).unwrap();
        assert_eq!(decode_client(&text).unwrap(), vec![message]);
    }

    #[test]
    fn test_encode_client_rejects_server_events() {
        let err = encode_client(&WireMessage::Control(ControlEvent::Interrupted)).unwrap_err();
        assert!(matches!(err, TransportError::Protocol(_)));
    }

    #[test]
    fn test_decode_server_audio_and_flags() {
        let text = json!({
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        { "text": "thinking" },
                        { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AQI=" } },
                        { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AwQ=" } }
                    ]
                },
                "interrupted": true,
                "turnComplete": true
            }
        })
        .to_string();

        let messages = decode_server(&text).unwrap();
        assert_eq!(
            messages,
            vec![
                WireMessage::media("AQI=", "audio/pcm;rate=24000"),
                WireMessage::media("AwQ=", "audio/pcm;rate=24000"),
                WireMessage::Control(ControlEvent::Interrupted),
                WireMessage::Control(ControlEvent::TurnComplete),
            ]
        );
    }

    #[test]
    fn test_decode_server_setup_complete() {
        let messages = decode_server(r#"{"setupComplete":{}}"#).unwrap();
        assert!(messages.is_empty());
    }

    #[test]
    fn test_decode_server_invalid_json() {
        assert!(matches!(
            decode_server("{not json"),
            Err(TransportError::Protocol(_))
        ));
    }

    #[test]
    fn test_server_roundtrip() {
        let messages = vec![
            WireMessage::media("AQI=", "audio/pcm;rate=24000"),
            WireMessage::Control(ControlEvent::Interrupted),
        ];
        let text = encode_server(&messages).unwrap();
        assert_eq!(decode_server(&text).unwrap(), messages);
    }

    #[test]
    fn test_message_kind() {
        assert_eq!(WireMessage::media("", "audio/pcm").kind(), MessageKind::Media);
        assert_eq!(
            WireMessage::Control(ControlEvent::TurnComplete).kind(),
            MessageKind::Control
        );
    }
}
