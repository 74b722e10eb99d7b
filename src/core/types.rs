use crate::core::errors::AseError;
use serde::de::{DeserializeOwned, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;

/// Position of a frame within an exchange.
///
/// Serialized as the integer codes the service expects (0..=3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum FrameStatus {
    FirstFrame,
    Continue,
    LastFrame,
    /// Single-shot call; never used on a stream.
    ForOnce,
}

impl From<FrameStatus> for u8 {
    fn from(status: FrameStatus) -> Self {
        match status {
            FrameStatus::FirstFrame => 0,
            FrameStatus::Continue => 1,
            FrameStatus::LastFrame => 2,
            FrameStatus::ForOnce => 3,
        }
    }
}

impl TryFrom<u8> for FrameStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::FirstFrame),
            1 => Ok(Self::Continue),
            2 => Ok(Self::LastFrame),
            3 => Ok(Self::ForOnce),
            other => Err(format!("unknown frame status: {}", other)),
        }
    }
}

/// Insertion-ordered string-keyed map, serialized as a JSON object.
///
/// Used for the open-ended `parameter` block and for the payload map so
/// that frames go over the wire with the keys in the order they were set.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V>(Vec<(String, V)>);

/// Raw key/value fields, the escape hatch for shapes without a typed variant.
pub type Fields = OrderedMap<Value>;

pub type Payload = OrderedMap<PayloadItem>;

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<V> OrderedMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `key`, keeping the original position on replace.
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.0.push((key, value)),
        }
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: V) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for OrderedMap<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedMapVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut map = OrderedMap::new();
                while let Some((k, v)) = access.next_entry::<String, V>()? {
                    map.insert(k, v);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

/// Platform header of an outbound frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestHeader {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub did: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imei: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imsi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_isp: Option<String>,
    /// Required on every streamed frame; the send loop rejects frames without it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<FrameStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub res_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioPayload {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    pub status: FrameStatus,
    pub seq: u32,
    /// Base64-encoded audio bytes.
    pub audio: String,
    pub frame_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPayload {
    pub status: FrameStatus,
    /// Base64-encoded text.
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub status: FrameStatus,
    /// Base64-encoded image bytes.
    pub image: String,
}

/// One entry of a frame's payload map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadItem {
    Audio(AudioPayload),
    Text(TextPayload),
    Image(ImagePayload),
    Raw(Fields),
}

impl From<AudioPayload> for PayloadItem {
    fn from(payload: AudioPayload) -> Self {
        Self::Audio(payload)
    }
}

impl From<TextPayload> for PayloadItem {
    fn from(payload: TextPayload) -> Self {
        Self::Text(payload)
    }
}

impl From<ImagePayload> for PayloadItem {
    fn from(payload: ImagePayload) -> Self {
        Self::Image(payload)
    }
}

impl From<Fields> for PayloadItem {
    fn from(fields: Fields) -> Self {
        Self::Raw(fields)
    }
}

/// Outbound frame: `{"header": {...}, "parameter": {...}?, "payload": {...}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub header: RequestHeader,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<Fields>,
    #[serde(default)]
    pub payload: Payload,
}

impl Request {
    pub fn new(status: FrameStatus) -> Self {
        Self {
            header: RequestHeader {
                status: Some(status),
                ..RequestHeader::default()
            },
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.header.app_id = Some(app_id.into());
        self
    }

    pub fn status(&self) -> Option<FrameStatus> {
        self.header.status
    }

    pub fn set_headers(&mut self, header: RequestHeader) {
        self.header = header;
    }

    pub fn set_parameter(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.parameter
            .get_or_insert_with(Fields::new)
            .insert(key, value.into());
    }

    pub fn set_parameters(&mut self, parameters: Fields) {
        self.parameter = Some(parameters);
    }

    pub fn set_audio_payload(&mut self, key: impl Into<String>, payload: AudioPayload) {
        self.payload.insert(key, PayloadItem::Audio(payload));
    }

    pub fn set_text_payload(&mut self, key: impl Into<String>, payload: TextPayload) {
        self.payload.insert(key, PayloadItem::Text(payload));
    }

    pub fn set_image_payload(&mut self, key: impl Into<String>, payload: ImagePayload) {
        self.payload.insert(key, PayloadItem::Image(payload));
    }

    pub fn set_payload(&mut self, key: impl Into<String>, item: impl Into<PayloadItem>) {
        self.payload.insert(key, item.into());
    }

    pub fn set_payloads(&mut self, payload: Payload) {
        self.payload = payload;
    }
}

/// Header of an inbound frame. `status == LastFrame` ends the exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RespHeader {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub sid: String,
    /// `None` when absent or when the code is not one this crate knows.
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: Option<FrameStatus>,
}

/// Unknown status codes must not abort a stream: only `LastFrame` matters
/// on the way in.
fn lenient_status<'de, D>(deserializer: D) -> Result<Option<FrameStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let code = Option::<i64>::deserialize(deserializer)?;
    Ok(code
        .and_then(|code| u8::try_from(code).ok())
        .and_then(|code| FrameStatus::try_from(code).ok()))
}

impl RespHeader {
    pub fn is_last(&self) -> bool {
        self.status == Some(FrameStatus::LastFrame)
    }
}

/// Inbound frame. `P` is whatever payload shape the configured decoder produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resp<P = Value> {
    pub header: RespHeader,
    pub payload: Option<P>,
}

impl<P> Resp<P> {
    /// Turn a non-zero `header.code` into [`AseError::Service`].
    pub fn ensure_success(self) -> Result<Self, AseError> {
        if self.header.code == 0 {
            Ok(self)
        } else {
            Err(AseError::Service {
                code: self.header.code,
                message: self.header.message,
                sid: self.header.sid,
            })
        }
    }
}

impl<P: DeserializeOwned> Resp<P> {
    pub fn from_slice(raw: &[u8]) -> Result<Self, AseError> {
        Ok(serde_json::from_slice(raw)?)
    }
}
