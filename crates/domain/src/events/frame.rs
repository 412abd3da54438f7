//! 线路帧编解码
//!
//! 入站帧先按 `eventName` 分派，再按该事件自己的结构校验载荷；
//! 载荷与标签不符的帧直接拒绝，不做宽松的类型猜测。

use serde::Deserialize;
use serde_json::Value;

use crate::{ClientEvent, FrameError, NewMessage, ServerEvent, UserId};

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "eventName")]
    event_name: String,
    #[serde(rename = "eventPayload", default)]
    event_payload: Value,
}

/// 解码一个入站文本帧
///
/// 返回 `Ok(None)` 表示事件名未知或载荷为空的 `disconnect`，调用方应忽略该帧。
pub fn decode_client_frame(text: &str, max_bytes: usize) -> Result<Option<ClientEvent>, FrameError> {
    if text.len() > max_bytes {
        return Err(FrameError::TooLarge {
            size: text.len(),
            limit: max_bytes,
        });
    }

    let raw: RawFrame = serde_json::from_str(text).map_err(FrameError::Malformed)?;

    let event = match raw.event_name.as_str() {
        ClientEvent::JOIN => ClientEvent::Join(payload::<UserId>(ClientEvent::JOIN, raw.event_payload)?),
        ClientEvent::DISCONNECT => {
            if raw.event_payload.is_null() {
                return Ok(None);
            }
            ClientEvent::Leave(payload::<UserId>(ClientEvent::DISCONNECT, raw.event_payload)?)
        }
        ClientEvent::MESSAGE => {
            ClientEvent::Message(payload::<NewMessage>(ClientEvent::MESSAGE, raw.event_payload)?)
        }
        _ => return Ok(None),
    };

    Ok(Some(event))
}

fn payload<T: serde::de::DeserializeOwned>(
    event: &'static str,
    value: Value,
) -> Result<T, FrameError> {
    serde_json::from_value(value).map_err(|source| FrameError::PayloadMismatch { event, source })
}

/// 编码一个出站事件
pub fn encode_frame(event: &ServerEvent) -> Result<String, FrameError> {
    serde_json::to_string(event).map_err(FrameError::Encode)
}
