//! Wire frame codec.
//!
//! Two JSON frame shapes arrive over the relay:
//!
//! * update – `{"name": "part_2", "location": [x, y, z]}` (a 4th element is
//!   tolerated and ignored: legacy senders appended a rotation magnitude);
//! * selection – `{"select": "part_2"}`.
//!
//! Older controller firmware emits whitespace-delimited text instead,
//! `"part_2 0.0 90.0 0.0"` and `"select part_2"`; both are accepted whenever
//! JSON parsing fails.  Anything else is a [`TwinError::Decode`] – the
//! caller drops the frame and keeps the connection open.

use serde_json::Value;
use tracing::debug;
use twinlink_engine::Delta;
use twinlink_types::{TwinError, UpdateFrame};

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Update { name: String, location: Vec<f64> },
    Select { name: String },
}

/// How a channel interprets the `location` triple of an update frame.
///
/// Pinned per channel by configuration, never inferred per message.  The
/// triple is always a *relative* delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireKind {
    /// Euler angles in degrees (the joint-stream convention).
    #[default]
    Rotation,
    /// A translation vector.
    Translation,
}

/// Decode one text frame.
pub fn decode(text: &str) -> Result<ChannelMessage, TwinError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(TwinError::Decode("empty frame".to_string()));
    }

    if let Some(rest) = trimmed.strip_prefix("select ") {
        let name = rest.trim();
        if name.is_empty() {
            return Err(TwinError::Decode("select frame without a name".to_string()));
        }
        return Ok(ChannelMessage::Select {
            name: name.to_string(),
        });
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => decode_json(value),
        Err(_) => decode_legacy(trimmed),
    }
}

fn decode_json(value: Value) -> Result<ChannelMessage, TwinError> {
    if !value.is_object() {
        return Err(TwinError::Decode(format!("unrecognised frame: {value}")));
    }

    if let Some(name) = value.get("select").and_then(Value::as_str) {
        return Ok(ChannelMessage::Select {
            name: name.to_string(),
        });
    }

    let frame: UpdateFrame = serde_json::from_value(value)
        .map_err(|e| TwinError::Decode(format!("unrecognised frame shape: {e}")))?;
    validate_location(&frame.location)?;
    Ok(ChannelMessage::Update {
        name: frame.name,
        location: frame.location,
    })
}

/// `"<name> <x> <y> <z>"`, optionally with a 4th number.
fn decode_legacy(text: &str) -> Result<ChannelMessage, TwinError> {
    let mut tokens = text.split_whitespace();
    let name = tokens
        .next()
        .ok_or_else(|| TwinError::Decode("empty frame".to_string()))?;

    let location: Vec<f64> = tokens
        .map(|t| {
            t.parse::<f64>()
                .map_err(|_| TwinError::Decode(format!("'{t}' is not a number")))
        })
        .collect::<Result<_, _>>()?;
    validate_location(&location)?;

    Ok(ChannelMessage::Update {
        name: name.to_string(),
        location,
    })
}

fn validate_location(location: &[f64]) -> Result<(), TwinError> {
    if location.len() != 3 && location.len() != 4 {
        return Err(TwinError::Decode(format!(
            "location arity {} (want 3 or 4)",
            location.len()
        )));
    }
    if location.iter().any(|v| !v.is_finite()) {
        return Err(TwinError::Decode(
            "non-finite location component".to_string(),
        ));
    }
    Ok(())
}

/// Interpret a validated location triple as a [`Delta`].
pub fn frame_to_delta(location: &[f64], kind: WireKind) -> Delta {
    if location.len() == 4 {
        debug!(magnitude = location[3], "ignoring legacy 4th location component");
    }
    let (x, y, z) = (location[0], location[1], location[2]);
    match kind {
        WireKind::Rotation => Delta::from_euler_deg(x, y, z),
        WireKind::Translation => Delta::from_translation(glam::DVec3::new(x, y, z)),
    }
}

/// The canonical selection announce frame.
pub fn encode_select(name: &str) -> String {
    serde_json::json!({ "select": name }).to_string()
}

/// Encode an update frame.  Zero vectors are suppressed (`None`) as a
/// bandwidth optimization; receivers still treat an explicit zero as a
/// legal no-op.
pub fn encode_update(name: &str, location: [f64; 3]) -> Option<String> {
    if location.iter().all(|v| *v == 0.0) {
        return None;
    }
    Some(serde_json::json!({ "name": name, "location": location }).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_update_decodes() {
        let msg = decode(r#"{"name": "part_2", "location": [0.0, 90.0, 0.0]}"#).unwrap();
        assert_eq!(
            msg,
            ChannelMessage::Update {
                name: "part_2".to_string(),
                location: vec![0.0, 90.0, 0.0],
            }
        );
    }

    #[test]
    fn json_update_with_legacy_magnitude() {
        let msg = decode(r#"{"name": "part_1", "location": [1, 2, 3, 4]}"#).unwrap();
        assert_eq!(
            msg,
            ChannelMessage::Update {
                name: "part_1".to_string(),
                location: vec![1.0, 2.0, 3.0, 4.0],
            }
        );
    }

    #[test]
    fn json_select_decodes() {
        let msg = decode(r#"{"select": "part_7"}"#).unwrap();
        assert_eq!(
            msg,
            ChannelMessage::Select {
                name: "part_7".to_string()
            }
        );
    }

    #[test]
    fn legacy_update_decodes() {
        let msg = decode("part_3 1.5 -2.0 0.25").unwrap();
        assert_eq!(
            msg,
            ChannelMessage::Update {
                name: "part_3".to_string(),
                location: vec![1.5, -2.0, 0.25],
            }
        );
    }

    #[test]
    fn legacy_select_decodes() {
        let msg = decode("select part_5").unwrap();
        assert_eq!(
            msg,
            ChannelMessage::Select {
                name: "part_5".to_string()
            }
        );
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert!(matches!(decode("{not json"), Err(TwinError::Decode(_))));
        assert!(matches!(decode(""), Err(TwinError::Decode(_))));
        assert!(matches!(decode("part_1 1.0 2.0"), Err(TwinError::Decode(_))));
        assert!(matches!(
            decode("part_1 1.0 2.0 3.0 4.0 5.0"),
            Err(TwinError::Decode(_))
        ));
        assert!(matches!(decode("part_1 a b c"), Err(TwinError::Decode(_))));
        assert!(matches!(
            decode(r#"{"name": "part_1", "location": [1, 2]}"#),
            Err(TwinError::Decode(_))
        ));
        assert!(matches!(decode(r#"{"foo": 1}"#), Err(TwinError::Decode(_))));
        assert!(matches!(decode("42"), Err(TwinError::Decode(_))));
        // NaN cannot appear in JSON but can in the legacy form.
        assert!(matches!(
            decode("part_1 nan 0 0"),
            Err(TwinError::Decode(_))
        ));
    }

    #[test]
    fn wire_kind_selects_delta_shape() {
        let rot = frame_to_delta(&[0.0, 90.0, 0.0], WireKind::Rotation);
        assert!(rot.rotation.is_some());
        assert!(rot.translation.is_none());

        let tra = frame_to_delta(&[1.0, 0.0, 0.0], WireKind::Translation);
        assert_eq!(tra.translation, Some(glam::DVec3::X));
        assert!(tra.rotation.is_none());
    }

    #[test]
    fn encode_select_matches_wire_shape() {
        let frame = encode_select("part_2");
        let back = decode(&frame).unwrap();
        assert_eq!(
            back,
            ChannelMessage::Select {
                name: "part_2".to_string()
            }
        );
    }

    #[test]
    fn zero_updates_are_suppressed_on_encode() {
        assert_eq!(encode_update("part_1", [0.0, 0.0, 0.0]), None);
        let frame = encode_update("part_1", [0.0, 1.0, 0.0]).unwrap();
        assert!(frame.contains("part_1"));
    }
}
