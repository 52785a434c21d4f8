//! ==============================================================================
//! time_codec.rs - reading timestamp layout
//! ==============================================================================
//!
//! purpose:
//!     parses and formats reading timestamps in the one layout devices send:
//!
//! ```text
//! 2024-01-01T00:00:00+00:00
//! ```
//!
//! date, time, and a numeric utc offset. parsing is strict: no `Z`,
//! no fractional seconds, no whitespace, nothing trailing.
//!
//! relationships:
//!     - used by: ingest.rs (validates raw readings)
//!     - used by: server.rs (formats the latest timestamp for responses)
//!
//! ==============================================================================

use chrono::{DateTime, FixedOffset};

use crate::error::MalformedTimestamp;

/// A reading timestamp. Ordering and equality compare the instant, the
/// offset is kept so formatting gives back what the device sent.
pub type Timestamp = DateTime<FixedOffset>;

/// chrono format string for the wire layout
pub const LAYOUT: &str = "%Y-%m-%dT%H:%M:%S%:z";

/// `d` is an ascii digit, `s` is the offset sign, anything else must match
const SHAPE: &[u8] = b"dddd-dd-ddTdd:dd:ddsdd:dd";

/// Stateless codec for the fixed timestamp layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeCodec;

impl TimeCodec {
    pub fn parse(text: &str) -> Result<Timestamp, MalformedTimestamp> {
        if let Some(reason) = shape_mismatch(text) {
            return Err(MalformedTimestamp::new(text, reason));
        }
        DateTime::parse_from_str(text, LAYOUT)
            .map_err(|e| MalformedTimestamp::new(text, e.to_string()))
    }

    pub fn format(timestamp: &Timestamp) -> String {
        timestamp.format(LAYOUT).to_string()
    }
}

// chrono tolerates some slack (leading whitespace before numbers, wider
// years, leap seconds), so the byte shape is checked before handing the
// text over.
fn shape_mismatch(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    if bytes.len() != SHAPE.len() {
        return Some(format!(
            "expected {} characters in layout YYYY-MM-DDTHH:MM:SS+HH:MM, got {}",
            SHAPE.len(),
            bytes.len()
        ));
    }

    for (i, (&b, &want)) in bytes.iter().zip(SHAPE).enumerate() {
        let ok = match want {
            b'd' => b.is_ascii_digit(),
            b's' => b == b'+' || b == b'-',
            _ => b == want,
        };
        if !ok {
            return Some(format!("unexpected character at position {}", i));
        }
    }

    // chrono reads :60 as a leap second; the layout only allows 00-59
    if bytes[17] > b'5' {
        return Some("second out of range".to_string());
    }
    None
}
