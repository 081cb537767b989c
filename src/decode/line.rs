//! # Tagged Line Decoder
//!
//! Decodes the text protocol spoken by the serial ground radio.
//!
//! ## Line Grammar
//!
//! ```text
//! <anything> <marker> <field> ( "|" <field> )*
//! field := TAG ":" value
//! ```
//!
//! | Tag | Value | Example |
//! |-----|-------|---------|
//! | `GPS` | `lat,lon` | `GPS:19.4326,-99.1332` |
//! | `ALT` | meters | `ALT:12.5` |
//! | `ATT` | `yaw,pitch,roll` degrees | `ATT:90.0,-1.5,0.3` |
//! | `BAT` | `volts V,percent %` | `BAT:11.8V,76%` |
//! | `FIX` | integer | `FIX:3` |
//! | `MODE` | token | `MODE:GUIDED` |
//!
//! Tokenizing ([`tokenize`]) is kept apart from merging
//! ([`LineDecoder`]) so the grammar can be tested on its own.

use tracing::debug;

use super::{DecodeOutcome, FrameDecoder};
use crate::error::DecodeError;
use crate::telemetry::TelemetryDelta;

/// Default marker separating device chatter from the payload
pub const DEFAULT_LINE_MARKER: &str = "RX >";

/// One validated `TAG:value` field
#[derive(Debug, Clone, PartialEq)]
pub enum TaggedField {
    Gps { lat: f64, lon: f64 },
    Alt(f64),
    Att { yaw: f64, pitch: f64, roll: f64 },
    Bat { voltage: f64, percent: u8 },
    Fix(u8),
    Mode(String),
}

impl TaggedField {
    fn merge_into(self, delta: &mut TelemetryDelta) {
        match self {
            TaggedField::Gps { lat, lon } => {
                delta.lat = Some(lat);
                delta.lon = Some(lon);
            }
            TaggedField::Alt(alt) => delta.alt = Some(alt),
            TaggedField::Att { yaw, pitch, roll } => {
                delta.yaw = Some(yaw);
                delta.pitch = Some(pitch);
                delta.roll = Some(roll);
            }
            TaggedField::Bat { voltage, percent } => {
                delta.voltage = Some(voltage);
                delta.battery = Some(percent);
            }
            TaggedField::Fix(fix) => delta.fix_type = Some(fix),
            TaggedField::Mode(mode) => delta.mode = Some(mode),
        }
    }
}

/// Text after the marker, or `None` when the line carries no marker
pub fn payload<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.find(marker).map(|idx| line[idx + marker.len()..].trim())
}

/// Split a payload into validated fields, left to right
///
/// Unrecognized tags and fields without a `:` are skipped silently.
pub fn tokenize(payload: &str) -> impl Iterator<Item = Result<TaggedField, DecodeError>> + '_ {
    payload.split('|').filter_map(|raw| {
        let (tag, value) = raw.trim().split_once(':')?;
        parse_field(tag.trim(), value.trim())
    })
}

fn parse_field(tag: &str, value: &str) -> Option<Result<TaggedField, DecodeError>> {
    let parsed = match tag {
        "GPS" => parse_gps(value),
        "ALT" => parse_number("ALT", value).map(TaggedField::Alt),
        "ATT" => parse_attitude(value),
        "BAT" => parse_battery(value),
        "FIX" => parse_fix(value),
        "MODE" => parse_mode(value),
        _ => return None,
    };
    Some(parsed)
}

fn malformed(tag: &'static str, value: &str, reason: impl Into<String>) -> DecodeError {
    DecodeError::MalformedField {
        tag,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_number(tag: &'static str, text: &str) -> Result<f64, DecodeError> {
    match text.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(malformed(tag, text, "not a finite number")),
    }
}

fn parse_list<const N: usize>(tag: &'static str, value: &str) -> Result<[f64; N], DecodeError> {
    let parts: Vec<&str> = value.split(',').collect();
    if parts.len() != N {
        return Err(malformed(
            tag,
            value,
            format!("expected {} values, got {}", N, parts.len()),
        ));
    }

    let mut out = [0.0; N];
    for (slot, part) in out.iter_mut().zip(parts) {
        *slot = parse_number(tag, part).map_err(|_| malformed(tag, value, "not a finite number"))?;
    }
    Ok(out)
}

fn parse_gps(value: &str) -> Result<TaggedField, DecodeError> {
    let [lat, lon] = parse_list::<2>("GPS", value)?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(malformed("GPS", value, "coordinates out of range"));
    }
    Ok(TaggedField::Gps { lat, lon })
}

fn parse_attitude(value: &str) -> Result<TaggedField, DecodeError> {
    let [yaw, pitch, roll] = parse_list::<3>("ATT", value)?;
    Ok(TaggedField::Att { yaw, pitch, roll })
}

fn parse_battery(value: &str) -> Result<TaggedField, DecodeError> {
    let Some((volts, pct)) = value.split_once(',') else {
        return Err(malformed("BAT", value, "expected 'volts V,percent %'"));
    };

    let volts = volts.trim();
    let volts = volts
        .strip_suffix(&['V', 'v'][..])
        .ok_or_else(|| malformed("BAT", value, "voltage lacks 'V' suffix"))?;
    let pct = pct
        .trim()
        .strip_suffix('%')
        .ok_or_else(|| malformed("BAT", value, "percentage lacks '%' suffix"))?;

    let voltage = parse_number("BAT", volts)?;
    let percent = parse_number("BAT", pct)?;
    if !(0.0..=100.0).contains(&percent) {
        return Err(malformed("BAT", value, "percentage outside 0-100"));
    }

    Ok(TaggedField::Bat {
        voltage,
        percent: percent.round() as u8,
    })
}

fn parse_fix(value: &str) -> Result<TaggedField, DecodeError> {
    value
        .parse::<u8>()
        .map(TaggedField::Fix)
        .map_err(|e| malformed("FIX", value, e.to_string()))
}

fn parse_mode(value: &str) -> Result<TaggedField, DecodeError> {
    if value.is_empty() || value.contains(char::is_whitespace) {
        return Err(malformed("MODE", value, "expected a single token"));
    }
    Ok(TaggedField::Mode(value.to_string()))
}

/// Decoder for marker-prefixed tagged lines
#[derive(Debug, Clone)]
pub struct LineDecoder {
    marker: String,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_LINE_MARKER)
    }
}

impl LineDecoder {
    pub fn new(marker: impl Into<String>) -> Self {
        Self { marker: marker.into() }
    }

    /// Decode one line; later occurrences of a tag overwrite earlier ones
    pub fn decode_line(&self, line: &str) -> DecodeOutcome {
        let line = line.trim();
        if line.is_empty() {
            return DecodeOutcome::ignored();
        }

        let Some(payload) = payload(line, &self.marker) else {
            return DecodeOutcome::ignored();
        };

        let mut delta = TelemetryDelta::default();
        let mut errors = Vec::new();
        for field in tokenize(payload) {
            match field {
                Ok(field) => field.merge_into(&mut delta),
                Err(e) => {
                    debug!("Skipping field: {}", e);
                    errors.push(e);
                }
            }
        }

        DecodeOutcome::from_parts(delta, errors)
    }
}

impl FrameDecoder for LineDecoder {
    type Frame = String;

    fn decode(&mut self, frame: &String) -> DecodeOutcome {
        self.decode_line(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(line: &str) -> DecodeOutcome {
        LineDecoder::default().decode_line(line)
    }

    #[test]
    fn test_full_line() {
        let outcome = decode("RX > GPS:19.4,-99.1|ALT:12.5|MODE:GUIDED");
        assert!(outcome.errors.is_empty());

        let delta = outcome.delta.unwrap();
        assert_eq!(delta.lat, Some(19.4));
        assert_eq!(delta.lon, Some(-99.1));
        assert_eq!(delta.alt, Some(12.5));
        assert_eq!(delta.mode.as_deref(), Some("GUIDED"));
        assert_eq!(delta.battery, None);
        assert_eq!(delta.yaw, None);
    }

    #[test]
    fn test_lines_without_marker_are_ignored() {
        for line in ["ESP-ROM:esp32s3-20210327", "GPS:1.0,2.0|ALT:3", "RX GPS:1,2", "booting..."] {
            let outcome = decode(line);
            assert_eq!(outcome, DecodeOutcome::ignored(), "line {:?}", line);
        }
    }

    #[test]
    fn test_empty_line_is_noop() {
        assert_eq!(decode(""), DecodeOutcome::ignored());
        assert_eq!(decode("   \r"), DecodeOutcome::ignored());
    }

    #[test]
    fn test_marker_with_leading_chatter() {
        let outcome = decode("[12:00:01] RX > FIX:3");
        assert_eq!(outcome.delta.unwrap().fix_type, Some(3));
    }

    #[test]
    fn test_malformed_field_is_skipped_rest_applied() {
        let outcome = decode("RX > GPS:bad|ALT:5.0");
        assert_eq!(outcome.errors.len(), 1);
        assert!(matches!(
            outcome.errors[0],
            DecodeError::MalformedField { tag: "GPS", .. }
        ));

        let delta = outcome.delta.unwrap();
        assert_eq!(delta.alt, Some(5.0));
        assert_eq!(delta.lat, None);
        assert_eq!(delta.lon, None);
    }

    #[test]
    fn test_wrong_arity_is_an_error() {
        let outcome = decode("RX > ATT:1.0,2.0|GPS:1,2,3");
        assert_eq!(outcome.errors.len(), 2);
        assert!(outcome.delta.is_none());
    }

    #[test]
    fn test_attitude_and_battery() {
        let delta = decode("RX > ATT:90.5,-2.0,1.25|BAT:11.8V,76%").delta.unwrap();
        assert_eq!(delta.yaw, Some(90.5));
        assert_eq!(delta.pitch, Some(-2.0));
        assert_eq!(delta.roll, Some(1.25));
        assert_eq!(delta.voltage, Some(11.8));
        assert_eq!(delta.battery, Some(76));
    }

    #[test]
    fn test_battery_grammar() {
        assert!(matches!(tokenize("BAT:11.8,76%").next(), Some(Err(_))));
        assert!(matches!(tokenize("BAT:11.8V,76").next(), Some(Err(_))));
        assert!(matches!(tokenize("BAT:11.8V").next(), Some(Err(_))));
        assert!(matches!(tokenize("BAT:11.8V,140%").next(), Some(Err(_))));
        assert_eq!(
            tokenize("BAT: 12.6v , 99.6% ").next(),
            Some(Ok(TaggedField::Bat { voltage: 12.6, percent: 100 }))
        );
    }

    #[test]
    fn test_fix_must_be_integer() {
        assert!(matches!(tokenize("FIX:3.5").next(), Some(Err(_))));
        assert!(matches!(tokenize("FIX:-1").next(), Some(Err(_))));
        assert_eq!(tokenize("FIX:6").next(), Some(Ok(TaggedField::Fix(6))));
    }

    #[test]
    fn test_non_finite_numbers_rejected() {
        assert!(matches!(tokenize("ALT:NaN").next(), Some(Err(_))));
        assert!(matches!(tokenize("ALT:inf").next(), Some(Err(_))));
    }

    #[test]
    fn test_gps_out_of_range() {
        assert!(matches!(tokenize("GPS:91.0,0.0").next(), Some(Err(_))));
        assert!(matches!(tokenize("GPS:0.0,-180.5").next(), Some(Err(_))));
    }

    #[test]
    fn test_unknown_tags_and_junk_fields_ignored() {
        let outcome = decode("RX > RSSI:-70|junk||ALT:1.0|");
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.delta.unwrap().alt, Some(1.0));
    }

    #[test]
    fn test_last_occurrence_wins() {
        let delta = decode("RX > MODE:LOITER|ALT:1.0|MODE:RTL|ALT:2.0").delta.unwrap();
        assert_eq!(delta.mode.as_deref(), Some("RTL"));
        assert_eq!(delta.alt, Some(2.0));
    }

    #[test]
    fn test_malformed_duplicate_does_not_erase_earlier_value() {
        let outcome = decode("RX > ALT:4.0|ALT:x");
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.delta.unwrap().alt, Some(4.0));
    }

    #[test]
    fn test_custom_marker() {
        let decoder = LineDecoder::new("TLM:");
        assert_eq!(decoder.decode_line("TLM: ALT:7").delta.unwrap().alt, Some(7.0));
        assert_eq!(decoder.decode_line("RX > ALT:7"), DecodeOutcome::ignored());
    }

    #[test]
    fn test_payload_extraction() {
        assert_eq!(payload("xx RX > A:1 ", "RX >"), Some("A:1"));
        assert_eq!(payload("no marker", "RX >"), None);
    }

    #[test]
    fn test_mode_token() {
        assert_eq!(
            tokenize("MODE:AUTO").next(),
            Some(Ok(TaggedField::Mode("AUTO".to_string())))
        );
        assert!(matches!(tokenize("MODE:").next(), Some(Err(_))));
        assert!(matches!(tokenize("MODE:SMART RTL").next(), Some(Err(_))));
    }
}
