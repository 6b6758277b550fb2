//! Value scaling between MIDI and OSC ranges.
//!
//! A mapping entry declares both a MIDI range and an OSC range; conversion
//! between the two is plain linear interpolation.

use thiserror::Error;

use crate::mapping::MappingEntry;

/// Scaling across a zero-width source range (min == max).
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("degenerate source range: min == max == {0}")]
pub struct DegenerateRange(pub f32);

/// Linearly scale `value` from `[src_min, src_max]` to `[dst_min, dst_max]`.
///
/// No clamping is applied: MIDI callers clamp to their own 0-127 domain and
/// OSC targets are inherently open-ended.
pub fn scale(
    value: f32,
    src_min: f32,
    src_max: f32,
    dst_min: f32,
    dst_max: f32,
) -> Result<f32, DegenerateRange> {
    if src_min == src_max {
        return Err(DegenerateRange(src_min));
    }
    Ok((value - src_min) * (dst_max - dst_min) / (src_max - src_min) + dst_min)
}

/// Convert a raw MIDI value into the entry's OSC range.
///
/// A zero-width MIDI range means the entry was never configured, not that the
/// message is invalid: the value passes through unscaled.
pub fn midi_to_osc(entry: &MappingEntry, value: u8) -> f32 {
    scale(
        value as f32,
        entry.midi_min as f32,
        entry.midi_max as f32,
        entry.osc_min,
        entry.osc_max,
    )
    .unwrap_or(value as f32)
}

/// Convert an OSC value into the entry's MIDI range, rounded to the nearest
/// integer and clamped to the 0-127 MIDI value domain.
pub fn osc_to_midi(entry: &MappingEntry, value: f32) -> u8 {
    let scaled = scale(
        value,
        entry.osc_min,
        entry.osc_max,
        entry.midi_min as f32,
        entry.midi_max as f32,
    )
    .unwrap_or(value);
    scaled.round().clamp(0.0, 127.0) as u8
}
