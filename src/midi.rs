//! USB-MIDI Code Index Number translation and frame-offset bookkeeping
//! between the host MIDI ports and the device's 4-byte USB-MIDI event
//! records.

/// One event as carried on the O→H/H→O MIDI rings: device-side microsecond
/// timestamp plus the 4-byte USB-MIDI packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbMidiEvent {
    pub device_time_us: u64,
    pub bytes: [u8; 4],
}

/// Maps a host channel-voice status byte (high nibble) or realtime status
/// byte to its USB-MIDI Code Index Number, and the payload size the host
/// side should expect for it (§6's table). Returns `None` for an
/// unrecognized status, which callers treat as "drop the event".
pub fn cin_for_status(status: u8) -> Option<(u8, usize)> {
    match status & 0xF0 {
        0x80 => Some((0x08, 3)),
        0x90 => Some((0x09, 3)),
        0xA0 => Some((0x0A, 3)),
        0xB0 => Some((0x0B, 3)),
        0xC0 => Some((0x0C, 2)),
        0xD0 => Some((0x0D, 2)),
        0xE0 => Some((0x0E, 3)),
        _ => match status {
            0xF8..=0xFC => Some((0x0F, 1)),
            _ => None,
        },
    }
}

/// Inverse of `cin_for_status`'s size table, used when decoding an incoming
/// USB-MIDI packet from the device (O→H direction). Deliberately preserved
/// as the original asymmetry: CIN 0x0C/0x0D carry 2 data bytes on the wire
/// (program/channel-pressure messages), but this decode table — matching
/// the O→H decoder's documented behavior — only distinguishes single-byte
/// (CIN 0x0F) from 3-byte (everything else) messages.
pub fn o2h_payload_len(cin: u8) -> usize {
    if cin == 0x0F { 1 } else { 3 }
}

impl UsbMidiEvent {
    /// Wire length of one event on an O→H/H→O MIDI ring: an 8-byte
    /// little-endian device timestamp followed by the 4 USB-MIDI bytes.
    pub const WIRE_LEN: usize = 12;

    pub fn to_bytes(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0_u8; Self::WIRE_LEN];
        out[0..8].copy_from_slice(&self.device_time_us.to_le_bytes());
        out[8..12].copy_from_slice(&self.bytes);
        out
    }

    pub fn from_bytes(raw: &[u8]) -> Self {
        let mut time_bytes = [0_u8; 8];
        time_bytes.copy_from_slice(&raw[0..8]);
        let mut bytes = [0_u8; 4];
        bytes.copy_from_slice(&raw[8..12]);
        Self {
            device_time_us: u64::from_le_bytes(time_bytes),
            bytes,
        }
    }
}

/// Packs a host MIDI message into a 4-byte USB-MIDI event. Returns `None`
/// if the status byte isn't one this bridge forwards (§6); the caller
/// drops the event silently in that case, per the H→O MIDI policy.
pub fn pack_h2o(status: u8, data: &[u8], device_time_us: u64) -> Option<UsbMidiEvent> {
    let (cin, _size) = cin_for_status(status)?;
    let mut bytes = [0_u8; 4];
    bytes[0] = cin;
    bytes[1] = status;
    bytes[2] = data.first().copied().unwrap_or(0);
    bytes[3] = data.get(1).copied().unwrap_or(0);
    Some(UsbMidiEvent { device_time_us, bytes })
}

/// Unpacks a device-originated USB-MIDI event (O→H) back into a raw host
/// MIDI message (status + data bytes), using the decoder's documented
/// (and intentionally asymmetric) size rule.
pub fn unpack_o2h(event: &UsbMidiEvent) -> Vec<u8> {
    let size = o2h_payload_len(event.bytes[0]);
    event.bytes[1..1 + size].to_vec()
}

/// Computes the host frame offset for an O→H MIDI event relative to the
/// current cycle's start time. Events timestamped at or before the cycle
/// start have already elapsed and are clamped to frame 0 (emit immediately);
/// events timestamped within the cycle get an offset proportional to how far
/// into the cycle they fall.
pub fn o2h_frame_offset(current_frame_time_us: u64, event_time_us: u64, us_per_frame: f64) -> u32 {
    if event_time_us <= current_frame_time_us {
        return 0;
    }
    let delta_us = (event_time_us - current_frame_time_us) as f64;
    (delta_us / us_per_frame).round() as u32
}

/// Forwards as many events as have non-decreasing computed frame offsets,
/// returning the index of the first event whose offset decreased (that
/// event and the rest are deferred to the next cycle), or `events.len()` if
/// all were monotone.
pub fn monotonic_prefix_len(offsets: &[u32]) -> usize {
    let mut last = 0_u32;
    for (i, &offset) in offsets.iter().enumerate() {
        if i > 0 && offset < last {
            return i;
        }
        last = offset;
    }
    offsets.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_voice_statuses_map_to_expected_cins() {
        assert_eq!(cin_for_status(0x90), Some((0x09, 3)));
        assert_eq!(cin_for_status(0xC0), Some((0x0C, 2)));
        assert_eq!(cin_for_status(0xB3), Some((0x0B, 3)));
    }

    #[test]
    fn realtime_status_maps_to_single_byte_cin() {
        assert_eq!(cin_for_status(0xF8), Some((0x0F, 1)));
    }

    #[test]
    fn unrecognized_status_is_dropped() {
        assert_eq!(cin_for_status(0xF0), None);
    }

    #[test]
    fn note_on_round_trips_through_pack_unpack() {
        let event = pack_h2o(0x91, &[0x40, 0x7F], 12345).unwrap();
        let decoded = unpack_o2h(&event);
        assert_eq!(decoded, vec![0x91, 0x40, 0x7F]);
    }

    #[test]
    fn program_change_decode_uses_the_documented_asymmetric_size() {
        // Program change (CIN 0x0C) is packed with 2 data bytes on the wire,
        // but the O→H decode table reports a 3-byte message for any
        // non-0x0F CIN, matching the preserved asymmetry.
        let event = pack_h2o(0xC2, &[0x05], 1).unwrap();
        assert_eq!(o2h_payload_len(event.bytes[0]), 3);
    }

    #[test]
    fn monotonic_prefix_detects_first_decrease() {
        assert_eq!(monotonic_prefix_len(&[0, 3, 3, 7]), 4);
        assert_eq!(monotonic_prefix_len(&[0, 5, 2, 9]), 2);
    }

    #[test]
    fn frame_offset_clamps_to_zero_for_elapsed_events() {
        assert_eq!(o2h_frame_offset(150, 100, 20.8), 0);
    }

    #[test]
    fn frame_offset_grows_for_events_later_in_the_cycle() {
        let us_per_frame = 1_000_000.0 / 48000.0;
        assert_eq!(o2h_frame_offset(1_000_000, 1_000_000, us_per_frame), 0);
        assert_eq!(o2h_frame_offset(1_000_000, 1_000_010, us_per_frame), 0);
        assert_eq!(o2h_frame_offset(1_000_000, 1_001_000, us_per_frame), 48);
    }

    #[test]
    fn wire_encoding_round_trips() {
        let event = pack_h2o(0xB0, &[0x07, 0x64], 999).unwrap();
        let bytes = event.to_bytes();
        assert_eq!(UsbMidiEvent::from_bytes(&bytes), event);
    }
}
