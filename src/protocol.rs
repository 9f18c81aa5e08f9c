use crate::types::{CrankEvent, DecodedFrame, MeasurementFlags, PowerFrame};
use bytes::Buf;

/// Shortest frame that carries flags and instantaneous power
pub const MIN_POWER_FRAME_LEN: usize = 4;

/// Shortest frame from which crank revolution data is read
pub const MIN_CRANK_FRAME_LEN: usize = 10;

/// Byte offset of the crank revolution block
pub const CRANK_DATA_OFFSET: usize = 4;

/// Crank event timestamp ticks per second
pub const CRANK_TIME_TICKS_PER_SECOND: u32 = 1024;

/// Decode flags and instantaneous power from a power measurement frame
///
/// Frame layout (little-endian):
/// - Bytes 0-1: Flags
/// - Bytes 2-3: Instantaneous power in watts
///
/// Returns `None` when the frame is shorter than [`MIN_POWER_FRAME_LEN`].
/// Unknown flag bits are kept as-is.
#[must_use]
pub fn parse_power(frame: &[u8]) -> Option<PowerFrame> {
    if frame.len() < MIN_POWER_FRAME_LEN {
        return None;
    }

    let mut buf = frame;
    let flags = MeasurementFlags::new(buf.get_u16_le());
    let power_watts = buf.get_u16_le();

    Some(PowerFrame { flags, power_watts })
}

/// Decode the crank revolution block of a power measurement frame
///
/// - Bytes 4-5: Cumulative crank revolutions
/// - Bytes 6-7: Last crank event time (1/1024 s)
///
/// Returns `None` unless the crank revolution flag is set and the frame is
/// at least [`MIN_CRANK_FRAME_LEN`] bytes long.
#[must_use]
pub fn parse_crank_event(frame: &[u8], flags: MeasurementFlags) -> Option<CrankEvent> {
    if !flags.has_crank_revolution_data() || frame.len() < MIN_CRANK_FRAME_LEN {
        return None;
    }

    let mut buf = &frame[CRANK_DATA_OFFSET..];
    let revolutions = buf.get_u16_le();
    let event_time = buf.get_u16_le();

    Some(CrankEvent::new(revolutions, event_time))
}

/// Decode every supported field of a power measurement frame
#[must_use]
pub fn decode_frame(frame: &[u8]) -> Option<DecodedFrame> {
    let power = parse_power(frame)?;
    let crank = parse_crank_event(frame, power.flags);
    Some(DecodedFrame { power, crank })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIRST_CADENCE_FRAME: [u8; 10] =
        [0x02, 0x00, 0xF4, 0x01, 0x0A, 0x00, 0x00, 0x80, 0x00, 0x00];

    #[test]
    fn test_short_frames_yield_nothing() {
        for len in 0..MIN_POWER_FRAME_LEN {
            let frame = vec![0xFF; len];
            assert!(parse_power(&frame).is_none(), "len {len} should be absent");
            assert!(decode_frame(&frame).is_none());
        }
    }

    #[test]
    fn test_parse_power() {
        let frame = [0x00, 0x00, 0xF4, 0x01];
        let parsed = parse_power(&frame).unwrap();
        assert_eq!(parsed.flags.bits(), 0x0000);
        assert_eq!(parsed.power_watts, 500);

        let frame = [0x34, 0x12, 0xFF, 0xFF, 0x99];
        let parsed = parse_power(&frame).unwrap();
        assert_eq!(parsed.flags.bits(), 0x1234);
        assert_eq!(parsed.power_watts, u16::MAX);
    }

    #[test]
    fn test_crank_event_requires_flag() {
        let mut frame = FIRST_CADENCE_FRAME;
        frame[0] = 0x00;
        let flags = parse_power(&frame).unwrap().flags;
        assert!(parse_crank_event(&frame, flags).is_none());

        // Other bits alone do not count as crank data
        frame[0] = 0x21;
        let flags = parse_power(&frame).unwrap().flags;
        assert!(parse_crank_event(&frame, flags).is_none());
    }

    #[test]
    fn test_crank_event_requires_ten_bytes() {
        let flags = MeasurementFlags::new(0x0002);
        for len in 0..MIN_CRANK_FRAME_LEN {
            assert!(
                parse_crank_event(&FIRST_CADENCE_FRAME[..len], flags).is_none(),
                "len {len} should be absent"
            );
        }
        assert!(parse_crank_event(&FIRST_CADENCE_FRAME, flags).is_some());
    }

    #[test]
    fn test_parse_crank_event() {
        let flags = MeasurementFlags::new(0x0002);
        let event = parse_crank_event(&FIRST_CADENCE_FRAME, flags).unwrap();
        assert_eq!(event.revolutions, 10);
        assert_eq!(event.event_time, 0x8000);
    }

    #[test]
    fn test_decode_frame() {
        let decoded = decode_frame(&FIRST_CADENCE_FRAME).unwrap();
        assert_eq!(decoded.power.power_watts, 500);
        assert_eq!(decoded.crank, Some(CrankEvent::new(10, 32768)));

        // Eight bytes: power is decoded, crank block is ignored
        let decoded = decode_frame(&FIRST_CADENCE_FRAME[..8]).unwrap();
        assert_eq!(decoded.power.power_watts, 500);
        assert!(decoded.crank.is_none());
    }

    #[test]
    fn test_decoding_is_repeatable() {
        let first = decode_frame(&FIRST_CADENCE_FRAME);
        for _ in 0..3 {
            assert_eq!(decode_frame(&FIRST_CADENCE_FRAME), first);
        }
    }
}
