//! Link bring-up sequences.
//!
//! The RP2350 debug port powers up dormant. Waking it takes two
//! ARM-specified magic bit sequences which have to hit the wire exactly:
//! first the JTAG state machine is parked in the dormant state, then the
//! dormant-to-SWD selection alert (including the SWD activation code)
//! switches the port over. Both are followed by a line reset.
//!
//! All bytes are transmitted first byte first, LSB-first within each byte.
//! The `BC E3` tail of [`JTAG_TO_DORMANT`] is the 16-bit dormant select
//! value 0xE3BC; the 16 middle bytes of [`DORMANT_TO_SWD`] are the 128-bit
//! selection alert.

use super::WireTransport;

/// ≥50 ones park any SWD state machine in line reset.
pub(crate) const LINE_RESET_ONES: u32 = 56;

/// Idle cycles clocked after the line reset ones.
pub(crate) const LINE_RESET_IDLE: u8 = 8;

/// 56 ones, then the dormant select value.
pub(crate) const JTAG_TO_DORMANT: [u8; 9] =
    [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xBC, 0xE3];

/// 8 ones, the 128-bit selection alert, 4 low cycles plus the SWD
/// activation code, then a trailing line reset and idle.
pub(crate) const DORMANT_TO_SWD: [u8; 29] = [
    0xFF, 0x92, 0xF3, 0x09, 0x62, 0x95, 0x2D, 0x85, 0x86, 0xE9, 0xAF, 0xDD, 0xE3, 0xA2, 0x0E,
    0xBC, 0x19, 0xA0, 0xF1, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00,
];

/// Shift a byte sequence out, first byte first, LSB-first per byte.
///
/// The transport must already be in write mode.
pub(crate) fn send_sequence(wire: &mut dyn WireTransport, bytes: &[u8]) {
    for byte in bytes {
        wire.shift_out(u32::from(*byte), 8);
    }
}

/// Issue a line reset: 56 ones followed by idle cycles.
///
/// The transport must already be in write mode.
pub(crate) fn line_reset(wire: &mut dyn WireTransport) {
    tracing::debug!("Performing line reset");

    let mut remaining = LINE_RESET_ONES;
    while remaining > 0 {
        let chunk = remaining.min(32);
        wire.shift_out(u32::MAX, chunk as u8);
        remaining -= chunk;
    }
    wire.shift_out(0, LINE_RESET_IDLE);
}

/// Take the debug port from power-on dormant state into SWD operation.
pub(crate) fn wake_to_swd(wire: &mut dyn WireTransport) {
    tracing::debug!("Waking debug port: JTAG -> dormant -> SWD");

    wire.enter_write_mode();
    send_sequence(wire, &JTAG_TO_DORMANT);
    send_sequence(wire, &DORMANT_TO_SWD);
    line_reset(wire);
}

#[cfg(test)]
mod tests {
    use super::{DORMANT_TO_SWD, JTAG_TO_DORMANT};

    fn bits_of(bytes: &[u8]) -> Vec<bool> {
        bytes
            .iter()
            .flat_map(|byte| (0..8).map(move |bit| byte & (1 << bit) != 0))
            .collect()
    }

    #[test]
    fn jtag_to_dormant_carries_the_dormant_select_value() {
        let bits = bits_of(&JTAG_TO_DORMANT);

        // 56 ones park the line, then the 16-bit select value 0xE3BC
        // arrives LSB first.
        assert!(bits[..56].iter().all(|bit| *bit));

        let mut select = 0u16;
        for (i, bit) in bits[56..72].iter().enumerate() {
            select |= u16::from(*bit) << i;
        }
        assert_eq!(select, 0xE3BC);
    }

    #[test]
    fn dormant_to_swd_ends_with_line_reset_and_idle() {
        let bits = bits_of(&DORMANT_TO_SWD);

        // Trailing byte is 8 idle cycles, preceded by at least 50 ones.
        let idle = &bits[bits.len() - 8..];
        assert!(idle.iter().all(|bit| !bit));

        let ones = bits[..bits.len() - 8]
            .iter()
            .rev()
            .take_while(|bit| **bit)
            .count();
        assert!(ones >= 50, "only {ones} ones before the trailing idle");
    }
}
