//! SWD framing.
//!
//! Turns single DP/AP register transactions into the exact wire pattern:
//! 8-bit request header, turnaround, 3 ACK bits, then a 32-bit data phase
//! with parity in the direction the request asked for. WAIT and FAULT
//! surface as typed errors (retry policy lives one layer up, in the DAP);
//! anything else on the ACK lines is treated as line corruption and
//! answered with a drain plus line reset.

use super::{sequences, WireConfig, WireTransport};
use crate::error::{SwdError, SwdResult};

const ACK_OK: u32 = 0b001;
const ACK_WAIT: u32 = 0b010;
const ACK_FAULT: u32 = 0b100;

/// The two register spaces reachable through an SWD request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortType {
    /// Debug Port registers.
    DebugPort,
    /// Access Port registers (via the current SELECT).
    AccessPort,
}

/// Running counters over everything the link has done.
///
/// Purely diagnostic; reset through [`crate::Target::clear_errors`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransferStatistics {
    /// Number of transactions put on the wire.
    pub transfers: u64,
    /// WAIT acknowledgements received.
    pub wait_responses: u64,
    /// FAULT acknowledgements received.
    pub faults: u64,
    /// Read responses with bad parity.
    pub parity_errors: u64,
    /// Malformed acknowledgements.
    pub protocol_errors: u64,
    /// Line resets issued to recover from protocol errors.
    pub line_resets: u64,
}

/// Build the 8-bit request header for a register transaction.
///
/// Bit order as transmitted (LSB first): start=1, APnDP, RnW, A2, A3,
/// parity over the previous four, stop=0, park=1.
pub(crate) fn request_byte(port: PortType, address: u8, read: bool) -> u8 {
    let ap = port == PortType::AccessPort;
    let a2 = address & 0x4 != 0;
    let a3 = address & 0x8 != 0;
    let parity = ap ^ read ^ a2 ^ a3;

    1 | (u8::from(ap) << 1)
        | (u8::from(read) << 2)
        | (u8::from(a2) << 3)
        | (u8::from(a3) << 4)
        | (u8::from(parity) << 5)
        | (1 << 7)
}

/// One SWD link: a wire transport plus its configuration and statistics.
#[derive(Debug)]
pub(crate) struct SwdLink {
    wire: Box<dyn WireTransport>,
    config: WireConfig,
    stats: TransferStatistics,
}

impl SwdLink {
    pub fn new(wire: Box<dyn WireTransport>, config: WireConfig) -> Self {
        Self {
            wire,
            config,
            stats: TransferStatistics::default(),
        }
    }

    pub fn config(&self) -> &WireConfig {
        &self.config
    }

    pub fn statistics(&self) -> TransferStatistics {
        self.stats
    }

    pub fn reset_statistics(&mut self) {
        self.stats = TransferStatistics::default();
    }

    /// Acquire the wire resources and wake the debug port into SWD.
    pub fn connect(&mut self) -> SwdResult<()> {
        self.wire.connect(&self.config)?;
        sequences::wake_to_swd(self.wire.as_mut());
        Ok(())
    }

    /// Release the wire resources. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        self.wire.release();
    }

    pub fn set_frequency(&mut self, frequency_khz: u32) -> SwdResult<()> {
        self.wire.set_frequency(frequency_khz)?;
        self.config.frequency_khz = frequency_khz;
        Ok(())
    }

    /// Single read transaction, no retry.
    pub fn read_register(&mut self, port: PortType, address: u8) -> SwdResult<u32> {
        self.stats.transfers += 1;

        self.wire.enter_write_mode();
        self.wire
            .shift_out(u32::from(request_byte(port, address, true)), 8);
        self.wire.turnaround(self.config.turnaround_cycles);
        self.wire.enter_read_mode();

        match self.wire.shift_in(3) {
            ACK_OK => {
                let value = self.wire.shift_in(32);
                let parity = self.wire.shift_in(1) != 0;
                self.back_to_idle();

                if parity != (value.count_ones() % 2 == 1) {
                    self.stats.parity_errors += 1;
                    return Err(SwdError::Parity(format!(
                        "{port:?} register {address:#x}, data {value:#010x}"
                    )));
                }
                tracing::trace!("SWD read {:?} {:#x} = {:#010x}", port, address, value);
                Ok(value)
            }
            ACK_WAIT => {
                self.back_to_idle();
                self.stats.wait_responses += 1;
                Err(SwdError::Wait)
            }
            ACK_FAULT => {
                self.back_to_idle();
                self.stats.faults += 1;
                Err(SwdError::Fault(format!(
                    "read of {port:?} register {address:#x}"
                )))
            }
            other => Err(self.recover_protocol(port, address, other)),
        }
    }

    /// Single write transaction, no retry.
    pub fn write_register(&mut self, port: PortType, address: u8, value: u32) -> SwdResult<()> {
        self.stats.transfers += 1;

        self.wire.enter_write_mode();
        self.wire
            .shift_out(u32::from(request_byte(port, address, false)), 8);
        self.wire.turnaround(self.config.turnaround_cycles);
        self.wire.enter_read_mode();

        match self.wire.shift_in(3) {
            ACK_OK => {
                self.wire.turnaround(self.config.turnaround_cycles);
                self.wire.enter_write_mode();
                self.wire.shift_out(value, 32);
                self.wire.shift_out(value.count_ones() & 1, 1);
                self.idle();
                tracing::trace!("SWD write {:?} {:#x} = {:#010x}", port, address, value);
                Ok(())
            }
            ACK_WAIT => {
                self.back_to_idle();
                self.stats.wait_responses += 1;
                Err(SwdError::Wait)
            }
            ACK_FAULT => {
                self.back_to_idle();
                self.stats.faults += 1;
                Err(SwdError::Fault(format!(
                    "write of {value:#010x} to {port:?} register {address:#x}"
                )))
            }
            other => Err(self.recover_protocol(port, address, other)),
        }
    }

    /// Turn the bus around and clock the trailing idle cycles.
    fn back_to_idle(&mut self) {
        self.wire.turnaround(self.config.turnaround_cycles);
        self.wire.enter_write_mode();
        self.idle();
    }

    fn idle(&mut self) {
        if self.config.idle_cycles > 0 {
            self.wire.shift_out(0, self.config.idle_cycles);
        }
    }

    /// A malformed ACK means the line is out of sync: clock out enough
    /// cycles to drain whatever the target thinks it is sending, then
    /// reset the line.
    fn recover_protocol(&mut self, port: PortType, address: u8, ack: u32) -> SwdError {
        tracing::warn!(
            "Malformed ACK {:#05b} on {:?} register {:#x}, resetting line",
            ack,
            port,
            address
        );
        self.stats.protocol_errors += 1;

        self.wire.shift_in(32);
        self.wire.shift_in(1);
        self.wire.turnaround(self.config.turnaround_cycles);
        self.wire.enter_write_mode();
        sequences::line_reset(self.wire.as_mut());
        self.stats.line_resets += 1;

        SwdError::Protocol(format!(
            "unexpected ACK {ack:#05b} on {port:?} register {address:#x}"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::{request_byte, PortType, SwdLink};
    use crate::error::SwdError;
    use crate::probe::mock::MockWire;
    use crate::probe::WireConfig;
    use pretty_assertions::assert_eq;

    fn connected_link() -> (SwdLink, MockWire) {
        let mock = MockWire::new();
        let mut link = SwdLink::new(Box::new(mock.clone()), WireConfig::default());
        link.connect().unwrap();
        (link, mock)
    }

    #[test]
    fn request_bytes_match_the_wire_encoding() {
        // Well-known request header values.
        assert_eq!(request_byte(PortType::DebugPort, 0x0, true), 0xA5);
        assert_eq!(request_byte(PortType::AccessPort, 0x0, true), 0x87);
        assert_eq!(request_byte(PortType::DebugPort, 0x8, false), 0xB1);
        assert_eq!(request_byte(PortType::AccessPort, 0xC, false), 0xBB);
    }

    #[test]
    fn reads_idcode_after_wake_up() {
        let (mut link, _mock) = connected_link();

        let idcode = link.read_register(PortType::DebugPort, 0x0).unwrap();

        assert_eq!(idcode, 0x4C01_3477);
        assert_eq!(link.statistics().transfers, 1);
    }

    #[test]
    fn write_transaction_is_parsed_as_a_single_request() {
        let (mut link, mock) = connected_link();

        link.write_register(PortType::DebugPort, 0x8, 0x0000_0D01)
            .unwrap();

        assert_eq!(link.statistics().transfers, 1);
        let requests = mock.state().requests.clone();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].ap);
        assert!(!requests[0].read);
        assert_eq!(requests[0].address, 0x8);
    }

    #[test]
    fn wait_ack_surfaces_as_wait_error() {
        let (mut link, mock) = connected_link();
        mock.state().wait_responses = 1;

        let result = link.read_register(PortType::DebugPort, 0x0);

        assert_eq!(result, Err(SwdError::Wait));
        assert_eq!(link.statistics().wait_responses, 1);

        // The next attempt goes through untouched.
        assert!(link.read_register(PortType::DebugPort, 0x0).is_ok());
    }

    #[test]
    fn fault_ack_carries_context() {
        let (mut link, mock) = connected_link();
        mock.state().fault_next = true;

        let result = link.write_register(PortType::AccessPort, 0x4, 0x40);

        match result {
            Err(SwdError::Fault(context)) => assert!(context.contains("0x4")),
            other => panic!("expected fault, got {other:?}"),
        }
        assert_eq!(link.statistics().faults, 1);
    }

    #[test]
    fn bad_read_parity_is_detected() {
        let (mut link, mock) = connected_link();
        mock.state().corrupt_parity_next = true;

        let result = link.read_register(PortType::DebugPort, 0x0);

        assert!(matches!(result, Err(SwdError::Parity(_))));
        assert_eq!(link.statistics().parity_errors, 1);
    }

    #[test]
    fn malformed_ack_drains_and_resets_the_line() {
        let (mut link, mock) = connected_link();
        let resets_before = mock.state().line_resets;
        mock.state().protocol_next = true;

        let result = link.read_register(PortType::DebugPort, 0x0);

        assert!(matches!(result, Err(SwdError::Protocol(_))));
        assert_eq!(mock.state().line_resets, resets_before + 1);

        // The link is usable again after the recovery.
        assert_eq!(
            link.read_register(PortType::DebugPort, 0x0).unwrap(),
            0x4C01_3477
        );
    }
}
