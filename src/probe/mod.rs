//! Wire transport abstraction.
//!
//! The lowest layer of the stack. A [`WireTransport`] knows how to clock
//! raw bits over the two SWD wires and nothing else; everything protocol
//! shaped (request framing, ACK handling, wake-up sequences) lives in
//! [`swd`] and the sequences module. Concrete backends may use
//! bit-banging, DMA, an on-chip programmable I/O block or an FPGA; the
//! driver does not care.

pub(crate) mod sequences;
pub mod swd;

#[cfg(test)]
pub(crate) mod mock;

use crate::error::SwdResult;

/// Pin assignment and link configuration for a target handle.
///
/// Immutable after creation, except for the clock frequency which can be
/// re-set through [`crate::Target::set_frequency`].
#[derive(Debug, Clone)]
pub struct WireConfig {
    /// GPIO driving SWCLK.
    pub swclk_pin: u8,
    /// GPIO driving/sampling SWDIO.
    pub swdio_pin: u8,
    /// Requested SWCLK frequency in kHz.
    pub frequency_khz: u32,
    /// How often a transaction is retried when the target responds WAIT.
    pub wait_retries: u32,
    /// Idle cycles clocked out after every transaction.
    pub idle_cycles: u8,
    /// Turnaround length in cycles. The SWD default is 1.
    pub turnaround_cycles: u8,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            swclk_pin: 2,
            swdio_pin: 3,
            frequency_khz: 1000,
            wait_retries: 8,
            idle_cycles: 8,
            turnaround_cycles: 1,
        }
    }
}

/// Contract every wire backend has to fulfill.
///
/// The driver promises that a direction change is always preceded by a
/// [`WireTransport::turnaround`] call, and that `shift_out` only happens in
/// write mode and `shift_in` only in read mode. Bits travel LSB-first in
/// both directions.
pub trait WireTransport: std::fmt::Debug {
    /// Acquire pins, state machines and clocking for this link.
    ///
    /// Returns [`crate::SwdError::ResourceBusy`] when the backend has no
    /// free resources left.
    fn connect(&mut self, config: &WireConfig) -> SwdResult<()>;

    /// Release everything acquired by [`WireTransport::connect`].
    ///
    /// Must be safe to call more than once.
    fn release(&mut self);

    /// Recompute the clock divider for the requested SWCLK frequency.
    ///
    /// Implementations clamp to their representable divider range.
    fn set_frequency(&mut self, frequency_khz: u32) -> SwdResult<()>;

    /// Start driving the data line.
    fn enter_write_mode(&mut self);

    /// Release the data line (host side tri-state).
    fn enter_read_mode(&mut self);

    /// Clock out 1..=32 bits, LSB first. Write mode only.
    fn shift_out(&mut self, value: u32, bits: u8);

    /// Clock in 1..=32 bits, LSB first. Read mode only.
    fn shift_in(&mut self, bits: u8) -> u32;

    /// Clock `cycles` cycles with the bus tri-stated.
    fn turnaround(&mut self, cycles: u8);
}
