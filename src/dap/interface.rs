//! DP and AP register transactions on top of the SWD framing.
//!
//! This layer owns the WAIT retry policy, the SELECT bank cache, the
//! pipelined AP read path through RDBUFF and the power handshake. AP
//! writes are posted by the hardware; sequences that must complete use an
//! RDBUFF read as a barrier.

use std::thread;
use std::time::Duration;

use super::{CtrlStat, DpIdr, DpRegister, RdBuff, Select, AP_DRW, AP_TAR};
use crate::error::{SwdError, SwdResult};
use crate::probe::swd::{PortType, SwdLink, TransferStatistics};
use crate::probe::{WireConfig, WireTransport};

/// Spacing between attempts when the target answers WAIT.
const WAIT_RETRY_INTERVAL: Duration = Duration::from_micros(100);

/// Power-up ACK poll budget: 10 polls at 20 ms.
const POWER_UP_POLLS: u32 = 10;
const POWER_UP_INTERVAL: Duration = Duration::from_millis(20);

/// The Debug Access Port: framing plus routing and power state.
#[derive(Debug)]
pub(crate) struct DapInterface {
    link: SwdLink,
    /// AP selected for all AP transactions.
    ap_sel: u8,
    /// ctrlsel bit of SELECT; always set for the RISC-V debug path.
    ctrl_sel: bool,
    /// What the hardware last saw in SELECT. `None` after a failed write.
    cached_select: Option<Select>,
    /// Both power ACKs have been observed.
    powered: bool,
}

impl DapInterface {
    pub fn new(wire: Box<dyn WireTransport>, config: WireConfig) -> Self {
        Self {
            link: SwdLink::new(wire, config),
            ap_sel: 0,
            ctrl_sel: true,
            cached_select: None,
            powered: false,
        }
    }

    pub fn config(&self) -> &WireConfig {
        self.link.config()
    }

    pub fn statistics(&self) -> TransferStatistics {
        self.link.statistics()
    }

    pub fn reset_statistics(&mut self) {
        self.link.reset_statistics();
    }

    pub fn powered(&self) -> bool {
        self.powered
    }

    /// Bring the wire up and wake the target into SWD.
    pub fn connect(&mut self) -> SwdResult<()> {
        self.link.connect()
    }

    /// Drop the wire. The routing cache and power state die with it.
    pub fn disconnect(&mut self) {
        self.link.disconnect();
        self.cached_select = None;
        self.powered = false;
    }

    pub fn set_frequency(&mut self, frequency_khz: u32) -> SwdResult<()> {
        self.link.set_frequency(frequency_khz)
    }

    /// Run one transaction with the WAIT retry policy.
    ///
    /// The result starts out as `Wait` so that a zero retry count surfaces
    /// WAIT to the caller without touching the wire.
    fn with_retry<T>(
        &mut self,
        mut transaction: impl FnMut(&mut SwdLink) -> SwdResult<T>,
    ) -> SwdResult<T> {
        let retries = self.link.config().wait_retries;
        let mut result = Err(SwdError::Wait);

        for attempt in 0..retries {
            result = transaction(&mut self.link);
            match &result {
                Err(SwdError::Wait) => {
                    tracing::trace!("WAIT response, attempt {}/{}", attempt + 1, retries);
                    thread::sleep(WAIT_RETRY_INTERVAL);
                }
                _ => break,
            }
        }

        if let Err(SwdError::Fault(_)) = &result {
            // Clear the sticky flags in place so the next transaction
            // starts from a clean slate. Single shot, no retry recursion.
            let _ = self
                .link
                .write_register(PortType::DebugPort, CtrlStat::ADDRESS, STICKY_CLEAR);
        }

        result
    }

    /// Read a DP register, retrying on WAIT.
    pub fn dp_read(&mut self, address: u8) -> SwdResult<u32> {
        self.with_retry(|link| link.read_register(PortType::DebugPort, address))
    }

    /// Write a DP register, retrying on WAIT.
    pub fn dp_write(&mut self, address: u8, value: u32) -> SwdResult<()> {
        self.with_retry(|link| link.write_register(PortType::DebugPort, address, value))
    }

    /// Write SELECT so that `register` is reachable, unless the cached
    /// routing already matches.
    pub fn select_bank(&mut self, register: u8) -> SwdResult<()> {
        let select = Select::routed(self.ap_sel, register >> 4, self.ctrl_sel);

        if self.cached_select == Some(select) {
            return Ok(());
        }

        tracing::debug!("Changing SELECT to {:#010x}", u32::from(select));
        match self.dp_write(Select::ADDRESS, select.into()) {
            Ok(()) => {
                self.cached_select = Some(select);
                Ok(())
            }
            Err(e) => {
                // The hardware state is unknown now.
                self.cached_select = None;
                Err(e)
            }
        }
    }

    /// Read an AP register.
    ///
    /// AP reads are pipelined: the AP transaction returns the previous
    /// value, so the live one is fetched with a follow-up RDBUFF read.
    pub fn ap_read(&mut self, register: u8) -> SwdResult<u32> {
        self.select_bank(register)?;
        self.with_retry(|link| link.read_register(PortType::AccessPort, register & 0xC))?;
        self.dp_read(RdBuff::ADDRESS)
    }

    /// Write an AP register. The write is posted; use [`Self::flush`] to
    /// force completion.
    pub fn ap_write(&mut self, register: u8, value: u32) -> SwdResult<()> {
        self.select_bank(register)?;
        self.with_retry(|link| link.write_register(PortType::AccessPort, register & 0xC, value))
    }

    /// Barrier for posted AP writes: a RDBUFF read stalls until the write
    /// buffer has drained and surfaces any deferred fault.
    pub fn flush(&mut self) -> SwdResult<()> {
        self.dp_read(RdBuff::ADDRESS).map(|_| ())
    }

    /// Read the identification word.
    pub fn read_idcode(&mut self) -> SwdResult<u32> {
        self.dp_read(DpIdr::ADDRESS)
    }

    /// Request debug and system power and wait for both ACKs.
    pub fn power_up(&mut self) -> SwdResult<()> {
        self.dp_write(CtrlStat::ADDRESS, 0)?;

        let mut request = CtrlStat(0);
        request.set_cdbgpwrupreq(true);
        request.set_csyspwrupreq(true);
        self.dp_write(CtrlStat::ADDRESS, request.into())?;

        for _ in 0..POWER_UP_POLLS {
            let status = CtrlStat(self.dp_read(CtrlStat::ADDRESS)?);
            if status.cdbgpwrupack() && status.csyspwrupack() {
                tracing::debug!("Debug power up acknowledged: {:#010x}", u32::from(status));
                self.powered = true;
                return Ok(());
            }
            thread::sleep(POWER_UP_INTERVAL);
        }

        tracing::error!("Power up request was not acknowledged");
        Err(SwdError::Timeout)
    }

    /// Read a 32-bit word through the MEM-AP (TAR then DRW).
    pub fn read_mem32(&mut self, address: u32) -> SwdResult<u32> {
        check_alignment(address, 4)?;
        self.ap_write(AP_TAR, address)?;
        self.ap_read(AP_DRW)
    }

    /// Write a 32-bit word through the MEM-AP and flush it out.
    pub fn write_mem32(&mut self, address: u32, value: u32) -> SwdResult<()> {
        check_alignment(address, 4)?;
        self.ap_write(AP_TAR, address)?;
        self.ap_write(AP_DRW, value)?;
        self.flush()
    }

    /// Clear STICKYORUN, STICKYCMP, STICKYERR and WDATAERR.
    pub fn clear_sticky_errors(&mut self) -> SwdResult<()> {
        self.dp_write(CtrlStat::ADDRESS, STICKY_CLEAR)
    }
}

/// CTRL/STAT write value that clears STICKYORUN, STICKYCMP, STICKYERR and
/// WDATAERR.
const STICKY_CLEAR: u32 = (1 << 1) | (1 << 4) | (1 << 5) | (1 << 7);

pub(crate) fn check_alignment(address: u32, required: u32) -> SwdResult<()> {
    if address % required != 0 {
        return Err(SwdError::Alignment { address, required });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::DapInterface;
    use crate::error::SwdError;
    use crate::probe::mock::MockWire;
    use crate::probe::WireConfig;
    use pretty_assertions::assert_eq;

    fn connected_dap() -> (DapInterface, MockWire) {
        connected_dap_with(WireConfig::default())
    }

    fn connected_dap_with(config: WireConfig) -> (DapInterface, MockWire) {
        let mock = MockWire::new();
        let mut dap = DapInterface::new(Box::new(mock.clone()), config);
        dap.connect().unwrap();
        (dap, mock)
    }

    #[test]
    fn power_up_observes_both_acks() {
        let (mut dap, _mock) = connected_dap();

        dap.power_up().unwrap();

        assert!(dap.powered());
    }

    #[test]
    fn mem32_round_trips_through_tar_and_drw() {
        let (mut dap, _mock) = connected_dap();

        dap.write_mem32(0x2007_7000, 0xCAFE_BABE).unwrap();

        assert_eq!(dap.read_mem32(0x2007_7000).unwrap(), 0xCAFE_BABE);
    }

    #[test]
    fn unaligned_mem32_access_is_rejected() {
        let (mut dap, _mock) = connected_dap();

        let result = dap.read_mem32(0x2007_7002);

        assert_eq!(
            result,
            Err(SwdError::Alignment {
                address: 0x2007_7002,
                required: 4
            })
        );
    }

    #[test]
    fn select_is_written_once_per_bank() {
        let (mut dap, mock) = connected_dap();

        dap.ap_write(0x04, 0x40).unwrap();
        dap.ap_write(0x0C, 0x123).unwrap();
        assert_eq!(mock.target().select_writes, 1);

        // A different bank forces a new SELECT, going back does too.
        dap.ap_write(0x10, 0x0).unwrap();
        assert_eq!(mock.target().select_writes, 2);
        dap.ap_write(0x04, 0x44).unwrap();
        assert_eq!(mock.target().select_writes, 3);
    }

    #[test]
    fn failed_select_write_invalidates_the_cache() {
        let (mut dap, mock) = connected_dap();

        dap.ap_write(0x04, 0x40).unwrap();
        assert_eq!(mock.target().select_writes, 1);

        // The next SELECT write faults; the cache must not claim the
        // hardware saw it. The faulted transaction never commits, so it
        // does not count as a write.
        mock.state().fault_next = true;
        assert!(dap.ap_write(0x10, 0x0).is_err());
        assert_eq!(mock.target().select_writes, 1);

        dap.ap_write(0x10, 0x0).unwrap();
        let writes = mock.target().select_writes;
        assert_eq!(writes, 2, "SELECT must be re-written after the fault");
    }

    #[test]
    fn wait_responses_are_retried() {
        let (mut dap, mock) = connected_dap();
        mock.state().wait_responses = 3;

        let idcode = dap.read_idcode().unwrap();

        assert_eq!(idcode, 0x4C01_3477);
        assert_eq!(dap.statistics().wait_responses, 3);
    }

    #[test]
    fn zero_retries_surface_wait_without_touching_the_wire() {
        let (mut dap, mock) = connected_dap_with(WireConfig {
            wait_retries: 0,
            ..WireConfig::default()
        });
        let transfers_before = mock.state().transfer_count;

        let result = dap.read_idcode();

        assert_eq!(result, Err(SwdError::Wait));
        assert_eq!(mock.state().transfer_count, transfers_before);
    }

    #[test]
    fn fault_clears_sticky_flags_in_place() {
        let (mut dap, mock) = connected_dap();
        mock.state().fault_next = true;

        let result = dap.read_idcode();

        assert!(matches!(result, Err(SwdError::Fault(_))));
        assert!(
            !mock.target().sticky_fault,
            "sticky flags must be cleared before the error is surfaced"
        );
    }
}
