//! The target handle: lifecycle and the public debugger verbs.
//!
//! A handle owns one wire transport, the DAP state and the debug module
//! state for the two Hazard3 harts. It is created once per physical link
//! and not meant to be shared across threads.

use std::sync::Arc;

use crate::dap::DapInterface;
use crate::error::{SwdError, SwdResult};
use crate::probe::swd::TransferStatistics;
use crate::probe::{WireConfig, WireTransport};
use crate::registry::{self, TargetInfo};
use crate::riscv::{DebugModuleInterface, DmState, TraceRecord};

/// Everything configurable about a target handle.
#[derive(Debug, Clone, Default)]
pub struct TargetConfig {
    /// Pin assignment and link parameters.
    pub wire: WireConfig,
    /// Whether the per-hart GPR cache starts enabled.
    pub cache_enabled: bool,
}

/// A debuggable RP2350 behind one SWD link.
///
/// Lifecycle: create, [`connect`](Target::connect),
/// [`power_up`](Target::power_up), [`init_debug_module`](Target::init_debug_module),
/// any number of debug operations, [`disconnect`](Target::disconnect).
/// Dropping the handle disconnects.
#[derive(Debug)]
pub struct Target {
    dap: DapInterface,
    dm: DmState,
    connected: bool,
    idcode: Option<u32>,
    info: Arc<TargetInfo>,
}

impl Target {
    /// Create a handle around a wire backend. Nothing touches the wire
    /// until [`Target::connect`].
    pub fn new(wire: Box<dyn WireTransport>, config: TargetConfig) -> Self {
        let info = Arc::new(TargetInfo {
            swclk_pin: config.wire.swclk_pin,
            swdio_pin: config.wire.swdio_pin,
            frequency_khz: config.wire.frequency_khz,
        });
        registry::register(&info);

        Self {
            dap: DapInterface::new(wire, config.wire),
            dm: DmState::new(config.cache_enabled),
            connected: false,
            idcode: None,
            info,
        }
    }

    // -- lifecycle ---------------------------------------------------------

    /// Acquire the wire, wake the debug port and read its IDCODE.
    ///
    /// Connecting an already connected handle is a state error.
    pub fn connect(&mut self) -> SwdResult<()> {
        if self.connected {
            return Err(SwdError::InvalidState("already connected".to_string()));
        }

        self.dap.connect()?;

        let idcode = match self.dap.read_idcode() {
            Ok(idcode) => idcode,
            Err(e) => {
                self.dap.disconnect();
                return Err(e);
            }
        };
        if idcode & 0x0FFF_FFFF == 0 {
            self.dap.disconnect();
            return Err(SwdError::InvalidState(format!(
                "implausible IDCODE {idcode:#010x}, is the target wired up?"
            )));
        }

        tracing::info!("Connected, IDCODE {:#010x}", idcode);
        self.idcode = Some(idcode);
        self.connected = true;
        Ok(())
    }

    /// Release the wire resources. A second disconnect is a no-op.
    pub fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        tracing::info!("Disconnecting");
        self.dap.disconnect();
        self.dm = DmState::new(self.dm.cache_enabled);
        self.idcode = None;
        self.connected = false;
    }

    /// Whether [`Target::connect`] has succeeded on this handle.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The IDCODE read while connecting.
    pub fn idcode(&self) -> Option<u32> {
        self.idcode
    }

    /// Whether the debug power domains are up.
    pub fn powered(&self) -> bool {
        self.dap.powered()
    }

    /// Run the debug power handshake.
    pub fn power_up(&mut self) -> SwdResult<()> {
        self.require_connected()?;
        self.dap.power_up()
    }

    /// Activate the debug module and bring up the system bus engine.
    pub fn init_debug_module(&mut self) -> SwdResult<()> {
        self.require_connected()?;
        let mut dm = DebugModuleInterface::new(&mut self.dap, &mut self.dm);
        dm.activate()?;
        dm.init_system_bus()
    }

    /// Re-program the SWCLK frequency.
    pub fn set_frequency(&mut self, frequency_khz: u32) -> SwdResult<()> {
        self.require_connected()?;
        self.dap.set_frequency(frequency_khz)
    }

    /// Clear the DAP sticky error flags and reset the transfer counters.
    pub fn clear_errors(&mut self) -> SwdResult<()> {
        self.require_connected()?;
        self.dap.clear_sticky_errors()?;
        self.dap.reset_statistics();
        Ok(())
    }

    /// Counters over everything this link has done so far.
    pub fn statistics(&self) -> TransferStatistics {
        self.dap.statistics()
    }

    // -- hart run control --------------------------------------------------

    /// Halt a hart. Returns [`SwdError::AlreadyHalted`] (a soft code) when
    /// it was halted already.
    pub fn halt(&mut self, hart: usize) -> SwdResult<()> {
        self.require_connected()?;
        self.dm().halt(hart)
    }

    /// Resume a halted hart.
    pub fn resume(&mut self, hart: usize) -> SwdResult<()> {
        self.require_connected()?;
        self.dm().resume(hart)
    }

    /// Execute exactly one instruction on a halted hart.
    pub fn step(&mut self, hart: usize) -> SwdResult<()> {
        self.require_connected()?;
        self.dm().step(hart)
    }

    /// Reset the target, optionally halting the hart on its first
    /// instruction.
    pub fn reset(&mut self, hart: usize, halt_after: bool) -> SwdResult<()> {
        self.require_connected()?;
        self.dm().reset(hart, halt_after)
    }

    /// Whether the hart is halted, asking the hardware if necessary.
    pub fn is_halted(&mut self, hart: usize) -> SwdResult<bool> {
        self.require_connected()?;
        self.dm().hart_halted(hart)
    }

    // -- registers ---------------------------------------------------------

    /// Read GPR `xN` of a halted hart.
    pub fn read_reg(&mut self, hart: usize, index: usize) -> SwdResult<u32> {
        self.require_connected()?;
        self.dm().read_gpr(hart, index)
    }

    /// Write GPR `xN` of a halted hart.
    pub fn write_reg(&mut self, hart: usize, index: usize, value: u32) -> SwdResult<()> {
        self.require_connected()?;
        self.dm().write_gpr(hart, index, value)
    }

    /// Read all 32 GPRs in one sweep.
    pub fn read_all_regs(&mut self, hart: usize) -> SwdResult<[u32; 32]> {
        self.require_connected()?;
        self.dm().read_all_gprs(hart)
    }

    /// Read a CSR of a halted hart.
    pub fn read_csr(&mut self, hart: usize, csr: u16) -> SwdResult<u32> {
        self.require_connected()?;
        self.dm().read_csr(hart, csr)
    }

    /// Write a CSR of a halted hart.
    pub fn write_csr(&mut self, hart: usize, csr: u16, value: u32) -> SwdResult<()> {
        self.require_connected()?;
        self.dm().write_csr(hart, csr, value)
    }

    /// The PC the halted hart will resume at.
    pub fn read_pc(&mut self, hart: usize) -> SwdResult<u32> {
        self.require_connected()?;
        self.dm().read_pc(hart)
    }

    /// Redirect where the halted hart will resume.
    pub fn write_pc(&mut self, hart: usize, pc: u32) -> SwdResult<()> {
        self.require_connected()?;
        self.dm().write_pc(hart, pc)
    }

    // -- memory ------------------------------------------------------------

    /// Read a 32-bit word, independent of hart state.
    pub fn read_mem32(&mut self, address: u32) -> SwdResult<u32> {
        self.require_connected()?;
        self.dm().read_mem32(address)
    }

    /// Write a 32-bit word, independent of hart state.
    pub fn write_mem32(&mut self, address: u32, value: u32) -> SwdResult<()> {
        self.require_connected()?;
        self.dm().write_mem32(address, value)
    }

    /// Read a halfword (2-byte aligned).
    pub fn read_mem16(&mut self, address: u32) -> SwdResult<u16> {
        self.require_connected()?;
        self.dm().read_mem16(address)
    }

    /// Write a halfword (2-byte aligned).
    pub fn write_mem16(&mut self, address: u32, value: u16) -> SwdResult<()> {
        self.require_connected()?;
        self.dm().write_mem16(address, value)
    }

    /// Read a byte.
    pub fn read_mem8(&mut self, address: u32) -> SwdResult<u8> {
        self.require_connected()?;
        self.dm().read_mem8(address)
    }

    /// Write a byte.
    pub fn write_mem8(&mut self, address: u32, value: u8) -> SwdResult<()> {
        self.require_connected()?;
        self.dm().write_mem8(address, value)
    }

    /// Read a block of consecutive words.
    pub fn read_mem_block(&mut self, address: u32, data: &mut [u32]) -> SwdResult<()> {
        self.require_connected()?;
        self.dm().read_mem_block(address, data)
    }

    /// Write a block of consecutive words.
    pub fn write_mem_block(&mut self, address: u32, data: &[u32]) -> SwdResult<()> {
        self.require_connected()?;
        self.dm().write_mem_block(address, data)
    }

    /// Read a block of bytes at any alignment.
    pub fn read_mem_block_u8(&mut self, address: u32, data: &mut [u8]) -> SwdResult<()> {
        self.require_connected()?;
        self.dm().read_mem_block_u8(address, data)
    }

    /// Write a block of bytes at any alignment.
    pub fn write_mem_block_u8(&mut self, address: u32, data: &[u8]) -> SwdResult<()> {
        self.require_connected()?;
        self.dm().write_mem_block_u8(address, data)
    }

    // -- code execution ----------------------------------------------------

    /// Write a program into memory with per-word read-back verification.
    pub fn upload_code(&mut self, address: u32, code: &[u32]) -> SwdResult<()> {
        self.require_connected()?;
        self.dm().upload_code(address, code)
    }

    /// Upload a program, point the hart at it and let it run.
    pub fn execute_code(&mut self, hart: usize, address: u32, code: &[u32]) -> SwdResult<()> {
        self.require_connected()?;
        self.dm().execute_code(hart, address, code)
    }

    /// Run 1..=16 instructions straight from the program buffer on a
    /// halted hart.
    pub fn execute_progbuf(&mut self, hart: usize, instructions: &[u32]) -> SwdResult<()> {
        self.require_connected()?;
        self.dm().execute_progbuf(hart, instructions)
    }

    /// Single-step through the program on a halted hart, reporting every
    /// instruction. Returns the number of instructions traced;
    /// `max_instructions` 0 means unbounded.
    pub fn trace<F>(
        &mut self,
        hart: usize,
        max_instructions: u32,
        capture_regs: bool,
        mut callback: F,
    ) -> SwdResult<u32>
    where
        F: FnMut(&TraceRecord) -> bool,
    {
        self.require_connected()?;
        self.dm().trace(hart, max_instructions, capture_regs, &mut callback)
    }

    // -- cache control -----------------------------------------------------

    /// Switch the GPR cache on or off. Either transition leaves all cache
    /// slots invalid.
    pub fn enable_cache(&mut self, enabled: bool) {
        DebugModuleInterface::new(&mut self.dap, &mut self.dm).set_cache_enabled(enabled);
    }

    /// Drop the cached GPR values of one hart.
    pub fn invalidate_cache(&mut self, hart: usize) -> SwdResult<()> {
        DebugModuleInterface::new(&mut self.dap, &mut self.dm).invalidate_cache(hart)
    }

    // -- plumbing ----------------------------------------------------------

    fn dm(&mut self) -> DebugModuleInterface<'_> {
        DebugModuleInterface::new(&mut self.dap, &mut self.dm)
    }

    fn require_connected(&self) -> SwdResult<()> {
        if !self.connected {
            return Err(SwdError::NotConnected);
        }
        Ok(())
    }

    /// Registry descriptor of this handle.
    pub fn info(&self) -> &Arc<TargetInfo> {
        &self.info
    }
}

impl Drop for Target {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::{Target, TargetConfig};
    use crate::error::SwdError;
    use crate::probe::mock::MockWire;
    use crate::probe::WireConfig;
    use crate::registry;
    use pretty_assertions::assert_eq;

    fn new_target() -> (Target, MockWire) {
        let mock = MockWire::new();
        let target = Target::new(
            Box::new(mock.clone()),
            TargetConfig {
                wire: WireConfig::default(),
                cache_enabled: true,
            },
        );
        (target, mock)
    }

    /// Connected, powered, debug module activated.
    fn ready_target() -> (Target, MockWire) {
        let (mut target, mock) = new_target();
        target.connect().unwrap();
        target.power_up().unwrap();
        target.init_debug_module().unwrap();
        (target, mock)
    }

    #[test]
    fn cold_bring_up() {
        let (mut target, _mock) = new_target();

        target.connect().unwrap();
        let idcode = target.idcode().unwrap();
        assert_ne!(idcode & 0x0FFF_FFFF, 0);

        target.power_up().unwrap();
        assert!(target.powered());

        target.init_debug_module().unwrap();
        assert!(target.is_halted(0).is_ok());
    }

    #[test]
    fn second_connect_is_a_state_error() {
        let (mut target, _mock) = new_target();
        target.connect().unwrap();

        assert!(matches!(
            target.connect(),
            Err(SwdError::InvalidState(_))
        ));
        assert!(target.is_connected());
    }

    #[test]
    fn operations_require_a_connection() {
        let (mut target, _mock) = new_target();

        assert_eq!(target.halt(0), Err(SwdError::NotConnected));
        assert_eq!(target.read_mem32(0x2000_0000), Err(SwdError::NotConnected));
        assert_eq!(target.power_up(), Err(SwdError::NotConnected));
    }

    #[test]
    fn disconnect_is_idempotent_and_releases_the_wire() {
        let (mut target, mock) = new_target();
        target.connect().unwrap();

        target.disconnect();
        assert!(mock.state().released);
        assert!(!target.is_connected());

        // A second disconnect is a no-op, and the handle can reconnect.
        target.disconnect();
        target.connect().unwrap();
        assert!(target.is_connected());
    }

    #[test]
    fn dropping_the_handle_disconnects() {
        let (mut target, mock) = new_target();
        target.connect().unwrap();

        drop(target);

        assert!(mock.state().released);
    }

    #[test]
    fn refused_wire_resources_surface_as_resource_busy() {
        let (mut target, mock) = new_target();
        mock.state().refuse_connect = true;

        assert_eq!(target.connect(), Err(SwdError::ResourceBusy));
        assert!(!target.is_connected());
    }

    #[test]
    fn handles_show_up_in_the_registry_while_alive() {
        let mock = MockWire::new();
        let config = TargetConfig {
            wire: WireConfig {
                swclk_pin: 26,
                swdio_pin: 27,
                ..WireConfig::default()
            },
            cache_enabled: false,
        };
        let target = Target::new(Box::new(mock.clone()), config);

        assert!(registry::active_targets()
            .iter()
            .any(|info| info.swclk_pin == 26 && info.swdio_pin == 27));

        drop(target);
        assert!(!registry::active_targets()
            .iter()
            .any(|info| info.swclk_pin == 26));
    }

    #[test]
    fn set_frequency_reaches_the_wire() {
        let (mut target, mock) = new_target();
        target.connect().unwrap();

        target.set_frequency(4000).unwrap();

        assert_eq!(mock.state().frequency_khz, 4000);
    }

    #[test]
    fn clear_errors_resets_the_statistics() {
        let (mut target, _mock) = ready_target();
        assert_ne!(target.statistics().transfers, 0);

        target.clear_errors().unwrap();

        assert_eq!(target.statistics().transfers, 0);
    }

    #[test]
    fn gpr_round_trip() {
        let (mut target, _mock) = ready_target();

        target.halt(0).unwrap();
        target.write_reg(0, 5, 0xCAFE_BABE).unwrap();
        assert_eq!(target.read_reg(0, 5).unwrap(), 0xCAFE_BABE);
        target.resume(0).unwrap();
    }

    #[test]
    fn harts_are_isolated_from_each_other() {
        let (mut target, _mock) = ready_target();

        target.halt(0).unwrap();
        target.halt(1).unwrap();

        target.write_reg(0, 10, 0xAAAA_AAAA).unwrap();
        target.write_reg(1, 10, 0x5555_5555).unwrap();

        assert_eq!(target.read_reg(0, 10).unwrap(), 0xAAAA_AAAA);
        assert_eq!(target.read_reg(1, 10).unwrap(), 0x5555_5555);

        // Dropping hart 0's cache must not disturb either view.
        target.invalidate_cache(0).unwrap();
        assert_eq!(target.read_reg(0, 10).unwrap(), 0xAAAA_AAAA);
        assert_eq!(target.read_reg(1, 10).unwrap(), 0x5555_5555);
    }

    #[test]
    fn addition_program_produces_the_sum() {
        let (mut target, _mock) = ready_target();

        // add x5, x6, x7 / j .
        let program = [0x0073_02B3, 0x0000_006F];

        target.halt(0).unwrap();
        target.write_reg(0, 6, 42).unwrap();
        target.write_reg(0, 7, 58).unwrap();

        target.execute_code(0, 0x2007_7000, &program).unwrap();

        target.halt(0).unwrap();
        assert_eq!(target.read_reg(0, 5).unwrap(), 100);
    }

    #[test]
    fn store_program_writes_through_to_memory() {
        let (mut target, _mock) = ready_target();

        // lui x11, 0x20078 / addi x11, x11, 0 / sw x10, 0(x11) / j .
        let program = [0x2007_85B7, 0x0005_8593, 0x00A5_A023, 0x0000_006F];

        target.halt(0).unwrap();
        target.write_reg(0, 10, 0xCAFE_BABE).unwrap();

        target.execute_code(0, 0x2007_7000, &program).unwrap();

        target.halt(0).unwrap();
        assert_eq!(target.read_mem32(0x2007_8000).unwrap(), 0xCAFE_BABE);
    }

    #[test]
    fn trace_reports_consecutive_instructions() {
        let (mut target, _mock) = ready_target();

        target.halt(0).unwrap();
        target.write_pc(0, 0x2007_0000).unwrap();

        let mut pcs = Vec::new();
        let count = target
            .trace(0, 10, false, |record| {
                pcs.push(record.pc);
                assert!(record.gprs.is_none());
                true
            })
            .unwrap();

        assert_eq!(count, 10);
        assert_eq!(pcs.len(), 10);
        for pair in pcs.windows(2) {
            assert_eq!(pair[1] - pair[0], 4);
        }
    }

    #[test]
    fn trace_stops_when_the_callback_says_so() {
        let (mut target, _mock) = ready_target();

        target.halt(0).unwrap();
        target.write_pc(0, 0x2007_0000).unwrap();

        let mut seen = 0;
        let count = target
            .trace(0, 0, false, |_record| {
                seen += 1;
                seen < 3
            })
            .unwrap();

        assert_eq!(count, 3);
        assert_eq!(seen, 3);
    }

    #[test]
    fn trace_can_snapshot_registers() {
        let (mut target, _mock) = ready_target();

        target.halt(0).unwrap();
        target.write_reg(0, 5, 0x1234).unwrap();
        target.write_pc(0, 0x2007_0000).unwrap();

        let count = target
            .trace(0, 2, true, |record| {
                let gprs = record.gprs.expect("register capture was requested");
                assert_eq!(gprs[5], 0x1234);
                assert_eq!(gprs[0], 0);
                true
            })
            .unwrap();

        assert_eq!(count, 2);
    }

    #[test]
    fn trace_requires_a_halted_hart() {
        let (mut target, _mock) = ready_target();

        let result = target.trace(0, 1, false, |_| true);

        assert_eq!(result, Err(SwdError::NotHalted));
    }

    #[test]
    fn byte_blocks_round_trip_at_any_alignment() {
        let (mut target, _mock) = ready_target();

        target.write_mem_block_u8(0x2007_9002, b"\xDE\xAD\xBE\xEF").unwrap();

        let mut read_back = [0u8; 4];
        target.read_mem_block_u8(0x2007_9002, &mut read_back).unwrap();
        assert_eq!(&read_back, b"\xDE\xAD\xBE\xEF");
        assert_eq!(target.read_mem8(0x2007_9003).unwrap(), 0xAD);
    }

    #[test]
    fn cache_serves_repeated_reads_without_wire_traffic() {
        let (mut target, mock) = ready_target();

        target.halt(0).unwrap();
        let first = target.read_reg(0, 5).unwrap();

        let transfers_before = mock.state().transfer_count;
        let second = target.read_reg(0, 5).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            mock.state().transfer_count,
            transfers_before,
            "second read must come from the cache"
        );
    }

    #[test]
    fn resume_invalidates_the_cache() {
        let (mut target, mock) = ready_target();

        target.halt(0).unwrap();
        target.read_reg(0, 5).unwrap();

        target.resume(0).unwrap();
        target.halt(0).unwrap();

        let transfers_before = mock.state().transfer_count;
        target.read_reg(0, 5).unwrap();
        assert!(
            mock.state().transfer_count > transfers_before,
            "read after resume must reach the hardware"
        );
    }

    #[test]
    fn toggling_the_cache_leaves_it_invalid_not_stale() {
        let (mut target, mock) = ready_target();

        target.halt(0).unwrap();
        target.read_all_regs(0).unwrap();

        target.enable_cache(false);
        target.enable_cache(true);

        let transfers_before = mock.state().transfer_count;
        target.read_reg(0, 5).unwrap();
        assert!(
            mock.state().transfer_count > transfers_before,
            "cache must be invalid after toggling"
        );
    }

    #[test]
    fn read_all_regs_populates_the_whole_cache() {
        let (mut target, mock) = ready_target();

        target.halt(0).unwrap();
        target.write_reg(0, 17, 0x7777_7777).unwrap();
        let regs = target.read_all_regs(0).unwrap();
        assert_eq!(regs[17], 0x7777_7777);
        assert_eq!(regs[0], 0);

        // Every slot is now cached; none of these reads hit the wire.
        let transfers_before = mock.state().transfer_count;
        for index in 0..32 {
            target.read_reg(0, index).unwrap();
        }
        assert_eq!(mock.state().transfer_count, transfers_before);
    }
}
