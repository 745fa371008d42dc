//! The RP2350 debug module driver.
//!
//! Everything here talks to the DM through the MEM-AP path of the DAP:
//! activation, the abstract command engine, program buffer micro-programs
//! for CSR access, halt/resume/step/reset, system bus memory access and
//! the per-hart GPR cache.

use std::thread;
use std::time::Duration;

use super::{
    progbuf_offset, Abstractcs, AccessRegisterCommand, Data0, Dcsr, Dmcontrol, DmRegister,
    DmState, Dmstatus, Sbaddress0, Sbcs, Sbdata0, CSR_DCSR, CSR_DPC, NUM_HARTS, PROGBUF_SLOTS,
};
use crate::dap::{DapInterface, AP_CSW, AP_TAR};
use crate::error::{AbstractCommandErrorKind, SwdError, SwdResult};

/// Halt/resume poll budget: 10 polls at 10 ms.
const HART_POLLS: u32 = 10;
const HART_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Abstract command completion budget: 100 polls at 100 µs.
const ABSTRACT_POLLS: u32 = 100;
const ABSTRACT_POLL_INTERVAL: Duration = Duration::from_micros(100);

/// How long `ndmreset` is held, and how long the harts get to leave reset.
const RESET_HOLD: Duration = Duration::from_millis(10);
const RESET_SETTLE: Duration = Duration::from_millis(50);

/// Settle time between the words of the activation dialogue.
const ACTIVATION_SETTLE: Duration = Duration::from_millis(50);

/// CSW value for the MEM-AP: 32-bit word access, no auto-increment,
/// debug enabled.
const CSW_WORD_ACCESS: u32 = 0xA200_0002;

/// The bank-1 activation register and the dialogue that has to be played
/// through it, in order.
const ACTIVATION_REG: u8 = 0x10;
const ACTIVATION_DIALOGUE: [u32; 3] = [0x0000_0000, 0x0000_0001, 0x07FF_FFC1];

/// Readback the activation register must produce once the DM is up.
const ACTIVATION_ACK: u32 = 0x0401_0001;

/// Abstract command register number of GPR `x0`.
const GPR_REGNO_BASE: u32 = 0x1000;

/// `ebreak`: every micro-program ends by dropping back into debug mode.
const EBREAK: u32 = 0x0010_0073;

/// `csrr s0, <csr>` (`csrrs s0, <csr>, x0`): the word the read
/// micro-program plants to move a CSR into s0.
const fn csr_into_s0(csr: u16) -> u32 {
    0x0000_2473 | (csr as u32) << 20
}

/// `csrw <csr>, s0` (`csrrw x0, <csr>, s0`): the word the write
/// micro-program plants to move s0 into a CSR.
const fn s0_into_csr(csr: u16) -> u32 {
    0x0004_1073 | (csr as u32) << 20
}

/// One instruction record produced while tracing.
#[derive(Debug, Clone)]
pub struct TraceRecord {
    /// PC the hart was halted at.
    pub pc: u32,
    /// Instruction word fetched from that address.
    pub instruction: u32,
    /// Snapshot of all 32 GPRs, when requested.
    pub gprs: Option<[u32; 32]>,
}

/// Borrowed view over the DAP and the DM driver state.
///
/// Constructed per operation by the target handle; all the DM logic lives
/// here.
#[derive(Debug)]
pub(crate) struct DebugModuleInterface<'a> {
    dap: &'a mut DapInterface,
    state: &'a mut DmState,
}

impl<'a> DebugModuleInterface<'a> {
    pub fn new(dap: &'a mut DapInterface, state: &'a mut DmState) -> Self {
        Self { dap, state }
    }

    /// Play the RP2350 activation dialogue and verify the DM came up.
    pub fn activate(&mut self) -> SwdResult<()> {
        tracing::debug!("Activating the debug module");

        self.dap.select_bank(0x00)?;
        self.dap.ap_write(AP_CSW, CSW_WORD_ACCESS)?;
        self.dap.ap_write(AP_TAR, Dmcontrol::OFFSET)?;

        for word in ACTIVATION_DIALOGUE {
            self.dap.ap_write(ACTIVATION_REG, word)?;
            self.dap.flush()?;
            thread::sleep(ACTIVATION_SETTLE);
        }

        let status = self.dap.ap_read(ACTIVATION_REG)?;
        if status != ACTIVATION_ACK {
            return Err(SwdError::InvalidState(format!(
                "debug module activation readback was {status:#010x}, expected {ACTIVATION_ACK:#010x}"
            )));
        }

        self.dap.select_bank(0x00)?;
        self.state.initialized = true;
        tracing::debug!("Debug module active");
        Ok(())
    }

    /// Prepare the system bus engine: 32-bit accesses, read-on-address.
    pub fn init_system_bus(&mut self) -> SwdResult<()> {
        self.require_initialized()?;

        let sbcs: Sbcs = self.read_dm()?;
        if sbcs.sbasize() == 0 {
            return Err(SwdError::InvalidState(
                "debug module reports no system bus".to_string(),
            ));
        }

        if sbcs.sberror() != 0 {
            // Sticky, write-1-to-clear.
            let mut clear = Sbcs(0);
            clear.set_sberror(0x7);
            self.write_dm(clear)?;
        }

        let mut control = Sbcs(0);
        control.set_sbaccess(2);
        control.set_sbreadonaddr(true);
        self.write_dm(control)?;

        self.state.sba_initialized = true;
        Ok(())
    }

    // -- hart run control --------------------------------------------------

    /// Request a halt and wait for it. Returns the soft `AlreadyHalted`
    /// code when the hart was halted to begin with.
    pub fn halt(&mut self, hart: usize) -> SwdResult<()> {
        self.check_hart(hart)?;
        self.require_initialized()?;

        if self.hart_halted(hart)? {
            return Err(SwdError::AlreadyHalted);
        }

        let mut control = self.hart_control(hart);
        control.set_haltreq(true);
        self.write_dm(control)?;

        let result = self.wait_for_status(|status| status.allhalted());

        // Drop the halt request either way.
        self.write_dm(self.hart_control(hart))?;
        result?;

        let state = &mut self.state.harts[hart];
        state.halted = true;
        state.halt_state_known = true;
        state.invalidate_cache();
        tracing::debug!("Hart {} halted", hart);
        Ok(())
    }

    /// Request a resume and wait for the hart to run.
    pub fn resume(&mut self, hart: usize) -> SwdResult<()> {
        self.check_hart(hart)?;
        self.require_initialized()?;

        let mut control = self.hart_control(hart);
        control.set_resumereq(true);
        self.write_dm(control)?;

        let result = self.wait_for_status(|status| status.allrunning());
        self.write_dm(self.hart_control(hart))?;
        result?;

        let state = &mut self.state.harts[hart];
        state.halted = false;
        state.halt_state_known = true;
        state.invalidate_cache();
        tracing::debug!("Hart {} running", hart);
        Ok(())
    }

    /// Execute a single instruction: set the DCSR step bit, resume, wait
    /// for the automatic halt, restore DCSR.
    pub fn step(&mut self, hart: usize) -> SwdResult<()> {
        self.check_hart(hart)?;
        self.require_initialized()?;
        self.ensure_halted(hart)?;

        let saved_dcsr = self.read_csr(hart, CSR_DCSR)?;
        let mut dcsr = Dcsr(saved_dcsr);
        dcsr.set_step(true);
        self.write_csr(hart, CSR_DCSR, dcsr.into())?;

        let mut control = self.hart_control(hart);
        control.set_resumereq(true);
        self.write_dm(control)?;

        let result = self.wait_for_status(|status| status.allhalted());
        self.write_dm(self.hart_control(hart))?;
        result?;

        // The hart transitioned through the running state.
        let state = &mut self.state.harts[hart];
        state.halted = true;
        state.halt_state_known = true;
        state.invalidate_cache();

        self.write_csr(hart, CSR_DCSR, saved_dcsr)?;
        Ok(())
    }

    /// Pulse `ndmreset`, optionally holding the halt request so the hart
    /// stops on its first instruction.
    pub fn reset(&mut self, hart: usize, halt_after: bool) -> SwdResult<()> {
        self.check_hart(hart)?;
        self.require_initialized()?;

        tracing::debug!("Resetting (halt_after = {})", halt_after);

        let mut control = self.hart_control(hart);
        control.set_ndmreset(true);
        if halt_after {
            control.set_haltreq(true);
        }
        self.write_dm(control)?;
        thread::sleep(RESET_HOLD);

        let mut control = self.hart_control(hart);
        if halt_after {
            control.set_haltreq(true);
        }
        self.write_dm(control)?;
        thread::sleep(RESET_SETTLE);

        // ndmreset takes the whole system down; nothing cached survives.
        for state in &mut self.state.harts {
            state.halt_state_known = false;
            state.invalidate_cache();
        }

        if halt_after {
            self.wait_for_status(|status| status.allhalted())?;
            self.write_dm(self.hart_control(hart))?;
            let state = &mut self.state.harts[hart];
            state.halted = true;
            state.halt_state_known = true;
        }

        Ok(())
    }

    /// Whether the hart is halted, polling the hardware when the driver
    /// state does not know.
    pub fn hart_halted(&mut self, hart: usize) -> SwdResult<bool> {
        self.check_hart(hart)?;
        self.require_initialized()?;

        if self.state.harts[hart].halt_state_known {
            return Ok(self.state.harts[hart].halted);
        }

        self.write_dm(self.hart_control(hart))?;
        let status: Dmstatus = self.read_dm()?;
        let halted = status.allhalted();

        let state = &mut self.state.harts[hart];
        state.halted = halted;
        state.halt_state_known = true;
        Ok(halted)
    }

    // -- registers ---------------------------------------------------------

    /// Read GPR `xN`. Served from the cache when it is valid.
    pub fn read_gpr(&mut self, hart: usize, index: usize) -> SwdResult<u32> {
        self.check_hart(hart)?;
        self.check_gpr(index)?;
        self.require_initialized()?;

        if index == 0 {
            // x0 is hardwired zero; no round trip.
            return Ok(0);
        }

        if self.state.cache_enabled && self.state.harts[hart].valid_regs & (1 << index) != 0 {
            return Ok(self.state.harts[hart].regs[index]);
        }

        self.ensure_halted(hart)?;
        let value = self.abstract_gpr_read(hart, index)?;

        if self.state.cache_enabled {
            let state = &mut self.state.harts[hart];
            state.regs[index] = value;
            state.valid_regs |= 1 << index;
        }
        Ok(value)
    }

    /// Write GPR `xN`, keeping the cache slot in sync.
    pub fn write_gpr(&mut self, hart: usize, index: usize, value: u32) -> SwdResult<()> {
        self.check_hart(hart)?;
        self.check_gpr(index)?;
        self.require_initialized()?;

        if index == 0 {
            // Writes to x0 are discarded by the hardware.
            return Ok(());
        }

        self.ensure_halted(hart)?;
        self.abstract_gpr_write(hart, index, value)?;

        if self.state.cache_enabled {
            let state = &mut self.state.harts[hart];
            state.regs[index] = value;
            state.valid_regs |= 1 << index;
        }
        Ok(())
    }

    /// Read all 32 GPRs, populating the cache in one sweep.
    pub fn read_all_gprs(&mut self, hart: usize) -> SwdResult<[u32; 32]> {
        self.check_hart(hart)?;
        self.require_initialized()?;

        if self.state.cache_enabled && self.state.harts[hart].cache_valid() {
            return Ok(self.state.harts[hart].regs);
        }

        self.ensure_halted(hart)?;

        let mut regs = [0u32; 32];
        for index in 1..32 {
            regs[index] = self.abstract_gpr_read(hart, index)?;
        }

        if self.state.cache_enabled {
            let state = &mut self.state.harts[hart];
            state.regs = regs;
            state.valid_regs = u32::MAX;
        }
        Ok(regs)
    }

    /// Read a CSR through a program buffer micro-program.
    ///
    /// The RP2350 DM has no abstract CSR access: the value is moved
    /// through `s0`, which is saved and restored around the operation.
    pub fn read_csr(&mut self, hart: usize, csr: u16) -> SwdResult<u32> {
        self.check_hart(hart)?;
        self.require_initialized()?;
        self.ensure_halted(hart)?;

        let saved_s0 = self.abstract_gpr_read(hart, 8)?;
        let result = self.read_csr_via_s0(hart, csr);
        let restore = self.abstract_gpr_write(hart, 8, saved_s0);

        let value = result?;
        restore?;
        Ok(value)
    }

    fn read_csr_via_s0(&mut self, hart: usize, csr: u16) -> SwdResult<u32> {
        self.setup_progbuf(&[csr_into_s0(csr), EBREAK])?;
        self.execute_progbuf_command(hart)?;
        self.abstract_gpr_read(hart, 8)
    }

    /// Write a CSR through a program buffer micro-program.
    pub fn write_csr(&mut self, hart: usize, csr: u16, value: u32) -> SwdResult<()> {
        self.check_hart(hart)?;
        self.require_initialized()?;
        self.ensure_halted(hart)?;

        let saved_s0 = self.abstract_gpr_read(hart, 8)?;
        let result = self.write_csr_via_s0(hart, csr, value);
        let restore = self.abstract_gpr_write(hart, 8, saved_s0);

        result?;
        restore
    }

    fn write_csr_via_s0(&mut self, hart: usize, csr: u16, value: u32) -> SwdResult<()> {
        self.abstract_gpr_write(hart, 8, value)?;
        self.setup_progbuf(&[s0_into_csr(csr), EBREAK])?;
        self.execute_progbuf_command(hart)
    }

    /// The PC a halted hart will resume at.
    pub fn read_pc(&mut self, hart: usize) -> SwdResult<u32> {
        self.read_csr(hart, CSR_DPC)
    }

    pub fn write_pc(&mut self, hart: usize, pc: u32) -> SwdResult<()> {
        self.write_csr(hart, CSR_DPC, pc)
    }

    // -- memory ------------------------------------------------------------

    /// Read a word over the system bus. Works regardless of hart state.
    pub fn read_mem32(&mut self, address: u32) -> SwdResult<u32> {
        self.require_system_bus()?;
        crate::dap::interface::check_alignment(address, 4)?;

        self.write_dm(Sbaddress0(address))?;
        self.read_dm::<Sbdata0>().map(|data| data.0)
    }

    /// Write a word over the system bus.
    pub fn write_mem32(&mut self, address: u32, value: u32) -> SwdResult<()> {
        self.require_system_bus()?;
        crate::dap::interface::check_alignment(address, 4)?;

        self.write_dm(Sbaddress0(address))?;
        self.write_dm(Sbdata0(value))
    }

    /// Read a halfword: read-modify on the surrounding aligned word,
    /// little-endian.
    pub fn read_mem16(&mut self, address: u32) -> SwdResult<u16> {
        crate::dap::interface::check_alignment(address, 2)?;
        let word = self.read_mem32(address & !3)?;
        Ok((word >> ((address & 2) * 8)) as u16)
    }

    /// Read a byte out of the surrounding aligned word.
    pub fn read_mem8(&mut self, address: u32) -> SwdResult<u8> {
        let word = self.read_mem32(address & !3)?;
        Ok((word >> ((address & 3) * 8)) as u8)
    }

    /// Write a halfword as a read-modify-write of the aligned word.
    pub fn write_mem16(&mut self, address: u32, value: u16) -> SwdResult<()> {
        crate::dap::interface::check_alignment(address, 2)?;
        let aligned = address & !3;
        let shift = (address & 2) * 8;
        let word = self.read_mem32(aligned)?;
        let word = (word & !(0xFFFF << shift)) | (u32::from(value) << shift);
        self.write_mem32(aligned, word)
    }

    /// Write a byte as a read-modify-write of the aligned word.
    pub fn write_mem8(&mut self, address: u32, value: u8) -> SwdResult<()> {
        let aligned = address & !3;
        let shift = (address & 3) * 8;
        let word = self.read_mem32(aligned)?;
        let word = (word & !(0xFF << shift)) | (u32::from(value) << shift);
        self.write_mem32(aligned, word)
    }

    /// Read consecutive words over the system bus.
    pub fn read_mem_block(&mut self, address: u32, data: &mut [u32]) -> SwdResult<()> {
        for (index, slot) in data.iter_mut().enumerate() {
            *slot = self.read_mem32(address + 4 * index as u32)?;
        }
        Ok(())
    }

    /// Write consecutive words over the system bus.
    pub fn write_mem_block(&mut self, address: u32, data: &[u32]) -> SwdResult<()> {
        for (index, word) in data.iter().enumerate() {
            self.write_mem32(address + 4 * index as u32, *word)?;
        }
        Ok(())
    }

    /// Read a run of bytes, any alignment, through the aligned-word path.
    pub fn read_mem_block_u8(&mut self, address: u32, data: &mut [u8]) -> SwdResult<()> {
        for (index, slot) in data.iter_mut().enumerate() {
            *slot = self.read_mem8(address + index as u32)?;
        }
        Ok(())
    }

    /// Write a run of bytes, any alignment, as read-modify-writes of the
    /// surrounding words.
    pub fn write_mem_block_u8(&mut self, address: u32, data: &[u8]) -> SwdResult<()> {
        for (index, byte) in data.iter().enumerate() {
            self.write_mem8(address + index as u32, *byte)?;
        }
        Ok(())
    }

    // -- code execution ----------------------------------------------------

    /// Write a program into memory, reading every word back.
    pub fn upload_code(&mut self, address: u32, code: &[u32]) -> SwdResult<()> {
        crate::dap::interface::check_alignment(address, 4)?;

        for (index, word) in code.iter().enumerate() {
            let word_address = address + 4 * index as u32;
            self.write_mem32(word_address, *word)?;
            let read_back = self.read_mem32(word_address)?;
            if read_back != *word {
                return Err(SwdError::Verify {
                    address: word_address,
                    expected: *word,
                    read_back,
                });
            }
        }
        Ok(())
    }

    /// Upload a program, point the hart at it and let it run.
    pub fn execute_code(&mut self, hart: usize, address: u32, code: &[u32]) -> SwdResult<()> {
        self.check_hart(hart)?;
        self.upload_code(address, code)?;

        match self.halt(hart) {
            Ok(()) | Err(SwdError::AlreadyHalted) => {}
            Err(e) => return Err(e),
        }

        self.write_pc(hart, address)?;
        let read_back = self.read_pc(hart)?;
        if read_back != address {
            return Err(SwdError::Verify {
                address,
                expected: address,
                read_back,
            });
        }

        self.resume(hart)
    }

    /// Run up to 16 instructions straight out of the program buffer.
    ///
    /// Always executes in postexec mode with no register transfer.
    pub fn execute_progbuf(&mut self, hart: usize, instructions: &[u32]) -> SwdResult<()> {
        self.check_hart(hart)?;
        if instructions.is_empty() || instructions.len() > PROGBUF_SLOTS {
            return Err(SwdError::InvalidParam("program buffer instruction count"));
        }
        self.require_initialized()?;
        self.ensure_halted(hart)?;

        self.setup_progbuf(instructions)?;
        self.execute_progbuf_command(hart)?;

        // The program may have clobbered anything.
        self.state.harts[hart].invalidate_cache();
        Ok(())
    }

    /// Single-step the hart, reporting each instruction to `callback`,
    /// until it asks to stop or `max_instructions` is reached (0 means
    /// unbounded).
    pub fn trace(
        &mut self,
        hart: usize,
        max_instructions: u32,
        capture_regs: bool,
        callback: &mut dyn FnMut(&TraceRecord) -> bool,
    ) -> SwdResult<u32> {
        self.check_hart(hart)?;
        self.require_initialized()?;
        self.ensure_halted(hart)?;

        let mut count = 0u32;

        while max_instructions == 0 || count < max_instructions {
            let record = match self.trace_record(hart, capture_regs) {
                Ok(record) => record,
                Err(e) if count == 0 => return Err(e),
                Err(e) => {
                    tracing::warn!("Trace stopped after {} instructions: {}", count, e);
                    break;
                }
            };

            count += 1;
            if !callback(&record) {
                break;
            }

            match self.step(hart) {
                Ok(()) => {}
                Err(e) => {
                    tracing::warn!("Trace stopped after {} instructions: {}", count, e);
                    break;
                }
            }
        }

        Ok(count)
    }

    fn trace_record(&mut self, hart: usize, capture_regs: bool) -> SwdResult<TraceRecord> {
        let pc = self.read_pc(hart)?;
        let instruction = self.read_mem32(pc & !3)?;
        let gprs = if capture_regs {
            Some(self.read_all_gprs(hart)?)
        } else {
            None
        };
        Ok(TraceRecord {
            pc,
            instruction,
            gprs,
        })
    }

    // -- cache control -----------------------------------------------------

    pub fn set_cache_enabled(&mut self, enabled: bool) {
        self.state.cache_enabled = enabled;
        for state in &mut self.state.harts {
            state.invalidate_cache();
        }
    }

    pub fn invalidate_cache(&mut self, hart: usize) -> SwdResult<()> {
        self.check_hart(hart)?;
        self.state.harts[hart].invalidate_cache();
        Ok(())
    }

    // -- abstract command engine -------------------------------------------

    fn abstract_gpr_read(&mut self, hart: usize, index: usize) -> SwdResult<u32> {
        self.write_dm(self.hart_control(hart))?;

        let mut command = AccessRegisterCommand(0);
        command.set_cmd_type(0);
        command.set_transfer(true);
        command.set_aarsize(2);
        command.set_regno(GPR_REGNO_BASE + index as u32);
        self.execute_abstract_command(command)?;

        self.read_dm::<Data0>().map(|data| data.0)
    }

    fn abstract_gpr_write(&mut self, hart: usize, index: usize, value: u32) -> SwdResult<()> {
        self.write_dm(self.hart_control(hart))?;
        self.write_dm(Data0(value))?;

        let mut command = AccessRegisterCommand(0);
        command.set_cmd_type(0);
        command.set_transfer(true);
        command.set_write(true);
        command.set_aarsize(2);
        command.set_regno(GPR_REGNO_BASE + index as u32);
        self.execute_abstract_command(command)
    }

    /// Issue a command and poll `abstractcs` until it is done. A non-zero
    /// `cmderr` is cleared in place before the error is raised.
    fn execute_abstract_command(&mut self, command: AccessRegisterCommand) -> SwdResult<()> {
        self.write_dm(command)?;

        for _ in 0..ABSTRACT_POLLS {
            let status: Abstractcs = self.read_dm()?;
            if !status.busy() {
                if status.cmderr() != 0 {
                    let mut clear = Abstractcs(0);
                    clear.set_cmderr(0x7);
                    self.write_dm(clear)?;
                    return Err(SwdError::AbstractCommand(AbstractCommandErrorKind::parse(
                        status.cmderr(),
                    )));
                }
                return Ok(());
            }
            thread::sleep(ABSTRACT_POLL_INTERVAL);
        }

        tracing::error!("Abstract command did not complete");
        Err(SwdError::Timeout)
    }

    /// Write a micro-program into the program buffer.
    fn setup_progbuf(&mut self, instructions: &[u32]) -> SwdResult<()> {
        for (slot, instruction) in instructions.iter().enumerate() {
            self.write_dm_untyped(progbuf_offset(slot), *instruction)?;
        }

        // Guarantee the program ends in debug mode.
        if instructions.last() != Some(&EBREAK) && instructions.len() < PROGBUF_SLOTS {
            self.write_dm_untyped(progbuf_offset(instructions.len()), EBREAK)?;
        }
        Ok(())
    }

    /// Trigger the program buffer: postexec only, no register transfer.
    fn execute_progbuf_command(&mut self, hart: usize) -> SwdResult<()> {
        self.write_dm(self.hart_control(hart))?;

        let mut command = AccessRegisterCommand(0);
        command.set_postexec(true);
        self.execute_abstract_command(command)
    }

    // -- plumbing ----------------------------------------------------------

    fn check_hart(&self, hart: usize) -> SwdResult<()> {
        if hart >= NUM_HARTS {
            return Err(SwdError::InvalidParam("hart index"));
        }
        Ok(())
    }

    fn check_gpr(&self, index: usize) -> SwdResult<()> {
        if index >= 32 {
            return Err(SwdError::InvalidParam("GPR index"));
        }
        Ok(())
    }

    fn require_initialized(&self) -> SwdResult<()> {
        if !self.state.initialized {
            return Err(SwdError::NotInitialized);
        }
        Ok(())
    }

    fn require_system_bus(&self) -> SwdResult<()> {
        self.require_initialized()?;
        if !self.state.sba_initialized {
            return Err(SwdError::NotInitialized);
        }
        Ok(())
    }

    fn ensure_halted(&mut self, hart: usize) -> SwdResult<()> {
        if !self.hart_halted(hart)? {
            return Err(SwdError::NotHalted);
        }
        Ok(())
    }

    /// DMCONTROL word selecting `hart`, with `dmactive` set and nothing
    /// else.
    fn hart_control(&self, hart: usize) -> Dmcontrol {
        let mut control = Dmcontrol(0);
        control.set_dmactive(true);
        control.set_hartsello(hart as u32);
        control
    }

    fn wait_for_status(&mut self, done: impl Fn(&Dmstatus) -> bool) -> SwdResult<()> {
        for _ in 0..HART_POLLS {
            let status: Dmstatus = self.read_dm()?;
            if done(&status) {
                return Ok(());
            }
            thread::sleep(HART_POLL_INTERVAL);
        }
        Err(SwdError::Timeout)
    }

    fn read_dm<R: DmRegister>(&mut self) -> SwdResult<R> {
        let value = self.read_dm_untyped(R::OFFSET)?;
        tracing::trace!("Read DM register {} = {:#010x}", R::NAME, value);
        Ok(R::from(value))
    }

    fn write_dm<R: DmRegister>(&mut self, register: R) -> SwdResult<()> {
        let value: u32 = register.into();
        tracing::trace!("Write DM register {} = {:#010x}", R::NAME, value);
        self.write_dm_untyped(R::OFFSET, value)
    }

    fn read_dm_untyped(&mut self, offset: u32) -> SwdResult<u32> {
        self.dap.read_mem32(offset)
    }

    fn write_dm_untyped(&mut self, offset: u32, value: u32) -> SwdResult<()> {
        self.dap.write_mem32(offset, value)
    }
}
