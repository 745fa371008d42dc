//! RISC-V Debug Module driver for the RP2350.
//!
//! The DM is memory mapped behind the RISC-V APB-AP; every register
//! offset below is the debug-spec register address times four, reached
//! through the MEM-AP TAR/DRW path.

#![allow(clippy::inconsistent_digit_grouping)]

#[macro_use]
mod registers;
mod dm;

pub(crate) use dm::DebugModuleInterface;
pub use dm::TraceRecord;

use bitfield::bitfield;

/// Number of harts in the RP2350.
pub const NUM_HARTS: usize = 2;

/// The debug PC CSR: the address a halted hart resumes at.
pub const CSR_DPC: u16 = 0x7B1;
/// The debug control and status CSR, holds the single-step bit.
pub const CSR_DCSR: u16 = 0x7B0;

/// A memory mapped debug module register.
pub trait DmRegister: From<u32> + Into<u32> {
    /// Byte offset from the DM base address.
    const OFFSET: u32;
    /// Register name for diagnostics.
    const NAME: &'static str;
}

/// Per-hart driver state: halt tracking plus the GPR cache.
#[derive(Debug, Clone)]
pub(crate) struct HartState {
    /// Whether `halted` reflects the hardware. False until the first
    /// halt/resume through this handle and after resets.
    pub halt_state_known: bool,
    /// Meaningful only when `halt_state_known` is set.
    pub halted: bool,
    /// Bitmask of trustworthy `regs` slots. All-ones after a full
    /// register read; cleared whenever the hart may have run.
    pub valid_regs: u32,
    pub regs: [u32; 32],
}

impl HartState {
    fn new() -> Self {
        Self {
            halt_state_known: false,
            halted: false,
            valid_regs: 0,
            regs: [0; 32],
        }
    }

    pub fn invalidate_cache(&mut self) {
        self.valid_regs = 0;
    }

    pub fn cache_valid(&self) -> bool {
        self.valid_regs == u32::MAX
    }
}

/// Debug module driver state, owned by the target handle.
#[derive(Debug)]
pub(crate) struct DmState {
    pub initialized: bool,
    pub sba_initialized: bool,
    pub cache_enabled: bool,
    pub harts: [HartState; NUM_HARTS],
}

impl DmState {
    pub fn new(cache_enabled: bool) -> Self {
        Self {
            initialized: false,
            sba_initialized: false,
            cache_enabled,
            harts: [HartState::new(), HartState::new()],
        }
    }
}

bitfield! {
    /// `dmcontrol`, hart selection and halt/resume/reset control.
    ///
    /// Every write produced by this driver keeps `dmactive` set.
    #[derive(Copy, Clone)]
    pub struct Dmcontrol(u32);
    impl Debug;

    _, set_haltreq: 31;
    _, set_resumereq: 30;
    u32, hartsello, set_hartsello: 25, 16;
    ndmreset, set_ndmreset: 1;
    dmactive, set_dmactive: 0;
}

impl DmRegister for Dmcontrol {
    const OFFSET: u32 = 0x40;
    const NAME: &'static str = "dmcontrol";
}

impl From<Dmcontrol> for u32 {
    fn from(register: Dmcontrol) -> Self {
        register.0
    }
}

impl From<u32> for Dmcontrol {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

bitfield! {
    /// Readonly `dmstatus` register.
    pub struct Dmstatus(u32);
    impl Debug;

    impebreak, _: 22;
    allrunning, _: 11;
    anyrunning, _: 10;
    allhalted, _: 9;
    anyhalted, _: 8;
    version, _: 3, 0;
}

impl DmRegister for Dmstatus {
    const OFFSET: u32 = 0x44;
    const NAME: &'static str = "dmstatus";
}

impl From<u32> for Dmstatus {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dmstatus> for u32 {
    fn from(register: Dmstatus) -> Self {
        register.0
    }
}

bitfield! {
    /// Abstract command control and status.
    pub struct Abstractcs(u32);
    impl Debug;

    progbufsize, _: 28, 24;
    busy, _: 12;
    u8, cmderr, set_cmderr: 10, 8;
    datacount, _: 3, 0;
}

impl DmRegister for Abstractcs {
    const OFFSET: u32 = 0x58;
    const NAME: &'static str = "abstractcs";
}

impl From<Abstractcs> for u32 {
    fn from(register: Abstractcs) -> Self {
        register.0
    }
}

impl From<u32> for Abstractcs {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

bitfield! {
    /// An "Access Register" abstract command word.
    #[derive(Copy, Clone)]
    pub struct AccessRegisterCommand(u32);
    impl Debug;

    u8, _, set_cmd_type: 31, 24;
    u8, _, set_aarsize: 22, 20;
    _, set_postexec: 18;
    _, set_transfer: 17;
    _, set_write: 16;
    u32, _, set_regno: 15, 0;
}

impl DmRegister for AccessRegisterCommand {
    const OFFSET: u32 = 0x5C;
    const NAME: &'static str = "command";
}

impl From<AccessRegisterCommand> for u32 {
    fn from(register: AccessRegisterCommand) -> Self {
        register.0
    }
}

impl From<u32> for AccessRegisterCommand {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

bitfield! {
    /// System bus access control and status.
    #[derive(Copy, Clone)]
    pub struct Sbcs(u32);
    impl Debug;

    u8, sbversion, _: 31, 29;
    sbreadonaddr, set_sbreadonaddr: 20;
    u8, sbaccess, set_sbaccess: 19, 17;
    u8, sberror, set_sberror: 14, 12;
    u8, sbasize, _: 11, 5;
}

impl DmRegister for Sbcs {
    const OFFSET: u32 = 0xE0;
    const NAME: &'static str = "sbcs";
}

impl From<Sbcs> for u32 {
    fn from(register: Sbcs) -> Self {
        register.0
    }
}

impl From<u32> for Sbcs {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

bitfield! {
    /// The debug control and status CSR (not a DM register; read and
    /// written through the program buffer).
    #[derive(Copy, Clone)]
    pub struct Dcsr(u32);
    impl Debug;

    u8, cause, _: 8, 6;
    step, set_step: 2;
}

impl From<u32> for Dcsr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dcsr> for u32 {
    fn from(register: Dcsr) -> Self {
        register.0
    }
}

dm_data_registers! {
    Data0 @ 0x10 => "data0",
    Sbaddress0 @ 0xE4 => "sbaddress0",
    Sbdata0 @ 0xF0 => "sbdata0",
}

/// Byte offset of program buffer slot `n`.
pub(crate) const fn progbuf_offset(slot: usize) -> u32 {
    0x80 + 4 * slot as u32
}

/// Number of program buffer slots addressable through the DM.
pub(crate) const PROGBUF_SLOTS: usize = 16;
