//! SWD driver for the RISC-V side of the RP2350.
//!
//! This crate drives a Serial Wire Debug link to the two Hazard3 harts of
//! an RP2350 and exposes a debugger-grade control surface: halt, resume,
//! single-step and reset, GPR and CSR access, memory I/O at 8/16/32-bit
//! and block granularity, program buffer execution, code upload-and-run
//! and instruction tracing.
//!
//! The stack has three layers. At the bottom a [`WireTransport`] clocks
//! raw bits; anything that can shift bits and tri-state a line (PIO, DMA,
//! plain bit-banging) can implement it. On top of that sits the SWD
//! framing and the Debug Access Port with its bank routing, read
//! pipelining and power handshake, and at the top the RISC-V Debug Module
//! driver with the RP2350 activation dialogue, abstract commands, program
//! buffer micro-programs and system bus memory access.
//!
//! ```no_run
//! use rp2350_swd::{Target, TargetConfig};
//!
//! # fn open_transport() -> Box<dyn rp2350_swd::WireTransport> { unimplemented!() }
//! # fn main() -> rp2350_swd::SwdResult<()> {
//! let mut target = Target::new(open_transport(), TargetConfig::default());
//! target.connect()?;
//! target.power_up()?;
//! target.init_debug_module()?;
//!
//! target.halt(0)?;
//! let pc = target.read_pc(0)?;
//! println!("hart 0 halted at {pc:#010x}");
//! target.resume(0)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod dap;
mod error;
pub mod probe;
pub mod registry;
pub mod riscv;
mod target;

pub use error::{AbstractCommandErrorKind, SwdError, SwdResult};
pub use probe::swd::{PortType, TransferStatistics};
pub use probe::{WireConfig, WireTransport};
pub use registry::{active_targets, TargetInfo};
pub use riscv::TraceRecord;
pub use target::{Target, TargetConfig};

/// Version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
