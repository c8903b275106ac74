//! Bounds-checked access to memory-mapped hardware registers.
//!
//! [`MappedRegister`] owns a single mapping of a contiguous physical address range and exposes
//! offset-relative 8/16/32/64-bit and byte-range accessors over it. Every access is validated
//! against the mapped size before the mapping is touched, and the mapping is released exactly once:
//! on [`MappedRegister::close`] or when the register is dropped.
//!
//! The actual physical-to-virtual mapping is delegated to a [`PhysicalMemoryMapper`]:
//! - [`DevMem`] maps a character device such as `/dev/mem` or `/dev/gpiomem` (unix only).
//! - [`SimulatedPhysicalMemory`] is a heap-backed window with fault injection, for tests.
//!
//! Mapper failures never cross the [`MappedRegister`] boundary as-is; they are translated into
//! [`MappingError`] (during `open`) or [`AccessError`] (during reads and writes).

#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(unix)]
pub mod devmem;
mod error;
mod mapper;
mod region;
pub mod sim;

#[cfg(unix)]
pub use devmem::{ConfigError, DevMem, DevMemConfig, DevMemMapping};
pub use error::{AccessError, Error, IoOutcome, MappingError, Op, Result};
pub use mapper::{MapperError, MapperErrorCode, MapperResult, PhysicalMemoryMapper, Width};
pub use region::MappedRegister;
pub use sim::SimulatedPhysicalMemory;
