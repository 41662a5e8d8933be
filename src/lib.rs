//! Dynamic translation core for a 32-bit RISC guest.
//!
//! This crate owns everything between "the embedder has decoded a guest
//! basic block" and "some CPU's register file has been advanced as if that
//! block had run": a slot-based intermediate language (`il`), an optimizer,
//! an x86-64 native backend and an IL interpreter as a fallback/secondary
//! backend (`native`, `interp`), a two-level code cache over an
//! arena-backed AVL tree (`cache`), and a custom executable-memory allocator
//! (`exec_mem`). [`jit::JitState`] ties all of that together behind the
//! handful of entry points an embedder actually calls.
//!
//! None of SH-4 instruction decoding, the guest CPU register file, or a
//! scheduler loop live here: this crate only consumes a guest decoder
//! through the [`dispatch_meta::DispatchMeta`] trait, the way `wasmtime`
//! consumes a `Linker` rather than knowing what a WASI host function does.
//!
//! # Example
//!
//! ```no_run
//! use sh4_jit::{DispatchMeta, GuestAddr, Hash, IlBuilder, JitConfig, JitState};
//!
//! struct MyGuestDecoder;
//!
//! impl DispatchMeta for MyGuestDecoder {
//!     fn hash(&self, pc: GuestAddr) -> Hash {
//!         pc
//!     }
//!     fn on_compile(&self, _builder: &mut IlBuilder, _pc: GuestAddr) {
//!         // decode guest instructions starting at `_pc` into `_builder`
//!     }
//! }
//!
//! let mut jit = JitState::new(JitConfig::default(), Box::new(MyGuestDecoder)).unwrap();
//! let cpu: *mut std::ffi::c_void = std::ptr::null_mut();
//! let _stop_pc = unsafe { jit.entry(0, 0, cpu) };
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod cache;
pub mod clock;
pub mod config;
pub mod debugger;
pub mod dispatch_meta;
pub mod error;
pub mod exec_mem;
pub mod il;
pub mod interp;
pub mod jit;
pub mod native;
pub mod optimize;

pub use cache::CacheStats;
pub use clock::CycleClock;
pub use config::JitConfig;
pub use debugger::{DebugHooks, Debugger};
pub use dispatch_meta::{DispatchMeta, GuestAddr, GuestMemoryMap, Hash, MemoryMap, ProfileHandle};
pub use error::JitError;
pub use il::{IlBlock, IlBuilder, Instruction, Opcode, Slot, SlotType};
pub use interp::InterpBlock;
pub use jit::JitState;
pub use native::Abi;

#[cfg(feature = "native-x86_64")]
pub use native::NativeBlock;
