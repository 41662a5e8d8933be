//! The native x86-64 backend: ABI handling, physical
//! register bookkeeping, the streaming instruction emitter, IL-to-machine-code
//! lowering, and the compiled block type the code cache stores.
//!
//! [`abi::Abi`] is always compiled in, since [`crate::config::JitConfig`]
//! picks a host ABI regardless of which backend actually runs; the rest of
//! the module (the emitter, the register allocator, lowering, and
//! [`NativeBlock`] itself) is gated behind the `native-x86_64` feature, with
//! [`crate::interp::InterpBlock`] as the only backend when it's off.

pub mod abi;
pub use abi::Abi;

#[cfg(feature = "native-x86_64")]
mod block;
#[cfg(feature = "native-x86_64")]
pub mod emit;
#[cfg(feature = "native-x86_64")]
pub mod lower;
#[cfg(feature = "native-x86_64")]
pub mod regset;

#[cfg(feature = "native-x86_64")]
pub use block::NativeBlock;
