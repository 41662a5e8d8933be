//! Compiled native blocks: lowering an [`IlBlock`] into an executable-memory
//! allocation, and invoking it.
//!
//! Ported from `code_block_x86_64` (`code_block.h`) and the compile/entry
//! halves of `code_block_x86_64.c`. The source's struct is just a pointer,
//! a byte length, a cycle count and a dirty-stack flag; this keeps exactly
//! that shape and adds the constant pool [`crate::native::lower::Lowering`]
//! collects (host pointers baked into the code as 64-bit immediates, which
//! the source instead re-derives from a fixed per-block struct it never
//! frees separately).

use std::ffi::c_void;
use std::mem;

use crate::clock::CycleClock;
use crate::error::JitError;
use crate::exec_mem::ExecMem;
use crate::il::instr::{Instruction, MapPtr};
use crate::il::IlBlock;
use crate::native::abi::{Abi, CallingConvention, GpReg};
use crate::native::lower::Lowering;

/// `unsafe extern "sysv64" fn(slots_base, cpu) -> packed(new_pc | new_hash << 32)`.
type EntrySysV = unsafe extern "sysv64" fn(*mut u64, *mut c_void) -> u64;
/// The Microsoft x64 equivalent, same argument order.
type EntryWin64 = unsafe extern "win64" fn(*mut u64, *mut c_void) -> u64;

/// A compiled guest basic block living in executable memory.
///
/// Mirrors `struct code_block_x86_64`: a pointer into exec-memory, the
/// number of bytes used, the block's own cycle cost (read by the
/// cycle-check tail), and whether its prologue/epilogue save/restore
/// non-volatile registers ("dirty stack") or were skipped because the
/// block never calls out ("pure block").
pub struct NativeBlock {
    code_ptr: *mut u8,
    code_len: usize,
    n_slots: usize,
    cycle_count: u32,
    dirty_stack: bool,
    abi: Abi,
    /// Host pointers (`MapPtr`s for non-RAM memory regions) baked into the
    /// code as absolute addresses; kept alive for as long as the code that
    /// references them.
    _const_pool: Vec<Box<MapPtr>>,
}

// A `NativeBlock` is only ever touched from the one CPU thread `JitState`
// runs on; `Send` is needed only so `JitState` itself can be handed across
// an owning thread boundary at construction time, matching `ExecRegion`'s
// own justification.
unsafe impl Send for NativeBlock {}

impl NativeBlock {
    /// Lower `il` and copy the result into `exec_mem`. `clock_ptr` is baked
    /// into the cycle-check tail as an absolute address.
    pub fn compile(il: &IlBlock, abi: Abi, clock_ptr: *mut CycleClock, exec_mem: &mut ExecMem) -> Result<Self, JitError> {
        il.verify_ends_in_jump()?;
        #[cfg(any(debug_assertions, feature = "integrity-checks"))]
        crate::il::verify::verify_block(il)?;

        let dirty = block_has_side_effects(il);
        let convention = abi.convention();
        let (slots_base, cpu_reg) = if dirty {
            (GpReg::R13, GpReg::R14)
        } else {
            (convention.int_args()[0], convention.int_args()[1])
        };

        let mut lowering = Lowering::new(convention, slots_base, cpu_reg);
        lowering.emit_prologue(dirty);
        let mut cycle_count: u32 = 0;
        for inst in il.instructions() {
            let is_jump = lowering.lower(inst)?;
            if !matches!(inst, Instruction::DiscardSlot(_)) {
                cycle_count = cycle_count.saturating_add(1);
            }
            if is_jump {
                break;
            }
        }
        lowering.emit_cycle_tail(dirty, clock_ptr as u64, cycle_count);
        let (code, const_pool) = lowering.finish()?;

        let dst = exec_mem.alloc(code.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), dst, code.len());
        }

        Ok(NativeBlock {
            code_ptr: dst,
            code_len: code.len(),
            n_slots: il.slots().len(),
            cycle_count,
            dirty_stack: dirty,
            abi,
            _const_pool: const_pool,
        })
    }

    pub fn byte_len(&self) -> usize {
        self.code_len
    }

    pub fn cycle_count(&self) -> u32 {
        self.cycle_count
    }

    pub fn is_dirty_stack(&self) -> bool {
        self.dirty_stack
    }

    /// Invoke the compiled code. Allocates a fresh slot array (mirroring
    /// [`crate::interp::InterpBlock::exec`]'s own heap allocation — no
    /// value is ever kept resident in a register across IL instructions,
    /// see `native::lower`'s module doc), calls through exactly one
    /// transmuted function pointer, and unpacks the new PC/hash the jump
    /// epilogue wrote into RAX.
    ///
    /// # Safety
    /// `cpu` must be a valid pointer for the lifetime of the call, matching
    /// whatever contract the embedder's `DispatchMeta`/`GuestMemoryMap`
    /// implementations assume of the CPU-state pointer baked into this
    /// block's `CallFunc`/`Fallback` instructions.
    pub unsafe fn call(&self, cpu: *mut c_void) -> (u32, u32) {
        let mut slots = vec![0u64; self.n_slots];
        let packed = match self.abi {
            Abi::SystemV => {
                let f: EntrySysV = mem::transmute(self.code_ptr);
                f(slots.as_mut_ptr(), cpu)
            }
            Abi::MicrosoftX64 => {
                let f: EntryWin64 = mem::transmute(self.code_ptr);
                f(slots.as_mut_ptr(), cpu)
            }
        };
        let new_pc = packed as u32;
        let new_hash = (packed >> 32) as u32;
        (new_pc, new_hash)
    }

    /// Mirrors `code_block_x86_64_cleanup`: hand the exec-memory allocation
    /// back to the free list. Called only from [`crate::cache::CodeCache::gc`].
    pub(crate) fn release(self, exec_mem: &mut ExecMem) {
        exec_mem.free(self.code_ptr);
    }
}

/// Whether lowering `il` will emit at least one `call`/shim invocation,
/// which decides whether the block needs the full callee-saved-register
/// prologue/epilogue or can run "pure" straight out of its argument
/// registers.
fn block_has_side_effects(il: &IlBlock) -> bool {
    il.instructions().iter().any(|inst| match inst {
        Instruction::CallFunc(_) | Instruction::CallFuncImm32(_) | Instruction::Fallback(_) => true,
        Instruction::Read16ConstAddr(i) => !unsafe { i.map.as_ref() }.is_ram(),
        Instruction::Read32ConstAddr(i) => !unsafe { i.map.as_ref() }.is_ram(),
        Instruction::Read8Slot(i) | Instruction::Read16Slot(i) | Instruction::Read32Slot(i) | Instruction::ReadFloatSlot(i) => {
            !unsafe { i.map.as_ref() }.is_ram()
        }
        Instruction::Write8Slot(i) | Instruction::Write16Slot(i) | Instruction::Write32Slot(i) | Instruction::WriteFloatSlot(i) => {
            !unsafe { i.map.as_ref() }.is_ram()
        }
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::IlBuilder;

    fn straight_line_block() -> IlBlock {
        let mut b = IlBuilder::new();
        let g = b.alloc_slot(crate::il::SlotType::General).unwrap();
        let pc = b.alloc_slot(crate::il::SlotType::General).unwrap();
        let hash = b.alloc_slot(crate::il::SlotType::General).unwrap();
        b.set_slot(g, 41).unwrap();
        b.add_const32(g, 1).unwrap();
        b.set_slot(pc, 0x1000).unwrap();
        b.set_slot(hash, 7).unwrap();
        b.jump(pc, hash).unwrap();
        b.finish()
    }

    #[test]
    fn pure_block_has_no_side_effects() {
        let block = straight_line_block();
        assert!(!block_has_side_effects(&block));
    }

    #[test]
    fn compiling_and_calling_a_straight_line_block_reaches_its_jump_target() {
        let block = straight_line_block();
        let mut exec_mem = ExecMem::new(64 * 1024).unwrap();
        let mut clock = CycleClock::new();
        let native = NativeBlock::compile(&block, Abi::host(), &mut clock as *mut CycleClock, &mut exec_mem).unwrap();
        assert!(!native.is_dirty_stack());

        let (pc, hash) = unsafe { native.call(std::ptr::null_mut()) };
        assert_eq!(pc, 0x1000);
        assert_eq!(hash, 7);
        assert_eq!(clock.countdown as i64, -(native.cycle_count() as i64));
    }
}
