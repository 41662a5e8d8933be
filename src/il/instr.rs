//! IL instructions: one variant per [`Opcode`], each carrying the operand
//! record the corresponding `struct ..._immed` in `jit_il.h` carried.

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;

use crate::dispatch_meta::GuestMemoryMap;
use crate::il::{Opcode, Slot};

/// A guest instruction encoding, passed through to fallback/interpreter
/// functions untouched. SH-4 instructions are fixed 16-bit words.
pub type GuestInst = u16;

/// Signature of an interpreter fallback function: takes the opaque CPU
/// state pointer and the raw guest instruction word.
pub type FallbackFn = unsafe extern "C" fn(*mut c_void, GuestInst);

/// Signature of a function `CALL_FUNC`/`CALL_FUNC_IMM32` may invoke: takes
/// the opaque CPU state pointer and a 32-bit argument.
pub type CallFn = unsafe extern "C" fn(*mut c_void, u32);

/// A pointer into the guest's memory map, tagged with the trait object that
/// knows how to dispatch reads/writes through it.
pub type MapPtr = NonNull<dyn GuestMemoryMap>;

/// The maximum number of slots any single instruction reads.
pub const MAX_READ_SLOTS: usize = 3;
/// The maximum number of slots any single instruction writes.
pub const MAX_WRITE_SLOTS: usize = 2;

#[derive(Clone, Copy)]
pub struct FallbackImmed {
    pub fallback_fn: FallbackFn,
    pub inst: GuestInst,
}

#[derive(Clone, Copy, Debug)]
pub struct JumpImmed {
    pub jmp_addr_slot: Slot,
    pub jmp_hash_slot: Slot,
}

#[derive(Clone, Copy, Debug)]
pub struct CsetImmed {
    pub flag_slot: Slot,
    pub t_flag: bool,
    pub src_val: u32,
    pub dst_slot: Slot,
}

#[derive(Clone, Copy, Debug)]
pub struct SetSlotImmed {
    pub slot: Slot,
    pub new_val: u32,
}

#[derive(Clone, Copy)]
pub struct SetSlotHostPtrImmed {
    pub slot: Slot,
    pub ptr: NonNull<()>,
}

#[derive(Clone, Copy)]
pub struct CallFuncImmed {
    pub func: CallFn,
    pub slot: Slot,
}

#[derive(Clone, Copy)]
pub struct CallFuncImm32Immed {
    pub func: CallFn,
    pub imm32: u32,
}

#[derive(Clone, Copy)]
pub struct ReadConstAddrImmed {
    pub map: MapPtr,
    pub addr: u32,
    pub slot: Slot,
}

#[derive(Clone, Copy, Debug)]
pub struct SignExtendImmed {
    pub slot: Slot,
}

#[derive(Clone, Copy)]
pub struct ReadSlotImmed {
    pub map: MapPtr,
    pub addr_slot: Slot,
    pub dst_slot: Slot,
}

#[derive(Clone, Copy)]
pub struct WriteSlotImmed {
    pub map: MapPtr,
    pub src_slot: Slot,
    pub addr_slot: Slot,
}

#[derive(Clone, Copy)]
pub struct LoadSlot16Immed {
    pub src: NonNull<u16>,
    pub slot: Slot,
}

#[derive(Clone, Copy)]
pub struct LoadSlotImmed {
    pub src: NonNull<u32>,
    pub slot: Slot,
}

#[derive(Clone, Copy, Debug)]
pub struct LoadSlotOffsetImmed {
    pub slot_base: Slot,
    pub index: u32,
    pub slot_dst: Slot,
}

#[derive(Clone, Copy)]
pub struct LoadFloatSlotImmed {
    pub src: NonNull<f32>,
    pub slot: Slot,
}

#[derive(Clone, Copy, Debug)]
pub struct LoadFloatSlotOffsetImmed {
    pub slot_base: Slot,
    pub index: u32,
    pub slot_dst: Slot,
}

#[derive(Clone, Copy)]
pub struct StoreSlotImmed {
    pub dst: NonNull<u32>,
    pub slot: Slot,
}

#[derive(Clone, Copy, Debug)]
pub struct StoreSlotOffsetImmed {
    pub slot_src: Slot,
    pub slot_base: Slot,
    pub index: u32,
}

#[derive(Clone, Copy)]
pub struct StoreFloatSlotImmed {
    pub dst: NonNull<f32>,
    pub slot: Slot,
}

#[derive(Clone, Copy, Debug)]
pub struct StoreFloatSlotOffsetImmed {
    pub slot_src: Slot,
    pub slot_base: Slot,
    pub index: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct TwoSlotImmed {
    pub slot_src: Slot,
    pub slot_dst: Slot,
}

#[derive(Clone, Copy, Debug)]
pub struct Const32Immed {
    pub slot: Slot,
    pub const32: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct OneSlotImmed {
    pub slot: Slot,
}

#[derive(Clone, Copy, Debug)]
pub struct ShiftImmed {
    pub slot: Slot,
    pub shift_amt: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct ShadImmed {
    pub slot_val: Slot,
    pub slot_shift_amt: Slot,
}

#[derive(Clone, Copy, Debug)]
pub struct SetCmpImmed {
    pub slot_lhs: Slot,
    pub slot_rhs: Slot,
    pub slot_dst: Slot,
}

#[derive(Clone, Copy, Debug)]
pub struct SetCmpConstImmed {
    pub slot_lhs: Slot,
    pub imm_rhs: i32,
    pub slot_dst: Slot,
}

#[derive(Clone, Copy, Debug)]
pub struct MulFloatImmed {
    pub slot_lhs: Slot,
    pub slot_dst: Slot,
}

/// One IL instruction: an opcode paired with its operand record.
#[derive(Clone, Copy)]
pub enum Instruction {
    Fallback(FallbackImmed),
    Jump(JumpImmed),
    Cset(CsetImmed),
    SetSlot(SetSlotImmed),
    SetSlotHostPtr(SetSlotHostPtrImmed),
    CallFunc(CallFuncImmed),
    CallFuncImm32(CallFuncImm32Immed),
    Read16ConstAddr(ReadConstAddrImmed),
    SignExtend8(SignExtendImmed),
    SignExtend16(SignExtendImmed),
    Read32ConstAddr(ReadConstAddrImmed),
    Read8Slot(ReadSlotImmed),
    Read16Slot(ReadSlotImmed),
    Read32Slot(ReadSlotImmed),
    ReadFloatSlot(ReadSlotImmed),
    Write8Slot(WriteSlotImmed),
    Write16Slot(WriteSlotImmed),
    Write32Slot(WriteSlotImmed),
    WriteFloatSlot(WriteSlotImmed),
    LoadSlot16(LoadSlot16Immed),
    LoadSlot(LoadSlotImmed),
    LoadSlotOffset(LoadSlotOffsetImmed),
    LoadFloatSlot(LoadFloatSlotImmed),
    LoadFloatSlotOffset(LoadFloatSlotOffsetImmed),
    StoreSlot(StoreSlotImmed),
    StoreSlotOffset(StoreSlotOffsetImmed),
    StoreFloatSlot(StoreFloatSlotImmed),
    StoreFloatSlotOffset(StoreFloatSlotOffsetImmed),
    Add(TwoSlotImmed),
    Sub(TwoSlotImmed),
    SubFloat(TwoSlotImmed),
    AddFloat(TwoSlotImmed),
    AddConst32(Const32Immed),
    Xor(TwoSlotImmed),
    XorConst32(Const32Immed),
    Mov(TwoSlotImmed),
    MovFloat(TwoSlotImmed),
    And(TwoSlotImmed),
    AndConst32(Const32Immed),
    Or(TwoSlotImmed),
    OrConst32(Const32Immed),
    SlotToBoolInv(OneSlotImmed),
    Not(OneSlotImmed),
    Shll(ShiftImmed),
    Shar(ShiftImmed),
    Shlr(ShiftImmed),
    Shad(ShadImmed),
    SetGtUnsigned(SetCmpImmed),
    SetGtSigned(SetCmpImmed),
    SetGtSignedConst(SetCmpConstImmed),
    SetEq(SetCmpImmed),
    SetGeUnsigned(SetCmpImmed),
    SetGeSigned(SetCmpImmed),
    SetGeSignedConst(SetCmpConstImmed),
    SetGtFloat(SetCmpImmed),
    MulU32(SetCmpImmed),
    MulFloat(MulFloatImmed),
    ClearFloat(OneSlotImmed),
    DiscardSlot(OneSlotImmed),
}

impl Instruction {
    /// The opcode this instruction carries.
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Fallback(_) => Opcode::Fallback,
            Instruction::Jump(_) => Opcode::Jump,
            Instruction::Cset(_) => Opcode::Cset,
            Instruction::SetSlot(_) => Opcode::SetSlot,
            Instruction::SetSlotHostPtr(_) => Opcode::SetSlotHostPtr,
            Instruction::CallFunc(_) => Opcode::CallFunc,
            Instruction::CallFuncImm32(_) => Opcode::CallFuncImm32,
            Instruction::Read16ConstAddr(_) => Opcode::Read16ConstAddr,
            Instruction::SignExtend8(_) => Opcode::SignExtend8,
            Instruction::SignExtend16(_) => Opcode::SignExtend16,
            Instruction::Read32ConstAddr(_) => Opcode::Read32ConstAddr,
            Instruction::Read8Slot(_) => Opcode::Read8Slot,
            Instruction::Read16Slot(_) => Opcode::Read16Slot,
            Instruction::Read32Slot(_) => Opcode::Read32Slot,
            Instruction::ReadFloatSlot(_) => Opcode::ReadFloatSlot,
            Instruction::Write8Slot(_) => Opcode::Write8Slot,
            Instruction::Write16Slot(_) => Opcode::Write16Slot,
            Instruction::Write32Slot(_) => Opcode::Write32Slot,
            Instruction::WriteFloatSlot(_) => Opcode::WriteFloatSlot,
            Instruction::LoadSlot16(_) => Opcode::LoadSlot16,
            Instruction::LoadSlot(_) => Opcode::LoadSlot,
            Instruction::LoadSlotOffset(_) => Opcode::LoadSlotOffset,
            Instruction::LoadFloatSlot(_) => Opcode::LoadFloatSlot,
            Instruction::LoadFloatSlotOffset(_) => Opcode::LoadFloatSlotOffset,
            Instruction::StoreSlot(_) => Opcode::StoreSlot,
            Instruction::StoreSlotOffset(_) => Opcode::StoreSlotOffset,
            Instruction::StoreFloatSlot(_) => Opcode::StoreFloatSlot,
            Instruction::StoreFloatSlotOffset(_) => Opcode::StoreFloatSlotOffset,
            Instruction::Add(_) => Opcode::Add,
            Instruction::Sub(_) => Opcode::Sub,
            Instruction::SubFloat(_) => Opcode::SubFloat,
            Instruction::AddFloat(_) => Opcode::AddFloat,
            Instruction::AddConst32(_) => Opcode::AddConst32,
            Instruction::Xor(_) => Opcode::Xor,
            Instruction::XorConst32(_) => Opcode::XorConst32,
            Instruction::Mov(_) => Opcode::Mov,
            Instruction::MovFloat(_) => Opcode::MovFloat,
            Instruction::And(_) => Opcode::And,
            Instruction::AndConst32(_) => Opcode::AndConst32,
            Instruction::Or(_) => Opcode::Or,
            Instruction::OrConst32(_) => Opcode::OrConst32,
            Instruction::SlotToBoolInv(_) => Opcode::SlotToBoolInv,
            Instruction::Not(_) => Opcode::Not,
            Instruction::Shll(_) => Opcode::Shll,
            Instruction::Shar(_) => Opcode::Shar,
            Instruction::Shlr(_) => Opcode::Shlr,
            Instruction::Shad(_) => Opcode::Shad,
            Instruction::SetGtUnsigned(_) => Opcode::SetGtUnsigned,
            Instruction::SetGtSigned(_) => Opcode::SetGtSigned,
            Instruction::SetGtSignedConst(_) => Opcode::SetGtSignedConst,
            Instruction::SetEq(_) => Opcode::SetEq,
            Instruction::SetGeUnsigned(_) => Opcode::SetGeUnsigned,
            Instruction::SetGeSigned(_) => Opcode::SetGeSigned,
            Instruction::SetGeSignedConst(_) => Opcode::SetGeSignedConst,
            Instruction::SetGtFloat(_) => Opcode::SetGtFloat,
            Instruction::MulU32(_) => Opcode::MulU32,
            Instruction::MulFloat(_) => Opcode::MulFloat,
            Instruction::ClearFloat(_) => Opcode::ClearFloat,
            Instruction::DiscardSlot(_) => Opcode::DiscardSlot,
        }
    }

    /// Slots this instruction reads, in a fixed-capacity array padded with
    /// `None`. Ported field-for-field from `jit_inst_get_read_slots`.
    pub fn read_slots(&self) -> [Option<Slot>; MAX_READ_SLOTS] {
        let mut out = [None; MAX_READ_SLOTS];
        match self {
            Instruction::Jump(i) => {
                out[0] = Some(i.jmp_addr_slot);
                out[1] = Some(i.jmp_hash_slot);
            }
            Instruction::Cset(i) => {
                out[0] = Some(i.flag_slot);
                out[1] = Some(i.dst_slot);
            }
            Instruction::CallFunc(i) => out[0] = Some(i.slot),
            Instruction::SignExtend8(i) | Instruction::SignExtend16(i) => out[0] = Some(i.slot),
            Instruction::Read8Slot(i)
            | Instruction::Read16Slot(i)
            | Instruction::Read32Slot(i)
            | Instruction::ReadFloatSlot(i) => out[0] = Some(i.addr_slot),
            Instruction::Write8Slot(i)
            | Instruction::Write16Slot(i)
            | Instruction::Write32Slot(i)
            | Instruction::WriteFloatSlot(i) => {
                out[0] = Some(i.addr_slot);
                out[1] = Some(i.src_slot);
            }
            Instruction::LoadSlotOffset(i) => out[0] = Some(i.slot_base),
            Instruction::LoadFloatSlotOffset(i) => out[0] = Some(i.slot_base),
            Instruction::StoreSlot(i) => out[0] = Some(i.slot),
            Instruction::StoreSlotOffset(i) => {
                out[0] = Some(i.slot_src);
                out[1] = Some(i.slot_base);
            }
            Instruction::StoreFloatSlot(i) => out[0] = Some(i.slot),
            Instruction::StoreFloatSlotOffset(i) => {
                out[0] = Some(i.slot_src);
                out[1] = Some(i.slot_base);
            }
            Instruction::Add(i)
            | Instruction::Sub(i)
            | Instruction::SubFloat(i)
            | Instruction::AddFloat(i)
            | Instruction::Xor(i)
            | Instruction::And(i)
            | Instruction::Or(i) => {
                out[0] = Some(i.slot_src);
                out[1] = Some(i.slot_dst);
            }
            Instruction::AddConst32(i)
            | Instruction::XorConst32(i)
            | Instruction::AndConst32(i)
            | Instruction::OrConst32(i) => out[0] = Some(i.slot),
            Instruction::Mov(i) | Instruction::MovFloat(i) => out[0] = Some(i.slot_src),
            Instruction::SlotToBoolInv(i) | Instruction::Not(i) => out[0] = Some(i.slot),
            Instruction::Shll(i) | Instruction::Shar(i) | Instruction::Shlr(i) => {
                out[0] = Some(i.slot)
            }
            Instruction::Shad(i) => {
                out[0] = Some(i.slot_val);
                out[1] = Some(i.slot_shift_amt);
            }
            Instruction::SetGtUnsigned(i)
            | Instruction::SetGtSigned(i)
            | Instruction::SetEq(i)
            | Instruction::SetGeUnsigned(i)
            | Instruction::SetGeSigned(i)
            | Instruction::SetGtFloat(i) => {
                out[0] = Some(i.slot_lhs);
                out[1] = Some(i.slot_rhs);
                out[2] = Some(i.slot_dst);
            }
            Instruction::MulU32(i) => {
                out[0] = Some(i.slot_lhs);
                out[1] = Some(i.slot_rhs);
            }
            Instruction::SetGtSignedConst(i) | Instruction::SetGeSignedConst(i) => {
                out[0] = Some(i.slot_lhs);
                out[1] = Some(i.slot_dst);
            }
            Instruction::MulFloat(i) => {
                out[0] = Some(i.slot_lhs);
                out[1] = Some(i.slot_dst);
            }
            _ => {}
        }
        out
    }

    /// Slots this instruction writes, in a fixed-capacity array padded with
    /// `None`. Ported field-for-field from `jit_inst_get_write_slots`.
    pub fn write_slots(&self) -> [Option<Slot>; MAX_WRITE_SLOTS] {
        let mut out = [None; MAX_WRITE_SLOTS];
        match self {
            Instruction::Cset(i) => out[0] = Some(i.dst_slot),
            Instruction::SetSlot(i) => out[0] = Some(i.slot),
            Instruction::SetSlotHostPtr(i) => out[0] = Some(i.slot),
            Instruction::Read16ConstAddr(i) | Instruction::Read32ConstAddr(i) => {
                out[0] = Some(i.slot)
            }
            Instruction::SignExtend8(i) | Instruction::SignExtend16(i) => out[0] = Some(i.slot),
            Instruction::Read8Slot(i)
            | Instruction::Read16Slot(i)
            | Instruction::Read32Slot(i)
            | Instruction::ReadFloatSlot(i) => out[0] = Some(i.dst_slot),
            Instruction::LoadSlot16(i) => out[0] = Some(i.slot),
            Instruction::LoadSlot(i) => out[0] = Some(i.slot),
            Instruction::LoadSlotOffset(i) => out[0] = Some(i.slot_dst),
            Instruction::LoadFloatSlot(i) => out[0] = Some(i.slot),
            Instruction::LoadFloatSlotOffset(i) => out[0] = Some(i.slot_dst),
            Instruction::Add(i)
            | Instruction::Sub(i)
            | Instruction::SubFloat(i)
            | Instruction::AddFloat(i)
            | Instruction::Xor(i)
            | Instruction::Mov(i)
            | Instruction::MovFloat(i)
            | Instruction::And(i)
            | Instruction::Or(i) => out[0] = Some(i.slot_dst),
            Instruction::AddConst32(i)
            | Instruction::XorConst32(i)
            | Instruction::AndConst32(i)
            | Instruction::OrConst32(i) => out[0] = Some(i.slot),
            Instruction::SlotToBoolInv(i) | Instruction::Not(i) => out[0] = Some(i.slot),
            Instruction::Shll(i) | Instruction::Shar(i) | Instruction::Shlr(i) => {
                out[0] = Some(i.slot)
            }
            Instruction::Shad(i) => out[0] = Some(i.slot_val),
            Instruction::SetGtUnsigned(i)
            | Instruction::SetGtSigned(i)
            | Instruction::SetEq(i)
            | Instruction::SetGeUnsigned(i)
            | Instruction::SetGeSigned(i)
            | Instruction::SetGtFloat(i)
            | Instruction::MulU32(i) => out[0] = Some(i.slot_dst),
            Instruction::SetGtSignedConst(i) | Instruction::SetGeSignedConst(i) => {
                out[0] = Some(i.slot_dst)
            }
            Instruction::MulFloat(i) => out[0] = Some(i.slot_dst),
            Instruction::ClearFloat(i) => out[0] = Some(i.slot),
            _ => {}
        }
        out
    }

    /// Whether this instruction reads the given slot.
    pub fn is_read_slot(&self, slot: Slot) -> bool {
        self.read_slots().iter().any(|s| *s == Some(slot))
    }

    /// Whether this instruction writes the given slot.
    pub fn is_write_slot(&self, slot: Slot) -> bool {
        self.write_slots().iter().any(|s| *s == Some(slot))
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.opcode())
    }
}
