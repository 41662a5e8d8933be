//! The IL opcode set.
//!
//! Mirrors `enum jit_opcode` in `jit_il.h` one-for-one — this crate keeps the
//! unsigned/signed/signed-const comparison families as distinct opcodes
//! rather than collapsing them, since the source gives each its own
//! immediate shape and native lowering.

use std::fmt;

/// One IL operation. See [`crate::il::Instruction`] for the operand payload
/// each variant carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Fallback,
    Jump,
    Cset,
    SetSlot,
    SetSlotHostPtr,
    CallFunc,
    CallFuncImm32,
    Read16ConstAddr,
    SignExtend8,
    SignExtend16,
    Read32ConstAddr,
    Read8Slot,
    Read16Slot,
    Read32Slot,
    ReadFloatSlot,
    Write8Slot,
    Write16Slot,
    Write32Slot,
    WriteFloatSlot,
    LoadSlot16,
    LoadSlot,
    LoadSlotOffset,
    LoadFloatSlot,
    LoadFloatSlotOffset,
    StoreSlot,
    StoreSlotOffset,
    StoreFloatSlot,
    StoreFloatSlotOffset,
    Add,
    Sub,
    SubFloat,
    AddFloat,
    AddConst32,
    Xor,
    XorConst32,
    Mov,
    MovFloat,
    And,
    AndConst32,
    Or,
    OrConst32,
    SlotToBoolInv,
    Not,
    Shll,
    Shar,
    Shlr,
    Shad,
    SetGtUnsigned,
    SetGtSigned,
    SetGtSignedConst,
    SetEq,
    SetGeUnsigned,
    SetGeSigned,
    SetGeSignedConst,
    SetGtFloat,
    MulU32,
    MulFloat,
    ClearFloat,
    DiscardSlot,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
