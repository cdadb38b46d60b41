//! HIR instructions, blocks, and functions
//!
//! Defines the SSA-form intermediate representation produced by the PPC
//! frontend and consumed by the compiler passes and backend assembler.
//! Instructions operate on typed SSA values (`ValueRef`) and are grouped
//! into basic blocks with explicit terminators.

use rustc_hash::FxHashMap;
use super::types::{Endianness, IrType};

/// Reference to an SSA value: a dense, monotonically-increasing index
/// assigned by `HirBuilder` as each value is defined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueRef(pub u32);

impl std::fmt::Display for ValueRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Basic block identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "block{}", self.0)
    }
}

/// A condition-register field selector, `cr0`..`cr7`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CrField(pub u8);

/// One of the four predicate bits within a condition-register field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrBit {
    Lt,
    Gt,
    Eq,
    So,
}

/// Whether a compare treats its operands as signed or unsigned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signedness {
    Signed,
    Unsigned,
}

/// Rounding mode carried on floating/vector arithmetic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoundingMode {
    Nearest,
}

/// Flags that influence an instruction's side-effect classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstrFlags {
    /// Inhibits dead-code elimination even with no recorded uses
    pub volatile: bool,
}

/// A HIR instruction
#[derive(Debug, Clone)]
pub enum Instr {
    // ===== Constants =====
    ConstI8 { dest: ValueRef, value: i8 },
    ConstI16 { dest: ValueRef, value: i16 },
    ConstI32 { dest: ValueRef, value: i32 },
    ConstI64 { dest: ValueRef, value: i64 },
    ConstF32 { dest: ValueRef, value: f32 },
    ConstF64 { dest: ValueRef, value: f64 },
    ConstV128 { dest: ValueRef, value: [u32; 4] },

    // ===== Guest context access =====
    LoadContext { dest: ValueRef, offset: u32, ty: IrType },
    StoreContext { offset: u32, value: ValueRef, flags: InstrFlags },

    // ===== Guest memory access =====
    Load { dest: ValueRef, addr: ValueRef, ty: IrType, endian: Endianness },
    Store { addr: ValueRef, value: ValueRef, ty: IrType, endian: Endianness, flags: InstrFlags },
    /// `lwarx`/`ldarx`: load and set the reservation
    LoadReserved { dest: ValueRef, addr: ValueRef, ty: IrType },
    /// `stwcx.`/`stdcx.`: store only if the reservation is still held; dest receives 1/0
    StoreConditional { dest: ValueRef, addr: ValueRef, value: ValueRef, ty: IrType, flags: InstrFlags },
    /// Coarse memory barrier (`sync`, `lwsync`, `isync`)
    MemoryBarrier { flags: InstrFlags },

    // ===== Integer arithmetic (three-address, width carried by dest type) =====
    Add { dest: ValueRef, lhs: ValueRef, rhs: ValueRef },
    AddCarrying { dest: ValueRef, carry_out: ValueRef, lhs: ValueRef, rhs: ValueRef },
    AddExtended { dest: ValueRef, carry_out: ValueRef, lhs: ValueRef, rhs: ValueRef, carry_in: ValueRef },
    AddOverflowing { dest: ValueRef, overflow_out: ValueRef, lhs: ValueRef, rhs: ValueRef },
    Sub { dest: ValueRef, lhs: ValueRef, rhs: ValueRef },
    SubCarrying { dest: ValueRef, carry_out: ValueRef, lhs: ValueRef, rhs: ValueRef },
    SubExtended { dest: ValueRef, carry_out: ValueRef, lhs: ValueRef, rhs: ValueRef, carry_in: ValueRef },
    SubOverflowing { dest: ValueRef, overflow_out: ValueRef, lhs: ValueRef, rhs: ValueRef },
    Neg { dest: ValueRef, src: ValueRef },
    Mul { dest: ValueRef, lhs: ValueRef, rhs: ValueRef },
    MulHigh { dest: ValueRef, lhs: ValueRef, rhs: ValueRef, signedness: Signedness },
    MulOverflowing { dest: ValueRef, overflow_out: ValueRef, lhs: ValueRef, rhs: ValueRef },
    Div { dest: ValueRef, lhs: ValueRef, rhs: ValueRef, signedness: Signedness },
    Rem { dest: ValueRef, lhs: ValueRef, rhs: ValueRef, signedness: Signedness },

    // ===== Bitwise =====
    And { dest: ValueRef, lhs: ValueRef, rhs: ValueRef },
    Or { dest: ValueRef, lhs: ValueRef, rhs: ValueRef },
    Xor { dest: ValueRef, lhs: ValueRef, rhs: ValueRef },
    Not { dest: ValueRef, src: ValueRef },
    Shl { dest: ValueRef, lhs: ValueRef, rhs: ValueRef },
    Shr { dest: ValueRef, lhs: ValueRef, rhs: ValueRef, signedness: Signedness },
    Rotate { dest: ValueRef, src: ValueRef, amount: ValueRef },
    /// PPC `rlwinm`-style rotate-then-mask, amount and mask both constant
    RotateAndMask { dest: ValueRef, src: ValueRef, rotate: u8, mask_begin: u8, mask_end: u8 },
    CountLeadingZeros { dest: ValueRef, src: ValueRef },

    // ===== Conversions =====
    ZeroExtend { dest: ValueRef, src: ValueRef },
    SignExtend { dest: ValueRef, src: ValueRef },
    Truncate { dest: ValueRef, src: ValueRef },
    IntToFloat { dest: ValueRef, src: ValueRef, signedness: Signedness },
    FloatToInt { dest: ValueRef, src: ValueRef, signedness: Signedness },
    FloatCast { dest: ValueRef, src: ValueRef },
    Bitcast { dest: ValueRef, src: ValueRef, ty: IrType },

    // ===== Floating-point arithmetic =====
    FAdd { dest: ValueRef, lhs: ValueRef, rhs: ValueRef, rounding: RoundingMode },
    FSub { dest: ValueRef, lhs: ValueRef, rhs: ValueRef, rounding: RoundingMode },
    FMul { dest: ValueRef, lhs: ValueRef, rhs: ValueRef, rounding: RoundingMode },
    FDiv { dest: ValueRef, lhs: ValueRef, rhs: ValueRef, rounding: RoundingMode },
    FNeg { dest: ValueRef, src: ValueRef },
    FAbs { dest: ValueRef, src: ValueRef },
    FMulAdd { dest: ValueRef, a: ValueRef, b: ValueRef, c: ValueRef, rounding: RoundingMode },
    FSqrt { dest: ValueRef, src: ValueRef },

    // ===== Compares: produce a bool (I8) value =====
    ICmp { dest: ValueRef, lhs: ValueRef, rhs: ValueRef, signedness: Signedness, op: CmpOp },
    FCmp { dest: ValueRef, lhs: ValueRef, rhs: ValueRef, op: CmpOp },

    // ===== Condition register =====
    /// Sets all four predicate bits of a CR field from a three-way compare result
    SetCrField { field: CrField, lhs: ValueRef, rhs: ValueRef, signedness: Signedness },
    /// Reads one predicate bit out of a CR field as a bool value
    GetCrBit { dest: ValueRef, field: CrField, bit: CrBit },
    /// Writes one predicate bit of a CR field
    SetCrBit { field: CrField, bit: CrBit, value: ValueRef },
    /// `mfcr`: all 32 CR bits packed into dest
    MoveFromCr { dest: ValueRef },
    /// `mtcrf`: scatter a 32-bit value into CR fields selected by `field_mask`
    MoveToCrFields { value: ValueRef, field_mask: u8 },

    // ===== XER =====
    GetXerCarry { dest: ValueRef },
    SetXerCarry { value: ValueRef },
    SetXerOverflow { value: ValueRef },
    GetXerCount { dest: ValueRef },
    SetXerCount { value: ValueRef },

    // ===== Vector (V128, 4 x i32/f32 lanes in logical xyzw order) =====
    VSplat { dest: ValueRef, src: ValueRef },
    VExtractLane { dest: ValueRef, src: ValueRef, lane: u8 },
    VInsertLane { dest: ValueRef, src: ValueRef, lane: u8, value: ValueRef },
    VSwizzle { dest: ValueRef, src: ValueRef, lanes: [u8; 4] },
    VAdd { dest: ValueRef, lhs: ValueRef, rhs: ValueRef },
    VSub { dest: ValueRef, lhs: ValueRef, rhs: ValueRef },
    VMul { dest: ValueRef, lhs: ValueRef, rhs: ValueRef },
    VAnd { dest: ValueRef, lhs: ValueRef, rhs: ValueRef },
    VOr { dest: ValueRef, lhs: ValueRef, rhs: ValueRef },
    VXor { dest: ValueRef, lhs: ValueRef, rhs: ValueRef },

    // ===== Calls =====
    Call { dest: Option<ValueRef>, target: u32, args: Vec<ValueRef> },
    CallIndirect { dest: Option<ValueRef>, target: ValueRef, args: Vec<ValueRef> },
    /// Unknown encoding: emits a host trap call carrying the guest address
    Trap { cia: u32, reason: TrapReason },

    // ===== SSA plumbing =====
    Phi { dest: ValueRef, sources: Vec<(BlockId, ValueRef)> },
    Move { dest: ValueRef, src: ValueRef },
}

/// Comparison predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Why a `Trap` instruction was emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapReason {
    InvalidInstruction,
    DebugBreak,
}

impl Instr {
    /// Destination value produced by this instruction, if any
    pub fn dest(&self) -> Option<ValueRef> {
        match self {
            Instr::ConstI8 { dest, .. }
            | Instr::ConstI16 { dest, .. }
            | Instr::ConstI32 { dest, .. }
            | Instr::ConstI64 { dest, .. }
            | Instr::ConstF32 { dest, .. }
            | Instr::ConstF64 { dest, .. }
            | Instr::ConstV128 { dest, .. }
            | Instr::LoadContext { dest, .. }
            | Instr::Load { dest, .. }
            | Instr::LoadReserved { dest, .. }
            | Instr::StoreConditional { dest, .. }
            | Instr::Add { dest, .. }
            | Instr::Sub { dest, .. }
            | Instr::Neg { dest, .. }
            | Instr::Mul { dest, .. }
            | Instr::MulHigh { dest, .. }
            | Instr::Div { dest, .. }
            | Instr::Rem { dest, .. }
            | Instr::And { dest, .. }
            | Instr::Or { dest, .. }
            | Instr::Xor { dest, .. }
            | Instr::Not { dest, .. }
            | Instr::Shl { dest, .. }
            | Instr::Shr { dest, .. }
            | Instr::Rotate { dest, .. }
            | Instr::RotateAndMask { dest, .. }
            | Instr::CountLeadingZeros { dest, .. }
            | Instr::ZeroExtend { dest, .. }
            | Instr::SignExtend { dest, .. }
            | Instr::Truncate { dest, .. }
            | Instr::IntToFloat { dest, .. }
            | Instr::FloatToInt { dest, .. }
            | Instr::FloatCast { dest, .. }
            | Instr::Bitcast { dest, .. }
            | Instr::FAdd { dest, .. }
            | Instr::FSub { dest, .. }
            | Instr::FMul { dest, .. }
            | Instr::FDiv { dest, .. }
            | Instr::FNeg { dest, .. }
            | Instr::FAbs { dest, .. }
            | Instr::FMulAdd { dest, .. }
            | Instr::FSqrt { dest, .. }
            | Instr::ICmp { dest, .. }
            | Instr::FCmp { dest, .. }
            | Instr::GetCrBit { dest, .. }
            | Instr::MoveFromCr { dest }
            | Instr::GetXerCarry { dest }
            | Instr::GetXerCount { dest }
            | Instr::VSplat { dest, .. }
            | Instr::VExtractLane { dest, .. }
            | Instr::VInsertLane { dest, .. }
            | Instr::VSwizzle { dest, .. }
            | Instr::VAdd { dest, .. }
            | Instr::VSub { dest, .. }
            | Instr::VMul { dest, .. }
            | Instr::VAnd { dest, .. }
            | Instr::VOr { dest, .. }
            | Instr::VXor { dest, .. }
            | Instr::Phi { dest, .. }
            | Instr::Move { dest, .. } => Some(*dest),

            Instr::AddCarrying { dest, .. }
            | Instr::AddExtended { dest, .. }
            | Instr::AddOverflowing { dest, .. }
            | Instr::SubCarrying { dest, .. }
            | Instr::SubExtended { dest, .. }
            | Instr::SubOverflowing { dest, .. }
            | Instr::MulOverflowing { dest, .. } => Some(*dest),

            Instr::Call { dest, .. } | Instr::CallIndirect { dest, .. } => *dest,

            Instr::StoreContext { .. }
            | Instr::Store { .. }
            | Instr::MemoryBarrier { .. }
            | Instr::SetCrField { .. }
            | Instr::SetCrBit { .. }
            | Instr::MoveToCrFields { .. }
            | Instr::SetXerCarry { .. }
            | Instr::SetXerOverflow { .. }
            | Instr::SetXerCount { .. }
            | Instr::Trap { .. } => None,
        }
    }

    /// A second destination for two-result instructions (carry/overflow out)
    pub fn secondary_dest(&self) -> Option<ValueRef> {
        match self {
            Instr::AddCarrying { carry_out, .. }
            | Instr::AddExtended { carry_out, .. }
            | Instr::SubCarrying { carry_out, .. }
            | Instr::SubExtended { carry_out, .. } => Some(*carry_out),
            Instr::AddOverflowing { overflow_out, .. }
            | Instr::SubOverflowing { overflow_out, .. }
            | Instr::MulOverflowing { overflow_out, .. } => Some(*overflow_out),
            _ => None,
        }
    }

    /// Whether this instruction has an effect beyond producing its dest value,
    /// and so must survive dead-code elimination even with zero recorded uses.
    pub fn has_side_effects(&self) -> bool {
        if self.flags().volatile {
            return true;
        }
        matches!(
            self,
            Instr::StoreContext { .. }
                | Instr::Store { .. }
                | Instr::StoreConditional { .. }
                | Instr::MemoryBarrier { .. }
                | Instr::SetCrField { .. }
                | Instr::SetCrBit { .. }
                | Instr::MoveToCrFields { .. }
                | Instr::SetXerCarry { .. }
                | Instr::SetXerOverflow { .. }
                | Instr::SetXerCount { .. }
                | Instr::Call { .. }
                | Instr::CallIndirect { .. }
                | Instr::Trap { .. }
                | Instr::LoadReserved { .. }
        )
    }

    fn flags(&self) -> InstrFlags {
        match self {
            Instr::StoreContext { flags, .. }
            | Instr::Store { flags, .. }
            | Instr::StoreConditional { flags, .. }
            | Instr::MemoryBarrier { flags } => *flags,
            _ => InstrFlags::default(),
        }
    }

    /// Every value this instruction reads, in operand order (excludes `dest`)
    pub fn operands(&self) -> Vec<ValueRef> {
        match self {
            Instr::ConstI8 { .. } | Instr::ConstI16 { .. } | Instr::ConstI32 { .. }
            | Instr::ConstI64 { .. } | Instr::ConstF32 { .. } | Instr::ConstF64 { .. }
            | Instr::ConstV128 { .. } | Instr::LoadContext { .. } | Instr::MoveFromCr { .. }
            | Instr::GetXerCarry { .. } | Instr::GetXerCount { .. } | Instr::MemoryBarrier { .. }
            | Instr::Trap { .. } => vec![],

            Instr::StoreContext { value, .. }
            | Instr::Neg { dest: _, src: value }
            | Instr::Not { dest: _, src: value }
            | Instr::CountLeadingZeros { dest: _, src: value }
            | Instr::ZeroExtend { dest: _, src: value }
            | Instr::SignExtend { dest: _, src: value }
            | Instr::Truncate { dest: _, src: value }
            | Instr::IntToFloat { dest: _, src: value, .. }
            | Instr::FloatToInt { dest: _, src: value, .. }
            | Instr::FloatCast { dest: _, src: value }
            | Instr::Bitcast { dest: _, src: value, .. }
            | Instr::FNeg { dest: _, src: value }
            | Instr::FAbs { dest: _, src: value }
            | Instr::FSqrt { dest: _, src: value }
            | Instr::VSplat { dest: _, src: value }
            | Instr::VSwizzle { dest: _, src: value, .. }
            | Instr::Move { dest: _, src: value }
            | Instr::SetXerCarry { value }
            | Instr::SetXerOverflow { value }
            | Instr::SetXerCount { value }
            | Instr::MoveToCrFields { value, .. } => vec![*value],

            Instr::Load { addr, .. } | Instr::LoadReserved { addr, .. } => vec![*addr],
            Instr::Store { addr, value, .. } => vec![*addr, *value],
            Instr::StoreConditional { addr, value, .. } => vec![*addr, *value],

            Instr::Add { lhs, rhs, .. }
            | Instr::Sub { lhs, rhs, .. }
            | Instr::Mul { lhs, rhs, .. }
            | Instr::MulHigh { lhs, rhs, .. }
            | Instr::Div { lhs, rhs, .. }
            | Instr::Rem { lhs, rhs, .. }
            | Instr::And { lhs, rhs, .. }
            | Instr::Or { lhs, rhs, .. }
            | Instr::Xor { lhs, rhs, .. }
            | Instr::Shl { lhs, rhs, .. }
            | Instr::Shr { lhs, rhs, .. }
            | Instr::FAdd { lhs, rhs, .. }
            | Instr::FSub { lhs, rhs, .. }
            | Instr::FMul { lhs, rhs, .. }
            | Instr::FDiv { lhs, rhs, .. }
            | Instr::ICmp { lhs, rhs, .. }
            | Instr::FCmp { lhs, rhs, .. }
            | Instr::SetCrField { lhs, rhs, .. }
            | Instr::VAdd { lhs, rhs, .. }
            | Instr::VSub { lhs, rhs, .. }
            | Instr::VMul { lhs, rhs, .. }
            | Instr::VAnd { lhs, rhs, .. }
            | Instr::VOr { lhs, rhs, .. }
            | Instr::VXor { lhs, rhs, .. } => vec![*lhs, *rhs],

            Instr::AddCarrying { lhs, rhs, .. }
            | Instr::SubCarrying { lhs, rhs, .. }
            | Instr::AddOverflowing { lhs, rhs, .. }
            | Instr::SubOverflowing { lhs, rhs, .. }
            | Instr::MulOverflowing { lhs, rhs, .. } => vec![*lhs, *rhs],
            Instr::AddExtended { lhs, rhs, carry_in, .. }
            | Instr::SubExtended { lhs, rhs, carry_in, .. } => vec![*lhs, *rhs, *carry_in],

            Instr::Rotate { src, amount, .. } => vec![*src, *amount],
            Instr::RotateAndMask { src, .. } => vec![*src],

            Instr::FMulAdd { a, b, c, .. } => vec![*a, *b, *c],

            Instr::SetCrBit { value, .. } => vec![*value],
            Instr::GetCrBit { .. } => vec![],

            Instr::VExtractLane { src, .. } => vec![*src],
            Instr::VInsertLane { src, value, .. } => vec![*src, *value],

            Instr::Call { args, .. } => args.clone(),
            Instr::CallIndirect { target, args, .. } => {
                let mut v = vec![*target];
                v.extend(args.iter().copied());
                v
            }

            Instr::Phi { sources, .. } => sources.iter().map(|(_, v)| *v).collect(),
        }
    }
}

/// A basic block in the HIR
#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub label: Option<LabelId>,
    pub instrs: Vec<Instr>,
    pub terminator: Terminator,
    pub predecessors: Vec<BlockId>,
    /// Set once Finalization assigns ordinals
    pub ordinal: Option<u32>,
}

/// A named branch target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(pub u32);

/// How a block terminates
#[derive(Debug, Clone)]
pub enum Terminator {
    Jump(BlockId),
    BranchTrue { cond: ValueRef, then_block: BlockId, else_block: BlockId },
    BranchFalse { cond: ValueRef, then_block: BlockId, else_block: BlockId },
    Return(Option<ValueRef>),
    /// Not yet assigned (scanner/lifter in progress)
    Unset,
}

/// A complete HIR function: the translation unit for one guest function
#[derive(Debug)]
pub struct HirFunction {
    /// Guest entry address
    pub address: u32,
    pub name: String,
    pub blocks: Vec<Block>,
    pub entry: BlockId,
    next_value: u32,
    pub value_types: FxHashMap<ValueRef, IrType>,
    next_label: u32,
    /// Register/spill slot numbering assigned by the RegisterAllocation pass
    pub slots: FxHashMap<ValueRef, u32>,
}

impl HirFunction {
    pub fn new(address: u32, name: String) -> Self {
        HirFunction {
            address,
            name,
            blocks: vec![],
            entry: BlockId(0),
            next_value: 0,
            value_types: FxHashMap::default(),
            next_label: 0,
            slots: FxHashMap::default(),
        }
    }

    pub fn alloc_value(&mut self, ty: IrType) -> ValueRef {
        let v = ValueRef(self.next_value);
        self.next_value += 1;
        self.value_types.insert(v, ty);
        v
    }

    pub fn value_type(&self, v: ValueRef) -> IrType {
        self.value_types.get(&v).copied().unwrap_or(IrType::I64)
    }

    pub fn alloc_label(&mut self) -> LabelId {
        let l = LabelId(self.next_label);
        self.next_label += 1;
        l
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            id,
            label: None,
            instrs: vec![],
            terminator: Terminator::Unset,
            predecessors: vec![],
            ordinal: None,
        });
        id
    }

    pub fn instr_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instrs.len()).sum()
    }
}
