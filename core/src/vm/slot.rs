//! Register slots and the five register partitions.

use core::fmt;

/// Which typed register array a slot indexes into.
///
/// Narrow integral types (`boolean`, `byte`, `short`, `char`) share the int
/// partition; everything reference-typed lives in the object partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotKind {
    Int,
    Long,
    Float,
    Double,
    Object,
}

impl SlotKind {
    pub const ALL: [SlotKind; 5] = [
        SlotKind::Int,
        SlotKind::Long,
        SlotKind::Float,
        SlotKind::Double,
        SlotKind::Object,
    ];

    /// Dense index, used to address per-kind tables.
    pub const fn index(self) -> usize {
        match self {
            SlotKind::Int => 0,
            SlotKind::Long => 1,
            SlotKind::Float => 2,
            SlotKind::Double => 3,
            SlotKind::Object => 4,
        }
    }

    /// Single-letter prefix used by the instruction printer (`i0`, `o3`, ...).
    pub const fn prefix(self) -> char {
        match self {
            SlotKind::Int => 'i',
            SlotKind::Long => 'l',
            SlotKind::Float => 'f',
            SlotKind::Double => 'd',
            SlotKind::Object => 'o',
        }
    }
}

/// Index into one of the five register arrays.
///
/// A slot carries no type of its own; the partition is implied by the
/// instruction that reads or writes it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot(pub u32);

impl Slot {
    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A slot together with its partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypedSlot {
    pub kind: SlotKind,
    pub slot: Slot,
}

impl TypedSlot {
    pub const fn new(kind: SlotKind, slot: Slot) -> Self {
        Self { kind, slot }
    }
}

impl fmt::Display for TypedSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.slot.0)
    }
}

/// Per-partition slot counts: the size each register array needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotCounts {
    pub int: u32,
    pub long: u32,
    pub float: u32,
    pub double: u32,
    pub object: u32,
}

impl SlotCounts {
    pub fn get(&self, kind: SlotKind) -> u32 {
        match kind {
            SlotKind::Int => self.int,
            SlotKind::Long => self.long,
            SlotKind::Float => self.float,
            SlotKind::Double => self.double,
            SlotKind::Object => self.object,
        }
    }

    pub fn get_mut(&mut self, kind: SlotKind) -> &mut u32 {
        match kind {
            SlotKind::Int => &mut self.int,
            SlotKind::Long => &mut self.long,
            SlotKind::Float => &mut self.float,
            SlotKind::Double => &mut self.double,
            SlotKind::Object => &mut self.object,
        }
    }
}
