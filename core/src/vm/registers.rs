use crate::Vec;
use crate::vm::{ObjectRef, SlotCounts, SlotKind, TypedSlot, Value};

/// The five typed register arrays plus program counter and stop flag.
///
/// The arrays grow on demand through [`ensure`](Self::ensure); the
/// interpreter sizes them once from a program's slot counts.
#[derive(Debug, Default)]
pub struct RegisterFile {
    pub iv: Vec<i32>,
    pub lv: Vec<i64>,
    pub fv: Vec<f32>,
    pub dv: Vec<f64>,
    pub ov: Vec<ObjectRef>,
    pub ptr: usize,
    pub stopped: bool,
}

impl RegisterFile {
    pub fn new(counts: SlotCounts) -> Self {
        let mut registers = Self::default();
        registers.ensure(counts);
        registers
    }

    /// Grows every array to at least the given size.
    pub fn ensure(&mut self, counts: SlotCounts) {
        fn grow<T: Clone>(v: &mut Vec<T>, len: u32, zero: T) {
            if v.len() < len as usize {
                v.resize(len as usize, zero);
            }
        }
        grow(&mut self.iv, counts.int, 0);
        grow(&mut self.lv, counts.long, 0);
        grow(&mut self.fv, counts.float, 0.0);
        grow(&mut self.dv, counts.double, 0.0);
        grow(&mut self.ov, counts.object, None);
    }

    /// Zeroes every register and rewinds to the first instruction.
    pub fn reset(&mut self) {
        self.iv.fill(0);
        self.lv.fill(0);
        self.fv.fill(0.0);
        self.dv.fill(0.0);
        self.ov.fill(None);
        self.ptr = 0;
        self.stopped = false;
    }

    pub fn get(&self, slot: TypedSlot) -> Value {
        let i = slot.slot.index();
        match slot.kind {
            SlotKind::Int => Value::Int(self.iv[i]),
            SlotKind::Long => Value::Long(self.lv[i]),
            SlotKind::Float => Value::Float(self.fv[i]),
            SlotKind::Double => Value::Double(self.dv[i]),
            SlotKind::Object => Value::Object(self.ov[i].clone()),
        }
    }

    /// Writes `value` into `slot`. Returns `false`, leaving the register
    /// untouched, when the value belongs to another partition.
    pub fn set(&mut self, slot: TypedSlot, value: Value) -> bool {
        let i = slot.slot.index();
        match (slot.kind, value) {
            (SlotKind::Int, Value::Int(v)) => self.iv[i] = v,
            (SlotKind::Long, Value::Long(v)) => self.lv[i] = v,
            (SlotKind::Float, Value::Float(v)) => self.fv[i] = v,
            (SlotKind::Double, Value::Double(v)) => self.dv[i] = v,
            (SlotKind::Object, Value::Object(v)) => self.ov[i] = v,
            _ => return false,
        }
        true
    }
}
