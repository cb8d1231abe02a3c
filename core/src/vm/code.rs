use alloc::boxed::Box;
use alloc::rc::Rc;

use crate::Vec;
use crate::vm::printer::InstructionPrinter;
use crate::vm::{FunctionId, Instruction, Slot, SlotCounts, TypedSlot};

/// Operands of one native call, referenced by [`Instruction::Call`].
#[derive(Debug, Clone, PartialEq)]
pub struct CallSite {
    pub function: FunctionId,
    /// Object slot of the receiver, for instance calls.
    pub receiver: Option<Slot>,
    pub args: Box<[TypedSlot]>,
    /// Where the result goes. `None` when nobody reads it.
    pub result: Option<TypedSlot>,
}

/// A lowered function, ready for an [`Interpreter`](crate::vm::Interpreter).
#[derive(Clone)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    /// Register array sizes.
    pub counts: SlotCounts,
    /// String constant pool.
    pub strings: Vec<Rc<str>>,
    pub call_sites: Vec<CallSite>,
    /// Slots the caller writes arguments into, in declaration order.
    pub params: Vec<TypedSlot>,
    /// Slots of the function's local variables, in declaration order.
    pub variables: Vec<TypedSlot>,
    /// Slot holding the function's value once the program stops.
    pub result: Option<TypedSlot>,
}

impl core::fmt::Debug for Program {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "Program {{")?;
        writeln!(
            f,
            "  slots: int={} long={} float={} double={} object={}",
            self.counts.int,
            self.counts.long,
            self.counts.float,
            self.counts.double,
            self.counts.object
        )?;

        if !self.strings.is_empty() {
            writeln!(f, "  strings: [")?;
            for (i, s) in self.strings.iter().enumerate() {
                writeln!(f, "    [{}] = {:?}", i, s)?;
            }
            writeln!(f, "  ]")?;
        }

        let printer = InstructionPrinter::new(self);
        writeln!(f, "  instructions:")?;
        for (addr, instr) in self.instructions.iter().enumerate() {
            let label_prefix = printer
                .label_at(addr)
                .map(|l| alloc::format!("L{}:", l))
                .unwrap_or_default();
            write!(f, "    {:4} {:>4}  ", addr, label_prefix)?;
            printer.print(instr, f)?;
            writeln!(f)?;
        }

        write!(f, "}}")
    }
}
