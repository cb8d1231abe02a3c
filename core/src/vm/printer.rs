//! Textual rendering of instructions.
//!
//! One instruction per line, destination first:
//!
//! ```text
//! i2 = iadd i0, i1
//! if-false i2 goto L0
//! l0 = call Math.abs(l1)
//! ```
//!
//! Jump targets are named `L<n>`, numbered in address order.

use core::fmt::{self, Write};

use hashbrown::HashMap;

use crate::Vec;
use crate::vm::{Instruction, Label, Program, Slot, SlotKind, TypedSlot};

pub struct InstructionPrinter<'p> {
    program: Option<&'p Program>,
    labels: HashMap<usize, usize>,
}

impl<'p> InstructionPrinter<'p> {
    pub fn new(program: &'p Program) -> Self {
        let mut targets: Vec<usize> = program
            .instructions
            .iter()
            .filter_map(Instruction::jump_target)
            .filter(|target| !target.is_pending())
            .map(Label::index)
            .collect();
        targets.sort_unstable();
        targets.dedup();
        let labels = targets
            .into_iter()
            .enumerate()
            .map(|(i, addr)| (addr, i))
            .collect();
        Self {
            program: Some(program),
            labels,
        }
    }

    /// A printer without program context: jump targets print as addresses,
    /// call sites and strings by index.
    pub fn standalone() -> Self {
        Self {
            program: None,
            labels: HashMap::new(),
        }
    }

    /// Label number of `addr`, if some jump targets it.
    pub fn label_at(&self, addr: usize) -> Option<usize> {
        self.labels.get(&addr).copied()
    }

    /// Renders a whole program, one instruction per line, with labels.
    pub fn listing(&self) -> crate::String {
        let mut out = crate::String::new();
        let Some(program) = self.program else {
            return out;
        };
        for (addr, instr) in program.instructions.iter().enumerate() {
            if let Some(label) = self.label_at(addr) {
                let _ = writeln!(out, "L{}:", label);
            }
            out.push_str("  ");
            let _ = self.print(instr, &mut out);
            out.push('\n');
        }
        out
    }

    pub fn print(&self, instr: &Instruction, out: &mut impl Write) -> fmt::Result {
        use Instruction::*;
        use SlotKind::*;

        let line = Line { out, args: 0 };
        match *instr {
            IConst { r, value } => line.dest(Int, r)?.opcode("icst")?.text(value),
            LConst { r, value } => line.dest(Long, r)?.opcode("lcst")?.text(value),
            FConst { r, value } => line.dest(Float, r)?.opcode("fcst")?.text(value),
            DConst { r, value } => line.dest(Double, r)?.opcode("dcst")?.text(value),
            SConst { r, index } => {
                let line = line.dest(Object, r)?.opcode("scst")?;
                match self.program.and_then(|p| p.strings.get(index as usize)) {
                    Some(s) => line.text(format_args!("{:?}", s)),
                    None => line.text(format_args!("#{}", index)),
                }
            }
            Null { r } => line.dest(Object, r)?.opcode("null").map(drop),
            Move { kind, r, a } => line
                .dest(kind, r)?
                .opcode_prefixed(kind, "mov")?
                .slot(kind, a)
                .map(drop),
            IBin { op, r, a, b } => line
                .dest(Int, r)?
                .opcode_prefixed(Int, op.mnemonic())?
                .slot(Int, a)?
                .slot(Int, b)
                .map(drop),
            LBin { op, r, a, b } => line
                .dest(Long, r)?
                .opcode_prefixed(Long, op.mnemonic())?
                .slot(Long, a)?
                .slot(if op.is_shift() { Int } else { Long }, b)
                .map(drop),
            FBin { op, r, a, b } => line
                .dest(Float, r)?
                .opcode_prefixed(Float, op.mnemonic())?
                .slot(Float, a)?
                .slot(Float, b)
                .map(drop),
            DBin { op, r, a, b } => line
                .dest(Double, r)?
                .opcode_prefixed(Double, op.mnemonic())?
                .slot(Double, a)?
                .slot(Double, b)
                .map(drop),
            Neg { kind, r, a } => line
                .dest(kind, r)?
                .opcode_prefixed(kind, "neg")?
                .slot(kind, a)
                .map(drop),
            Inv { kind, r, a } => line
                .dest(kind, r)?
                .opcode_prefixed(kind, "inv")?
                .slot(kind, a)
                .map(drop),
            Not { r, a } => line.dest(Int, r)?.opcode("not")?.slot(Int, a).map(drop),
            Convert { op, r, a } => line
                .dest(op.to_kind(), r)?
                .opcode(op.mnemonic())?
                .slot(op.from_kind(), a)
                .map(drop),
            ICmp { op, r, a, b } => line
                .dest(Int, r)?
                .opcode_prefixed(Int, op.mnemonic())?
                .slot(Int, a)?
                .slot(Int, b)
                .map(drop),
            Compare { kind, r, a, b } => line
                .dest(Int, r)?
                .opcode_prefixed(kind, "cmp")?
                .slot(kind, a)?
                .slot(kind, b)
                .map(drop),
            RefCmp { op, r, a, b } => line
                .dest(Int, r)?
                .opcode_prefixed(Object, op.mnemonic())?
                .slot(Object, a)?
                .slot(Object, b)
                .map(drop),
            ArrayLength { r, a } => line
                .dest(Int, r)?
                .opcode("arraylength")?
                .slot(Object, a)
                .map(drop),
            NullCheck { r, a } => line
                .dest(Object, r)?
                .opcode("nullcheck")?
                .slot(Object, a)
                .map(drop),
            ArrayGet {
                kind,
                r,
                array,
                index,
            } => line
                .dest(kind, r)?
                .opcode_prefixed(kind, "aget")?
                .slot(Object, array)?
                .slot(Int, index)
                .map(drop),
            ArraySet {
                kind,
                array,
                index,
                value,
            } => line
                .opcode_prefixed(kind, "aset")?
                .slot(Object, array)?
                .slot(Int, index)?
                .slot(kind, value)
                .map(drop),
            GetField {
                kind,
                r,
                object,
                field,
            } => line
                .dest(kind, r)?
                .opcode("getfield")?
                .slot(Object, object)?
                .text(format_args!("#{}", field)),
            GetStatic { kind, r, field } => line
                .dest(kind, r)?
                .opcode("getstatic")?
                .text(format_args!("#{}", field.0)),
            Cast { r, a, class } => line
                .dest(Object, r)?
                .opcode("cast")?
                .slot(Object, a)?
                .text(format_args!("class#{}", class.0)),
            InstanceOf { r, a, class } => line
                .dest(Int, r)?
                .opcode("instanceof")?
                .slot(Object, a)?
                .text(format_args!("class#{}", class.0)),
            LowerBoundCheck { index } => line.opcode("lbcheck")?.slot(Int, index).map(drop),
            UpperBoundCheck { index, array } => line
                .opcode("ubcheck")?
                .slot(Int, index)?
                .slot(Object, array)
                .map(drop),
            Call { site } => self.print_call(site, line),
            Goto { target } => {
                let line = line.opcode("goto")?;
                self.target(line, target)
            }
            JumpIfTrue { cond, target } => {
                let line = line.opcode("if-true")?.slot(Int, cond)?;
                line.out.write_str(" goto")?;
                self.target(line, target)
            }
            JumpIfFalse { cond, target } => {
                let line = line.opcode("if-false")?.slot(Int, cond)?;
                line.out.write_str(" goto")?;
                self.target(line, target)
            }
            Unreachable => line.opcode("unreachable").map(drop),
            Nop => line.opcode("nop").map(drop),
            Stop => line.opcode("stop").map(drop),
        }
    }

    fn print_call<W: Write>(&self, site: u32, line: Line<'_, W>) -> fmt::Result {
        let Some(call) = self.program.and_then(|p| p.call_sites.get(site as usize)) else {
            return line.opcode("call")?.text(format_args!("site#{}", site));
        };
        let line = match call.result {
            Some(TypedSlot { kind, slot }) => line.dest(kind, slot)?,
            None => line,
        };
        let line = line.opcode("call")?;
        write!(line.out, " #{}(", call.function.0)?;
        let receiver = call.receiver.map(|slot| TypedSlot::new(SlotKind::Object, slot));
        for (i, arg) in receiver.iter().chain(call.args.iter()).enumerate() {
            if i > 0 {
                line.out.write_str(", ")?;
            }
            write!(line.out, "{}", arg)?;
        }
        line.out.write_str(")")
    }

    fn target<W: Write>(&self, line: Line<'_, W>, target: Label) -> fmt::Result {
        match self.labels.get(&target.index()) {
            Some(label) => write!(line.out, " L{}", label),
            None => write!(line.out, " {:?}", target),
        }
    }
}

/// Builder for one printed line.
struct Line<'w, W> {
    out: &'w mut W,
    args: usize,
}

impl<'w, W: Write> Line<'w, W> {
    fn dest(self, kind: SlotKind, slot: Slot) -> Result<Self, fmt::Error> {
        write!(self.out, "{}{} = ", kind.prefix(), slot.0)?;
        Ok(self)
    }

    fn opcode(self, name: &str) -> Result<Self, fmt::Error> {
        self.out.write_str(name)?;
        Ok(self)
    }

    /// Opcode with the partition letter in front (`iadd`, `dmov`).
    fn opcode_prefixed(self, kind: SlotKind, name: &str) -> Result<Self, fmt::Error> {
        self.out.write_char(kind.prefix())?;
        self.opcode(name)
    }

    fn slot(mut self, kind: SlotKind, slot: Slot) -> Result<Self, fmt::Error> {
        let sep = if self.args == 0 { " " } else { ", " };
        write!(self.out, "{}{}{}", sep, kind.prefix(), slot.0)?;
        self.args += 1;
        Ok(self)
    }

    fn text(self, value: impl fmt::Display) -> fmt::Result {
        let sep = if self.args == 0 { " " } else { ", " };
        write!(self.out, "{}{}", sep, value)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        InstructionPrinter::standalone().print(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{CallSite, FunctionId, IntOp};
    use crate::{String, ToString, vec};
    use alloc::rc::Rc;
    use pretty_assertions::assert_eq;

    fn program(instructions: Vec<Instruction>) -> Program {
        Program {
            instructions,
            counts: Default::default(),
            strings: vec![Rc::from("hello")],
            call_sites: vec![CallSite {
                function: FunctionId(3),
                receiver: Some(Slot(0)),
                args: vec![TypedSlot::new(SlotKind::Long, Slot(1))].into_boxed_slice(),
                result: Some(TypedSlot::new(SlotKind::Int, Slot(2))),
            }],
            params: Vec::new(),
            variables: Vec::new(),
            result: None,
        }
    }

    #[test]
    fn test_standalone_display() {
        let add = Instruction::IBin {
            op: IntOp::Add,
            r: Slot(2),
            a: Slot(0),
            b: Slot(1),
        };
        assert_eq!(add.to_string(), "i2 = iadd i0, i1");
        assert_eq!(Instruction::IConst { r: Slot(0), value: -3 }.to_string(), "i0 = icst -3");
        assert_eq!(
            Instruction::Goto {
                target: Label::PENDING
            }
            .to_string(),
            "goto @?"
        );
        assert_eq!(
            Instruction::LBin {
                op: IntOp::Shl,
                r: Slot(0),
                a: Slot(0),
                b: Slot(4)
            }
            .to_string(),
            "l0 = lshl l0, i4"
        );
    }

    #[test]
    fn test_instance_call_prints_receiver_first() {
        let mut program = program(vec![Instruction::Call { site: 0 }]);
        program.call_sites[0] = CallSite {
            function: FunctionId(1),
            receiver: Some(Slot(2)),
            args: vec![TypedSlot::new(SlotKind::Int, Slot(1))].into_boxed_slice(),
            result: None,
        };
        let mut out = String::new();
        InstructionPrinter::new(&program)
            .print(&program.instructions[0], &mut out)
            .unwrap();
        assert_eq!(out, "call #1(o2, i1)");
    }

    #[test]
    fn test_listing_with_labels() {
        let program = program(vec![
            Instruction::JumpIfFalse {
                cond: Slot(0),
                target: Label(3),
            },
            Instruction::SConst {
                r: Slot(1),
                index: 0,
            },
            Instruction::Goto { target: Label(4) },
            Instruction::Call { site: 0 },
            Instruction::Stop,
        ]);
        let listing = InstructionPrinter::new(&program).listing();
        assert_eq!(
            listing,
            "  if-false i0 goto L0\n\
             \x20 o1 = scst \"hello\"\n\
             \x20 goto L1\n\
             L0:\n\
             \x20 i2 = call #3(o0, l1)\n\
             L1:\n\
             \x20 stop\n"
        );
    }
}
