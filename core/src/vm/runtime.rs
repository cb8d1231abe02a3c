//! The register machine.
//!
//! An [`Interpreter`] owns a [`RegisterFile`] sized for one [`Program`] and
//! dispatches instructions until `stop` sets the stop flag or an instruction
//! fails. Integer arithmetic wraps; only division and remainder by zero trap.

use alloc::rc::Rc;
use core::cmp::Ordering;

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::api::ExecutionOptions;
use crate::vm::error::{ExecutionError, NativeError, ResourceExceededError, RuntimeError};
use crate::vm::{
    Array, CmpOp, Conversion, Environment, FloatOp, Instruction, IntOp, Object, ObjectRef,
    Program, RegisterFile, SlotKind, TypedSlot, Value, object::ref_eq,
};
use crate::{ToString, Vec, format};

pub struct Interpreter<'p> {
    program: &'p Program,
    env: &'p Environment,
    options: ExecutionOptions,
    registers: RegisterFile,
    /// String constants, materialised once so `scst` yields the same
    /// reference on every run.
    strings: Vec<ObjectRef>,
}

impl<'p> Interpreter<'p> {
    pub fn new(program: &'p Program, env: &'p Environment) -> Self {
        Self::with_options(program, env, ExecutionOptions::default())
    }

    pub fn with_options(
        program: &'p Program,
        env: &'p Environment,
        options: ExecutionOptions,
    ) -> Self {
        let strings = program
            .strings
            .iter()
            .map(|s| Some(Rc::new(Object::String(s.clone()))))
            .collect();
        Interpreter {
            program,
            env,
            options,
            registers: RegisterFile::new(program.counts),
            strings,
        }
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    /// Mutable access, for seeding parameters by hand before [`resume`](Self::resume).
    pub fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.registers
    }

    pub fn is_stopped(&self) -> bool {
        self.registers.stopped
    }

    /// Zeroes all registers and rewinds to the first instruction.
    pub fn reset(&mut self) {
        self.registers.reset();
    }

    /// Runs from the current program counter until `stop`.
    ///
    /// Returns immediately if the machine is already stopped. After a step
    /// limit error the state is intact and a second `resume` continues where
    /// the first one left off.
    pub fn resume(&mut self) -> Result<(), ExecutionError> {
        let mut steps: u64 = 0;
        while !self.registers.stopped {
            if let Some(max_steps) = self.options.max_steps {
                if steps >= max_steps {
                    debug!(max_steps, pc = self.registers.ptr, "Step limit reached");
                    return Err(ResourceExceededError::StepLimit { max_steps }.into());
                }
            }
            steps += 1;
            self.step()?;
        }
        Ok(())
    }

    /// [`reset`](Self::reset) then [`resume`](Self::resume).
    pub fn run(&mut self) -> Result<(), ExecutionError> {
        self.reset();
        self.resume()
    }

    /// Binds `args` to the program's parameters, runs to completion and
    /// returns the result register, if the program has one.
    pub fn call(&mut self, args: &[Value]) -> Result<Option<Value>, ExecutionError> {
        let params = &self.program.params;
        if args.len() != params.len() {
            return Err(RuntimeError::InvalidArguments {
                message: format!("expected {} arguments, got {}", params.len(), args.len()),
            }
            .into());
        }

        self.reset();
        for (i, (slot, arg)) in params.iter().zip(args).enumerate() {
            if !self.registers.set(*slot, arg.clone()) {
                return Err(RuntimeError::InvalidArguments {
                    message: format!(
                        "argument {} is {:?}, expected a {:?} value",
                        i,
                        arg.kind(),
                        slot.kind
                    ),
                }
                .into());
            }
        }

        self.resume()?;
        Ok(self.result())
    }

    /// Reads the result register.
    pub fn result(&self) -> Option<Value> {
        self.program.result.map(|slot| self.registers.get(slot))
    }

    /// Executes the instruction at the program counter.
    fn step(&mut self) -> Result<(), RuntimeError> {
        let pc = self.registers.ptr;
        let Some(&instruction) = self.program.instructions.get(pc) else {
            return Err(RuntimeError::InvalidJump { target: pc, pc });
        };
        trace!(pc, %instruction, "Dispatch");

        let env = self.env;
        let r = &mut self.registers;

        use Instruction::*;
        match instruction {
            IConst { r: d, value } => r.iv[d.index()] = value,
            LConst { r: d, value } => r.lv[d.index()] = value,
            FConst { r: d, value } => r.fv[d.index()] = value,
            DConst { r: d, value } => r.dv[d.index()] = value,
            SConst { r: d, index } => {
                let Some(s) = self.strings.get(index as usize) else {
                    return Err(RuntimeError::InvalidInstruction { pc });
                };
                r.ov[d.index()] = s.clone();
            }
            Null { r: d } => r.ov[d.index()] = None,

            Move { kind, r: d, a } => match kind {
                SlotKind::Int => r.iv[d.index()] = r.iv[a.index()],
                SlotKind::Long => r.lv[d.index()] = r.lv[a.index()],
                SlotKind::Float => r.fv[d.index()] = r.fv[a.index()],
                SlotKind::Double => r.dv[d.index()] = r.dv[a.index()],
                SlotKind::Object => r.ov[d.index()] = r.ov[a.index()].clone(),
            },

            IBin { op, r: d, a, b } => {
                r.iv[d.index()] = int_op(op, r.iv[a.index()], r.iv[b.index()], pc)?;
            }
            LBin { op, r: d, a, b } => {
                // Shift distances come from the int partition.
                let rhs = if op.is_shift() {
                    r.iv[b.index()] as i64
                } else {
                    r.lv[b.index()]
                };
                r.lv[d.index()] = long_op(op, r.lv[a.index()], rhs, pc)?;
            }
            FBin { op, r: d, a, b } => {
                r.fv[d.index()] = float_op(op, r.fv[a.index()], r.fv[b.index()]);
            }
            DBin { op, r: d, a, b } => {
                r.dv[d.index()] = float_op(op, r.dv[a.index()], r.dv[b.index()]);
            }
            Neg { kind, r: d, a } => match kind {
                SlotKind::Int => r.iv[d.index()] = r.iv[a.index()].wrapping_neg(),
                SlotKind::Long => r.lv[d.index()] = r.lv[a.index()].wrapping_neg(),
                SlotKind::Float => r.fv[d.index()] = -r.fv[a.index()],
                SlotKind::Double => r.dv[d.index()] = -r.dv[a.index()],
                SlotKind::Object => return Err(RuntimeError::InvalidInstruction { pc }),
            },
            Inv { kind, r: d, a } => match kind {
                SlotKind::Int => r.iv[d.index()] = !r.iv[a.index()],
                SlotKind::Long => r.lv[d.index()] = !r.lv[a.index()],
                _ => return Err(RuntimeError::InvalidInstruction { pc }),
            },
            Not { r: d, a } => r.iv[d.index()] = (r.iv[a.index()] == 0) as i32,
            Convert { op, r: d, a } => convert(r, op, d.index(), a.index()),

            ICmp { op, r: d, a, b } => {
                r.iv[d.index()] = op.test(r.iv[a.index()], r.iv[b.index()]) as i32;
            }
            Compare { kind, r: d, a, b } => {
                let (a, b) = (a.index(), b.index());
                let ordering = match kind {
                    SlotKind::Int => r.iv[a].cmp(&r.iv[b]),
                    SlotKind::Long => r.lv[a].cmp(&r.lv[b]),
                    SlotKind::Float => total_cmp_f64(r.fv[a] as f64, r.fv[b] as f64),
                    SlotKind::Double => total_cmp_f64(r.dv[a], r.dv[b]),
                    SlotKind::Object => return Err(RuntimeError::InvalidInstruction { pc }),
                };
                r.iv[d.index()] = ordering as i32;
            }
            RefCmp { op, r: d, a, b } => {
                let same = ref_eq(&r.ov[a.index()], &r.ov[b.index()]);
                r.iv[d.index()] = match op {
                    CmpOp::Eq => same,
                    CmpOp::Ne => !same,
                    _ => return Err(RuntimeError::InvalidInstruction { pc }),
                } as i32;
            }

            ArrayLength { r: d, a } => {
                let object = non_null(&r.ov[a.index()], pc)?;
                let len = as_array(&object, pc)?.borrow().len();
                r.iv[d.index()] = len as i32;
            }
            NullCheck { r: d, a } => {
                let object = non_null(&r.ov[a.index()], pc)?;
                r.ov[d.index()] = Some(object);
            }
            ArrayGet {
                kind,
                r: d,
                array,
                index,
            } => {
                let object = non_null(&r.ov[array.index()], pc)?;
                let index = r.iv[index.index()];
                let value = {
                    let array = as_array(&object, pc)?.borrow();
                    element_index(index, array.len(), pc)
                        .and_then(|i| array.get(i).ok_or(RuntimeError::InvalidInstruction { pc }))?
                };
                if !r.set(TypedSlot::new(kind, d), value) {
                    return Err(RuntimeError::InvalidInstruction { pc });
                }
            }
            ArraySet {
                kind,
                array,
                index,
                value,
            } => {
                let object = non_null(&r.ov[array.index()], pc)?;
                let index = r.iv[index.index()];
                let value = r.get(TypedSlot::new(kind, value));
                let mut array = as_array(&object, pc)?.borrow_mut();
                let i = element_index(index, array.len(), pc)?;
                if !array.set(i, value) {
                    return Err(RuntimeError::InvalidInstruction { pc });
                }
            }
            GetField {
                kind,
                r: d,
                object,
                field,
            } => {
                let object = non_null(&r.ov[object.index()], pc)?;
                let Object::Instance(instance) = &*object else {
                    return Err(RuntimeError::InvalidInstruction { pc });
                };
                let value = instance
                    .fields
                    .borrow()
                    .get(field as usize)
                    .cloned()
                    .ok_or(RuntimeError::InvalidInstruction { pc })?;
                if !r.set(TypedSlot::new(kind, d), value) {
                    return Err(RuntimeError::InvalidInstruction { pc });
                }
            }
            GetStatic { kind, r: d, field } => {
                let value = env.static_value(field);
                if !r.set(TypedSlot::new(kind, d), value) {
                    return Err(RuntimeError::InvalidInstruction { pc });
                }
            }
            Cast { r: d, a, class } => {
                let value = r.ov[a.index()].clone();
                if let Some(object) = &value {
                    if !env.is_instance(object, class) {
                        return Err(RuntimeError::ClassCast {
                            class: env.class(class).name.to_string(),
                            pc,
                        });
                    }
                }
                r.ov[d.index()] = value;
            }
            InstanceOf { r: d, a, class } => {
                let is = match &r.ov[a.index()] {
                    Some(object) => env.is_instance(object, class),
                    None => false,
                };
                r.iv[d.index()] = is as i32;
            }
            LowerBoundCheck { index } => {
                let index = r.iv[index.index()];
                if index < 0 {
                    return Err(RuntimeError::IndexOutOfBounds {
                        index,
                        len: None,
                        pc,
                    });
                }
            }
            UpperBoundCheck { index, array } => {
                let object = non_null(&r.ov[array.index()], pc)?;
                let len = as_array(&object, pc)?.borrow().len();
                let index = r.iv[index.index()];
                if index as i64 >= len as i64 {
                    return Err(RuntimeError::IndexOutOfBounds {
                        index,
                        len: Some(len),
                        pc,
                    });
                }
            }
            Call { site } => {
                let Some(site) = self.program.call_sites.get(site as usize) else {
                    return Err(RuntimeError::InvalidInstruction { pc });
                };
                let function = env.function(site.function);

                let mut args: SmallVec<[Value; 4]> = SmallVec::new();
                if let Some(receiver) = site.receiver {
                    let receiver = non_null(&r.ov[receiver.index()], pc)?;
                    args.push(Value::Object(Some(receiver)));
                }
                args.extend(site.args.iter().map(|slot| r.get(*slot)));

                let native_error = |source: NativeError| RuntimeError::Native {
                    function: format!("{}.{}", function.owner(), function.name()),
                    pc,
                    source,
                };
                let value = function.invoke(&args).map_err(native_error)?;
                if let Some(result) = site.result {
                    if !r.set(result, value) {
                        return Err(native_error(NativeError::new(format!(
                            "returned a value outside the {:?} partition",
                            result.kind
                        ))));
                    }
                }
            }

            Goto { target } => {
                r.ptr = jump(target.index(), self.program.instructions.len(), pc)?;
                return Ok(());
            }
            JumpIfTrue { cond, target } => {
                r.ptr = if r.iv[cond.index()] != 0 {
                    jump(target.index(), self.program.instructions.len(), pc)?
                } else {
                    pc + 1
                };
                return Ok(());
            }
            JumpIfFalse { cond, target } => {
                r.ptr = if r.iv[cond.index()] == 0 {
                    jump(target.index(), self.program.instructions.len(), pc)?
                } else {
                    pc + 1
                };
                return Ok(());
            }
            Unreachable => return Err(RuntimeError::Unreachable { pc }),
            Nop => return Err(RuntimeError::InvalidInstruction { pc }),
            Stop => {
                r.stopped = true;
                return Ok(());
            }
        }

        r.ptr = pc + 1;
        Ok(())
    }
}

fn jump(target: usize, len: usize, pc: usize) -> Result<usize, RuntimeError> {
    if target < len {
        Ok(target)
    } else {
        Err(RuntimeError::InvalidJump { target, pc })
    }
}

fn non_null(value: &ObjectRef, pc: usize) -> Result<Rc<Object>, RuntimeError> {
    value.clone().ok_or(RuntimeError::NullPointer { pc })
}

fn as_array(object: &Object, pc: usize) -> Result<&core::cell::RefCell<Array>, RuntimeError> {
    match object {
        Object::Array(array) => Ok(array),
        _ => Err(RuntimeError::ClassCast {
            class: "array".to_string(),
            pc,
        }),
    }
}

fn element_index(index: i32, len: usize, pc: usize) -> Result<usize, RuntimeError> {
    if index < 0 || index as usize >= len {
        return Err(RuntimeError::IndexOutOfBounds {
            index,
            len: Some(len),
            pc,
        });
    }
    Ok(index as usize)
}

fn int_op(op: IntOp, a: i32, b: i32, pc: usize) -> Result<i32, RuntimeError> {
    Ok(match op {
        IntOp::Add => a.wrapping_add(b),
        IntOp::Sub => a.wrapping_sub(b),
        IntOp::Mul => a.wrapping_mul(b),
        IntOp::Div if b == 0 => return Err(RuntimeError::DivisionByZero { pc }),
        IntOp::Div => a.wrapping_div(b),
        IntOp::Rem if b == 0 => return Err(RuntimeError::DivisionByZero { pc }),
        IntOp::Rem => a.wrapping_rem(b),
        IntOp::And => a & b,
        IntOp::Or => a | b,
        IntOp::Xor => a ^ b,
        // wrapping_sh* masks the distance to the low five bits.
        IntOp::Shl => a.wrapping_shl(b as u32),
        IntOp::Shr => a.wrapping_shr(b as u32),
        IntOp::Shru => (a as u32).wrapping_shr(b as u32) as i32,
    })
}

fn long_op(op: IntOp, a: i64, b: i64, pc: usize) -> Result<i64, RuntimeError> {
    Ok(match op {
        IntOp::Add => a.wrapping_add(b),
        IntOp::Sub => a.wrapping_sub(b),
        IntOp::Mul => a.wrapping_mul(b),
        IntOp::Div if b == 0 => return Err(RuntimeError::DivisionByZero { pc }),
        IntOp::Div => a.wrapping_div(b),
        IntOp::Rem if b == 0 => return Err(RuntimeError::DivisionByZero { pc }),
        IntOp::Rem => a.wrapping_rem(b),
        IntOp::And => a & b,
        IntOp::Or => a | b,
        IntOp::Xor => a ^ b,
        IntOp::Shl => a.wrapping_shl(b as u32),
        IntOp::Shr => a.wrapping_shr(b as u32),
        IntOp::Shru => (a as u64).wrapping_shr(b as u32) as i64,
    })
}

fn float_op<T>(op: FloatOp, a: T, b: T) -> T
where
    T: core::ops::Add<Output = T>
        + core::ops::Sub<Output = T>
        + core::ops::Mul<Output = T>
        + core::ops::Div<Output = T>
        + core::ops::Rem<Output = T>,
{
    match op {
        FloatOp::Add => a + b,
        FloatOp::Sub => a - b,
        FloatOp::Mul => a * b,
        FloatOp::Div => a / b,
        FloatOp::Rem => a % b,
    }
}

/// Three-way comparison where `-0.0 < 0.0` and NaN sorts above everything,
/// equal only to itself.
fn total_cmp_f64(a: f64, b: f64) -> Ordering {
    if a < b {
        return Ordering::Less;
    }
    if a > b {
        return Ordering::Greater;
    }
    let canonical = |x: f64| if x.is_nan() { f64::NAN.to_bits() } else { x.to_bits() } as i64;
    canonical(a).cmp(&canonical(b))
}

fn convert(r: &mut RegisterFile, op: Conversion, d: usize, a: usize) {
    use Conversion::*;
    match op {
        I2L => r.lv[d] = r.iv[a] as i64,
        I2F => r.fv[d] = r.iv[a] as f32,
        I2D => r.dv[d] = r.iv[a] as f64,
        L2I => r.iv[d] = r.lv[a] as i32,
        L2F => r.fv[d] = r.lv[a] as f32,
        L2D => r.dv[d] = r.lv[a] as f64,
        // Saturating, NaN to zero.
        F2I => r.iv[d] = r.fv[a] as i32,
        F2L => r.lv[d] = r.fv[a] as i64,
        F2D => r.dv[d] = r.fv[a] as f64,
        D2I => r.iv[d] = r.dv[a] as i32,
        D2L => r.lv[d] = r.dv[a] as i64,
        D2F => r.fv[d] = r.dv[a] as f32,
        I2B => r.iv[d] = r.iv[a] as i8 as i32,
        I2S => r.iv[d] = r.iv[a] as i16 as i32,
        I2C => r.iv[d] = r.iv[a] as u16 as i32,
    }
}
