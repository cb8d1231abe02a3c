//! Tests for the IR lowering.
//!
//! Most tests check both the emitted instructions and what they compute, so
//! a change in slot assignment shows up as a diff rather than as a silently
//! different program.

use std::cell::Cell;
use std::rc::Rc;

use crate::{
    api::CompileOptions,
    compiler::{BuildError, compile},
    ir::{
        BinaryOp, CallType, ExprId, ExprKind, FieldRef, FunctionBuilder, IrFunction, IrType,
        MethodRef, ParamId, UnaryOp,
    },
    test_utils::init_test_logging,
    vm::{
        CmpOp, Environment, Instruction, InstructionPrinter, IntOp, Interpreter, Label,
        NativeError, Object, Program, Slot, SlotKind, TypedSlot, Value,
    },
};
use pretty_assertions::assert_eq;

fn lower(function: &IrFunction, env: &Environment) -> Program {
    compile(function, env, CompileOptions::default()).unwrap()
}

fn run(program: &Program, env: &Environment, args: &[Value]) -> Option<Value> {
    Interpreter::new(program, env).call(args).unwrap()
}

/// Runs the program and returns the int partition afterwards.
fn run_ints(program: &Program, env: &Environment, args: &[Value]) -> Vec<i32> {
    let mut vm = Interpreter::new(program, env);
    vm.call(args).unwrap();
    vm.registers().iv.clone()
}

fn int_slot(n: u32) -> TypedSlot {
    TypedSlot::new(SlotKind::Int, Slot(n))
}

#[test]
fn test_arithmetic_reuses_operand_slots() {
    init_test_logging();
    let env = Environment::new();

    // (1 + 2) * 3
    let mut b = FunctionBuilder::new(IrType::Int);
    let one = b.int(1);
    let two = b.int(2);
    let sum = b.binary(BinaryOp::IAdd, one, two);
    let three = b.int(3);
    let body = b.binary(BinaryOp::IMul, sum, three);
    let program = lower(&b.finish(body), &env);

    assert_eq!(
        program.instructions,
        vec![
            Instruction::IConst { r: Slot(0), value: 1 },
            Instruction::IConst { r: Slot(1), value: 2 },
            Instruction::IBin {
                op: IntOp::Add,
                r: Slot(0),
                a: Slot(0),
                b: Slot(1)
            },
            Instruction::IConst { r: Slot(1), value: 3 },
            Instruction::IBin {
                op: IntOp::Mul,
                r: Slot(0),
                a: Slot(0),
                b: Slot(1)
            },
            Instruction::Stop,
        ]
    );
    assert_eq!(program.counts.int, 2);
    assert_eq!(program.result, Some(int_slot(0)));
    assert_eq!(run(&program, &env, &[]), Some(Value::Int(9)));
}

#[test]
fn test_if_else_assigns_variable() {
    let env = Environment::new();

    // if (x > 0) r = 1 else r = -1
    let mut b = FunctionBuilder::new(IrType::Void);
    let x = b.param(IrType::Int);
    let r = b.local(IrType::Int);
    let x = b.get_param(x);
    let zero = b.int(0);
    let cond = b.binary(BinaryOp::IGt, x, zero);
    let one = b.int(1);
    let then_expr = b.set_var(r, one);
    let minus_one = b.int(-1);
    let else_expr = b.set_var(r, minus_one);
    let body = b.conditional(cond, then_expr, else_expr);
    let program = lower(&b.finish(body), &env);

    assert_eq!(
        program.instructions,
        vec![
            Instruction::IConst { r: Slot(2), value: 0 },
            Instruction::ICmp {
                op: CmpOp::Gt,
                r: Slot(2),
                a: Slot(0),
                b: Slot(2)
            },
            Instruction::JumpIfFalse {
                cond: Slot(2),
                target: Label(5)
            },
            Instruction::IConst { r: Slot(1), value: 1 },
            Instruction::Goto { target: Label(6) },
            Instruction::IConst { r: Slot(1), value: -1 },
            Instruction::Stop,
        ]
    );
    assert_eq!(program.result, None);
    assert_eq!(program.params, vec![int_slot(0)]);
    assert_eq!(program.variables, vec![int_slot(1)]);

    assert_eq!(run_ints(&program, &env, &[Value::Int(5)])[1], 1);
    assert_eq!(run_ints(&program, &env, &[Value::Int(-3)])[1], -1);
    assert_eq!(run_ints(&program, &env, &[Value::Int(0)])[1], -1);
}

#[test]
fn test_and_condition_short_circuits() {
    let mut env = Environment::new();
    let calls = Rc::new(Cell::new(0u32));
    let counter = calls.clone();
    env.define_static("Probe", "tick", &[], IrType::Boolean, move |_| {
        counter.set(counter.get() + 1);
        Ok(Value::bool(true))
    });

    // if (p && tick()) r = 1 else r = 2
    let mut b = FunctionBuilder::new(IrType::Void);
    let p = b.param(IrType::Boolean);
    let r = b.local(IrType::Int);
    let p = b.get_param(p);
    let tick = b.call(
        MethodRef::new("Probe", "tick", &[], IrType::Boolean),
        CallType::Static,
        &[],
    );
    let cond = b.and(p, tick);
    let one = b.int(1);
    let then_expr = b.set_var(r, one);
    let two = b.int(2);
    let else_expr = b.set_var(r, two);
    let body = b.conditional(cond, then_expr, else_expr);
    let program = lower(&b.finish(body), &env);

    assert_eq!(
        program.instructions,
        vec![
            Instruction::JumpIfFalse {
                cond: Slot(0),
                target: Label(5)
            },
            Instruction::Call { site: 0 },
            Instruction::JumpIfFalse {
                cond: Slot(2),
                target: Label(5)
            },
            Instruction::IConst { r: Slot(1), value: 1 },
            Instruction::Goto { target: Label(6) },
            Instruction::IConst { r: Slot(1), value: 2 },
            Instruction::Stop,
        ]
    );
    assert_eq!(program.call_sites[0].result, Some(int_slot(2)));

    assert_eq!(run_ints(&program, &env, &[Value::bool(false)])[1], 2);
    assert_eq!(calls.get(), 0, "tick() must not run when p is false");

    assert_eq!(run_ints(&program, &env, &[Value::bool(true)])[1], 1);
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_or_value_materializes_boolean() {
    let env = Environment::new();

    // return p || q
    let mut b = FunctionBuilder::new(IrType::Boolean);
    let p = b.param(IrType::Boolean);
    let q = b.param(IrType::Boolean);
    let p = b.get_param(p);
    let q = b.get_param(q);
    let body = b.or(p, q);
    let program = lower(&b.finish(body), &env);

    assert_eq!(
        program.instructions,
        vec![
            Instruction::JumpIfTrue {
                cond: Slot(0),
                target: Label(2)
            },
            Instruction::JumpIfFalse {
                cond: Slot(1),
                target: Label(4)
            },
            Instruction::IConst { r: Slot(2), value: 1 },
            Instruction::Goto { target: Label(5) },
            Instruction::IConst { r: Slot(2), value: 0 },
            Instruction::Stop,
        ]
    );

    for (p, q, expected) in [(0, 0, 0), (0, 1, 1), (1, 0, 1), (1, 1, 1)] {
        assert_eq!(
            run(&program, &env, &[Value::Int(p), Value::Int(q)]),
            Some(Value::Int(expected)),
            "{} || {}",
            p,
            q
        );
    }
}

#[test]
fn test_negated_condition_flips_jump() {
    let env = Environment::new();

    // if (!p) r = 1 else r = 2
    let mut b = FunctionBuilder::new(IrType::Void);
    let p = b.param(IrType::Boolean);
    let r = b.local(IrType::Int);
    let p = b.get_param(p);
    let cond = b.not(p);
    let one = b.int(1);
    let then_expr = b.set_var(r, one);
    let two = b.int(2);
    let else_expr = b.set_var(r, two);
    let body = b.conditional(cond, then_expr, else_expr);
    let program = lower(&b.finish(body), &env);

    assert_eq!(
        program.instructions[0],
        Instruction::JumpIfTrue {
            cond: Slot(0),
            target: Label(3)
        }
    );
    assert_eq!(run_ints(&program, &env, &[Value::bool(false)])[1], 1);
    assert_eq!(run_ints(&program, &env, &[Value::bool(true)])[1], 2);
}

#[test]
fn test_empty_then_branch_jumps_over_else() {
    let env = Environment::new();

    // if (p) {} else r = 2
    let mut b = FunctionBuilder::new(IrType::Void);
    let p = b.param(IrType::Boolean);
    let r = b.local(IrType::Int);
    let p = b.get_param(p);
    let then_expr = b.void();
    let two = b.int(2);
    let else_expr = b.set_var(r, two);
    let body = b.conditional(p, then_expr, else_expr);
    let program = lower(&b.finish(body), &env);

    assert_eq!(
        program.instructions,
        vec![
            Instruction::JumpIfTrue {
                cond: Slot(0),
                target: Label(2)
            },
            Instruction::IConst { r: Slot(1), value: 2 },
            Instruction::Stop,
        ]
    );
    assert_eq!(run_ints(&program, &env, &[Value::bool(true)])[1], 0);
    assert_eq!(run_ints(&program, &env, &[Value::bool(false)])[1], 2);
}

#[test]
fn test_ternary_value_uses_hint() {
    let env = Environment::new();

    // return p ? 10 : 20
    let mut b = FunctionBuilder::new(IrType::Int);
    let p = b.param(IrType::Boolean);
    let p = b.get_param(p);
    let ten = b.int(10);
    let twenty = b.int(20);
    let body = b.conditional(p, ten, twenty);
    let program = lower(&b.finish(body), &env);

    assert_eq!(
        program.instructions,
        vec![
            Instruction::JumpIfFalse {
                cond: Slot(0),
                target: Label(3)
            },
            Instruction::IConst { r: Slot(1), value: 10 },
            Instruction::Goto { target: Label(4) },
            Instruction::IConst { r: Slot(1), value: 20 },
            Instruction::Stop,
        ]
    );
    assert_eq!(run(&program, &env, &[Value::bool(true)]), Some(Value::Int(10)));
    assert_eq!(run(&program, &env, &[Value::bool(false)]), Some(Value::Int(20)));
}

#[test]
fn test_exit_block_adopts_condition() {
    let env = Environment::new();

    // block { if (p) exit; r = 1 }
    let mut b = FunctionBuilder::new(IrType::Void);
    let p = b.param(IrType::Boolean);
    let r = b.local(IrType::Int);
    let p = b.get_param(p);
    let block = b.new_block();
    let exit = b.exit_block(block);
    let nothing = b.void();
    let guard = b.conditional(p, exit, nothing);
    let one = b.int(1);
    let assign = b.set_var(r, one);
    let inner = b.sequence(guard, assign);
    let body = b.block(block, IrType::Void, inner);
    let program = lower(&b.finish(body), &env);

    assert_eq!(
        program.instructions,
        vec![
            Instruction::JumpIfTrue {
                cond: Slot(0),
                target: Label(2)
            },
            Instruction::IConst { r: Slot(1), value: 1 },
            Instruction::Stop,
        ]
    );
    assert_eq!(run_ints(&program, &env, &[Value::bool(true)])[1], 0);
    assert_eq!(run_ints(&program, &env, &[Value::bool(false)])[1], 1);
}

/// Sum of `1..=n`, skipping multiples of 3.
fn skip_threes() -> IrFunction {
    let mut b = FunctionBuilder::new(IrType::Int);
    let n = b.param(IrType::Int);
    let i = b.local(IrType::Int);
    let sum = b.local(IrType::Int);
    let lp = b.new_loop();

    let zero = b.int(0);
    let init_i = b.set_var(i, zero);
    let zero = b.int(0);
    let init_sum = b.set_var(sum, zero);
    let preheader = b.seq(&[init_i, init_sum]);

    let get_i = b.get_var(i);
    let one = b.int(1);
    let next = b.binary(BinaryOp::IAdd, get_i, one);
    let step = b.set_var(i, next);

    let get_i = b.get_var(i);
    let get_n = b.get_param(n);
    let done = b.binary(BinaryOp::IGt, get_i, get_n);
    let exit = b.exit_loop(lp);
    let nothing = b.void();
    let exit_check = b.conditional(done, exit, nothing);

    let get_i = b.get_var(i);
    let three = b.int(3);
    let rem = b.binary(BinaryOp::IRem, get_i, three);
    let zero = b.int(0);
    let divisible = b.binary(BinaryOp::IEq, rem, zero);
    let skip = b.continue_loop(lp);
    let nothing = b.void();
    let skip_check = b.conditional(divisible, skip, nothing);

    let get_sum = b.get_var(sum);
    let get_i = b.get_var(i);
    let add = b.binary(BinaryOp::IAdd, get_sum, get_i);
    let accumulate = b.set_var(sum, add);

    let loop_body = b.seq(&[step, exit_check, skip_check, accumulate]);
    let looped = b.loop_(lp, preheader, loop_body);
    let result = b.get_var(sum);
    let body = b.seq(&[looped, result]);
    b.finish(body)
}

#[test]
fn test_loop_exit_and_continue_adopt_conditions() {
    let env = Environment::new();
    let program = lower(&skip_threes(), &env);

    let listing = InstructionPrinter::new(&program).listing();
    assert_eq!(
        listing,
        "  i1 = icst 0\n\
         \x20 i2 = icst 0\n\
         L0:\n\
         \x20 i3 = icst 1\n\
         \x20 i1 = iadd i1, i3\n\
         \x20 i3 = igt i1, i0\n\
         \x20 if-true i3 goto L1\n\
         \x20 i3 = icst 3\n\
         \x20 i3 = irem i1, i3\n\
         \x20 i4 = icst 0\n\
         \x20 i3 = ieq i3, i4\n\
         \x20 if-true i3 goto L0\n\
         \x20 i2 = iadd i2, i1\n\
         \x20 goto L0\n\
         L1:\n\
         \x20 i3 = imov i2\n\
         \x20 stop\n"
    );

    let gotos = program
        .instructions
        .iter()
        .filter(|i| matches!(i, Instruction::Goto { .. }))
        .count();
    assert_eq!(gotos, 1, "only the back edge is a goto");
    assert_eq!(program.counts.int, 5);
    assert_eq!(program.result, Some(int_slot(3)));

    assert_eq!(run(&program, &env, &[Value::Int(10)]), Some(Value::Int(37)));
    assert_eq!(run(&program, &env, &[Value::Int(0)]), Some(Value::Int(0)));
}

#[test]
fn test_shared_node_is_computed_once() {
    let env = Environment::new();

    // x * x where x = p + 1
    let mut b = FunctionBuilder::new(IrType::Int);
    let p = b.param(IrType::Int);
    let p = b.get_param(p);
    let one = b.int(1);
    let x = b.binary(BinaryOp::IAdd, p, one);
    let body = b.binary(BinaryOp::IMul, x, x);
    let program = lower(&b.finish(body), &env);

    let listing = InstructionPrinter::new(&program).listing();
    assert_eq!(
        listing,
        "  i1 = icst 1\n\
         \x20 i1 = iadd i0, i1\n\
         \x20 i1 = imul i1, i1\n\
         \x20 stop\n"
    );
    assert_eq!(run(&program, &env, &[Value::Int(5)]), Some(Value::Int(36)));
}

#[test]
fn test_shared_node_rejects_hint() {
    let env = Environment::new();

    // v = p + 1; v + (p + 1), with both (p + 1) the same node
    let mut b = FunctionBuilder::new(IrType::Int);
    let p = b.param(IrType::Int);
    let v = b.local(IrType::Int);
    let p = b.get_param(p);
    let one = b.int(1);
    let inc = b.binary(BinaryOp::IAdd, p, one);
    let assign = b.set_var(v, inc);
    let get_v = b.get_var(v);
    let total = b.binary(BinaryOp::IAdd, get_v, inc);
    let body = b.sequence(assign, total);
    let program = lower(&b.finish(body), &env);

    // The shared value lives in its own slot and is copied into v.
    assert!(program.instructions.contains(&Instruction::Move {
        kind: SlotKind::Int,
        r: Slot(1),
        a: Slot(2),
    }));
    assert_eq!(run(&program, &env, &[Value::Int(5)]), Some(Value::Int(12)));
}

#[test]
fn test_variable_read_sees_later_assignment() {
    let env = Environment::new();

    // v = 2; v + (v = 10; 1)
    let mut b = FunctionBuilder::new(IrType::Int);
    let v = b.local(IrType::Int);
    let two = b.int(2);
    let init = b.set_var(v, two);
    let get_v = b.get_var(v);
    let ten = b.int(10);
    let reassign = b.set_var(v, ten);
    let one = b.int(1);
    let rhs = b.sequence(reassign, one);
    let sum = b.binary(BinaryOp::IAdd, get_v, rhs);
    let body = b.sequence(init, sum);
    let program = lower(&b.finish(body), &env);

    // The read aliases v's register, so it sees the reassignment.
    assert_eq!(run(&program, &env, &[]), Some(Value::Int(11)));
}

#[test]
fn test_parameter_result_is_copied() {
    let env = Environment::new();

    let mut b = FunctionBuilder::new(IrType::Long);
    let p = b.param(IrType::Long);
    let body = b.get_param(p);
    let program = lower(&b.finish(body), &env);

    assert_eq!(
        program.instructions,
        vec![
            Instruction::Move {
                kind: SlotKind::Long,
                r: Slot(1),
                a: Slot(0)
            },
            Instruction::Stop,
        ]
    );
    assert_eq!(program.result, Some(TypedSlot::new(SlotKind::Long, Slot(1))));
    assert_eq!(run(&program, &env, &[Value::Long(-7)]), Some(Value::Long(-7)));
}

#[test]
fn test_ignored_pure_expression_emits_nothing() {
    let env = Environment::new();

    let mut b = FunctionBuilder::new(IrType::Void);
    let one = b.int(1);
    let two = b.int(2);
    let sum = b.binary(BinaryOp::IAdd, one, two);
    let text = b.string("unused");
    let body = b.seq(&[sum, text]);
    let program = lower(&b.finish(body), &env);

    assert_eq!(program.instructions, vec![Instruction::Stop]);
    assert!(program.strings.is_empty());
}

#[test]
fn test_string_constants_are_interned() {
    let env = Environment::new();

    let mut b = FunctionBuilder::new(IrType::Boolean);
    let a = b.string("hi");
    let c = b.string("hi");
    let body = b.binary(BinaryOp::RefEq, a, c);
    let program = lower(&b.finish(body), &env);

    assert_eq!(program.strings.len(), 1);
    assert_eq!(run(&program, &env, &[]), Some(Value::Int(1)));
}

#[test]
fn test_field_access() {
    let mut env = Environment::new();
    let point = env.define_class(
        "Point",
        Some(Environment::OBJECT),
        &[("x", IrType::Int), ("y", IrType::Int)],
    );

    let mut b = FunctionBuilder::new(IrType::Int);
    let obj = b.param(IrType::Object);
    let obj = b.get_param(obj);
    let body = b.get_field(FieldRef::new("Point", "y", IrType::Int), obj);
    let program = lower(&b.finish(body), &env);

    let instance = env.instantiate(point);
    let Value::Object(Some(object)) = &instance else {
        panic!("expected an object");
    };
    let Object::Instance(fields) = &**object else {
        panic!("expected an instance");
    };
    fields.fields.borrow_mut()[1] = Value::Int(7);

    assert_eq!(run(&program, &env, &[instance.clone()]), Some(Value::Int(7)));
}

#[test]
fn test_lowering_is_deterministic() {
    let env = Environment::new();
    let first = lower(&skip_threes(), &env);
    let second = lower(&skip_threes(), &env);

    assert_eq!(first.instructions, second.instructions);
    assert_eq!(first.counts, second.counts);
    assert_eq!(
        InstructionPrinter::new(&first).listing(),
        InstructionPrinter::new(&second).listing()
    );
}

#[test]
fn test_every_jump_is_resolved() {
    let env = Environment::new();
    let program = lower(&skip_threes(), &env);

    for (addr, instruction) in program.instructions.iter().enumerate() {
        if let Some(target) = instruction.jump_target() {
            assert!(!target.is_pending(), "jump at @{} is unresolved", addr);
            assert!(target.index() < program.instructions.len());
        }
        assert_ne!(*instruction, Instruction::Nop, "reserved slot @{} left empty", addr);
    }
}

fn product(b: &mut FunctionBuilder, op: BinaryOp, x: ParamId, y: ParamId) -> ExprId {
    let x = b.get_param(x);
    let y = b.get_param(y);
    b.binary(op, x, y)
}

#[test]
fn test_concurrent_temporaries_never_share_a_slot() {
    let mut env = Environment::new();
    env.define_static(
        "Math",
        "mix",
        &[IrType::Int, IrType::Long, IrType::Int],
        IrType::Long,
        |args| match args {
            [Value::Int(x), Value::Long(y), Value::Int(z)] => {
                Ok(Value::Long(*x as i64 * 1_000_000 + y * 1_000 + *z as i64))
            }
            _ => Err(NativeError::new("bad arguments")),
        },
    );

    // mix((a * b) + (c * d), (e * f) + (g * h), a * c)
    let mut b = FunctionBuilder::new(IrType::Long);
    let ints: Vec<_> = (0..4).map(|_| b.param(IrType::Int)).collect();
    let longs: Vec<_> = (0..4).map(|_| b.param(IrType::Long)).collect();
    let ab = product(&mut b, BinaryOp::IMul, ints[0], ints[1]);
    let cd = product(&mut b, BinaryOp::IMul, ints[2], ints[3]);
    let int_sum = b.binary(BinaryOp::IAdd, ab, cd);
    let ef = product(&mut b, BinaryOp::LMul, longs[0], longs[1]);
    let gh = product(&mut b, BinaryOp::LMul, longs[2], longs[3]);
    let long_sum = b.binary(BinaryOp::LAdd, ef, gh);
    let ac = product(&mut b, BinaryOp::IMul, ints[0], ints[2]);
    let body = b.call(
        MethodRef::new("Math", "mix", &[IrType::Int, IrType::Long, IrType::Int], IrType::Long),
        CallType::Static,
        &[int_sum, long_sum, ac],
    );
    let program = lower(&b.finish(body), &env);

    // No node here feeds both operands, so two operands in one slot would
    // mean one value overwrote the other while both were live.
    for (addr, instruction) in program.instructions.iter().enumerate() {
        if let Instruction::IBin { a, b, .. } | Instruction::LBin { a, b, .. } = *instruction {
            assert_ne!(a, b, "operands share a slot at @{}", addr);
        }
    }
    let args = &program.call_sites[0].args;
    for (i, x) in args.iter().enumerate() {
        for y in &args[i + 1..] {
            assert_ne!(x, y, "call arguments share a slot");
        }
    }
    // Four fixed slots plus two temporaries in each partition.
    assert_eq!((program.counts.int, program.counts.long), (6, 6));

    let args: Vec<Value> = [2, 3, 4, 5]
        .into_iter()
        .map(Value::Int)
        .chain([6, 7, 8, 9].into_iter().map(Value::Long))
        .collect();
    // (6 + 20), (42 + 72), 8
    assert_eq!(run(&program, &env, &args), Some(Value::Long(26_114_008)));
}

// === Nesting ===

/// `1 + (1 + (... + p))` with `additions` additions.
fn right_nested_sum(additions: usize) -> IrFunction {
    let mut b = FunctionBuilder::new(IrType::Int);
    let p = b.param(IrType::Int);
    let mut expr = b.get_param(p);
    for _ in 0..additions {
        let one = b.int(1);
        expr = b.binary(BinaryOp::IAdd, one, expr);
    }
    b.finish(expr)
}

/// Asserts that `function` nests exactly `depth` levels deep.
fn assert_depth(function: &IrFunction, env: &Environment, depth: usize) {
    assert!(compile(function, env, CompileOptions { max_depth: depth }).is_ok());
    assert_eq!(
        compile(function, env, CompileOptions { max_depth: depth - 1 }).unwrap_err(),
        BuildError::TooDeep {
            depth,
            max_depth: depth - 1
        }
    );
}

#[test]
fn test_default_depth_fits_the_stack_for_operators() {
    let env = Environment::new();
    let depth = CompileOptions::default().max_depth - 1;

    // Every addition keeps its left operand live while the right one nests.
    let function = right_nested_sum(depth - 1);
    assert_depth(&function, &env, depth);
    let program = lower(&function, &env);
    assert_eq!(
        run(&program, &env, &[Value::Int(1)]),
        Some(Value::Int(depth as i32))
    );

    let too_deep = right_nested_sum(depth + 1);
    assert!(matches!(
        compile(&too_deep, &env, CompileOptions::default()),
        Err(BuildError::TooDeep { .. })
    ));
}

#[test]
fn test_default_depth_fits_the_stack_for_sequences() {
    let env = Environment::new();
    let depth = CompileOptions::default().max_depth - 1;

    // v = 0; v = 1; ...; v
    let mut b = FunctionBuilder::new(IrType::Int);
    let v = b.local(IrType::Int);
    let mut statements = Vec::new();
    for i in 0..depth - 2 {
        let value = b.int(i as i32);
        statements.push(b.set_var(v, value));
    }
    statements.push(b.get_var(v));
    let body = b.seq(&statements);
    let function = b.finish(body);

    assert_depth(&function, &env, depth);
    let program = lower(&function, &env);
    assert_eq!(run(&program, &env, &[]), Some(Value::Int(depth as i32 - 3)));
}

#[test]
fn test_default_depth_fits_the_stack_for_conditionals() {
    let env = Environment::new();
    let depth = CompileOptions::default().max_depth - 1;
    let arms = depth - 2;

    // p == 0 ? 0 : p == 1 ? 10 : ... : p
    let mut b = FunctionBuilder::new(IrType::Int);
    let p = b.param(IrType::Int);
    let mut expr = b.get_param(p);
    for k in (0..arms).rev() {
        let get_p = b.get_param(p);
        let key = b.int(k as i32);
        let hit = b.binary(BinaryOp::IEq, get_p, key);
        let value = b.int(k as i32 * 10);
        expr = b.conditional(hit, value, expr);
    }
    let function = b.finish(expr);

    assert_depth(&function, &env, depth);
    let program = lower(&function, &env);
    assert_eq!(run(&program, &env, &[Value::Int(7)]), Some(Value::Int(70)));
    let last = arms as i32 - 1;
    assert_eq!(
        run(&program, &env, &[Value::Int(last)]),
        Some(Value::Int(last * 10))
    );
    assert_eq!(
        run(&program, &env, &[Value::Int(-3)]),
        Some(Value::Int(-3))
    );
}

// === Errors ===

#[test]
fn test_cycle_is_reported() {
    let env = Environment::new();

    let mut b = FunctionBuilder::new(IrType::Int);
    let hole = b.placeholder(IrType::Int);
    let one = b.int(1);
    let add = b.binary(BinaryOp::IAdd, hole, one);
    b.define(
        hole,
        ExprKind::Unary {
            op: UnaryOp::INeg,
            operand: add,
        },
    );
    let function = b.finish(add);

    let err = compile(&function, &env, CompileOptions::default()).unwrap_err();
    assert_eq!(err, BuildError::Cycle { expr: add });
}

#[test]
fn test_unsupported_kinds() {
    let env = Environment::new();

    let mut b = FunctionBuilder::new(IrType::Void);
    let message = b.string("boom");
    let body = b.expr(ExprKind::Throw { value: message }, IrType::Unreachable);
    let err = compile(&b.finish(body), &env, CompileOptions::default()).unwrap_err();
    assert_eq!(
        err,
        BuildError::Unsupported {
            expr: body,
            kind: "throw"
        }
    );

    let mut b = FunctionBuilder::new(IrType::Object);
    let body = b.expr(
        ExprKind::NewObject {
            class: Rc::from("Point"),
        },
        IrType::Object,
    );
    let err = compile(&b.finish(body), &env, CompileOptions::default()).unwrap_err();
    assert_eq!(
        err,
        BuildError::Unsupported {
            expr: body,
            kind: "new-object"
        }
    );
}

/// `c ? s : s + 1` with `s = x * 2` as one node.
fn shared_by_both_arms() -> (IrFunction, ExprId) {
    let mut b = FunctionBuilder::new(IrType::Int);
    let c = b.param(IrType::Boolean);
    let x = b.param(IrType::Int);
    let c = b.get_param(c);
    let x = b.get_param(x);
    let two = b.int(2);
    let s = b.binary(BinaryOp::IMul, x, two);
    let one = b.int(1);
    let s_plus_one = b.binary(BinaryOp::IAdd, s, one);
    let body = b.conditional(c, s, s_plus_one);
    (b.finish(body), s)
}

#[test]
fn test_node_shared_across_branches_is_rejected() {
    let env = Environment::new();
    let (function, s) = shared_by_both_arms();

    // The else arm would read a slot only the then arm writes.
    let err = compile(&function, &env, CompileOptions::default()).unwrap_err();
    assert_eq!(err, BuildError::SharedAcrossBranches { expr: s });
}

#[test]
fn test_node_computed_before_the_branch_may_be_shared() {
    let env = Environment::new();

    // s > 0 ? s : s + 1, with s = x * 2 computed by the condition
    let mut b = FunctionBuilder::new(IrType::Int);
    let x = b.param(IrType::Int);
    let x = b.get_param(x);
    let two = b.int(2);
    let s = b.binary(BinaryOp::IMul, x, two);
    let zero = b.int(0);
    let positive = b.binary(BinaryOp::IGt, s, zero);
    let one = b.int(1);
    let s_plus_one = b.binary(BinaryOp::IAdd, s, one);
    let body = b.conditional(positive, s, s_plus_one);
    let program = lower(&b.finish(body), &env);

    assert_eq!(run(&program, &env, &[Value::Int(5)]), Some(Value::Int(10)));
    assert_eq!(run(&program, &env, &[Value::Int(-5)]), Some(Value::Int(-9)));
}

#[test]
fn test_node_shared_past_short_circuit_is_rejected() {
    let mut env = Environment::new();
    env.define_static("Probe", "ready", &[], IrType::Boolean, |_| {
        Ok(Value::bool(true))
    });

    // r = p && ready(); r + ready(), with both ready() the same call
    let mut b = FunctionBuilder::new(IrType::Int);
    let p = b.param(IrType::Boolean);
    let r = b.local(IrType::Int);
    let p = b.get_param(p);
    let ready = b.call(
        MethodRef::new("Probe", "ready", &[], IrType::Boolean),
        CallType::Static,
        &[],
    );
    let both = b.and(p, ready);
    let assign = b.set_var(r, both);
    let get_r = b.get_var(r);
    let total = b.binary(BinaryOp::IAdd, get_r, ready);
    let body = b.sequence(assign, total);

    let err = compile(&b.finish(body), &env, CompileOptions::default()).unwrap_err();
    assert_eq!(err, BuildError::SharedAcrossBranches { expr: ready });
}

#[test]
fn test_exit_outside_block() {
    let env = Environment::new();

    let mut b = FunctionBuilder::new(IrType::Void);
    let block = b.new_block();
    let body = b.exit_block(block);
    let err = compile(&b.finish(body), &env, CompileOptions::default()).unwrap_err();
    assert_eq!(err, BuildError::UnknownBlock { expr: body, block });
}

#[test]
fn test_depth_limit() {
    let env = Environment::new();

    let mut b = FunctionBuilder::new(IrType::Int);
    let p = b.param(IrType::Int);
    let mut expr = b.get_param(p);
    for _ in 0..10 {
        expr = b.unary(UnaryOp::INeg, expr);
    }
    let function = b.finish(expr);

    let err = compile(&function, &env, CompileOptions { max_depth: 10 }).unwrap_err();
    assert_eq!(
        err,
        BuildError::TooDeep {
            depth: 11,
            max_depth: 10
        }
    );
    assert!(compile(&function, &env, CompileOptions { max_depth: 11 }).is_ok());
}

#[test]
fn test_unresolved_method() {
    let env = Environment::new();

    let mut b = FunctionBuilder::new(IrType::Int);
    let body = b.call(
        MethodRef::new("Math", "abs", &[], IrType::Int),
        CallType::Static,
        &[],
    );
    let err = compile(&b.finish(body), &env, CompileOptions::default()).unwrap_err();
    assert_eq!(
        err,
        BuildError::UnresolvedMethod {
            expr: body,
            method: "Math.abs".to_string()
        }
    );
}

#[test]
fn test_body_type_must_match_return_type() {
    let env = Environment::new();

    let mut b = FunctionBuilder::new(IrType::Int);
    let body = b.long(1);
    let err = compile(&b.finish(body), &env, CompileOptions::default()).unwrap_err();
    assert!(matches!(err, BuildError::TypeMismatch { .. }), "{:?}", err);
}
