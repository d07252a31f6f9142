//! Target units shared by the integration tests, authored with `CodeBuilder`
//! the way a compiler would lay them out.

#![allow(dead_code)]

use yieldify_core::bytecode::CodeBuilder;
use yieldify_core::vm::{
    CodeUnit, Constant, ExecutionError, Function, GeneratorState, Invocation, Opcode, Value,
};

/// Markers reported by one full run, and how the run ended.
#[derive(Debug, PartialEq)]
pub struct Trace {
    pub markers: Vec<i64>,
    pub outcome: Result<Value, ExecutionError>,
}

/// Drive `function` to the end, collecting every reported marker.
pub fn trace(function: &Function, args: &[Value]) -> Trace {
    let mut markers = Vec::new();
    let mut generator = match function.call(args) {
        Ok(Invocation::Suspended(generator)) => generator,
        Ok(Invocation::Returned(value)) => {
            return Trace {
                markers,
                outcome: Ok(value),
            };
        }
        Err(e) => {
            return Trace {
                markers,
                outcome: Err(e),
            };
        }
    };
    loop {
        match generator.resume() {
            Ok(GeneratorState::Yielded(Value::Int(marker))) => markers.push(marker),
            Ok(GeneratorState::Yielded(other)) => panic!("non-integer marker {other}"),
            Ok(GeneratorState::Complete(value)) => {
                return Trace {
                    markers,
                    outcome: Ok(value),
                };
            }
            Err(e) => {
                return Trace {
                    markers,
                    outcome: Err(e),
                };
            }
        }
    }
}

/// ```text
/// 1: def sum_below(n):
/// 2:     i = 0
/// 3:     total = 0
/// 4:     while i < n:
/// 5:         total = total + i
/// 6:         i = i + 1
/// 7:     return total
/// ```
pub fn sum_below() -> CodeUnit {
    let mut b = CodeBuilder::new("sum_below", 1);
    let n = b.arg("n");
    let i = b.local("i");
    let total = b.local("total");
    let (top, exit_loop, end) = (b.label(), b.label(), b.label());

    b.line(2);
    b.load_const(Constant::Int(0)).unwrap();
    b.emit_arg(Opcode::StoreFast, i);
    b.line(3);
    b.load_const(Constant::Int(0)).unwrap();
    b.emit_arg(Opcode::StoreFast, total);

    b.line(4);
    b.jump(Opcode::SetupLoop, end);
    b.bind(top);
    b.emit_arg(Opcode::LoadFast, i);
    b.emit_arg(Opcode::LoadFast, n);
    b.emit_arg(Opcode::CompareOp, 0);
    b.jump(Opcode::PopJumpIfFalse, exit_loop);

    b.line(5);
    b.emit_arg(Opcode::LoadFast, total);
    b.emit_arg(Opcode::LoadFast, i);
    b.emit(Opcode::BinaryAdd);
    b.emit_arg(Opcode::StoreFast, total);
    b.line(6);
    b.emit_arg(Opcode::LoadFast, i);
    b.load_const(Constant::Int(1)).unwrap();
    b.emit(Opcode::BinaryAdd);
    b.emit_arg(Opcode::StoreFast, i);
    b.jump(Opcode::JumpAbsolute, top);

    b.bind(exit_loop);
    b.emit(Opcode::PopBlock);
    b.line(7);
    b.bind(end);
    b.emit_arg(Opcode::LoadFast, total);
    b.emit(Opcode::ReturnValue);
    b.finish().unwrap()
}

/// ```text
/// 1: def halves(n):
/// 2:     total = n + 1
/// 3:     half = total // 2
/// 4:     return half // (n - n)
/// ```
pub fn halves() -> CodeUnit {
    let mut b = CodeBuilder::new("halves", 1);
    let n = b.arg("n");
    let total = b.local("total");
    let half = b.local("half");

    b.line(2);
    b.emit_arg(Opcode::LoadFast, n);
    b.load_const(Constant::Int(1)).unwrap();
    b.emit(Opcode::BinaryAdd);
    b.emit_arg(Opcode::StoreFast, total);
    b.line(3);
    b.emit_arg(Opcode::LoadFast, total);
    b.load_const(Constant::Int(2)).unwrap();
    b.emit(Opcode::BinaryFloorDivide);
    b.emit_arg(Opcode::StoreFast, half);
    b.line(4);
    b.emit_arg(Opcode::LoadFast, half);
    b.emit_arg(Opcode::LoadFast, n);
    b.emit_arg(Opcode::LoadFast, n);
    b.emit(Opcode::BinarySubtract);
    b.emit(Opcode::BinaryFloorDivide);
    b.emit(Opcode::ReturnValue);
    b.finish().unwrap()
}

/// ```text
/// 1: def classify(x):
/// 2:     if x < 0:
/// 3:         raise "negative"
/// 4:     label = x % 2 == 0 and "even" or "odd"
/// 5:     return label
/// ```
pub fn classify() -> CodeUnit {
    let mut b = CodeBuilder::new("classify", 1);
    let x = b.arg("x");
    let label = b.local("label");
    let (non_negative, pick_odd, store) = (b.label(), b.label(), b.label());

    b.line(2);
    b.emit_arg(Opcode::LoadFast, x);
    b.load_const(Constant::Int(0)).unwrap();
    b.emit_arg(Opcode::CompareOp, 0);
    b.jump(Opcode::PopJumpIfFalse, non_negative);
    b.line(3);
    b.load_const(Constant::Str("negative".into())).unwrap();
    b.emit_arg(Opcode::RaiseVarargs, 1);

    b.line(4);
    b.bind(non_negative);
    b.emit_arg(Opcode::LoadFast, x);
    b.load_const(Constant::Int(2)).unwrap();
    b.emit(Opcode::BinaryModulo);
    b.load_const(Constant::Int(0)).unwrap();
    b.emit_arg(Opcode::CompareOp, 2);
    b.jump(Opcode::JumpIfFalseOrPop, pick_odd);
    b.load_const(Constant::Str("even".into())).unwrap();
    b.bind(pick_odd);
    b.jump(Opcode::JumpIfTrueOrPop, store);
    b.load_const(Constant::Str("odd".into())).unwrap();
    b.bind(store);
    b.emit_arg(Opcode::StoreFast, label);
    b.line(5);
    b.emit_arg(Opcode::LoadFast, label);
    b.emit(Opcode::ReturnValue);
    b.finish().unwrap()
}

/// ```text
/// 1: def scaled(x, factor=3):       # closes over `offset`
/// 2:     y = x * factor
/// 3:     for k in range(2):
/// 4:         y = y + offset
/// 5:     return y
/// ```
pub fn scaled(offset: i64) -> Function {
    let mut b = CodeBuilder::new("scaled", 1);
    let x = b.arg("x");
    let factor = b.arg("factor");
    let y = b.local("y");
    let k = b.local("k");
    let offset_var = b.free_var("offset");
    let (next, loop_done, end) = (b.label(), b.label(), b.label());

    b.line(2);
    b.emit_arg(Opcode::LoadFast, x);
    b.emit_arg(Opcode::LoadFast, factor);
    b.emit(Opcode::BinaryMultiply);
    b.emit_arg(Opcode::StoreFast, y);

    b.line(3);
    b.jump(Opcode::SetupLoop, end);
    b.load_const(Constant::Int(2)).unwrap();
    b.emit(Opcode::GetIter);
    b.bind(next);
    b.jump(Opcode::ForIter, loop_done);
    b.emit_arg(Opcode::StoreFast, k);
    b.line(4);
    b.emit_arg(Opcode::LoadFast, y);
    b.emit_arg(Opcode::LoadDeref, offset_var);
    b.emit(Opcode::BinaryAdd);
    b.emit_arg(Opcode::StoreFast, y);
    b.jump(Opcode::JumpAbsolute, next);
    b.bind(loop_done);
    b.emit(Opcode::PopBlock);

    b.line(5);
    b.bind(end);
    b.emit_arg(Opcode::LoadFast, y);
    b.emit(Opcode::ReturnValue);

    Function::new(b.finish().unwrap())
        .with_defaults(vec![Value::Int(3)])
        .with_closure(vec![Value::Int(offset)])
}

/// `statements` increments of `acc` guarded by `if n:`, one per line.
///
/// Each increment is 10 bytes, so a few thousand of them push the guard's
/// jump target near the end of the narrow operand range; instrumentation
/// adds 5 bytes per statement and forces the wide form.
///
/// ```text
/// 1: def long_guard(n):
/// 2:     acc = 0
/// 3:     if n:
/// 4:         acc = acc + 1
///            ...
/// k:     return acc
/// ```
pub fn long_guard(statements: u32) -> CodeUnit {
    let mut b = CodeBuilder::new("long_guard", 1);
    let n = b.arg("n");
    let acc = b.local("acc");
    let skip = b.label();

    b.line(2);
    b.load_const(Constant::Int(0)).unwrap();
    b.emit_arg(Opcode::StoreFast, acc);
    b.line(3);
    b.emit_arg(Opcode::LoadFast, n);
    b.jump(Opcode::PopJumpIfFalse, skip);
    for line in 4..4 + statements {
        b.line(line);
        b.emit_arg(Opcode::LoadFast, acc);
        b.load_const(Constant::Int(1)).unwrap();
        b.emit(Opcode::BinaryAdd);
        b.emit_arg(Opcode::StoreFast, acc);
    }
    b.line(4 + statements);
    b.bind(skip);
    b.emit_arg(Opcode::LoadFast, acc);
    b.emit(Opcode::ReturnValue);
    b.finish().unwrap()
}

/// Sum of `count` distinct constants, each loaded on its own line, so that
/// most `LOAD_CONST` operands need the wide form even before instrumentation.
pub fn many_constants(count: i64) -> CodeUnit {
    let mut b = CodeBuilder::new("many_constants", 1);
    let acc = b.local("acc");

    b.line(2);
    b.load_const(Constant::Int(0)).unwrap();
    b.emit_arg(Opcode::StoreFast, acc);
    for k in 0..count {
        b.line(3 + k as u32);
        b.emit_arg(Opcode::LoadFast, acc);
        b.load_const(Constant::Int(1_000_000 + k)).unwrap();
        b.emit(Opcode::BinaryAdd);
        b.emit_arg(Opcode::StoreFast, acc);
    }
    b.line(3 + count as u32);
    b.emit_arg(Opcode::LoadFast, acc);
    b.emit(Opcode::ReturnValue);
    b.finish().unwrap()
}

/// ```text
/// 1: def doubled_negation(n):
/// 2:     if not n:
/// 3:         return 0
/// 4:     m = -n
/// 5:     return m + m
/// ```
///
/// Line 4 is reached only by the jump, so its marker is never reported.
pub fn doubled_negation() -> CodeUnit {
    let mut b = CodeBuilder::new("doubled_negation", 1);
    let n = b.arg("n");
    let m = b.local("m");
    let nonzero = b.label();

    b.line(2);
    b.emit_arg(Opcode::LoadFast, n);
    b.jump(Opcode::PopJumpIfTrue, nonzero);
    b.line(3);
    b.load_const(Constant::Int(0)).unwrap();
    b.emit(Opcode::ReturnValue);
    b.line(4);
    b.bind(nonzero);
    b.emit_arg(Opcode::LoadFast, n);
    b.emit(Opcode::UnaryNegative);
    b.emit_arg(Opcode::StoreFast, m);
    b.line(5);
    b.emit_arg(Opcode::LoadFast, m);
    b.emit(Opcode::DupTop);
    b.emit(Opcode::BinaryAdd);
    b.emit(Opcode::ReturnValue);
    b.finish().unwrap()
}

/// A for-loop over `range(n)` whose body is `statements` increments, one per
/// line, followed by `return acc or 7`.
///
/// Every branch fits the narrow form before instrumentation when
/// `statements` is at most 6550. The inserted triples push the loop exits and
/// the final `JUMP_IF_TRUE_OR_POP` target past it.
///
/// ```text
/// 1: def long_loop(n):
/// 2:     acc = 0
/// 3:     for k in range(n):
/// 4:         acc = acc + 1
///            ...
/// k:     return acc or 7
/// ```
pub fn long_loop(statements: u32) -> CodeUnit {
    let mut b = CodeBuilder::new("long_loop", 1);
    let n = b.arg("n");
    let acc = b.local("acc");
    let k = b.local("k");
    let (next, loop_done, end, done) = (b.label(), b.label(), b.label(), b.label());

    b.line(2);
    b.load_const(Constant::Int(0)).unwrap();
    b.emit_arg(Opcode::StoreFast, acc);
    b.line(3);
    b.jump(Opcode::SetupLoop, end);
    b.emit_arg(Opcode::LoadFast, n);
    b.emit(Opcode::GetIter);
    b.bind(next);
    b.jump(Opcode::ForIter, loop_done);
    b.emit_arg(Opcode::StoreFast, k);
    for line in 4..4 + statements {
        b.line(line);
        b.emit_arg(Opcode::LoadFast, acc);
        b.load_const(Constant::Int(1)).unwrap();
        b.emit(Opcode::BinaryAdd);
        b.emit_arg(Opcode::StoreFast, acc);
    }
    b.jump(Opcode::JumpAbsolute, next);
    b.bind(loop_done);
    b.emit(Opcode::PopBlock);
    b.line(4 + statements);
    b.bind(end);
    b.emit_arg(Opcode::LoadFast, acc);
    b.jump(Opcode::JumpIfTrueOrPop, done);
    b.load_const(Constant::Int(7)).unwrap();
    b.bind(done);
    b.emit(Opcode::ReturnValue);
    b.finish().unwrap()
}
