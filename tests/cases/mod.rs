#![allow(dead_code)]

use yieldify::vm::{Constant, Opcode};
use yieldify::{CodeBuilder, CodeUnit};

/// Runs `$target` instrumented with `$args`, checking the reported markers
/// and the final outcome, then checks the uninstrumented unit reaches the
/// same outcome.
#[macro_export]
macro_rules! marker_case {
    (
        $name:ident,
        target: $target:expr,
        args: [$($arg:expr),* $(,)?],
        markers: [$($marker:expr),* $(,)?],
        result: $result:pat $(,)?
    ) => {
        #[test]
        fn $name() {
            let function = yieldify::Function::new($target);
            let args = [$($arg),*];
            let instrumented = yieldify::instrument(&function).unwrap();

            let mut markers: Vec<i64> = Vec::new();
            let result = yieldify::drive(&instrumented, &args, |marker| match marker {
                yieldify::Value::Int(n) => markers.push(*n),
                other => panic!("non-integer marker {other}"),
            });
            pretty_assertions::assert_eq!(markers, vec![$($marker),*]);
            assert!(matches!(result, $result), "got {:?}", result);

            let plain = yieldify::drive(&function, &args, |_| panic!("plain unit suspended"));
            assert!(matches!(plain, $result), "got {:?}", plain);
        }
    };
}

/// ```text
/// 1: def countdown(n):
/// 2:     steps = 0
/// 3:     while n > 0:
/// 4:         n = n - 1
/// 5:         steps = steps + 1
/// 6:     return steps
/// ```
pub fn countdown() -> CodeUnit {
    let mut b = CodeBuilder::new("countdown", 1);
    let n = b.arg("n");
    let steps = b.local("steps");
    let (top, exit_loop, end) = (b.label(), b.label(), b.label());

    b.line(2);
    b.load_const(Constant::Int(0)).unwrap();
    b.emit_arg(Opcode::StoreFast, steps);
    b.line(3);
    b.jump(Opcode::SetupLoop, end);
    b.bind(top);
    b.emit_arg(Opcode::LoadFast, n);
    b.load_const(Constant::Int(0)).unwrap();
    b.emit_arg(Opcode::CompareOp, 4);
    b.jump(Opcode::PopJumpIfFalse, exit_loop);
    b.line(4);
    b.emit_arg(Opcode::LoadFast, n);
    b.load_const(Constant::Int(1)).unwrap();
    b.emit(Opcode::BinarySubtract);
    b.emit_arg(Opcode::StoreFast, n);
    b.line(5);
    b.emit_arg(Opcode::LoadFast, steps);
    b.load_const(Constant::Int(1)).unwrap();
    b.emit(Opcode::BinaryAdd);
    b.emit_arg(Opcode::StoreFast, steps);
    b.jump(Opcode::JumpAbsolute, top);
    b.bind(exit_loop);
    b.emit(Opcode::PopBlock);
    b.line(6);
    b.bind(end);
    b.emit_arg(Opcode::LoadFast, steps);
    b.emit(Opcode::ReturnValue);
    b.finish().unwrap()
}

/// ```text
/// 1: def first_odd(limit):
/// 2:     for k in range(limit):
/// 3:         if k % 2 == 1:
/// 4:             break
/// 5:     return k
/// ```
///
/// `k` is unbound when `limit` is 0.
pub fn first_odd() -> CodeUnit {
    let mut b = CodeBuilder::new("first_odd", 1);
    let limit = b.arg("limit");
    let k = b.local("k");
    let (next, loop_done, end, not_odd) = (b.label(), b.label(), b.label(), b.label());

    b.line(2);
    b.jump(Opcode::SetupLoop, end);
    b.emit_arg(Opcode::LoadFast, limit);
    b.emit(Opcode::GetIter);
    b.bind(next);
    b.jump(Opcode::ForIter, loop_done);
    b.emit_arg(Opcode::StoreFast, k);
    b.line(3);
    b.emit_arg(Opcode::LoadFast, k);
    b.load_const(Constant::Int(2)).unwrap();
    b.emit(Opcode::BinaryModulo);
    b.load_const(Constant::Int(1)).unwrap();
    b.emit_arg(Opcode::CompareOp, 2);
    b.jump(Opcode::PopJumpIfFalse, not_odd);
    b.line(4);
    b.emit(Opcode::BreakLoop);
    b.bind(not_odd);
    b.jump(Opcode::JumpAbsolute, next);
    b.bind(loop_done);
    b.emit(Opcode::PopBlock);
    b.line(5);
    b.bind(end);
    b.emit_arg(Opcode::LoadFast, k);
    b.emit(Opcode::ReturnValue);
    b.finish().unwrap()
}
