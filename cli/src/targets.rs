//! Demo units the driver instruments.

use yieldify::vm::{Constant, Opcode};
use yieldify::{CodeBuilder, CodeUnit, InstrumentError};

/// ```text
/// 1: def target(n):
/// 2:     i = 0
/// 3:     total = 0
/// 4:     while i < n:
/// 5:         total = total + i
/// 6:         i = i + 1
/// 7:     return total
/// ```
pub fn summing() -> Result<CodeUnit, InstrumentError> {
    let mut b = CodeBuilder::new("target", 1);
    let n = b.arg("n");
    let i = b.local("i");
    let total = b.local("total");
    let (top, exit_loop, end) = (b.label(), b.label(), b.label());

    b.line(2);
    b.load_const(Constant::Int(0))?;
    b.emit_arg(Opcode::StoreFast, i);
    b.line(3);
    b.load_const(Constant::Int(0))?;
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
    b.load_const(Constant::Int(1))?;
    b.emit(Opcode::BinaryAdd);
    b.emit_arg(Opcode::StoreFast, i);
    b.jump(Opcode::JumpAbsolute, top);
    b.bind(exit_loop);
    b.emit(Opcode::PopBlock);
    b.line(7);
    b.bind(end);
    b.emit_arg(Opcode::LoadFast, total);
    b.emit(Opcode::ReturnValue);
    b.finish()
}

/// ```text
/// 1: def target(n):
/// 2:     total = n * 2
/// 3:     total = total + 1
/// 4:     return total // 0
/// ```
pub fn failing() -> Result<CodeUnit, InstrumentError> {
    let mut b = CodeBuilder::new("target", 1);
    let n = b.arg("n");
    let total = b.local("total");

    b.line(2);
    b.emit_arg(Opcode::LoadFast, n);
    b.load_const(Constant::Int(2))?;
    b.emit(Opcode::BinaryMultiply);
    b.emit_arg(Opcode::StoreFast, total);
    b.line(3);
    b.emit_arg(Opcode::LoadFast, total);
    b.load_const(Constant::Int(1))?;
    b.emit(Opcode::BinaryAdd);
    b.emit_arg(Opcode::StoreFast, total);
    b.line(4);
    b.emit_arg(Opcode::LoadFast, total);
    b.load_const(Constant::Int(0))?;
    b.emit(Opcode::BinaryFloorDivide);
    b.emit(Opcode::ReturnValue);
    b.finish()
}
