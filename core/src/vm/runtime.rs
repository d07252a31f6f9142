use alloc::sync::Arc;
use core::cmp::Ordering;

use tracing::trace;

use crate::vm::{
    CodeUnit, CompareOp, ExecutionError, Opcode, RawInstruction, ResourceExceededError,
    RuntimeError, RuntimeErrorKind, Stack, Value, read_instruction,
};
use crate::{String, Vec, format, vec};

/// A code unit bound to its default arguments and enclosing-scope values.
#[derive(Debug, Clone)]
pub struct Function {
    pub code: Arc<CodeUnit>,
    /// Defaults for the trailing positional arguments.
    pub defaults: Vec<Value>,
    /// One value per `code.free_vars` entry.
    pub closure: Vec<Value>,
}

/// Result of calling a [`Function`].
#[derive(Debug)]
pub enum Invocation {
    /// An ordinary unit ran to completion.
    Returned(Value),
    /// A suspend-capable unit; nothing has executed yet.
    Suspended(Generator),
}

impl Invocation {
    pub fn into_generator(self) -> Option<Generator> {
        match self {
            Invocation::Suspended(generator) => Some(generator),
            Invocation::Returned(_) => None,
        }
    }

    pub fn into_returned(self) -> Option<Value> {
        match self {
            Invocation::Returned(value) => Some(value),
            Invocation::Suspended(_) => None,
        }
    }
}

impl Function {
    pub fn new(code: CodeUnit) -> Self {
        Function {
            code: Arc::new(code),
            defaults: Vec::new(),
            closure: Vec::new(),
        }
    }

    pub fn with_defaults(mut self, defaults: Vec<Value>) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_closure(mut self, closure: Vec<Value>) -> Self {
        self.closure = closure;
        self
    }

    pub fn name(&self) -> &str {
        &self.code.name
    }

    /// Invoke the function.
    ///
    /// Suspend-capable units return [`Invocation::Suspended`] without running
    /// any instruction; everything else runs to completion.
    pub fn call(&self, args: &[Value]) -> Result<Invocation, ExecutionError> {
        let mut frame = Frame::new(self, args)?;
        if self.code.is_generator() {
            return Ok(Invocation::Suspended(Generator::new(frame)));
        }
        match frame.run()? {
            FrameExit::Returned(value) => Ok(Invocation::Returned(value)),
            // `run` refuses to yield outside a generator.
            FrameExit::Yielded(_) => Err(ExecutionError::Exhausted),
        }
    }
}

enum FrameExit {
    Returned(Value),
    Yielded(Value),
}

#[derive(Debug, Clone, Copy)]
struct Block {
    exit: usize,
    depth: usize,
}

/// Execution state of one invocation.
#[derive(Debug)]
struct Frame {
    code: Arc<CodeUnit>,
    closure: Vec<Value>,
    ip: usize,
    stack: Stack<Value>,
    locals: Vec<Option<Value>>,
    blocks: Vec<Block>,
}

impl Frame {
    fn new(function: &Function, args: &[Value]) -> Result<Self, ExecutionError> {
        let code = &function.code;
        let arg_count = code.arg_count;
        let required = arg_count.saturating_sub(function.defaults.len());
        if args.len() > arg_count || args.len() < required {
            return Err(RuntimeError {
                kind: RuntimeErrorKind::ArityMismatch {
                    expected: arg_count,
                    given: args.len(),
                },
                line: code.first_line,
            }
            .into());
        }
        if function.closure.len() != code.free_vars.len() {
            return Err(RuntimeError {
                kind: RuntimeErrorKind::ClosureMismatch {
                    expected: code.free_vars.len(),
                    given: function.closure.len(),
                },
                line: code.first_line,
            }
            .into());
        }

        let mut locals = vec![None; code.slot_count()];
        for (slot, arg) in locals.iter_mut().zip(args) {
            *slot = Some(arg.clone());
        }
        let defaults = &function.defaults;
        for (i, slot) in locals.iter_mut().enumerate().take(arg_count).skip(args.len()) {
            *slot = Some(defaults[defaults.len() - (arg_count - i)].clone());
        }

        Ok(Frame {
            code: Arc::clone(code),
            closure: function.closure.clone(),
            ip: 0,
            stack: Stack::new(code.stack_size),
            locals,
            blocks: Vec::new(),
        })
    }

    /// Runs until the frame returns or suspends.
    fn run(&mut self) -> Result<FrameExit, ExecutionError> {
        use Opcode::*;

        loop {
            let raw = read_instruction(&self.code.code, self.ip)?;
            self.ip = raw.offset + raw.size;
            let operand = raw.operand.unwrap_or(0);

            match raw.opcode {
                PopTop => {
                    self.pop(&raw)?;
                }
                RotTwo => {
                    let b = self.pop(&raw)?;
                    let a = self.pop(&raw)?;
                    self.push(b)?;
                    self.push(a)?;
                }
                DupTop => {
                    let top = self
                        .stack
                        .peek()
                        .cloned()
                        .ok_or(underflow(&raw))?;
                    self.push(top)?;
                }
                Nop => {}
                UnaryNegative => {
                    let value = match self.pop(&raw)? {
                        Value::Int(i) => i
                            .checked_neg()
                            .ok_or_else(|| self.fail(&raw, RuntimeErrorKind::Overflow))?,
                        other => {
                            return Err(self.fail(
                                &raw,
                                RuntimeErrorKind::TypeMismatch {
                                    op: "unary -",
                                    left: other.type_name(),
                                    right: "None",
                                },
                            ));
                        }
                    };
                    self.push(Value::Int(value))?;
                }
                UnaryNot => {
                    let value = self.pop(&raw)?;
                    self.push(Value::Bool(!value.is_truthy()))?;
                }
                BinaryMultiply | BinaryModulo | BinaryAdd | BinarySubtract | BinaryFloorDivide => {
                    let b = self.pop(&raw)?;
                    let a = self.pop(&raw)?;
                    let result = self.binary(&raw, a, b)?;
                    self.push(result)?;
                }
                GetIter => {
                    let iter = match self.pop(&raw)? {
                        Value::Int(n) => Value::Range { next: 0, end: n },
                        range @ Value::Range { .. } => range,
                        other => {
                            return Err(self.fail(
                                &raw,
                                RuntimeErrorKind::TypeMismatch {
                                    op: "iter",
                                    left: other.type_name(),
                                    right: "None",
                                },
                            ));
                        }
                    };
                    self.push(iter)?;
                }
                BreakLoop => {
                    let block = self.blocks.pop().ok_or(bad_operand(&raw))?;
                    self.stack.truncate(block.depth);
                    self.ip = block.exit;
                }
                ReturnValue => {
                    let value = self.pop(&raw)?;
                    return Ok(FrameExit::Returned(value));
                }
                YieldValue => {
                    if !self.code.is_generator() {
                        return Err(bad_operand(&raw));
                    }
                    let value = self.pop(&raw)?;
                    return Ok(FrameExit::Yielded(value));
                }
                PopBlock => {
                    let block = self.blocks.pop().ok_or(bad_operand(&raw))?;
                    self.stack.truncate(block.depth);
                }
                ForIter => {
                    let dest = destination(&raw)?;
                    let item = match self.stack.peek_mut() {
                        Some(Value::Range { next, end }) => {
                            if *next < *end {
                                let item = *next;
                                *next += 1;
                                Some(item)
                            } else {
                                None
                            }
                        }
                        Some(other) => {
                            let left = other.type_name();
                            return Err(self.fail(
                                &raw,
                                RuntimeErrorKind::TypeMismatch {
                                    op: "next",
                                    left,
                                    right: "None",
                                },
                            ));
                        }
                        None => return Err(underflow(&raw)),
                    };
                    match item {
                        Some(item) => self.push(Value::Int(item))?,
                        None => {
                            self.pop(&raw)?;
                            self.ip = dest;
                        }
                    }
                }
                LoadConst => {
                    let constant = self
                        .code
                        .constants
                        .get(operand as usize)
                        .ok_or(bad_operand(&raw))?;
                    let value = Value::from(constant);
                    self.push(value)?;
                }
                CompareOp => {
                    let op = crate::vm::CompareOp::from_operand(operand).ok_or(bad_operand(&raw))?;
                    let b = self.pop(&raw)?;
                    let a = self.pop(&raw)?;
                    let result = self.compare(&raw, op, &a, &b)?;
                    self.push(Value::Bool(result))?;
                }
                JumpForward | JumpAbsolute => {
                    self.ip = destination(&raw)?;
                }
                JumpIfFalseOrPop | JumpIfTrueOrPop => {
                    let dest = destination(&raw)?;
                    let truthy = self.stack.peek().ok_or(underflow(&raw))?.is_truthy();
                    if truthy == (raw.opcode == JumpIfTrueOrPop) {
                        self.ip = dest;
                    } else {
                        self.pop(&raw)?;
                    }
                }
                PopJumpIfFalse | PopJumpIfTrue => {
                    let dest = destination(&raw)?;
                    let truthy = self.pop(&raw)?.is_truthy();
                    if truthy == (raw.opcode == PopJumpIfTrue) {
                        self.ip = dest;
                    }
                }
                SetupLoop => {
                    let exit = destination(&raw)?;
                    self.blocks.push(Block {
                        exit,
                        depth: self.stack.len(),
                    });
                }
                LoadFast => {
                    let value = match self.locals.get(operand as usize) {
                        Some(Some(value)) => value.clone(),
                        Some(None) => {
                            let name = self
                                .code
                                .local_names
                                .get(operand as usize)
                                .cloned()
                                .unwrap_or_else(|| format!("#{}", operand));
                            return Err(self.fail(&raw, RuntimeErrorKind::UnboundLocal { name }));
                        }
                        None => return Err(bad_operand(&raw)),
                    };
                    self.push(value)?;
                }
                StoreFast => {
                    let value = self.pop(&raw)?;
                    let slot = self
                        .locals
                        .get_mut(operand as usize)
                        .ok_or(bad_operand(&raw))?;
                    *slot = Some(value);
                }
                RaiseVarargs => {
                    if operand != 1 {
                        return Err(bad_operand(&raw));
                    }
                    let value = self.pop(&raw)?;
                    return Err(self.fail(&raw, RuntimeErrorKind::Raised(value)));
                }
                LoadDeref => {
                    let value = self
                        .closure
                        .get(operand as usize)
                        .cloned()
                        .ok_or(bad_operand(&raw))?;
                    self.push(value)?;
                }
                // Prefixes are folded into the following instruction by the reader.
                ExtendedArg => return Err(bad_operand(&raw)),
            }
        }
    }

    #[inline]
    fn push(&mut self, value: Value) -> Result<(), ResourceExceededError> {
        self.stack.push(value)
    }

    #[inline]
    fn pop(&mut self, raw: &RawInstruction) -> Result<Value, ExecutionError> {
        self.stack.pop().ok_or(underflow(raw))
    }

    /// A failure of the unit's own logic, attributed to the current source line.
    fn fail(&self, raw: &RawInstruction, kind: RuntimeErrorKind) -> ExecutionError {
        RuntimeError {
            kind,
            line: self.code.line_for_offset(raw.offset),
        }
        .into()
    }

    fn binary(&self, raw: &RawInstruction, a: Value, b: Value) -> Result<Value, ExecutionError> {
        let symbol = match raw.opcode {
            Opcode::BinaryAdd => "+",
            Opcode::BinarySubtract => "-",
            Opcode::BinaryMultiply => "*",
            Opcode::BinaryFloorDivide => "//",
            _ => "%",
        };
        let (x, y) = match (&a, &b) {
            (Value::Int(x), Value::Int(y)) => (*x, *y),
            (Value::Str(x), Value::Str(y)) if raw.opcode == Opcode::BinaryAdd => {
                let mut joined = String::with_capacity(x.len() + y.len());
                joined.push_str(x);
                joined.push_str(y);
                return Ok(Value::Str(joined));
            }
            _ => {
                return Err(self.fail(
                    raw,
                    RuntimeErrorKind::TypeMismatch {
                        op: symbol,
                        left: a.type_name(),
                        right: b.type_name(),
                    },
                ));
            }
        };

        let result = match raw.opcode {
            Opcode::BinaryAdd => x.checked_add(y),
            Opcode::BinarySubtract => x.checked_sub(y),
            Opcode::BinaryMultiply => x.checked_mul(y),
            Opcode::BinaryFloorDivide | Opcode::BinaryModulo if y == 0 => {
                return Err(self.fail(raw, RuntimeErrorKind::DivisionByZero));
            }
            Opcode::BinaryFloorDivide => floor_div(x, y),
            _ => floor_mod(x, y),
        };
        result
            .map(Value::Int)
            .ok_or_else(|| self.fail(raw, RuntimeErrorKind::Overflow))
    }

    fn compare(
        &self,
        raw: &RawInstruction,
        op: CompareOp,
        a: &Value,
        b: &Value,
    ) -> Result<bool, ExecutionError> {
        let ordering = || -> Result<Ordering, ExecutionError> {
            match (a, b) {
                (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
                (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
                _ => Err(self.fail(
                    raw,
                    RuntimeErrorKind::TypeMismatch {
                        op: op.symbol(),
                        left: a.type_name(),
                        right: b.type_name(),
                    },
                )),
            }
        };
        Ok(match op {
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
            CompareOp::Lt => ordering()?.is_lt(),
            CompareOp::Le => ordering()?.is_le(),
            CompareOp::Gt => ordering()?.is_gt(),
            CompareOp::Ge => ordering()?.is_ge(),
        })
    }
}

fn destination(raw: &RawInstruction) -> Result<usize, ExecutionError> {
    raw.branch_destination().ok_or(bad_operand(raw))
}

fn bad_operand(raw: &RawInstruction) -> ExecutionError {
    ExecutionError::BadOperand {
        offset: raw.offset,
        opcode: raw.opcode,
        operand: raw.operand,
    }
}

fn underflow(raw: &RawInstruction) -> ExecutionError {
    ExecutionError::StackUnderflow {
        offset: raw.offset,
        opcode: raw.opcode,
    }
}

/// Division rounding toward negative infinity.
fn floor_div(x: i64, y: i64) -> Option<i64> {
    let q = x.checked_div(y)?;
    if x % y != 0 && ((x < 0) != (y < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

/// Remainder taking the sign of the divisor.
fn floor_mod(x: i64, y: i64) -> Option<i64> {
    // `i64::MIN % -1` overflows in hardware but is exactly 0.
    if y == -1 {
        return Some(0);
    }
    let r = x.checked_rem(y)?;
    if r != 0 && ((r < 0) != (y < 0)) {
        Some(r + y)
    } else {
        Some(r)
    }
}

// ============================================================================
// Generators
// ============================================================================

/// Outcome of resuming a [`Generator`].
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratorState {
    /// The unit suspended, reporting this value.
    Yielded(Value),
    /// The unit returned this value; the generator is finished.
    Complete(Value),
}

/// A suspended invocation of a suspend-capable unit.
///
/// Resumption is pull-based: each [`resume`](Generator::resume) runs the
/// frame to its next suspension point or to its end. Locals and the operand
/// stack persist across suspensions. Once the frame returns or fails, the
/// generator is finished and further resumes report
/// [`ExecutionError::Exhausted`].
#[derive(Debug)]
pub struct Generator {
    frame: Option<Frame>,
    started: bool,
    return_value: Option<Value>,
}

impl Generator {
    fn new(frame: Frame) -> Self {
        Generator {
            frame: Some(frame),
            started: false,
            return_value: None,
        }
    }

    pub fn resume(&mut self) -> Result<GeneratorState, ExecutionError> {
        let Some(frame) = self.frame.as_mut() else {
            return Err(ExecutionError::Exhausted);
        };
        if self.started {
            // The value sent back into the suspension point.
            frame.push(Value::None)?;
        }
        self.started = true;

        match frame.run() {
            Ok(FrameExit::Yielded(value)) => {
                trace!(unit = %frame.code.name, value = %value, "suspended");
                Ok(GeneratorState::Yielded(value))
            }
            Ok(FrameExit::Returned(value)) => {
                trace!(unit = %frame.code.name, value = %value, "completed");
                self.frame = None;
                self.return_value = Some(value.clone());
                Ok(GeneratorState::Complete(value))
            }
            Err(e) => {
                self.frame = None;
                Err(e)
            }
        }
    }

    /// Whether the frame has returned or failed.
    pub fn is_finished(&self) -> bool {
        self.frame.is_none()
    }

    /// The value the unit returned, once it has completed normally.
    pub fn return_value(&self) -> Option<&Value> {
        self.return_value.as_ref()
    }
}

/// Yields every suspended value; a failure is yielded once and ends iteration.
impl Iterator for Generator {
    type Item = Result<Value, ExecutionError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.resume() {
            Ok(GeneratorState::Yielded(value)) => Some(Ok(value)),
            Ok(GeneratorState::Complete(_)) | Err(ExecutionError::Exhausted) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
