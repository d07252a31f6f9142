//! Yieldify - turn a compiled unit into a step-observable one
//!
//! # Overview
//!
//! Instrumenting a unit rewrites its bytecode so that, after every source
//! statement, it suspends and reports an ascending marker to its caller.
//! The instrumented unit returns what the original returned and fails the
//! way the original failed; the markers are the only visible difference.
//!
//! # Quick Start
//!
//! ```ignore
//! use yieldify::{CodeBuilder, Function, Value, drive, instrument};
//! use yieldify::vm::{Constant, Opcode};
//!
//! // 1: def double(x):
//! // 2:     y = x + x
//! // 3:     return y
//! let mut b = CodeBuilder::new("double", 1);
//! let x = b.arg("x");
//! let y = b.local("y");
//! b.line(2);
//! b.emit_arg(Opcode::LoadFast, x);
//! b.emit_arg(Opcode::LoadFast, x);
//! b.emit(Opcode::BinaryAdd);
//! b.emit_arg(Opcode::StoreFast, y);
//! b.line(3);
//! b.emit_arg(Opcode::LoadFast, y);
//! b.emit(Opcode::ReturnValue);
//!
//! let function = instrument(&Function::new(b.finish()?))?;
//! let result = drive(&function, &[Value::Int(21)], |marker| println!("yield {marker}"))?;
//! assert_eq!(result, Value::Int(42));
//! ```

mod error;

use std::sync::Arc;

pub use error::Error;

// Re-export the engine
pub use yieldify_core::bytecode::{self, CodeBuilder, InstrumentOptions};
pub use yieldify_core::vm::{
    self, CodeUnit, ExecutionError, Function, Generator, GeneratorState, Invocation, Value,
};
pub use yieldify_core::InstrumentError;

/// Instrument `function` with default options.
pub fn instrument(function: &Function) -> Result<Function, Error> {
    instrument_with(function, &InstrumentOptions::default())
}

/// Instrument `function`, keeping its defaults and closure.
pub fn instrument_with(function: &Function, options: &InstrumentOptions) -> Result<Function, Error> {
    let code = bytecode::yieldify_with(&function.code, options)
        .map_err(|e| Error::instrument(function.name(), e))?;
    Ok(Function {
        code: Arc::new(code),
        defaults: function.defaults.clone(),
        closure: function.closure.clone(),
    })
}

/// Call `function` and run it to the end, handing every reported marker to
/// `on_marker`. Returns the final value.
///
/// Works for ordinary functions too; they simply report nothing.
pub fn drive(
    function: &Function,
    args: &[Value],
    mut on_marker: impl FnMut(&Value),
) -> Result<Value, Error> {
    let mut generator = match function.call(args)? {
        Invocation::Returned(value) => return Ok(value),
        Invocation::Suspended(generator) => generator,
    };
    loop {
        match generator.resume()? {
            GeneratorState::Yielded(marker) => on_marker(&marker),
            GeneratorState::Complete(value) => return Ok(value),
        }
    }
}
