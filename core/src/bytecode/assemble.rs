//! Unit assembler and the instrumentation entry points.

use alloc::sync::Arc;

use tracing::debug;

use crate::bytecode::{
    ConstantPool, InstrumentError, decode, encode, encode_line_table, insert_suspension_points,
    relocate,
};
use crate::vm::{CodeFlags, CodeUnit, Function, Opcode};

/// Knobs for [`yieldify_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentOptions {
    /// Marker reported by the first suspension point.
    pub first_marker: i64,
    /// Extra operand stack slots reserved on top of the original bound.
    pub stack_margin: usize,
}

impl Default for InstrumentOptions {
    fn default() -> Self {
        InstrumentOptions {
            first_marker: 1,
            stack_margin: 1,
        }
    }
}

/// Instrument `unit` with default options.
///
/// The result suspends after every statement and reports markers
/// `1, 2, 3, ...`; its final return value and its failures are those of
/// `unit`. The input is left untouched.
pub fn yieldify(unit: &CodeUnit) -> Result<CodeUnit, InstrumentError> {
    yieldify_with(unit, &InstrumentOptions::default())
}

pub fn yieldify_with(
    unit: &CodeUnit,
    options: &InstrumentOptions,
) -> Result<CodeUnit, InstrumentError> {
    if already_suspends(unit) {
        return Err(InstrumentError::AlreadySuspending {
            name: unit.name.clone(),
        });
    }

    let mut seq = decode(unit)?;
    let mut pool = ConstantPool::from_constants(unit.constants.clone());
    let points = insert_suspension_points(&mut seq, &mut pool, options.first_marker)?;
    let layout = relocate(&mut seq)?;
    let line_table = encode_line_table(&seq, unit.first_line)?;
    let code = encode(&seq)?;
    debug_assert_eq!(code.len(), layout.code_size);

    debug!(
        unit = %unit.name,
        points,
        passes = layout.passes,
        original_size = unit.code.len(),
        code_size = code.len(),
        "instrumented unit"
    );

    Ok(CodeUnit {
        name: unit.name.clone(),
        arg_count: unit.arg_count,
        local_names: unit.local_names.clone(),
        stack_size: unit.stack_size + options.stack_margin,
        flags: unit.flags | CodeFlags::GENERATOR,
        code,
        constants: pool.into_vec(),
        free_vars: unit.free_vars.clone(),
        first_line: unit.first_line,
        line_table,
    })
}

/// Generator flag set, or a suspension instruction anywhere in the body.
fn already_suspends(unit: &CodeUnit) -> bool {
    unit.is_generator()
        || unit
            .instructions()
            .any(|raw| matches!(raw, Ok(raw) if raw.opcode == Opcode::YieldValue))
}

impl Function {
    /// Instrument the function's unit, keeping its defaults and closure.
    pub fn yieldify(&self) -> Result<Function, InstrumentError> {
        Ok(Function {
            code: Arc::new(yieldify(&self.code)?),
            defaults: self.defaults.clone(),
            closure: self.closure.clone(),
        })
    }
}
