#![cfg_attr(all(not(feature = "std"), not(test)), no_std)]

extern crate alloc;

// Re-export for convenience so other modules don't need alloc:: prefix
#[allow(unused_imports)]
pub(crate) use alloc::{boxed::Box, format, string::String, string::ToString, vec, vec::Vec};

pub mod bytecode;
pub mod vm;

pub use bytecode::{InstrumentError, InstrumentOptions, yieldify, yieldify_with};
pub use vm::{CodeUnit, ExecutionError, Function, Generator, Value};
