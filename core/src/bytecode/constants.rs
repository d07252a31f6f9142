use hashbrown::HashMap;

use crate::Vec;
use crate::bytecode::InstrumentError;
use crate::vm::Constant;

/// Append-only constant pool with deduplication.
///
/// Existing slots are never rewritten. Interning a value that is already
/// present returns the lowest slot holding it.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    constants: Vec<Constant>,
    /// Value -> lowest index holding it.
    index: HashMap<Constant, u32>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt an existing pool, duplicates included.
    pub fn from_constants(constants: Vec<Constant>) -> Self {
        let mut index = HashMap::with_capacity(constants.len());
        for (i, constant) in constants.iter().enumerate() {
            index.entry(constant.clone()).or_insert(i as u32);
        }
        ConstantPool { constants, index }
    }

    /// Index of `value`, appending it if no slot holds it yet.
    pub fn intern(&mut self, value: Constant) -> Result<u32, InstrumentError> {
        if let Some(&existing) = self.index.get(&value) {
            return Ok(existing);
        }
        let index: u32 = self
            .constants
            .len()
            .try_into()
            .map_err(|_| InstrumentError::TooManyConstants)?;
        self.constants.push(value.clone());
        self.index.insert(value, index);
        Ok(index)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.constants.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    pub fn as_slice(&self) -> &[Constant] {
        &self.constants
    }

    pub fn into_vec(self) -> Vec<Constant> {
        self.constants
    }
}
