use crate::Vec;
use crate::vm::error::ResourceExceededError;

/// Operand stack with a hard depth limit.
///
/// The limit is the unit's declared `stack_size`, so a unit that under-reports
/// its depth fails loudly instead of growing without bound.
///
/// # Examples
///
/// ```ignore
/// let mut stack = Stack::new(2);
/// stack.push(42).unwrap();
/// stack.push(17).unwrap();
/// assert!(stack.push(1).is_err());
/// assert_eq!(stack.pop(), Some(17));
/// ```
#[derive(Debug, Clone)]
pub struct Stack<T> {
    items: Vec<T>,
    max_size: usize,
}

impl<T> Stack<T> {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: Vec::with_capacity(max_size.min(256)),
            max_size,
        }
    }

    /// Pushes a value, failing when the stack is already at its limit.
    #[inline]
    pub fn push(&mut self, value: T) -> Result<(), ResourceExceededError> {
        if self.items.len() >= self.max_size {
            return Err(ResourceExceededError::StackOverflow {
                depth: self.items.len() + 1,
                max_depth: self.max_size,
            });
        }
        self.items.push(value);
        Ok(())
    }

    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop()
    }

    #[inline]
    pub fn peek(&self) -> Option<&T> {
        self.items.last()
    }

    #[inline]
    pub fn peek_mut(&mut self) -> Option<&mut T> {
        self.items.last_mut()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Drops everything above `depth`. Used when unwinding loop blocks.
    #[inline]
    pub fn truncate(&mut self, depth: usize) {
        self.items.truncate(depth);
    }
}
