//! Runtime values and faults

use super::{HostError, LoadError, ModuleHandle};
use graft_bytecode::{MethodRef, ABORT_SIGNAL};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A value on the operand stack or in a local slot
#[derive(Debug, Clone)]
pub enum Value {
    /// Null reference
    Null,
    /// Boolean
    Bool(bool),
    /// 32-bit integer
    I32(i32),
    /// Immutable string
    Str(Arc<str>),
    /// Loaded module
    Module(ModuleHandle),
    /// Method reference, as produced by reflection lookups
    Method(MethodRef),
}

impl Value {
    /// Create a string value
    pub fn str(value: &str) -> Self {
        Value::Str(Arc::from(value))
    }

    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// String contents, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Module handle, if this is a module
    pub fn as_module(&self) -> Option<&ModuleHandle> {
        match self {
            Value::Module(m) => Some(m),
            _ => None,
        }
    }

    /// Name of the value's runtime type
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I32(_) => "i32",
            Value::Str(_) => "string",
            Value::Module(_) => "module",
            Value::Method(_) => "Runtime.MethodBase",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Module(a), Value::Module(b)) => a.id() == b.id(),
            (Value::Method(a), Value::Method(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::I32(i) => write!(f, "{}", i),
            Value::Str(s) => f.write_str(s),
            Value::Module(m) => write!(f, "module {}", m.name()),
            Value::Method(m) => write!(f, "{}", m),
        }
    }
}

/// An exception raised while running method bodies
#[derive(Debug, Error)]
pub enum Fault {
    /// `TRAP` raised a signal
    #[error("Trap {0:#06x}")]
    Trap(u16),

    /// `THROW` raised a value
    #[error("Exception: {0}")]
    Thrown(String),

    /// No prefix, intrinsic or body exists for a called method
    #[error("Method not found: {0}")]
    MissingMethod(MethodRef),

    /// An operand had the wrong runtime type
    #[error("Type mismatch in {method}: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Executing method
        method: String,
        /// Expected type
        expected: &'static str,
        /// Actual type
        actual: &'static str,
    },

    /// An instruction popped from an empty stack
    #[error("Stack underflow in {method} at index {index}")]
    StackUnderflow {
        /// Executing method
        method: String,
        /// Instruction index
        index: usize,
    },

    /// An instruction's operand does not fit its opcode
    #[error("Malformed instruction in {method} at index {index}")]
    Malformed {
        /// Executing method
        method: String,
        /// Instruction index
        index: usize,
    },

    /// Nested calls went deeper than the host allows
    #[error("Call depth limit of {0} exceeded")]
    CallDepthExceeded(usize),

    /// A load requested by running code failed
    #[error(transparent)]
    Load(#[from] LoadError),

    /// A host operation requested by running code failed
    #[error(transparent)]
    Host(#[from] HostError),
}

impl Fault {
    /// Whether this is the signal raised by the abort injector
    pub fn is_abort_signal(&self) -> bool {
        matches!(self, Fault::Trap(code) if *code == ABORT_SIGNAL)
    }
}
