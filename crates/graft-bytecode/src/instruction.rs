//! Decoded instructions and method signatures

use crate::opcode::Opcode;
use std::fmt;

/// Signature of a method referenced by a call operand
///
/// Two references denote the same method only when every part of the
/// signature matches, including parameter and return type names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Fully qualified name of the declaring type
    pub owner: String,
    /// Method name
    pub name: String,
    /// Parameter type names (receiver excluded)
    pub params: Vec<String>,
    /// Return type name (`void` for none)
    pub returns: String,
    /// Whether the method takes a receiver as its first argument
    pub has_this: bool,
}

impl MethodRef {
    /// Create a static method reference
    pub fn new_static(owner: &str, name: &str, params: &[&str], returns: &str) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            returns: returns.to_string(),
            has_this: false,
        }
    }

    /// Create an instance method reference
    pub fn new_instance(owner: &str, name: &str, params: &[&str], returns: &str) -> Self {
        Self {
            has_this: true,
            ..Self::new_static(owner, name, params, returns)
        }
    }

    /// Number of stack values a call consumes, receiver included
    pub fn arg_count(&self) -> usize {
        self.params.len() + usize::from(self.has_this)
    }

    /// Whether a call leaves a value on the stack
    pub fn returns_value(&self) -> bool {
        self.returns != "void"
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}::{}(", self.returns, self.owner, self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(param)?;
        }
        f.write_str(")")?;
        if self.has_this {
            f.write_str(" instance")?;
        }
        Ok(())
    }
}

/// Instruction operand
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    /// No operand
    None,
    /// 32-bit integer constant
    I32(i32),
    /// String constant
    Str(String),
    /// Local variable slot
    Local(u16),
    /// Jump target, as an index into the instruction sequence
    Target(u32),
    /// Called method
    Method(MethodRef),
    /// Signal code raised by `TRAP`
    Code(u16),
}

/// One decoded instruction
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instruction {
    /// Operation code
    pub opcode: Opcode,
    /// Inline operand
    pub operand: Operand,
}

impl Instruction {
    /// Instruction without operand
    pub fn simple(opcode: Opcode) -> Self {
        Self {
            opcode,
            operand: Operand::None,
        }
    }

    /// `CONST_I32 value`
    pub fn const_i32(value: i32) -> Self {
        Self {
            opcode: Opcode::ConstI32,
            operand: Operand::I32(value),
        }
    }

    /// `CONST_STR value`
    pub fn const_str(value: impl Into<String>) -> Self {
        Self {
            opcode: Opcode::ConstStr,
            operand: Operand::Str(value.into()),
        }
    }

    /// `LOAD_LOCAL index` / `STORE_LOCAL index`
    pub fn local(opcode: Opcode, index: u16) -> Self {
        Self {
            opcode,
            operand: Operand::Local(index),
        }
    }

    /// A jump to the instruction at `target`
    pub fn jump(opcode: Opcode, target: u32) -> Self {
        Self {
            opcode,
            operand: Operand::Target(target),
        }
    }

    /// `CALL method`
    pub fn call(method: MethodRef) -> Self {
        Self {
            opcode: Opcode::Call,
            operand: Operand::Method(method),
        }
    }

    /// `CALL_METHOD method`
    pub fn call_method(method: MethodRef) -> Self {
        Self {
            opcode: Opcode::CallMethod,
            operand: Operand::Method(method),
        }
    }

    /// `TRAP code`
    pub fn trap(code: u16) -> Self {
        Self {
            opcode: Opcode::Trap,
            operand: Operand::Code(code),
        }
    }

    /// Called method, if this is a call instruction
    pub fn call_target(&self) -> Option<&MethodRef> {
        match (&self.operand, self.opcode.is_call()) {
            (Operand::Method(method), true) => Some(method),
            _ => None,
        }
    }

    /// Whether this instruction calls exactly `method`
    pub fn calls(&self, method: &MethodRef) -> bool {
        self.call_target() == Some(method)
    }

    /// Same operation with a different call target
    pub fn with_call_target(&self, method: MethodRef) -> Self {
        Self {
            opcode: self.opcode,
            operand: Operand::Method(method),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.opcode.name())?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::I32(value) => write!(f, " {}", value),
            Operand::Str(value) => write!(f, " {:?}", value),
            Operand::Local(index) => write!(f, " ${}", index),
            Operand::Target(target) => write!(f, " @{}", target),
            Operand::Method(method) => write!(f, " {}", method),
            Operand::Code(code) => write!(f, " {:#06x}", code),
        }
    }
}
