//! Operation codes for Graft method bodies
//!
//! The instruction set is deliberately small: it covers what loader and
//! entry-point bodies need (constants, locals, string handling, branches,
//! calls and error raising) and nothing more.

/// Operation code enumeration
///
/// All opcodes are single-byte. Operands are encoded inline after the opcode
/// byte; see [`crate::instruction::Operand`] for their shapes.
///
/// Opcodes are organized into categories:
/// - 0x00-0x0F: Stack manipulation & constants
/// - 0x10-0x1F: Local variables
/// - 0x80-0x8F: String operations
/// - 0x90-0x9F: Control flow
/// - 0xA0-0xAF: Calls
/// - 0xE0-0xEF: Error raising
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack Manipulation & Constants (0x00-0x0F) =====
    /// No operation
    Nop = 0x00,
    /// Pop top value from stack
    Pop = 0x01,
    /// Duplicate top stack value
    Dup = 0x02,
    /// Push null constant
    ConstNull = 0x04,
    /// Push true constant
    ConstTrue = 0x05,
    /// Push false constant
    ConstFalse = 0x06,
    /// Push 32-bit integer constant (operand: i32)
    ConstI32 = 0x07,
    /// Push string constant (operand: inline string)
    ConstStr = 0x09,

    // ===== Local Variables (0x10-0x1F) =====
    /// Load local variable onto stack (operand: u16 index)
    LoadLocal = 0x10,
    /// Store top of stack to local variable (operand: u16 index)
    StoreLocal = 0x11,

    // ===== String Operations (0x80-0x8F) =====
    /// String concatenation: pop b, pop a, push a + b
    Sconcat = 0x80,
    /// String equality: pop b, pop a, push a == b
    Seq = 0x82,

    // ===== Control Flow (0x90-0x9F) =====
    /// Unconditional jump (operand: u32 instruction index)
    Jmp = 0x90,
    /// Jump if false: pop a, if !a jump (operand: u32 instruction index)
    JmpIfFalse = 0x91,
    /// Jump if null: pop a, if a == null jump (operand: u32 instruction index)
    JmpIfNull = 0x93,

    // ===== Calls (0xA0-0xAF) =====
    /// Call a method by signature (operand: method signature)
    Call = 0xA0,
    /// Call a method through its receiver (operand: method signature)
    CallMethod = 0xA1,
    /// Return from method (pop return value)
    Return = 0xA2,
    /// Return from void method
    ReturnVoid = 0xA3,

    // ===== Error Raising (0xE0-0xEF) =====
    /// Pop a value and raise it as an exception
    Throw = 0xE3,
    /// Raise a runtime signal (operand: u16 signal code)
    Trap = 0xE4,
}

impl Opcode {
    /// Decode an opcode byte
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            // Stack manipulation & constants
            0x00 => Some(Self::Nop),
            0x01 => Some(Self::Pop),
            0x02 => Some(Self::Dup),
            0x04 => Some(Self::ConstNull),
            0x05 => Some(Self::ConstTrue),
            0x06 => Some(Self::ConstFalse),
            0x07 => Some(Self::ConstI32),
            0x09 => Some(Self::ConstStr),

            // Local variables
            0x10 => Some(Self::LoadLocal),
            0x11 => Some(Self::StoreLocal),

            // String operations
            0x80 => Some(Self::Sconcat),
            0x82 => Some(Self::Seq),

            // Control flow
            0x90 => Some(Self::Jmp),
            0x91 => Some(Self::JmpIfFalse),
            0x93 => Some(Self::JmpIfNull),

            // Calls
            0xA0 => Some(Self::Call),
            0xA1 => Some(Self::CallMethod),
            0xA2 => Some(Self::Return),
            0xA3 => Some(Self::ReturnVoid),

            // Error raising
            0xE3 => Some(Self::Throw),
            0xE4 => Some(Self::Trap),

            _ => None,
        }
    }

    /// Convert opcode to byte
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Get the human-readable name of the opcode
    pub fn name(self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::Pop => "POP",
            Self::Dup => "DUP",
            Self::ConstNull => "CONST_NULL",
            Self::ConstTrue => "CONST_TRUE",
            Self::ConstFalse => "CONST_FALSE",
            Self::ConstI32 => "CONST_I32",
            Self::ConstStr => "CONST_STR",
            Self::LoadLocal => "LOAD_LOCAL",
            Self::StoreLocal => "STORE_LOCAL",
            Self::Sconcat => "SCONCAT",
            Self::Seq => "SEQ",
            Self::Jmp => "JMP",
            Self::JmpIfFalse => "JMP_IF_FALSE",
            Self::JmpIfNull => "JMP_IF_NULL",
            Self::Call => "CALL",
            Self::CallMethod => "CALL_METHOD",
            Self::Return => "RETURN",
            Self::ReturnVoid => "RETURN_VOID",
            Self::Throw => "THROW",
            Self::Trap => "TRAP",
        }
    }

    /// Check if this opcode is a jump instruction
    pub fn is_jump(self) -> bool {
        matches!(self, Self::Jmp | Self::JmpIfFalse | Self::JmpIfNull)
    }

    /// Check if this opcode is a call instruction
    pub fn is_call(self) -> bool {
        matches!(self, Self::Call | Self::CallMethod)
    }

    /// Check if this opcode is a return instruction
    pub fn is_return(self) -> bool {
        matches!(self, Self::Return | Self::ReturnVoid)
    }

    /// Check if this opcode ends straight-line execution
    pub fn is_terminator(self) -> bool {
        matches!(self, Self::Jmp | Self::Throw | Self::Trap) || self.is_return()
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
