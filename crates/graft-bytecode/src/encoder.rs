//! Binary encoding and decoding of instruction streams
//!
//! Instructions are stored as an opcode byte followed by an inline operand
//! whose shape is fixed by the opcode. All integers are little-endian and all
//! strings are u32-length-prefixed UTF-8.

use crate::instruction::{Instruction, MethodRef, Operand};
use crate::opcode::Opcode;
use thiserror::Error;

/// Errors that can occur during decoding
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Unexpected end of the byte stream
    #[error("Unexpected end of bytecode at offset {0}")]
    UnexpectedEnd(usize),

    /// Invalid UTF-8 string
    #[error("Invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    /// Invalid opcode
    #[error("Invalid opcode {0:#04x} at offset {1}")]
    InvalidOpcode(u8, usize),

    /// Operand that cannot be encoded for its opcode
    #[error("Operand {operand:?} is not valid for {opcode}")]
    InvalidOperand {
        /// Opcode the operand belongs to
        opcode: Opcode,
        /// Offending operand
        operand: Operand,
    },
}

/// Operand shape expected by each opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OperandKind {
    None,
    I32,
    Str,
    Local,
    Target,
    Method,
    Code,
}

pub(crate) fn operand_kind(opcode: Opcode) -> OperandKind {
    match opcode {
        Opcode::ConstI32 => OperandKind::I32,
        Opcode::ConstStr => OperandKind::Str,
        Opcode::LoadLocal | Opcode::StoreLocal => OperandKind::Local,
        Opcode::Jmp | Opcode::JmpIfFalse | Opcode::JmpIfNull => OperandKind::Target,
        Opcode::Call | Opcode::CallMethod => OperandKind::Method,
        Opcode::Trap => OperandKind::Code,
        _ => OperandKind::None,
    }
}

/// Writer for encoding instructions and module tables
pub struct BytecodeWriter {
    pub(crate) buffer: Vec<u8>,
}

impl BytecodeWriter {
    /// Create a new writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Get the current buffer
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer and return the buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Current offset (length of the buffer)
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    // ===== Basic Emission =====

    /// Emit a raw byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a 16-bit unsigned integer
    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit unsigned integer
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit signed integer
    pub fn emit_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a length-prefixed string
    pub fn emit_string(&mut self, value: &str) {
        self.emit_u32(value.len() as u32);
        self.buffer.extend_from_slice(value.as_bytes());
    }

    /// Emit a method signature
    pub fn emit_method_ref(&mut self, method: &MethodRef) {
        self.emit_string(&method.owner);
        self.emit_string(&method.name);
        self.emit_u8(u8::from(method.has_this));
        self.emit_u16(method.params.len() as u16);
        for param in &method.params {
            self.emit_string(param);
        }
        self.emit_string(&method.returns);
    }

    // ===== Instruction Emission =====

    /// Emit one instruction, checking that its operand fits the opcode
    pub fn emit_instruction(&mut self, instruction: &Instruction) -> Result<(), DecodeError> {
        let invalid = || DecodeError::InvalidOperand {
            opcode: instruction.opcode,
            operand: instruction.operand.clone(),
        };

        self.emit_u8(instruction.opcode.to_u8());
        match (operand_kind(instruction.opcode), &instruction.operand) {
            (OperandKind::None, Operand::None) => {}
            (OperandKind::I32, Operand::I32(value)) => self.emit_i32(*value),
            (OperandKind::Str, Operand::Str(value)) => self.emit_string(value),
            (OperandKind::Local, Operand::Local(index)) => self.emit_u16(*index),
            (OperandKind::Target, Operand::Target(target)) => self.emit_u32(*target),
            (OperandKind::Method, Operand::Method(method)) => self.emit_method_ref(method),
            (OperandKind::Code, Operand::Code(code)) => self.emit_u16(*code),
            _ => return Err(invalid()),
        }
        Ok(())
    }

    /// Emit a counted instruction sequence
    pub fn emit_body(&mut self, body: &[Instruction]) -> Result<(), DecodeError> {
        self.emit_u32(body.len() as u32);
        for instruction in body {
            self.emit_instruction(instruction)?;
        }
        Ok(())
    }

    // ===== Patching =====

    /// Overwrite a u32 previously emitted at `offset`
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

impl Default for BytecodeWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Reader for decoding instructions and module tables
pub struct BytecodeReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BytecodeReader<'a> {
    /// Create a reader over `buffer`
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Current read position
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }

    /// Whether any bytes are left
    pub fn has_more(&self) -> bool {
        self.position < self.buffer.len()
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < count {
            return Err(DecodeError::UnexpectedEnd(self.position));
        }
        let slice = &self.buffer[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    /// Read a byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    /// Read a 16-bit unsigned integer
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read a 32-bit unsigned integer
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a 32-bit signed integer
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read `count` raw bytes
    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, DecodeError> {
        Ok(self.take(count)?.to_vec())
    }

    /// Read a length-prefixed string
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u32()? as usize;
        let start = self.position;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8(start))
    }

    /// Read a method signature
    pub fn read_method_ref(&mut self) -> Result<MethodRef, DecodeError> {
        let owner = self.read_string()?;
        let name = self.read_string()?;
        let has_this = self.read_u8()? != 0;
        let param_count = self.read_u16()? as usize;
        let mut params = Vec::with_capacity(param_count);
        for _ in 0..param_count {
            params.push(self.read_string()?);
        }
        let returns = self.read_string()?;
        Ok(MethodRef {
            owner,
            name,
            params,
            returns,
            has_this,
        })
    }

    /// Read an opcode byte
    pub fn read_opcode(&mut self) -> Result<Opcode, DecodeError> {
        let offset = self.position;
        let byte = self.read_u8()?;
        Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode(byte, offset))
    }

    /// Read one instruction
    pub fn read_instruction(&mut self) -> Result<Instruction, DecodeError> {
        let opcode = self.read_opcode()?;
        let operand = match operand_kind(opcode) {
            OperandKind::None => Operand::None,
            OperandKind::I32 => Operand::I32(self.read_i32()?),
            OperandKind::Str => Operand::Str(self.read_string()?),
            OperandKind::Local => Operand::Local(self.read_u16()?),
            OperandKind::Target => Operand::Target(self.read_u32()?),
            OperandKind::Method => Operand::Method(self.read_method_ref()?),
            OperandKind::Code => Operand::Code(self.read_u16()?),
        };
        Ok(Instruction { opcode, operand })
    }

    /// Read a counted instruction sequence
    pub fn read_body(&mut self) -> Result<Vec<Instruction>, DecodeError> {
        let count = self.read_u32()? as usize;
        let mut body = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            body.push(self.read_instruction()?);
        }
        Ok(body)
    }
}
