//! Method body verification

use crate::encoder::{operand_kind, OperandKind};
use crate::instruction::{Instruction, Operand};
use crate::module::{MethodDef, ModuleImage};

/// Verification errors
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// Operand shape does not match the opcode
    #[error("{method}: malformed operand for {opcode} at index {index}")]
    MalformedOperand {
        /// Method being verified
        method: String,
        /// Instruction index
        index: usize,
        /// Opcode name
        opcode: &'static str,
    },

    /// Jump target outside the body
    #[error("{method}: jump at index {index} targets {target} (body has {len} instructions)")]
    InvalidJumpTarget {
        /// Method being verified
        method: String,
        /// Instruction index of the jump
        index: usize,
        /// Target index
        target: u32,
        /// Body length
        len: usize,
    },

    /// Local slot outside the frame
    #[error("{method}: local {local} at index {index} exceeds frame size {frame}")]
    InvalidLocalRef {
        /// Method being verified
        method: String,
        /// Instruction index
        index: usize,
        /// Referenced slot
        local: u16,
        /// Frame size
        frame: usize,
    },

    /// Execution falls off the end of the body
    #[error("{method}: execution falls off end of body")]
    FallOffEnd {
        /// Method being verified
        method: String,
    },
}

/// Verify every method of an image
pub fn verify_module(image: &ModuleImage) -> Result<(), VerifyError> {
    for ty in &image.types {
        for method in &ty.methods {
            verify_method(&ty.name, method)?;
        }
    }
    Ok(())
}

/// Verify a single method
pub fn verify_method(owner: &str, method: &MethodDef) -> Result<(), VerifyError> {
    let qualified = format!("{}::{}", owner, method.name);
    verify_body(&qualified, method.frame_size(), &method.body)
}

/// Verify an instruction body against a frame of `frame` local slots
pub fn verify_body(method: &str, frame: usize, body: &[Instruction]) -> Result<(), VerifyError> {
    // Empty bodies are allowed
    if body.is_empty() {
        return Ok(());
    }

    for (index, instruction) in body.iter().enumerate() {
        let well_formed = matches!(
            (operand_kind(instruction.opcode), &instruction.operand),
            (OperandKind::None, Operand::None)
                | (OperandKind::I32, Operand::I32(_))
                | (OperandKind::Str, Operand::Str(_))
                | (OperandKind::Local, Operand::Local(_))
                | (OperandKind::Target, Operand::Target(_))
                | (OperandKind::Method, Operand::Method(_))
                | (OperandKind::Code, Operand::Code(_))
        );
        if !well_formed {
            return Err(VerifyError::MalformedOperand {
                method: method.to_string(),
                index,
                opcode: instruction.opcode.name(),
            });
        }

        match instruction.operand {
            Operand::Target(target) if target as usize >= body.len() => {
                return Err(VerifyError::InvalidJumpTarget {
                    method: method.to_string(),
                    index,
                    target,
                    len: body.len(),
                });
            }
            Operand::Local(local) if local as usize >= frame => {
                return Err(VerifyError::InvalidLocalRef {
                    method: method.to_string(),
                    index,
                    local,
                    frame,
                });
            }
            _ => {}
        }
    }

    if let Some(last) = body.last() {
        if !last.opcode.is_terminator() {
            return Err(VerifyError::FallOffEnd {
                method: method.to_string(),
            });
        }
    }

    Ok(())
}
