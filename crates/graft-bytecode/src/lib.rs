//! Graft Bytecode Definitions
//!
//! This crate provides the instruction set, the module image format and the
//! instruction-stream patch engine used to rewrite method bodies before they
//! first run.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod opcode;
pub mod instruction;
pub mod module;
pub mod verify;
pub mod encoder;
pub mod patch;

pub use opcode::Opcode;
pub use instruction::{Instruction, MethodRef, Operand};
pub use module::{EntryPoint, Metadata, MethodDef, ModuleError, ModuleImage, TypeDef};
pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError};
pub use verify::{verify_body, verify_method, verify_module, VerifyError};
pub use patch::{
    abort_after_null_receiver_call, rewrite, substitute_call, CallSiteMatcher, Expect,
    PatchAction, PatchError, PatchRule, Rewrite, ABORT_SIGNAL,
};
