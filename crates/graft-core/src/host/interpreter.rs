//! Method body execution
//!
//! A small stack evaluator for the Graft instruction set. It runs loader and
//! entry-point bodies; every call instruction goes back through
//! the host dispatcher so prefixes, intrinsics and patched bodies apply to nested
//! calls as well.

use super::value::{Fault, Value};
use super::Host;
use graft_bytecode::{Instruction, Opcode, Operand};
use std::sync::Arc;

/// One activation of a method body
pub(super) struct Frame<'a> {
    host: &'a Host,
    method: &'a str,
    body: &'a [Instruction],
    locals: Vec<Value>,
    stack: Vec<Value>,
    depth: usize,
    ip: usize,
}

impl<'a> Frame<'a> {
    pub(super) fn new(
        host: &'a Host,
        method: &'a str,
        frame_size: usize,
        body: &'a [Instruction],
        mut args: Vec<Value>,
        depth: usize,
    ) -> Self {
        if args.len() < frame_size {
            args.resize(frame_size, Value::Null);
        }
        Self {
            host,
            method,
            body,
            locals: args,
            stack: Vec::new(),
            depth,
            ip: 0,
        }
    }

    /// Run until the body returns or raises
    pub(super) fn run(mut self) -> Result<Value, Fault> {
        while self.ip < self.body.len() {
            let instruction = &self.body[self.ip];
            self.ip += 1;

            match instruction.opcode {
                // Stack manipulation & constants
                Opcode::Nop => {}
                Opcode::Pop => {
                    self.pop()?;
                }
                Opcode::Dup => {
                    let value = self.pop()?;
                    self.stack.push(value.clone());
                    self.stack.push(value);
                }
                Opcode::ConstNull => self.stack.push(Value::Null),
                Opcode::ConstTrue => self.stack.push(Value::Bool(true)),
                Opcode::ConstFalse => self.stack.push(Value::Bool(false)),
                Opcode::ConstI32 => match instruction.operand {
                    Operand::I32(value) => self.stack.push(Value::I32(value)),
                    _ => return Err(self.malformed()),
                },
                Opcode::ConstStr => match &instruction.operand {
                    Operand::Str(value) => self.stack.push(Value::str(value)),
                    _ => return Err(self.malformed()),
                },

                // Local variables
                Opcode::LoadLocal => {
                    let slot = self.local_slot(instruction)?;
                    let value = self.locals[slot].clone();
                    self.stack.push(value);
                }
                Opcode::StoreLocal => {
                    let slot = self.local_slot(instruction)?;
                    self.locals[slot] = self.pop()?;
                }

                // String operations
                Opcode::Sconcat => {
                    let b = self.pop_str()?;
                    let a = self.pop_str()?;
                    let joined: Arc<str> = Arc::from(format!("{}{}", a, b));
                    self.stack.push(Value::Str(joined));
                }
                Opcode::Seq => {
                    let b = self.pop_str()?;
                    let a = self.pop_str()?;
                    self.stack.push(Value::Bool(a == b));
                }

                // Control flow
                Opcode::Jmp => self.ip = self.jump_target(instruction)?,
                Opcode::JmpIfFalse => {
                    let target = self.jump_target(instruction)?;
                    match self.pop()? {
                        Value::Bool(false) | Value::Null => self.ip = target,
                        Value::Bool(true) => {}
                        other => return Err(self.type_mismatch("bool", &other)),
                    }
                }
                Opcode::JmpIfNull => {
                    let target = self.jump_target(instruction)?;
                    if self.pop()?.is_null() {
                        self.ip = target;
                    }
                }

                // Calls
                Opcode::Call | Opcode::CallMethod => {
                    let Some(method) = instruction.call_target() else {
                        return Err(self.malformed());
                    };
                    let argc = method.arg_count();
                    if self.stack.len() < argc {
                        return Err(self.underflow());
                    }
                    let args = self.stack.split_off(self.stack.len() - argc);
                    let result = self.host.call_at_depth(method, args, self.depth + 1)?;
                    if method.returns_value() {
                        self.stack.push(result);
                    }
                }
                Opcode::Return => return self.pop(),
                Opcode::ReturnVoid => return Ok(Value::Null),

                // Error raising
                Opcode::Throw => {
                    let value = self.pop()?;
                    return Err(Fault::Thrown(value.to_string()));
                }
                Opcode::Trap => match instruction.operand {
                    Operand::Code(code) => return Err(Fault::Trap(code)),
                    _ => return Err(self.malformed()),
                },
            }
        }

        Ok(Value::Null)
    }

    fn pop(&mut self) -> Result<Value, Fault> {
        self.stack.pop().ok_or_else(|| self.underflow())
    }

    fn pop_str(&mut self) -> Result<Arc<str>, Fault> {
        match self.pop()? {
            Value::Str(s) => Ok(s),
            other => Err(self.type_mismatch("string", &other)),
        }
    }

    fn local_slot(&self, instruction: &Instruction) -> Result<usize, Fault> {
        match instruction.operand {
            Operand::Local(index) if (index as usize) < self.locals.len() => Ok(index as usize),
            _ => Err(self.malformed()),
        }
    }

    fn jump_target(&self, instruction: &Instruction) -> Result<usize, Fault> {
        match instruction.operand {
            Operand::Target(target) if (target as usize) < self.body.len() => Ok(target as usize),
            _ => Err(self.malformed()),
        }
    }

    fn underflow(&self) -> Fault {
        Fault::StackUnderflow {
            method: self.method.to_string(),
            index: self.ip - 1,
        }
    }

    fn malformed(&self) -> Fault {
        Fault::Malformed {
            method: self.method.to_string(),
            index: self.ip - 1,
        }
    }

    fn type_mismatch(&self, expected: &'static str, actual: &Value) -> Fault {
        Fault::TypeMismatch {
            method: self.method.to_string(),
            expected,
            actual: actual.type_name(),
        }
    }
}
