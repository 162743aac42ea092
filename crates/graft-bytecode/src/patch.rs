//! Instruction-stream patching
//!
//! [`rewrite`] turns one method body into another in a single forward pass.
//! Each [`PatchRule`] pairs a call-site predicate with an action: substitute
//! the called method, or append an instruction right after the call. The
//! first rule whose matcher accepts an instruction wins, so no position is
//! patched twice. Jump targets are remapped to follow the instructions they
//! pointed at.
//!
//! A rule may declare how many call sites it expects to match. A rule that
//! targets one specific call (such as [`abort_after_null_receiver_call`])
//! fails the whole rewrite when it matches zero or several sites, instead of
//! guessing which one was meant.

use crate::instruction::{Instruction, MethodRef, Operand};
use crate::opcode::Opcode;
use std::fmt;
use thiserror::Error;

/// Trap code raised by the abort injector
///
/// Callers up the stack recognize this code as the expected end of a patched
/// invocation rather than as a failure.
pub const ABORT_SIGNAL: u16 = 0x0A5E;

/// Patching errors
#[derive(Debug, Error)]
pub enum PatchError {
    /// A rule matched a different number of call sites than it expects
    #[error("Rule '{rule}' expected {expected} call site(s), found {found}")]
    UnexpectedMatchCount {
        /// Rule name
        rule: String,
        /// Expected count
        expected: Expect,
        /// Actual count
        found: usize,
    },

    /// A substitute target would consume or produce a different stack shape
    #[error("Rule '{rule}' cannot replace {original} with {replacement}: stack shape differs")]
    StackShapeMismatch {
        /// Rule name
        rule: String,
        /// Original call target
        original: MethodRef,
        /// Replacement call target
        replacement: MethodRef,
    },

    /// A jump points past the end of the input body
    #[error("Jump at index {index} targets {target} outside the body")]
    DanglingJump {
        /// Output index of the jump
        index: usize,
        /// Original target
        target: u32,
    },
}

/// How many call sites a rule expects to match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// Any number, including zero
    Any,
    /// Exactly this many
    Exactly(usize),
}

impl Expect {
    fn accepts(self, found: usize) -> bool {
        match self {
            Expect::Any => true,
            Expect::Exactly(n) => n == found,
        }
    }
}

impl fmt::Display for Expect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expect::Any => f.write_str("any number of"),
            Expect::Exactly(n) => write!(f, "exactly {}", n),
        }
    }
}

/// Call-site predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSiteMatcher {
    /// Called method; `None` matches any call
    pub target: Option<MethodRef>,
    /// Required opcode of the preceding emitted instruction
    pub preceded_by: Option<Opcode>,
}

impl CallSiteMatcher {
    /// Match calls to `target`
    pub fn call_to(target: MethodRef) -> Self {
        Self {
            target: Some(target),
            preceded_by: None,
        }
    }

    /// Match any call
    pub fn any_call() -> Self {
        Self {
            target: None,
            preceded_by: None,
        }
    }

    /// Additionally require the previous instruction's opcode
    pub fn preceded_by(mut self, opcode: Opcode) -> Self {
        self.preceded_by = Some(opcode);
        self
    }

    /// Whether `instruction`, following `previous`, is a matching call site
    pub fn matches(&self, instruction: &Instruction, previous: Option<&Instruction>) -> bool {
        let Some(called) = instruction.call_target() else {
            return false;
        };
        if let Some(target) = &self.target {
            if called != target {
                return false;
            }
        }
        match self.preceded_by {
            Some(opcode) => previous.is_some_and(|p| p.opcode == opcode),
            None => true,
        }
    }
}

/// What to do at a matched call site
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchAction {
    /// Keep the operation, call a different method
    Substitute(MethodRef),
    /// Keep the call, emit this instruction right after it
    AppendAfter(Instruction),
}

/// A named call-site rewrite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRule {
    /// Name used in diagnostics
    pub name: String,
    /// Call-site predicate
    pub matcher: CallSiteMatcher,
    /// Rewrite applied at each match
    pub action: PatchAction,
    /// Expected number of matches
    pub expect: Expect,
}

/// Result of a rewrite pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    /// Rewritten body
    pub body: Vec<Instruction>,
    /// Number of matches per rule, in rule order
    pub matches: Vec<usize>,
    /// Matched call sites as (rule index, input instruction index)
    pub sites: Vec<(usize, usize)>,
}

impl Rewrite {
    /// Whether any rule changed the body
    pub fn changed(&self) -> bool {
        !self.sites.is_empty()
    }
}

/// Rule that raises [`ABORT_SIGNAL`] right after the one call to `invoke`
/// whose receiver is the null constant
pub fn abort_after_null_receiver_call(invoke: MethodRef) -> PatchRule {
    PatchRule {
        name: format!("abort after null-receiver call to {}::{}", invoke.owner, invoke.name),
        matcher: CallSiteMatcher::call_to(invoke).preceded_by(Opcode::ConstNull),
        action: PatchAction::AppendAfter(Instruction::trap(ABORT_SIGNAL)),
        expect: Expect::Exactly(1),
    }
}

/// Rule that redirects every call to `from` into `to`
pub fn substitute_call(from: MethodRef, to: MethodRef) -> PatchRule {
    PatchRule {
        name: format!("redirect {}::{} to {}::{}", from.owner, from.name, to.owner, to.name),
        matcher: CallSiteMatcher::call_to(from),
        action: PatchAction::Substitute(to),
        expect: Expect::Any,
    }
}

/// Rewrite `instructions` under `rules`
///
/// The output is a pure function of the inputs. Instructions that no rule
/// matches are emitted unchanged and in their original relative order.
pub fn rewrite(instructions: &[Instruction], rules: &[PatchRule]) -> Result<Rewrite, PatchError> {
    let mut body: Vec<Instruction> = Vec::with_capacity(instructions.len());
    let mut positions = Vec::with_capacity(instructions.len());
    let mut matches = vec![0usize; rules.len()];
    let mut sites = Vec::new();

    for (index, instruction) in instructions.iter().enumerate() {
        positions.push(body.len());

        let matched = rules
            .iter()
            .position(|rule| rule.matcher.matches(instruction, body.last()));

        let Some(rule_index) = matched else {
            body.push(instruction.clone());
            continue;
        };

        let rule = &rules[rule_index];
        matches[rule_index] += 1;
        sites.push((rule_index, index));

        match &rule.action {
            PatchAction::Substitute(replacement) => {
                if let Some(original) = instruction.call_target() {
                    if original.arg_count() != replacement.arg_count()
                        || original.returns_value() != replacement.returns_value()
                    {
                        return Err(PatchError::StackShapeMismatch {
                            rule: rule.name.clone(),
                            original: original.clone(),
                            replacement: replacement.clone(),
                        });
                    }
                }
                body.push(instruction.with_call_target(replacement.clone()));
            }
            PatchAction::AppendAfter(injected) => {
                body.push(instruction.clone());
                body.push(injected.clone());
            }
        }
    }

    for (rule, &found) in rules.iter().zip(&matches) {
        if !rule.expect.accepts(found) {
            return Err(PatchError::UnexpectedMatchCount {
                rule: rule.name.clone(),
                expected: rule.expect,
                found,
            });
        }
    }

    // Only needed when something was inserted
    if body.len() != instructions.len() {
        for (index, instruction) in body.iter_mut().enumerate() {
            if let Operand::Target(target) = instruction.operand {
                let moved = positions
                    .get(target as usize)
                    .ok_or(PatchError::DanglingJump { index, target })?;
                instruction.operand = Operand::Target(*moved as u32);
            }
        }
    }

    Ok(Rewrite {
        body,
        matches,
        sites,
    })
}
