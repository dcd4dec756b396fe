//! Instruction decoding
//!
//! An instruction tree is a proper list of instructions, and each instruction
//! is itself a list `(KIND ARG ...)` headed by a symbol. The engine never
//! compiles the tree; it narrows its view of the list one instruction at a
//! time and decodes each head with [`Instruction::decode`] as it goes.
//!
//! | kind         | operands                     | effect                                     |
//! |--------------|------------------------------|--------------------------------------------|
//! | `push`       | `value`                      | push `value`                               |
//! | `pop`        |                              | discard the top of the stack               |
//! | `access`     | `n`                          | push `env[n]`                              |
//! | `closure`    | `arity has-rest-param code`  | push a closure over the current env        |
//! | `call`       | `n`                          | pop `n` args and a callable, then call     |
//! | `if`         | `then-instrs else-instrs`    | pop a test value and branch                |
//! | `get-global` | `sym`                        | push the global bound to `sym`             |
//! | `set-global` | `sym`                        | bind `sym` to the top of stack (no pop)    |

use crate::Error;
use crate::value::{NumberType, Symbol, Value, sym};
use std::fmt;

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Push(Value),
    Pop,
    Access(usize),
    Closure {
        arity: usize,
        has_rest_param: bool,
        code: Value,
    },
    Call(usize),
    If {
        then_instrs: Value,
        else_instrs: Value,
    },
    GetGlobal(Symbol),
    SetGlobal(Symbol),
}

const KINDS: [&str; 8] = [
    "push",
    "pop",
    "access",
    "closure",
    "call",
    "if",
    "get-global",
    "set-global",
];

fn malformed(instr: &Value, reason: &str) -> Error {
    Error::MalformedInstruction(format!("{reason}: {instr}"))
}

/// A non-negative integer operand
fn count_operand(instr: &Value, operand: &Value, what: &str) -> Result<usize, Error> {
    operand
        .as_number()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| malformed(instr, &format!("{what} must be a non-negative integer")))
}

fn symbol_operand(instr: &Value, operand: &Value) -> Result<Symbol, Error> {
    operand
        .as_symbol()
        .cloned()
        .ok_or_else(|| malformed(instr, "operand must be a symbol"))
}

impl Instruction {
    /// Decode a single `(KIND ARG ...)` form.
    pub fn decode(instr: &Value) -> Result<Instruction, Error> {
        let Some(pair) = instr.as_pair() else {
            return Err(malformed(instr, "instruction is not a cons"));
        };
        let Some(kind) = pair.car.as_symbol() else {
            return Err(malformed(instr, "instruction kind is not a symbol"));
        };

        let mut iter = pair.cdr.list_iter();
        let args: Vec<&Value> = iter.by_ref().collect();
        if !iter.tail().is_nil() {
            return Err(malformed(instr, "instruction operands are not a proper list"));
        }

        let decoded = match (kind.name(), args.as_slice()) {
            ("push", [value]) => Instruction::Push((*value).clone()),
            ("pop", []) => Instruction::Pop,
            ("access", [n]) => Instruction::Access(count_operand(instr, n, "access index")?),
            ("closure", [arity, has_rest_param, code]) => Instruction::Closure {
                arity: count_operand(instr, arity, "closure arity")?,
                has_rest_param: has_rest_param.is_true(),
                code: (*code).clone(),
            },
            ("call", [n]) => Instruction::Call(count_operand(instr, n, "call argument count")?),
            ("if", [then_instrs, else_instrs]) => Instruction::If {
                then_instrs: (*then_instrs).clone(),
                else_instrs: (*else_instrs).clone(),
            },
            ("get-global", [name]) => Instruction::GetGlobal(symbol_operand(instr, name)?),
            ("set-global", [name]) => Instruction::SetGlobal(symbol_operand(instr, name)?),
            (kind, _) if KINDS.contains(&kind) => {
                return Err(malformed(instr, "wrong number of operands"));
            }
            _ => return Err(malformed(instr, "unrecognized instruction kind")),
        };

        Ok(decoded)
    }

    /// The symbol name heading this instruction's list form
    pub fn kind(&self) -> &'static str {
        match self {
            Instruction::Push(_) => "push",
            Instruction::Pop => "pop",
            Instruction::Access(_) => "access",
            Instruction::Closure { .. } => "closure",
            Instruction::Call(_) => "call",
            Instruction::If { .. } => "if",
            Instruction::GetGlobal(_) => "get-global",
            Instruction::SetGlobal(_) => "set-global",
        }
    }

    /// Encode back into the `(KIND ARG ...)` list form
    pub fn encode(&self) -> Value {
        let kind = sym(self.kind());
        match self {
            Instruction::Push(value) => Value::list([kind, value.clone()]),
            Instruction::Pop => Value::list([kind]),
            Instruction::Access(n) | Instruction::Call(n) => {
                Value::list([kind, Value::Number(*n as NumberType)])
            }
            Instruction::Closure {
                arity,
                has_rest_param,
                code,
            } => Value::list([
                kind,
                Value::Number(*arity as NumberType),
                Value::Bool(*has_rest_param),
                code.clone(),
            ]),
            Instruction::If {
                then_instrs,
                else_instrs,
            } => Value::list([kind, then_instrs.clone(), else_instrs.clone()]),
            Instruction::GetGlobal(name) | Instruction::SetGlobal(name) => {
                Value::list([kind, Value::Symbol(name.clone())])
            }
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl From<Instruction> for Value {
    fn from(instr: Instruction) -> Self {
        instr.encode()
    }
}

/// Build an instruction tree from a sequence of instructions
pub fn program(instrs: impl IntoIterator<Item = Instruction>) -> Value {
    Value::list(instrs.into_iter().map(|instr| instr.encode()))
}
