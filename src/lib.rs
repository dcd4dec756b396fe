//! lispvm - a continuation-passing bytecode engine for a small Lisp
//!
//! This crate executes a tree-structured instruction stream against a value
//! stack, a flat lexical environment and a global binding table. Programs are
//! ordinary s-expressions: a cons-list of instructions, each of which is a
//! cons-list headed by a symbol naming its kind.
//!
//! ```text
//! ((get-global +) (push 5) (push 3) (call 2))   ; => 8
//! ```
//!
//! ## Execution model
//!
//! There is no native call stack and no return instruction. Whenever control
//! is about to leave a point that still has pending work (an `if` branch or a
//! closure call), the engine pushes a reified continuation holding the
//! remaining instructions and the current environment onto the data stack.
//! Running out of instructions pops the produced value, then the continuation
//! beneath it, and resumes there. Deep user-level recursion therefore grows
//! the data stack, never the host stack.
//!
//! ## Instruction set
//!
//! | kind         | operands                          |
//! |--------------|-----------------------------------|
//! | `push`       | `value`                           |
//! | `pop`        |                                   |
//! | `access`     | `n`                               |
//! | `closure`    | `arity has-rest-param code`       |
//! | `call`       | `n`                               |
//! | `if`         | `then-instrs else-instrs`         |
//! | `get-global` | `sym`                             |
//! | `set-global` | `sym`                             |
//!
//! ## Modules
//!
//! - `value`: runtime values and the s-expression substrate (symbols, pairs, lists)
//! - `instruction`: decoding of a single instruction form
//! - `vm`: the engine (global table, entry points) and the execution context
//! - `builtinops`: the native built-ins seeded into every engine
//! - `intooperation`: adapters turning typed Rust functions into natives
//! - `reader`: s-expression text reader (feature `reader`)

use std::fmt;

/// Maximum nesting depth accepted by the reader.
///
/// Evaluation itself has no depth limit; recursion only grows the data stack.
pub const MAX_PARSE_DEPTH: usize = 64;

/// Categorizes the different kinds of reader failures.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (bad tokens, malformed dotted pairs)
    InvalidSyntax,
    /// Input ended before the expression was complete (unclosed parens)
    Incomplete,
    /// Expression nesting exceeded [`MAX_PARSE_DEPTH`]
    TooDeeplyNested,
    /// Extra input found after a complete expression
    TrailingContent,
}

/// A structured error describing a reader failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input around the failure (max 60 chars)
    pub context: Option<String>,
    /// The character at the failure position, if any
    pub found: Option<String>,
}

impl ParseError {
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
            found,
        }
    }

    /// Create a ParseError with a kind and message but no context
    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None, None)
    }

    /// Create a ParseError with context extracted from `input` around the byte
    /// offset `error_offset`.
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
    ) -> Self {
        const MAX_CONTEXT: usize = 60;

        let error_offset = error_offset.min(input.len());
        let mut start = error_offset.saturating_sub(20);
        while !input.is_char_boundary(start) {
            start -= 1;
        }

        let snippet: String = input[start..].chars().take(MAX_CONTEXT).collect();
        let mut context = String::new();
        if start > 0 {
            context.push_str("[...]");
        }
        context.push_str(&snippet);
        if start + snippet.len() < input.len() {
            context.push_str("[...]");
        }
        let context = context.replace('\n', "\\n").replace('\r', "");

        let found = input[error_offset..].chars().next().map(String::from);

        Self::new(kind, message, Some(context), found)
    }
}

/// Errors raised while loading or running a program.
///
/// Every variant is fatal to the current run: the engine never catches or
/// recovers from these internally, and none of them is representable as a
/// runtime [`value::Value`].
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The reader rejected its input.
    ParseError(ParseError),
    /// An instruction is not a tagged list, names an unknown kind, or carries
    /// the wrong operands for its kind.
    MalformedInstruction(String),
    /// A closure or native was called with the wrong number of arguments.
    /// `variadic` marks callables that accept `expected` or more.
    ArityError {
        expected: usize,
        got: usize,
        variadic: bool,
    },
    /// `get-global` of a name that was never bound.
    UnboundGlobal(String),
    /// `access` beyond the end of the current environment.
    AccessOutOfRange { index: usize, len: usize },
    /// An instruction needed more stack values than were present.
    StackUnderflow { needed: usize, available: usize },
    /// A value of the wrong type was used (calling a non-function, `car` of
    /// an atom, arithmetic on a non-number, ...).
    TypeError(String),
    /// A native function failed for a reason other than its argument types.
    EvalError(String),
    /// The host used the execution context in an invalid state.
    ContractViolation(String),
}

impl Error {
    /// Arity error for a callable taking exactly `expected` arguments
    pub fn arity_error(expected: usize, got: usize) -> Self {
        Error::ArityError {
            expected,
            got,
            variadic: false,
        }
    }

    /// Arity error for a callable taking at least `min` arguments
    pub fn variadic_arity_error(min: usize, got: usize) -> Self {
        Error::ArityError {
            expected: min,
            got,
            variadic: true,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ParseError(e) => {
                write!(f, "ParseError: {}", e.message)?;
                if let Some(found) = &e.found {
                    write!(f, "\nFound: {found}")?;
                }
                if let Some(context) = &e.context {
                    write!(f, "\nContext: {context}")?;
                }
                Ok(())
            }
            Error::MalformedInstruction(msg) => write!(f, "Malformed instruction: {msg}"),
            Error::ArityError {
                expected,
                got,
                variadic,
            } => {
                let direction = if got < expected { "too few" } else { "too many" };
                let bound = if *variadic { "at least " } else { "" };
                write!(
                    f,
                    "ArityError: {direction} arguments: expected {bound}{expected}, got {got}"
                )
            }
            Error::UnboundGlobal(name) => write!(f, "Unbound global: {name}"),
            Error::AccessOutOfRange { index, len } => write!(
                f,
                "Access out of range: index {index} in environment of length {len}"
            ),
            Error::StackUnderflow { needed, available } => write!(
                f,
                "Stack underflow: needed {needed} values, {available} available"
            ),
            Error::TypeError(msg) => write!(f, "Type error: {msg}"),
            Error::EvalError(msg) => write!(f, "EvaluationError: {msg}"),
            Error::ContractViolation(msg) => write!(f, "Contract violation: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

pub mod builtinops;
pub mod instruction;
pub mod intooperation;
pub mod value;
pub mod vm;

#[cfg(feature = "reader")]
pub mod reader;

pub use value::{Symbol, Value};
pub use vm::{Thread, Vm};
