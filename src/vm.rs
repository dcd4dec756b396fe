//! The engine and its execution context.
//!
//! A [`Vm`] owns the global table. Each top-level run creates a [`Thread`]:
//! the mutable triple of pending instructions, data stack and environment
//! that the dispatch loop advances one [`Thread::step`] at a time.
//!
//! ```
//! use lispvm::instruction::{Instruction, program};
//! use lispvm::value::val;
//! use lispvm::{Symbol, Vm};
//!
//! let mut vm = Vm::new();
//! // The callable sits beneath its arguments
//! let tree = program([
//!     Instruction::GetGlobal(Symbol::new("+")),
//!     Instruction::Push(val(5)),
//!     Instruction::Push(val(3)),
//!     Instruction::Call(2),
//! ]);
//! assert_eq!(vm.run_expr(tree).unwrap(), val(8));
//! ```

use crate::Error;
use crate::builtinops::{APPLY_NAME, Arity, get_builtin_ops, variadic_op};
use crate::instruction::Instruction;
use crate::intooperation::{IntoOperation, IntoVariadicOperation, OperationFn};
use crate::value::{Closure, Continuation, Env, NativeFn, Symbol, Value};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, trace};

/// An engine instance: the global table plus the entry points that run
/// instruction trees against it.
///
/// Engines are independent of each other; nothing is process-wide.
#[derive(Debug, Clone)]
pub struct Vm {
    globals: HashMap<String, Value>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    /// Create an engine whose global table holds `apply` and the built-in
    /// natives (`cons`, `car`, `cdr`, `symbol?`, `cons?`, `atom?`, `eq?`,
    /// `+`, `-`).
    pub fn new() -> Self {
        let mut vm = Vm::empty();
        vm.globals.insert(APPLY_NAME.to_owned(), Value::Apply);
        for op in get_builtin_ops() {
            let native = NativeFn::new(op.name, Arc::clone(&op.func));
            vm.globals.insert(op.name.to_owned(), Value::Native(native));
        }
        debug!(globals = vm.globals.len(), "engine constructed");
        vm
    }

    /// Create an engine with an empty global table. Not even `apply` is bound.
    pub fn empty() -> Self {
        Vm {
            globals: HashMap::new(),
        }
    }

    /// Bind `name` to `value`, replacing any previous binding.
    pub fn set_global(&mut self, name: &Symbol, value: Value) {
        self.globals.insert(name.name().to_owned(), value);
    }

    /// Look up the value bound to `name`, failing if it is unbound.
    pub fn get_global(&self, name: &Symbol) -> Result<Value, Error> {
        self.globals
            .get(name.name())
            .cloned()
            .ok_or_else(|| Error::UnboundGlobal(name.name().to_owned()))
    }

    /// Non-failing lookup by name
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// All global bindings as `(name, value)` pairs sorted by name
    pub fn globals(&self) -> Vec<(String, Value)> {
        let mut result: Vec<_> = self
            .globals
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    /// Register a strongly-typed Rust function as a global native.
    ///
    /// Arguments are converted with automatic type checking and the
    /// argument count is enforced before the function runs:
    ///
    /// ```
    /// use lispvm::Vm;
    /// use lispvm::value::{NumberType, sym, val};
    ///
    /// fn double(n: NumberType) -> NumberType { n * 2 }
    ///
    /// let mut vm = Vm::new();
    /// vm.register_native::<(NumberType,), _>("double", double);
    /// let tree = val(vec![
    ///     val(vec![sym("get-global"), sym("double")]),
    ///     val(vec![sym("push"), val(21)]),
    ///     val(vec![sym("call"), val(1)]),
    /// ]);
    /// assert_eq!(vm.run_expr(tree).unwrap(), val(42));
    /// ```
    ///
    /// Supported parameter types are `&Value` (borrowed), `Value`,
    /// `NumberType`, `bool` and `Symbol`; return types are `Value`,
    /// `NumberType`, `bool` or `Symbol`, optionally wrapped in
    /// `Result<_, Error>`.
    pub fn register_native<Args, F>(&mut self, name: &str, func: F)
    where
        F: IntoOperation<Args>,
    {
        self.bind_native(name, func.into_operation());
    }

    /// Register a native whose last parameter is a rest iterator
    /// (`ValueIter<'_>`, `NumIter<'_>`, `BoolIter<'_>`), optionally after a
    /// fixed prefix. `arity` is validated on every call.
    pub fn register_variadic_native<Args, F>(&mut self, name: &str, arity: Arity, func: F)
    where
        F: IntoVariadicOperation<Args>,
    {
        self.bind_native(name, variadic_op(arity, func));
    }

    /// Register a native that works directly on the argument slice. Prefer
    /// [`Vm::register_native`] for new code.
    pub fn register_raw_native(&mut self, name: &str, func: fn(&[Value]) -> Result<Value, Error>) {
        self.bind_native(name, Arc::new(move |args: Vec<Value>| func(&args)));
    }

    fn bind_native(&mut self, name: &str, func: Arc<OperationFn>) {
        self.globals
            .insert(name.to_owned(), Value::Native(NativeFn::new(name, func)));
    }

    /// Run an instruction tree for its side effects on the global table.
    pub fn run_body(&mut self, instrs: Value) -> Result<(), Error> {
        self.run_body_with(instrs, Vec::new(), Env::new())
    }

    /// [`Vm::run_body`] with an initial stack and environment
    pub fn run_body_with(
        &mut self,
        instrs: Value,
        data: Vec<Value>,
        env: Env,
    ) -> Result<(), Error> {
        Thread::with_state(self, instrs, data, env).run()
    }

    /// Run an instruction tree and return its single resulting value.
    pub fn run_expr(&mut self, instrs: Value) -> Result<Value, Error> {
        self.run_expr_with(instrs, Vec::new(), Env::new())
    }

    /// [`Vm::run_expr`] with an initial stack and environment
    pub fn run_expr_with(
        &mut self,
        instrs: Value,
        data: Vec<Value>,
        env: Env,
    ) -> Result<Value, Error> {
        let mut thread = Thread::with_state(self, instrs, data, env);
        thread.run()?;
        thread.result()
    }
}

/// One execution context: `(instrs, data, env)` driven against an engine.
///
/// The thread is done when no instructions remain and at most one value is
/// on the stack. When instructions run out with more values present, the
/// value on top is the result of a finished branch or call and the entry
/// beneath it must be the [`Continuation`] to resume.
pub struct Thread<'vm> {
    vm: &'vm mut Vm,
    instrs: Value,
    data: Vec<Value>,
    env: Env,
}

impl<'vm> Thread<'vm> {
    pub fn new(vm: &'vm mut Vm, instrs: Value) -> Self {
        Self::with_state(vm, instrs, Vec::new(), Env::new())
    }

    /// Start from an explicit stack (top at the end) and environment.
    pub fn with_state(vm: &'vm mut Vm, instrs: Value, data: Vec<Value>, env: Env) -> Self {
        Thread {
            vm,
            instrs,
            data,
            env,
        }
    }

    pub fn is_done(&self) -> bool {
        self.instrs.is_nil() && self.data.len() <= 1
    }

    /// The single value left by a finished run. Calling this before the
    /// thread is done, or when it finished with an empty stack, is a
    /// contract violation.
    pub fn result(&self) -> Result<Value, Error> {
        if !self.is_done() {
            return Err(Error::ContractViolation(
                "result requested before the thread finished".into(),
            ));
        }
        match self.data.as_slice() {
            [value] => Ok(value.clone()),
            _ => Err(Error::ContractViolation(format!(
                "result requires exactly one stack value, found {}",
                self.data.len()
            ))),
        }
    }

    /// Step until done.
    pub fn run(&mut self) -> Result<(), Error> {
        while !self.is_done() {
            self.step()?;
        }
        Ok(())
    }

    /// Execute one instruction, or resume the pending continuation if no
    /// instructions remain.
    pub fn step(&mut self) -> Result<(), Error> {
        if self.is_done() {
            return Err(Error::ContractViolation(
                "step called on a finished thread".into(),
            ));
        }

        if self.instrs.is_nil() {
            return self.resume();
        }
        let (instr, rest) = match &self.instrs {
            Value::Pair(pair) => (pair.car.clone(), pair.cdr.clone()),
            other => {
                return Err(Error::MalformedInstruction(format!(
                    "instruction tree is not a list: {other}"
                )));
            }
        };
        self.instrs = rest;

        let instr = Instruction::decode(&instr)?;
        trace!(%instr, depth = self.data.len(), "dispatch");
        self.step_instr(instr)
    }

    /// The data stack, top at the end
    pub fn stack(&self) -> &[Value] {
        &self.data
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    /// The instructions still to run in the current frame
    pub fn instrs(&self) -> &Value {
        &self.instrs
    }

    fn push(&mut self, value: Value) {
        self.data.push(value);
    }

    fn pop(&mut self) -> Result<Value, Error> {
        self.data.pop().ok_or(Error::StackUnderflow {
            needed: 1,
            available: 0,
        })
    }

    /// Save the remaining instructions and environment, unless there is
    /// nothing left to resume.
    fn push_cont(&mut self) {
        if self.instrs.is_nil() {
            return;
        }
        let cont = Continuation {
            instrs: self.instrs.clone(),
            env: self.env.clone(),
        };
        self.push(Value::Continuation(Rc::new(cont)));
    }

    fn resume(&mut self) -> Result<(), Error> {
        let value = self.pop()?;
        let cont = match self.pop()? {
            Value::Continuation(cont) => cont,
            other => {
                return Err(Error::TypeError(format!(
                    "expected a continuation beneath the result, found {other}"
                )));
            }
        };
        trace!(depth = self.data.len(), "resume continuation");
        self.instrs = cont.instrs.clone();
        self.env = cont.env.clone();
        self.push(value);
        Ok(())
    }

    fn step_instr(&mut self, instr: Instruction) -> Result<(), Error> {
        match instr {
            Instruction::Push(value) => self.push(value),
            Instruction::Pop => {
                self.pop()?;
            }
            Instruction::Access(index) => {
                let value = self
                    .env
                    .get(index)
                    .cloned()
                    .ok_or(Error::AccessOutOfRange {
                        index,
                        len: self.env.len(),
                    })?;
                self.push(value);
            }
            Instruction::Closure {
                arity,
                has_rest_param,
                code,
            } => {
                let closure = Closure {
                    arity,
                    has_rest_param,
                    code,
                    env: self.env.clone(),
                };
                self.push(Value::Closure(Rc::new(closure)));
            }
            Instruction::Call(n) => {
                let available = self.data.len();
                if available < n + 1 {
                    return Err(Error::StackUnderflow {
                        needed: n + 1,
                        available,
                    });
                }
                let args = self.data.split_off(available - n);
                let func = self.pop()?;
                self.call(func, args)?;
            }
            Instruction::If {
                then_instrs,
                else_instrs,
            } => {
                let test = self.pop()?;
                let branch = if test.is_true() {
                    then_instrs
                } else {
                    else_instrs
                };
                self.push_cont();
                self.instrs = branch;
            }
            Instruction::GetGlobal(name) => {
                let value = self.vm.get_global(&name)?;
                self.push(value);
            }
            Instruction::SetGlobal(name) => {
                let top = self.data.last().cloned().ok_or(Error::StackUnderflow {
                    needed: 1,
                    available: 0,
                })?;
                self.vm.set_global(&name, top);
            }
        }
        Ok(())
    }

    /// Call `func` with `args`: push a native's result, or transfer control
    /// into a closure.
    fn call(&mut self, mut func: Value, mut args: Vec<Value>) -> Result<(), Error> {
        // Each apply-marker unwraps one layer: its first argument is the real
        // callable and the rest are passed through unchanged.
        while let Value::Apply = func {
            if args.is_empty() {
                return Err(Error::variadic_arity_error(1, 0));
            }
            func = args.remove(0);
        }

        match func {
            Value::Closure(closure) => self.call_closure(&closure, args),
            Value::Native(native) => {
                trace!(native = native.name(), args = args.len(), "call native");
                let result = native.call(args)?;
                self.push(result);
                Ok(())
            }
            other => Err(Error::TypeError(format!(
                "cannot call non-function {other} ({})",
                other.type_name()
            ))),
        }
    }

    fn call_closure(&mut self, closure: &Closure, mut args: Vec<Value>) -> Result<(), Error> {
        let got = args.len();
        if got < closure.arity {
            return Err(Error::ArityError {
                expected: closure.arity,
                got,
                variadic: closure.has_rest_param,
            });
        }
        if !closure.has_rest_param && got > closure.arity {
            return Err(Error::arity_error(closure.arity, got));
        }

        if closure.has_rest_param {
            let surplus = args.split_off(closure.arity);
            args.push(Value::list(surplus));
        }
        args.extend(closure.env.iter().cloned());

        trace!(
            arity = closure.arity,
            rest = closure.has_rest_param,
            args = got,
            "enter closure"
        );
        self.push_cont();
        self.instrs = closure.code.clone();
        self.env = Env::from(args);
        Ok(())
    }
}
