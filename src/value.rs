//! Runtime values and the s-expression substrate they are built on.
//!
//! [`Value`] is the closed set of things that can live on the data stack, in
//! an environment, in the global table, or inside a cons pair: the atoms of
//! the substrate (nil, booleans, integers, symbols), cons pairs, native
//! functions, closures, reified continuations and the apply marker.
//!
//! Programs are values too: an instruction tree is a proper list of
//! instruction lists, so the helpers here ([`sym`], [`val`], [`Value::list`])
//! double as a small program-building vocabulary:
//!
//! ```
//! use lispvm::value::{Value, sym, val};
//!
//! let program = Value::list([
//!     val(vec![sym("get-global"), sym("+")]),
//!     val(vec![sym("push"), val(5)]),
//!     val(vec![sym("push"), val(3)]),
//!     val(vec![sym("call"), val(2)]),
//! ]);
//! assert_eq!(program.to_string(), "((get-global +) (push 5) (push 3) (call 2))");
//! ```

use crate::Error;
use crate::intooperation::OperationFn;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Type alias for number values in the substrate
pub type NumberType = i64;

/// An interned-by-name identifier. Two symbols are the same symbol iff their
/// names are equal.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Symbol(Rc<str>);

impl Symbol {
    pub fn new(name: &str) -> Self {
        Symbol(Rc::from(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable cons cell.
pub struct Pair {
    pub car: Value,
    pub cdr: Value,
}

// Pairs nest through both car and cdr, and either can be arbitrarily deep.
// Uniquely owned children are detached onto a worklist and freed one at a
// time, so dropping never recurses on the host stack.
impl Drop for Pair {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        detach_child(&mut self.car, &mut pending);
        detach_child(&mut self.cdr, &mut pending);
        while let Some(rc) = pending.pop() {
            if let Ok(mut pair) = Rc::try_unwrap(rc) {
                detach_child(&mut pair.car, &mut pending);
                detach_child(&mut pair.cdr, &mut pending);
            }
        }
    }
}

fn detach_child(slot: &mut Value, pending: &mut Vec<Rc<Pair>>) {
    if slot.is_pair()
        && let Value::Pair(rc) = std::mem::replace(slot, Value::Nil)
    {
        pending.push(rc);
    }
}

/// A host-provided function. Natives run synchronously and return exactly one
/// value; they never see the execution context.
#[derive(Clone)]
pub struct NativeFn {
    name: Arc<str>,
    func: Arc<OperationFn>,
}

impl NativeFn {
    pub fn new(name: &str, func: Arc<OperationFn>) -> Self {
        NativeFn {
            name: Arc::from(name),
            func,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: Vec<Value>) -> Result<Value, Error> {
        (self.func)(args)
    }

    /// Natives are identified by the function they wrap, not by their name.
    pub fn ptr_eq(&self, other: &NativeFn) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

/// A lexical environment: parameters first, then every variable captured from
/// the defining scope, flattened and indexed from 0.
///
/// Environments are immutable once built, so capturing one into a closure or
/// continuation is a reference-count bump and can never observe later changes.
#[derive(Clone)]
pub struct Env(Rc<[Value]>);

impl Env {
    pub fn new() -> Self {
        Env(Rc::from(Vec::new()))
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    /// True if both handles share the same underlying frame
    pub fn ptr_eq(&self, other: &Env) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<Value>> for Env {
    fn from(values: Vec<Value>) -> Self {
        Env(Rc::from(values))
    }
}

impl FromIterator<Value> for Env {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Env(iter.into_iter().collect())
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

/// A user function: code plus a snapshot of the environment it was created in.
#[derive(Debug)]
pub struct Closure {
    /// Number of required parameters
    pub arity: usize,
    /// Whether surplus arguments are collected into one list parameter
    pub has_rest_param: bool,
    pub code: Value,
    pub env: Env,
}

/// "What to do with one value, once produced": the instructions and
/// environment to resume with.
#[derive(Debug)]
pub struct Continuation {
    pub instrs: Value,
    pub env: Env,
}

/// Core runtime value
///
/// Equality (`==` and the `eq?` builtin) is value equality for atoms and
/// reference identity for everything compound: two separately built pairs
/// with the same contents are not equal. Use [`Value::equal`] for structural
/// comparison.
#[derive(Clone)]
pub enum Value {
    /// The empty list
    Nil,
    Bool(bool),
    Number(NumberType),
    Symbol(Symbol),
    Pair(Rc<Pair>),
    Native(NativeFn),
    Closure(Rc<Closure>),
    Continuation(Rc<Continuation>),
    /// Sentinel bound to `apply`; calling through it calls its first argument
    Apply,
}

impl Value {
    pub fn cons(car: Value, cdr: Value) -> Value {
        Value::Pair(Rc::new(Pair { car, cdr }))
    }

    /// Build a proper list from `items`
    pub fn list(items: impl IntoIterator<Item = Value>) -> Value {
        Self::list_with_tail(items, Value::Nil)
    }

    /// Build a list from `items` ending in `tail` instead of nil
    pub fn list_with_tail(items: impl IntoIterator<Item = Value>, tail: Value) -> Value {
        let items: Vec<Value> = items.into_iter().collect();
        items
            .into_iter()
            .rev()
            .fold(tail, |cdr, car| Value::cons(car, cdr))
    }

    /// Iterate over the elements of a list. Iteration stops at the first
    /// non-pair; see [`ListIter::tail`].
    pub fn list_iter(&self) -> ListIter<'_> {
        ListIter { current: self }
    }

    /// Collect a proper list into a Vec
    pub fn to_vec(&self) -> Result<Vec<Value>, Error> {
        let mut iter = self.list_iter();
        let items: Vec<Value> = iter.by_ref().cloned().collect();
        if iter.tail().is_nil() {
            Ok(items)
        } else {
            Err(Error::TypeError(format!("not a proper list: {self}")))
        }
    }

    /// The canonical boolean for a Rust truth value
    pub fn truthify(b: bool) -> Value {
        Value::Bool(b)
    }

    /// Truth semantics: only `#f` is false.
    pub fn is_true(&self) -> bool {
        !matches!(self, Value::Bool(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_pair(&self) -> bool {
        matches!(self, Value::Pair(_))
    }

    pub fn is_symbol(&self) -> bool {
        matches!(self, Value::Symbol(_))
    }

    /// Anything that is not a cons pair
    pub fn is_atom(&self) -> bool {
        !self.is_pair()
    }

    pub fn as_pair(&self) -> Option<&Pair> {
        match self {
            Value::Pair(pair) => Some(pair),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<NumberType> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn car(&self) -> Result<Value, Error> {
        self.as_pair()
            .map(|pair| pair.car.clone())
            .ok_or_else(|| Error::TypeError(format!("car: not a cons pair: {self}")))
    }

    pub fn cdr(&self) -> Result<Value, Error> {
        self.as_pair()
            .map(|pair| pair.cdr.clone())
            .ok_or_else(|| Error::TypeError(format!("cdr: not a cons pair: {self}")))
    }

    /// Short name of this value's type, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Symbol(_) => "symbol",
            Value::Pair(_) => "pair",
            Value::Native(_) => "native function",
            Value::Closure(_) => "closure",
            Value::Continuation(_) => "continuation",
            Value::Apply => "apply",
        }
    }

    /// Structural equality: pairs compare by contents, everything else as `==`.
    pub fn equal(&self, other: &Value) -> bool {
        let mut pending = vec![(self, other)];
        while let Some((left, right)) = pending.pop() {
            match (left, right) {
                (Value::Pair(a), Value::Pair(b)) => {
                    if !Rc::ptr_eq(a, b) {
                        pending.push((&a.cdr, &b.cdr));
                        pending.push((&a.car, &b.car));
                    }
                }
                _ if left != right => return false,
                _ => {}
            }
        }
        true
    }
}

/// Borrowing iterator over the elements of a cons-list.
pub struct ListIter<'a> {
    current: &'a Value,
}

impl<'a> ListIter<'a> {
    /// What is left after the pairs consumed so far: nil for an exhausted
    /// proper list, the dotted tail for an exhausted improper one.
    pub fn tail(&self) -> &'a Value {
        self.current
    }
}

impl<'a> Iterator for ListIter<'a> {
    type Item = &'a Value;

    fn next(&mut self) -> Option<Self::Item> {
        match self.current {
            Value::Pair(pair) => {
                self.current = &pair.cdr;
                Some(&pair.car)
            }
            _ => None,
        }
    }
}

impl std::iter::FusedIterator for ListIter<'_> {}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) | (Value::Apply, Value::Apply) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Pair(a), Value::Pair(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => a.ptr_eq(b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Continuation(a), Value::Continuation(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "Nil"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::Pair(_) => write!(f, "Pair({self})"),
            Value::Native(native) => write!(f, "Native({})", native.name()),
            Value::Closure(closure) => write!(
                f,
                "Closure(arity={}, rest={}, code={}, env={:?})",
                closure.arity, closure.has_rest_param, closure.code, closure.env
            ),
            Value::Continuation(k) => {
                write!(f, "Continuation(instrs={}, env={:?})", k.instrs, k.env)
            }
            Value::Apply => write!(f, "Apply"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "()"),
            Value::Bool(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            Value::Number(n) => write!(f, "{n}"),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::Pair(_) => write_list(f, self),
            Value::Native(native) => write!(f, "#<native:{}>", native.name()),
            Value::Closure(closure) => {
                let rest = if closure.has_rest_param { "+" } else { "" };
                write!(f, "#<closure/{}{rest}>", closure.arity)
            }
            Value::Continuation(_) => write!(f, "#<continuation>"),
            Value::Apply => write!(f, "#<apply>"),
        }
    }
}

enum Piece<'a> {
    Value(&'a Value),
    Text(&'static str),
}

// Lists print with an explicit work stack; a list nested through car a
// million levels deep prints like any other.
fn write_list(f: &mut fmt::Formatter<'_>, list: &Value) -> fmt::Result {
    let mut pending = vec![Piece::Value(list)];
    while let Some(piece) = pending.pop() {
        match piece {
            Piece::Text(text) => f.write_str(text)?,
            Piece::Value(value @ Value::Pair(_)) => {
                f.write_str("(")?;
                pending.push(Piece::Text(")"));
                let mut iter = value.list_iter();
                let items: Vec<&Value> = iter.by_ref().collect();
                if !iter.tail().is_nil() {
                    pending.push(Piece::Value(iter.tail()));
                    pending.push(Piece::Text(" . "));
                }
                for (i, item) in items.into_iter().enumerate().rev() {
                    pending.push(Piece::Value(item));
                    if i > 0 {
                        pending.push(Piece::Text(" "));
                    }
                }
            }
            Piece::Value(atom) => write!(f, "{atom}")?,
        }
    }
    Ok(())
}

// From trait implementations for Value - enables .into() conversion
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Symbol> for Value {
    fn from(s: Symbol) -> Self {
        Value::Symbol(s)
    }
}

impl From<NativeFn> for Value {
    fn from(native: NativeFn) -> Self {
        Value::Native(native)
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Number(n as NumberType)
            }
        }
    };
}

impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(NumberType);
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::list(v.into_iter().map(Into::into))
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::list(arr.into_iter().map(Into::into))
    }
}

/// Helper for creating symbols
pub fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::Symbol(Symbol::new(name.as_ref()))
}

/// Helper for creating values from anything convertible; vectors and arrays
/// become proper lists
pub fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Helper for the empty list
pub fn nil() -> Value {
    Value::Nil
}
