//! Built-in native functions seeded into every engine.
//!
//! Every [`crate::vm::Vm::new`] binds these names in its global table, next to
//! `apply`, which is not a native but the [`Value::Apply`] sentinel handled by
//! the call protocol itself:
//!
//! ```scheme
//! (cons 1 2)        ; => (1 . 2)
//! (car (cons 1 2))  ; => 1
//! (symbol? 'x)      ; => #t
//! (eq? 'x 'x)       ; => #t
//! (+ 5 3)           ; => 8
//! ```
//!
//! ## Strictness
//!
//! - `car` and `cdr` of a non-pair are type errors, never `()`.
//! - `+` and `-` take exactly two numbers and detect overflow.
//! - Predicates return the canonical `#t` / `#f`.
//!
//! ## Adding New Operations
//!
//! 1. **Implement the function** with typed parameters (`&Value` to borrow,
//!    `Value` to take ownership, `NumberType`, `bool`, `Symbol`, or a rest
//!    iterator such as `NumIter<'_>`)
//! 2. **Add it to BUILTIN_OPS** with its name and arity
//! 3. **Add tests** covering the success cases and the type/arity failures

use crate::Error;
use crate::intooperation::{IntoOperation, IntoVariadicOperation, OperationFn};
use crate::value::{NumberType, Value};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

/// The global name bound to the apply-marker
pub const APPLY_NAME: &str = "apply";

/// Number of arguments a native accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this many arguments
    Exact(usize),
    /// At least this many arguments
    AtLeast(usize),
    /// Any number of arguments
    Any,
}

impl Arity {
    /// Check an argument count against this arity
    pub fn validate(&self, arg_count: usize) -> Result<(), Error> {
        match *self {
            Arity::Exact(expected) if arg_count != expected => {
                Err(Error::arity_error(expected, arg_count))
            }
            Arity::AtLeast(min) if arg_count < min => {
                Err(Error::variadic_arity_error(min, arg_count))
            }
            _ => Ok(()),
        }
    }
}

/// Definition of a built-in native
#[derive(Clone)]
pub struct BuiltinOp {
    /// The global name this operation is bound to
    pub name: &'static str,
    /// The erased implementation
    pub func: Arc<OperationFn>,
    /// Expected number of arguments
    pub arity: Arity,
}

impl std::fmt::Debug for BuiltinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinOp")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl BuiltinOp {
    /// Check if the given number of arguments is valid for this operation
    #[cfg_attr(not(test), expect(dead_code))]
    pub(crate) fn validate_arity(&self, arg_count: usize) -> Result<(), Error> {
        self.arity.validate(arg_count)
    }
}

//
// Builtin Function Implementations
//

fn builtin_cons(car: Value, cdr: Value) -> Value {
    Value::cons(car, cdr)
}

fn builtin_car(pair: &Value) -> Result<Value, Error> {
    pair.car()
}

fn builtin_cdr(pair: &Value) -> Result<Value, Error> {
    pair.cdr()
}

fn builtin_is_symbol(value: &Value) -> bool {
    value.is_symbol()
}

fn builtin_is_cons(value: &Value) -> bool {
    value.is_pair()
}

fn builtin_is_atom(value: &Value) -> bool {
    value.is_atom()
}

fn builtin_is_eq(first: &Value, second: &Value) -> bool {
    first == second
}

fn builtin_add(a: NumberType, b: NumberType) -> Result<NumberType, Error> {
    a.checked_add(b)
        .ok_or_else(|| Error::EvalError("Integer overflow in addition".into()))
}

fn builtin_sub(a: NumberType, b: NumberType) -> Result<NumberType, Error> {
    a.checked_sub(b)
        .ok_or_else(|| Error::EvalError("Integer overflow in subtraction".into()))
}

/// Global registry of all built-in natives.
///
/// The builtins are wired through the same adapter layer hosts use for
/// [`crate::vm::Vm::register_native`], once, at first use.
static BUILTIN_OPS: LazyLock<Vec<BuiltinOp>> = LazyLock::new(|| {
    fn builtin_fixed<Args, F>(f: F) -> Arc<OperationFn>
    where
        F: IntoOperation<Args>,
    {
        <F as IntoOperation<Args>>::into_operation(f)
    }

    vec![
        // Pair construction and access
        BuiltinOp {
            name: "cons",
            func: builtin_fixed::<(Value, Value), _>(builtin_cons),
            arity: Arity::Exact(2),
        },
        BuiltinOp {
            name: "car",
            func: builtin_fixed::<(&Value,), _>(builtin_car),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            name: "cdr",
            func: builtin_fixed::<(&Value,), _>(builtin_cdr),
            arity: Arity::Exact(1),
        },
        // Type predicates
        BuiltinOp {
            name: "symbol?",
            func: builtin_fixed::<(&Value,), _>(builtin_is_symbol),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            name: "cons?",
            func: builtin_fixed::<(&Value,), _>(builtin_is_cons),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            name: "atom?",
            func: builtin_fixed::<(&Value,), _>(builtin_is_atom),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            name: "eq?",
            func: builtin_fixed::<(&Value, &Value), _>(builtin_is_eq),
            arity: Arity::Exact(2),
        },
        // Arithmetic
        BuiltinOp {
            name: "+",
            func: builtin_fixed::<(NumberType, NumberType), _>(builtin_add),
            arity: Arity::Exact(2),
        },
        BuiltinOp {
            name: "-",
            func: builtin_fixed::<(NumberType, NumberType), _>(builtin_sub),
            arity: Arity::Exact(2),
        },
    ]
});

/// Lazy static map from name to BuiltinOp (private - use find_builtin_op)
static BUILTIN_BY_NAME: LazyLock<HashMap<&'static str, &'static BuiltinOp>> =
    LazyLock::new(|| {
        let ops: &'static [BuiltinOp] = BUILTIN_OPS.as_slice();
        ops.iter().map(|op| (op.name, op)).collect()
    });

/// Get all builtin operations
pub fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS.as_slice()
}

/// Find a builtin operation by its global name
pub fn find_builtin_op(name: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_BY_NAME.get(name).copied()
}

/// Wrap an erased function so the declared arity is checked before it runs.
/// Fixed-arity adapters already check; variadic ones only know their prefix.
pub(crate) fn with_arity_check(arity: Arity, inner: Arc<OperationFn>) -> Arc<OperationFn> {
    Arc::new(move |args: Vec<Value>| {
        arity.validate(args.len())?;
        inner(args)
    })
}

/// Adapt a variadic function and guard it with `arity`
pub(crate) fn variadic_op<Args, F>(arity: Arity, f: F) -> Arc<OperationFn>
where
    F: IntoVariadicOperation<Args>,
{
    with_arity_check(arity, f.into_variadic_operation())
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::intooperation::ValueIter;
    use crate::value::{nil, sym, val};

    /// Micro-helper for success cases in comprehensive tests
    fn success<T: Into<Value>>(value: T) -> Option<Value> {
        Some(val(value))
    }

    /// Invoke a builtin through the registry using the erased signature,
    /// validating arity the way the engine does
    fn call_builtin(name: &str, args: &[Value]) -> Result<Value, Error> {
        let op = find_builtin_op(name).unwrap();
        op.validate_arity(args.len())?;
        (op.func)(args.to_vec())
    }

    #[test]
    fn test_builtin_ops_registry() {
        let names: Vec<&str> = get_builtin_ops().iter().map(|op| op.name).collect();
        assert_eq!(
            names,
            vec!["cons", "car", "cdr", "symbol?", "cons?", "atom?", "eq?", "+", "-"]
        );

        let add_op = find_builtin_op("+").unwrap();
        assert_eq!(add_op.arity, Arity::Exact(2));
        assert_eq!((add_op.func)(vec![val(1), val(2)]).unwrap(), val(3));

        assert!(find_builtin_op(APPLY_NAME).is_none());
        assert!(find_builtin_op("list").is_none());

        let by_name = find_builtin_op("car").unwrap();
        assert!(std::ptr::eq(by_name, &get_builtin_ops()[1]));
    }

    #[test]
    fn test_builtins_data_driven() {
        let pair = Value::cons(val(1), val(2));
        let list = val([1, 2, 3]);

        // (name, args, expected); None means any error
        let test_cases: Vec<(&str, Vec<Value>, Option<Value>)> = vec![
            ("car", vec![pair.clone()], success(1)),
            ("cdr", vec![pair.clone()], success(2)),
            ("car", vec![list.clone()], success(1)),
            ("car", vec![val(1)], None),
            ("car", vec![nil()], None),
            ("cdr", vec![sym("x")], None),
            ("symbol?", vec![sym("x")], success(true)),
            ("symbol?", vec![val(1)], success(false)),
            ("symbol?", vec![nil()], success(false)),
            ("cons?", vec![pair.clone()], success(true)),
            ("cons?", vec![nil()], success(false)),
            ("atom?", vec![nil()], success(true)),
            ("atom?", vec![val(3)], success(true)),
            ("atom?", vec![pair.clone()], success(false)),
            ("eq?", vec![sym("a"), sym("a")], success(true)),
            ("eq?", vec![sym("a"), sym("b")], success(false)),
            ("eq?", vec![val(3), val(3)], success(true)),
            ("eq?", vec![pair.clone(), pair.clone()], success(true)),
            ("eq?", vec![val([1]), val([1])], success(false)),
            ("eq?", vec![nil(), nil()], success(true)),
            ("eq?", vec![val(true), val(1)], success(false)),
            ("+", vec![val(5), val(3)], success(8)),
            ("+", vec![val(-5), val(3)], success(-2)),
            ("-", vec![val(5), val(3)], success(2)),
            ("-", vec![val(3), val(5)], success(-2)),
            ("+", vec![val(1), sym("x")], None),
            ("+", vec![val(NumberType::MAX), val(1)], None),
            ("-", vec![val(NumberType::MIN), val(1)], None),
        ];

        for (i, (name, args, expected)) in test_cases.into_iter().enumerate() {
            let result = call_builtin(name, &args);
            match expected {
                Some(expected) => {
                    assert_eq!(result.unwrap(), expected, "case {}: ({name} ...)", i + 1)
                }
                None => assert!(result.is_err(), "case {}: expected error", i + 1),
            }
        }
    }

    #[test]
    fn test_cons_builds_fresh_pair() {
        let first = call_builtin("cons", &[val(1), val(2)]).unwrap();
        let second = call_builtin("cons", &[val(1), val(2)]).unwrap();
        assert_eq!(first.to_string(), "(1 . 2)");
        assert!(first.equal(&second));
        assert_ne!(first, second);
        assert_eq!(
            call_builtin("cons", &[val(1), nil()]).unwrap().to_string(),
            "(1)"
        );
    }

    #[test]
    fn test_builtin_error_kinds() {
        assert!(matches!(
            call_builtin("car", &[val(1)]).unwrap_err(),
            Error::TypeError(_)
        ));
        assert!(matches!(
            call_builtin("+", &[val(1), val(true)]).unwrap_err(),
            Error::TypeError(_)
        ));
        assert_eq!(
            call_builtin("+", &[val(NumberType::MAX), val(1)]).unwrap_err(),
            Error::EvalError("Integer overflow in addition".into())
        );
        assert_eq!(
            call_builtin("+", &[val(1)]).unwrap_err(),
            Error::arity_error(2, 1)
        );
        assert_eq!(
            call_builtin("car", &[val(1), val(2)]).unwrap_err(),
            Error::arity_error(1, 2)
        );
    }

    #[test]
    fn test_arity_validation() {
        use Arity::*;

        Exact(2).validate(2).unwrap();
        Exact(2).validate(1).unwrap_err();
        Exact(2).validate(3).unwrap_err();

        AtLeast(1).validate(1).unwrap();
        AtLeast(1).validate(2).unwrap();
        AtLeast(1).validate(0).unwrap_err();

        Any.validate(0).unwrap();
        Any.validate(100).unwrap();

        match Exact(2).validate(1).unwrap_err() {
            Error::ArityError {
                expected,
                got,
                variadic,
            } => {
                assert_eq!(expected, 2);
                assert_eq!(got, 1);
                assert!(!variadic);
            }
            _ => panic!("Expected ArityError"),
        }
        assert_eq!(
            AtLeast(2).validate(0).unwrap_err(),
            Error::variadic_arity_error(2, 0)
        );
    }

    #[test]
    fn test_variadic_op_checks_arity() {
        let op = variadic_op::<(ValueIter<'static>,), _>(Arity::AtLeast(1), |args: ValueIter<'_>| {
            args.len() as NumberType
        });
        assert_eq!(op(vec![val(1), val(2)]).unwrap(), val(2));
        assert_eq!(op(vec![]).unwrap_err(), Error::variadic_arity_error(1, 0));
    }
}
