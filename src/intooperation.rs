//! Typed natives
//!
//! Hosts and the builtin table write natives as ordinary Rust functions
//! (`fn(NumberType, NumberType) -> NumberType`, `fn(&Value) -> bool`, ...)
//! and this module erases them to [`OperationFn`]. Argument count is checked
//! before any conversion, then every argument is converted with
//! [`FromParam`], and the return value is normalized with
//! [`IntoValueResult`].

use crate::Error;
use crate::value::{NumberType, Symbol, Value};
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::sync::Arc;

/// Canonical erased native function type.
///
/// Natives receive ownership of their argument vector, enabling
/// implementations that consume or rearrange arguments if desired.
pub type OperationFn = dyn Fn(Vec<Value>) -> Result<Value, Error> + Send + Sync;

fn expected(what: &str, got: &Value) -> Error {
    Error::TypeError(format!("expected {what}, got {}", got.type_name()))
}

// =====================================================================
// Fixed parameters
// =====================================================================

/// A parameter type a native can declare.
///
/// `Param<'a>` is what the native actually receives. It may borrow from the
/// argument slot (`&Value`) or own its payload (`Value`, `NumberType`).
pub trait FromParam {
    type Param<'a>;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error>;
}

/// Takes the argument by value; the slot is left as `()`.
impl FromParam for Value {
    type Param<'a> = Value;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        Ok(std::mem::replace(value, Value::Nil))
    }
}

/// Borrows the argument in place. Predicates and accessors use this so no
/// reference count is touched.
impl FromParam for &Value {
    type Param<'a> = &'a Value;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        Ok(&*value)
    }
}

impl FromParam for NumberType {
    type Param<'a> = NumberType;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        value.as_number().ok_or_else(|| expected("number", value))
    }
}

impl FromParam for bool {
    type Param<'a> = bool;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        match value {
            Value::Bool(b) => Ok(*b),
            other => Err(expected("boolean", other)),
        }
    }
}

impl FromParam for Symbol {
    type Param<'a> = Symbol;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        value
            .as_symbol()
            .cloned()
            .ok_or_else(|| expected("symbol", value))
    }
}

// =====================================================================
// Rest parameters
// =====================================================================

/// How a rest iterator views each argument.
#[doc(hidden)]
pub trait ValueElementKind {
    type Item<'a>;

    /// Reject the whole rest slice before the native runs
    fn precheck(slice: &[Value]) -> Result<(), Error>;
    fn project<'a>(v: &'a Value) -> Option<Self::Item<'a>>;
}

/// Borrowing iterator over the rest arguments of a variadic native.
#[doc(hidden)]
pub struct TypedValueIter<'a, K: ValueElementKind> {
    inner: std::slice::Iter<'a, Value>,
    _marker: PhantomData<K>,
}

impl<'a, K: ValueElementKind> TypedValueIter<'a, K> {
    pub(crate) fn new(values: &'a [Value]) -> Result<Self, Error> {
        K::precheck(values)?;
        Ok(TypedValueIter {
            inner: values.iter(),
            _marker: PhantomData,
        })
    }
}

impl<'a, K: ValueElementKind> Iterator for TypedValueIter<'a, K> {
    type Item = K::Item<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().and_then(K::project)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K: ValueElementKind> ExactSizeIterator for TypedValueIter<'_, K> {}
impl<K: ValueElementKind> FusedIterator for TypedValueIter<'_, K> {}

#[doc(hidden)]
pub struct ValueKind;

impl ValueElementKind for ValueKind {
    type Item<'a> = &'a Value;

    fn precheck(_slice: &[Value]) -> Result<(), Error> {
        Ok(())
    }

    fn project<'a>(v: &'a Value) -> Option<Self::Item<'a>> {
        Some(v)
    }
}

#[doc(hidden)]
pub struct NumberKind;

impl ValueElementKind for NumberKind {
    type Item<'a> = NumberType;

    fn precheck(slice: &[Value]) -> Result<(), Error> {
        match slice.iter().find(|v| v.as_number().is_none()) {
            Some(bad) => Err(expected("number", bad)),
            None => Ok(()),
        }
    }

    fn project<'a>(v: &'a Value) -> Option<Self::Item<'a>> {
        v.as_number()
    }
}

#[doc(hidden)]
pub struct BoolKind;

impl ValueElementKind for BoolKind {
    type Item<'a> = bool;

    fn precheck(slice: &[Value]) -> Result<(), Error> {
        match slice.iter().find(|v| !matches!(v, Value::Bool(_))) {
            Some(bad) => Err(expected("boolean", bad)),
            None => Ok(()),
        }
    }

    fn project<'a>(v: &'a Value) -> Option<Self::Item<'a>> {
        match v {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Rest arguments as raw `&Value`s.
pub type ValueIter<'a> = TypedValueIter<'a, ValueKind>;

/// Numeric rest arguments. Construction fails with a `TypeError` if any
/// element is not a number.
pub type NumIter<'a> = TypedValueIter<'a, NumberKind>;

/// Boolean rest arguments.
pub type BoolIter<'a> = TypedValueIter<'a, BoolKind>;

/// A rest-parameter type a variadic native can declare last.
pub trait FromRest {
    type Param<'a>;

    fn from_rest<'a>(slice: &'a [Value]) -> Result<Self::Param<'a>, Error>;
}

impl<K: ValueElementKind> FromRest for TypedValueIter<'static, K> {
    type Param<'a> = TypedValueIter<'a, K>;

    fn from_rest<'a>(slice: &'a [Value]) -> Result<Self::Param<'a>, Error> {
        TypedValueIter::<K>::new(slice)
    }
}

// =====================================================================
// Return values
// =====================================================================

/// Return types a native may declare.
pub trait IntoValueResult {
    fn into_value_result(self) -> Result<Value, Error>;
}

impl IntoValueResult for bool {
    fn into_value_result(self) -> Result<Value, Error> {
        Ok(Value::truthify(self))
    }
}

impl IntoValueResult for Result<bool, Error> {
    fn into_value_result(self) -> Result<Value, Error> {
        self.map(Value::truthify)
    }
}

macro_rules! into_value_result_via_from {
    ($($t:ty),+) => {
        $(
            impl IntoValueResult for $t {
                fn into_value_result(self) -> Result<Value, Error> {
                    Ok(Value::from(self))
                }
            }

            impl IntoValueResult for Result<$t, Error> {
                fn into_value_result(self) -> Result<Value, Error> {
                    self.map(Value::from)
                }
            }
        )+
    };
}

into_value_result_via_from!(NumberType, Symbol);

impl IntoValueResult for Value {
    fn into_value_result(self) -> Result<Value, Error> {
        Ok(self)
    }
}

impl IntoValueResult for Result<Value, Error> {
    fn into_value_result(self) -> Result<Value, Error> {
        self
    }
}

// =====================================================================
// Erasure
// =====================================================================

/// A Rust function with fixed parameters `Args` that can become a native.
pub trait IntoOperation<Args> {
    fn into_operation(self) -> Arc<OperationFn>;
}

/// A Rust function whose last parameter is a rest iterator, optionally after
/// a fixed prefix of [`FromParam`] parameters.
pub trait IntoVariadicOperation<Args> {
    fn into_variadic_operation(self) -> Arc<OperationFn>;
}

impl<F, R> IntoOperation<()> for F
where
    F: Fn() -> R + Send + Sync + 'static,
    R: IntoValueResult,
{
    fn into_operation(self) -> Arc<OperationFn> {
        Arc::new(move |args: Vec<Value>| {
            if !args.is_empty() {
                return Err(Error::arity_error(0, args.len()));
            }
            self().into_value_result()
        })
    }
}

// The argument vector is viewed as `&mut [Value; N]`, so every parameter
// gets its own slot to borrow from or move out of.
macro_rules! fixed_arity {
    ($n:literal: $( $A:ident $slot:ident ),+) => {
        impl<F, R, $( $A ),+> IntoOperation<( $( $A, )+ )> for F
        where
            $( $A: FromParam, )+
            F: for<'a> Fn($( <$A as FromParam>::Param<'a> ),+) -> R + Send + Sync + 'static,
            R: IntoValueResult,
        {
            fn into_operation(self) -> Arc<OperationFn> {
                Arc::new(move |mut args: Vec<Value>| {
                    let got = args.len();
                    let Ok([$( $slot ),+]) = <&mut [Value; $n]>::try_from(args.as_mut_slice())
                    else {
                        return Err(Error::arity_error($n, got));
                    };
                    self($( <$A as FromParam>::from_arg($slot)? ),+).into_value_result()
                })
            }
        }
    };
}

fixed_arity!(1: A1 a1);
fixed_arity!(2: A1 a1, A2 a2);
fixed_arity!(3: A1 a1, A2 a2, A3 a3);
fixed_arity!(4: A1 a1, A2 a2, A3 a3, A4 a4);

impl<F, I, R> IntoVariadicOperation<(I,)> for F
where
    I: FromRest,
    F: for<'a> Fn(<I as FromRest>::Param<'a>) -> R + Send + Sync + 'static,
    R: IntoValueResult,
{
    fn into_variadic_operation(self) -> Arc<OperationFn> {
        Arc::new(move |args: Vec<Value>| self(I::from_rest(&args)?).into_value_result())
    }
}

// A prefix of `$n` fixed parameters is split off the front; what remains is
// the rest slice.
macro_rules! prefix_and_rest {
    ($n:literal: $( $A:ident $slot:ident ),+) => {
        impl<F, I, R, $( $A ),+> IntoVariadicOperation<( $( $A, )+ I, )> for F
        where
            I: FromRest,
            $( $A: FromParam, )+
            F: for<'a> Fn($( <$A as FromParam>::Param<'a> ),+, <I as FromRest>::Param<'a>) -> R
                + Send
                + Sync
                + 'static,
            R: IntoValueResult,
        {
            fn into_variadic_operation(self) -> Arc<OperationFn> {
                Arc::new(move |mut args: Vec<Value>| {
                    let got = args.len();
                    let Some(([$( $slot ),+], rest)) = args.split_first_chunk_mut::<$n>() else {
                        return Err(Error::variadic_arity_error($n, got));
                    };
                    self(
                        $( <$A as FromParam>::from_arg($slot)?, )+
                        I::from_rest(rest)?,
                    )
                    .into_value_result()
                })
            }
        }
    };
}

prefix_and_rest!(1: A1 a1);
prefix_and_rest!(2: A1 a1, A2 a2);
