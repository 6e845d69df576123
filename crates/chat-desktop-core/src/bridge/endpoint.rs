//! Typed endpoint descriptors
//!
//! An [`Endpoint`] names one capability leaf by its fully-qualified dotted name
//! and fixes its argument tuple and result data type. The privileged side
//! registers a handler against it and the untrusted side invokes through it,
//! so both are checked against the same signature at compile time.

use crate::error::BridgeError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;

/// Wire prefix for request/response invocations
pub const INVOKE_NAMESPACE: &str = "invoke-api:";
/// Wire prefix for fire-and-forget invocations
pub const EMIT_NAMESPACE: &str = "on-api:";

pub struct Endpoint<A, R> {
    fqn: &'static str,
    _signature: PhantomData<fn(A) -> R>,
}

impl<A, R> Endpoint<A, R> {
    pub const fn new(fqn: &'static str) -> Self {
        Self {
            fqn,
            _signature: PhantomData,
        }
    }

    pub fn fqn(&self) -> &'static str {
        self.fqn
    }

    pub fn invoke_name(&self) -> String {
        invoke_name(self.fqn)
    }

    pub fn emit_name(&self) -> String {
        emit_name(self.fqn)
    }
}

impl<A: Args, R> Endpoint<A, R> {
    pub fn arity(&self) -> usize {
        A::ARITY
    }
}

impl<A, R> Clone for Endpoint<A, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A, R> Copy for Endpoint<A, R> {}

impl<A, R> fmt::Debug for Endpoint<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Endpoint").field(&self.fqn).finish()
    }
}

pub fn invoke_name(fqn: &str) -> String {
    format!("{}{}", INVOKE_NAMESPACE, fqn)
}

pub fn emit_name(fqn: &str) -> String {
    format!("{}{}", EMIT_NAMESPACE, fqn)
}

/// Positional argument list of an endpoint
///
/// Implemented for `()` and tuples of up to four serializable values.
pub trait Args: Sized + Send + 'static {
    const ARITY: usize;

    fn into_values(self) -> Result<Vec<Value>, serde_json::Error>;

    fn from_values(values: Vec<Value>) -> Result<Self, BridgeError>;
}

impl Args for () {
    const ARITY: usize = 0;

    fn into_values(self) -> Result<Vec<Value>, serde_json::Error> {
        Ok(Vec::new())
    }

    fn from_values(values: Vec<Value>) -> Result<Self, BridgeError> {
        if !values.is_empty() {
            return Err(BridgeError::Arity {
                expected: 0,
                got: values.len(),
            });
        }
        Ok(())
    }
}

macro_rules! impl_args {
    ($arity:expr; $($name:ident),+) => {
        impl<$($name),+> Args for ($($name,)+)
        where
            $($name: Serialize + DeserializeOwned + Send + 'static),+
        {
            const ARITY: usize = $arity;

            #[allow(non_snake_case)]
            fn into_values(self) -> Result<Vec<Value>, serde_json::Error> {
                let ($($name,)+) = self;
                Ok(vec![$(serde_json::to_value($name)?),+])
            }

            fn from_values(values: Vec<Value>) -> Result<Self, BridgeError> {
                if values.len() != $arity {
                    return Err(BridgeError::Arity {
                        expected: $arity,
                        got: values.len(),
                    });
                }
                let mut values = values.into_iter();
                Ok(($(
                    serde_json::from_value::<$name>(values.next().unwrap_or(Value::Null))?,
                )+))
            }
        }
    };
}

impl_args!(1; A1);
impl_args!(2; A1, A2);
impl_args!(3; A1, A2, A3);
impl_args!(4; A1, A2, A3, A4);
