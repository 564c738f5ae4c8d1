//! Call adapter: native function signatures to the host calling convention.
//!
//! Every bound function is stored as a [`NativeFn`], which receives the host's
//! positional and keyword arguments and returns one handle. Typed Rust
//! functions get there through [`IntoNativeFn`], which converts each argument
//! with [`FromHost`] and the result with [`IntoCallOutput`].
//!
//! [`NativeFn::into_host_function`] is the boundary: nothing below it may leak
//! an `Err` or a panic into the runtime.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use hostbind_runtime::{self as rt, HostFnBody, ObjRef};

use crate::convert::{FromHost, IntoCallOutput};
use crate::error::{BridgeError, BridgeResult};
use crate::exposition::attach_payload;
use crate::handle::Handle;
use crate::views::{DictView, TupleView};

/// Anything that can serve a host call.
pub trait NativeCallable {
    fn call(&self, args: &TupleView, kwargs: &DictView) -> BridgeResult<Handle>;
}

impl<F> NativeCallable for F
where
    F: Fn(&TupleView, &DictView) -> BridgeResult<Handle>,
{
    fn call(&self, args: &TupleView, kwargs: &DictView) -> BridgeResult<Handle> {
        (self)(args, kwargs)
    }
}

/// Type-erased native function with a uniform signature.
///
/// Cheap to clone; clones share the callable.
pub struct NativeFn {
    name: Rc<str>,
    inner: Rc<dyn NativeCallable>,
}

impl NativeFn {
    pub fn new<F>(name: &str, f: F) -> Self
    where
        F: NativeCallable + 'static,
    {
        Self {
            name: Rc::from(name),
            inner: Rc::new(f),
        }
    }

    /// Wrap a typed Rust function.
    pub fn wrap<F, Args>(name: &str, f: F) -> Self
    where
        F: IntoNativeFn<Args>,
    {
        f.into_native_fn(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call directly from native code, bypassing the host.
    pub fn call(&self, args: &TupleView, kwargs: &DictView) -> BridgeResult<Handle> {
        self.inner.call(args, kwargs)
    }

    /// Create the host callable for this function.
    ///
    /// The returned object follows the runtime's convention: it returns a new
    /// reference, or null with an exception pending. Errors are translated with
    /// [`BridgeError::restore`]; panics are caught and raised as RuntimeError.
    pub fn into_host_function(self, doc: &str) -> BridgeResult<Handle> {
        let name = Rc::clone(&self.name);
        let inner = self.inner;
        let body: HostFnBody = Rc::new(move |args, kwargs| boundary(&name, &*inner, args, kwargs));
        Handle::adopt_at(rt::function_new(&self.name, doc, body), &self.name)
    }
}

impl Clone for NativeFn {
    fn clone(&self) -> Self {
        Self {
            name: Rc::clone(&self.name),
            inner: Rc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFn")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg_attr(feature = "profiling", profiling::function)]
fn boundary(
    name: &str,
    callable: &dyn NativeCallable,
    args: ObjRef,
    kwargs: Option<ObjRef>,
) -> Option<ObjRef> {
    let outcome = catch_unwind(AssertUnwindSafe(|| -> BridgeResult<Handle> {
        let args = TupleView::new(Handle::borrow_at(Some(args), name)?, name)?;
        let kwargs = match kwargs {
            Some(kwargs) => DictView::from_handle(Handle::borrow_at(Some(kwargs), name)?, name)?,
            None => DictView::new()?,
        };
        callable.call(&args, &kwargs)
    }));

    match outcome {
        Ok(Ok(result)) if rt::error_occurred() => {
            // Something below swallowed a host error but still returned a value.
            tracing::debug!(function = name, "discarding result returned with a pending exception");
            drop(result);
            None
        }
        Ok(Ok(result)) => Some(result.into_ptr()),
        Ok(Err(err)) => {
            err.restore();
            None
        }
        Err(payload) => {
            let message = panic_message(&*payload);
            tracing::debug!(function = name, %message, "native panic caught at boundary");
            BridgeError::Panic {
                site: name.to_string(),
                message,
            }
            .restore();
            None
        }
    }
}

/// Check the argument shape of a call. `offset` leading positional arguments
/// (the receiver of a constructor) are not counted in messages.
fn check_shape(
    site: &str,
    args: &TupleView,
    kwargs: &DictView,
    offset: usize,
    expected: usize,
) -> BridgeResult<()> {
    let size = args.size();
    if size != expected + offset {
        return Err(BridgeError::Arity {
            site: site.to_string(),
            expected,
            got: size.saturating_sub(offset),
        });
    }
    if !kwargs.is_empty() {
        return Err(BridgeError::UnexpectedKeywords {
            site: site.to_string(),
            names: kwargs.key_names()?,
        });
    }
    Ok(())
}

fn argument_sites(name: &str, count: usize) -> Vec<String> {
    (1..=count)
        .map(|i| format!("{name}() argument {i}"))
        .collect()
}

/// Typed functions convertible into a [`NativeFn`].
///
/// Implemented for every `Fn(A0, .., An) -> R` with up to eight arguments,
/// where each `Ai: FromHost` and `R: IntoCallOutput`.
pub trait IntoNativeFn<Args> {
    fn into_native_fn(self, name: &str) -> NativeFn;
}

macro_rules! impl_into_native_fn {
    ($count:expr; $($arg:ident $var:ident : $idx:tt),*) => {
        impl<Func, Ret, $($arg,)*> IntoNativeFn<($($arg,)*)> for Func
        where
            Func: Fn($($arg),*) -> Ret + 'static,
            Ret: IntoCallOutput + 'static,
            $($arg: FromHost + 'static,)*
        {
            #[allow(unused_variables)]
            fn into_native_fn(self, name: &str) -> NativeFn {
                let site = name.to_string();
                let sites = argument_sites(name, $count);
                NativeFn::new(name, move |args: &TupleView, kwargs: &DictView| -> BridgeResult<Handle> {
                    check_shape(&site, args, kwargs, 0, $count)?;
                    $(
                        let $var = <$arg>::from_host(&args.get($idx)?, Some(&sites[$idx]))?;
                    )*
                    (self)($($var),*).into_output()
                })
            }
        }
    };
}

impl_into_native_fn!(0;);
impl_into_native_fn!(1; A0 a0: 0);
impl_into_native_fn!(2; A0 a0: 0, A1 a1: 1);
impl_into_native_fn!(3; A0 a0: 0, A1 a1: 1, A2 a2: 2);
impl_into_native_fn!(4; A0 a0: 0, A1 a1: 1, A2 a2: 2, A3 a3: 3);
impl_into_native_fn!(5; A0 a0: 0, A1 a1: 1, A2 a2: 2, A3 a3: 3, A4 a4: 4);
impl_into_native_fn!(6; A0 a0: 0, A1 a1: 1, A2 a2: 2, A3 a3: 3, A4 a4: 4, A5 a5: 5);
impl_into_native_fn!(7; A0 a0: 0, A1 a1: 1, A2 a2: 2, A3 a3: 3, A4 a4: 4, A5 a5: 5, A6 a6: 6);
impl_into_native_fn!(8; A0 a0: 0, A1 a1: 1, A2 a2: 2, A3 a3: 3, A4 a4: 4, A5 a5: 5, A6 a6: 6, A7 a7: 7);

/// What a constructor may produce for an exposed type `T`.
pub trait IntoConstructed<T: ?Sized> {
    fn into_constructed(self) -> BridgeResult<Rc<T>>;
}

impl<T: ?Sized> IntoConstructed<T> for Rc<T> {
    fn into_constructed(self) -> BridgeResult<Rc<T>> {
        Ok(self)
    }
}

impl<T: ?Sized, E: Into<BridgeError>> IntoConstructed<T> for Result<Rc<T>, E> {
    fn into_constructed(self) -> BridgeResult<Rc<T>> {
        self.map_err(Into::into)
    }
}

/// Constructors for an exposed type `T`.
///
/// Implemented for `Fn(&Handle, A0, .., An) -> R` with up to eight arguments.
/// The handle is the host instance being initialized; the produced `Rc<T>`
/// becomes its native payload.
pub trait IntoConstructor<T: ?Sized, Args> {
    fn into_constructor(self, name: &str) -> NativeFn;
}

macro_rules! impl_into_constructor {
    ($count:expr; $($arg:ident $var:ident : $idx:tt),*) => {
        impl<T, Func, Ret, $($arg,)*> IntoConstructor<T, ($($arg,)*)> for Func
        where
            T: ?Sized + 'static,
            Func: Fn(&Handle, $($arg),*) -> Ret + 'static,
            Ret: IntoConstructed<T> + 'static,
            $($arg: FromHost + 'static,)*
        {
            #[allow(unused_variables)]
            fn into_constructor(self, name: &str) -> NativeFn {
                let site = name.to_string();
                let sites = argument_sites(name, $count);
                NativeFn::new(name, move |args: &TupleView, kwargs: &DictView| -> BridgeResult<Handle> {
                    check_shape(&site, args, kwargs, 1, $count)?;
                    let this = args.get(0)?;
                    $(
                        let $var = <$arg>::from_host(&args.get($idx + 1)?, Some(&sites[$idx]))?;
                    )*
                    let value = (self)(&this, $($var),*).into_constructed()?;
                    attach_payload::<T>(&this, value, &site)?;
                    Ok(Handle::none())
                })
            }
        }
    };
}

impl_into_constructor!(0;);
impl_into_constructor!(1; A0 a0: 0);
impl_into_constructor!(2; A0 a0: 0, A1 a1: 1);
impl_into_constructor!(3; A0 a0: 0, A1 a1: 1, A2 a2: 2);
impl_into_constructor!(4; A0 a0: 0, A1 a1: 1, A2 a2: 2, A3 a3: 3);
impl_into_constructor!(5; A0 a0: 0, A1 a1: 1, A2 a2: 2, A3 a3: 3, A4 a4: 4);
impl_into_constructor!(6; A0 a0: 0, A1 a1: 1, A2 a2: 2, A3 a3: 3, A4 a4: 4, A5 a5: 5);
impl_into_constructor!(7; A0 a0: 0, A1 a1: 1, A2 a2: 2, A3 a3: 3, A4 a4: 4, A5 a5: 5, A6 a6: 6);
impl_into_constructor!(8; A0 a0: 0, A1 a1: 1, A2 a2: 2, A3 a3: 3, A4 a4: 4, A5 a5: 5, A6 a6: 6, A7 a7: 7);
