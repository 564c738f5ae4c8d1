//! Shared helpers for the integration tests.
//!
//! Every libtest test runs on its own thread and the runtime is per thread,
//! so each test installs whatever modules it needs from scratch.

#![allow(dead_code)]

use hostbind::prelude::*;
use hostbind::runtime::{self as rt, ExceptionKind, HostException, TypeFlags};

/// Import a registered module.
pub fn import(name: &str) -> Handle {
    Handle::adopt(rt::import(name)).unwrap_or_else(|err| panic!("import {name}: {err}"))
}

/// Look up `name` on `module` and call it with `args`.
pub fn call<A: hostbind::ToArgs>(module: &Handle, name: &str, args: A) -> BridgeResult<Handle> {
    let func = module.getattr(name)?;
    func.call(&TupleView::make(args)?)
}

/// Like [`call`], converting the result.
pub fn call_as<R: FromHost, A: hostbind::ToArgs>(module: &Handle, name: &str, args: A) -> R {
    let out = call(module, name, args).unwrap_or_else(|err| panic!("{name}: {err}"));
    R::from_host(&out, None).unwrap_or_else(|err| panic!("{name} result: {err}"))
}

/// The host exception a failed call left behind.
pub fn host_exception(err: BridgeError) -> HostException {
    match err {
        BridgeError::Pending { exception, .. } => exception,
        other => panic!("expected a pending host exception, got {other}"),
    }
}

pub fn expect_raises(result: BridgeResult<Handle>, kind: ExceptionKind) -> String {
    match result {
        Ok(value) => panic!("expected {kind:?}, got {value:?}"),
        Err(err) => {
            let exception = host_exception(err);
            assert_eq!(exception.kind, kind, "message: {}", exception.message);
            assert!(!rt::error_occurred(), "exception was not consumed");
            exception.message
        }
    }
}

/// Host-side class deriving from `base`, with the given methods.
pub fn subclass(name: &str, base: &Handle, methods: &[(&str, NativeFn)]) -> Handle {
    let funcs: Vec<(String, Handle)> = methods
        .iter()
        .map(|(n, f)| (n.to_string(), f.clone().into_host_function("").unwrap()))
        .collect();
    let attrs: Vec<(&str, rt::ObjRef)> = funcs.iter().map(|(n, f)| (n.as_str(), f.ptr())).collect();
    Handle::adopt(rt::type_new(name, "", Some(base.ptr()), &attrs, TypeFlags::BASETYPE)).unwrap()
}

/// Run `f` and assert that it leaves the live object count unchanged.
pub fn assert_no_leaks<R>(f: impl FnOnce() -> R) -> R {
    let before = rt::live_objects();
    let out = f();
    assert_eq!(rt::live_objects(), before, "live objects changed");
    out
}
