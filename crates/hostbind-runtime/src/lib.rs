//! Embedded dynamic object runtime.
//!
//! This crate is the *host* side that `hostbind` binds native code into: a
//! small reference-counted object system with a C-level API shape.
//!
//! ## Conventions
//!
//! - Objects are addressed by [`ObjRef`], a copyable raw reference. Whether a
//!   reference is *new* (caller owns one count) or *borrowed* is documented per
//!   function.
//! - Fallible functions return `None`, `false` or `-1` and leave a
//!   [`HostException`] pending; see [`exception`].
//! - All state is per thread. Objects must not cross threads.
//!
//! ## Key Types
//!
//! - [`ObjRef`]: generational reference into the thread's heap
//! - [`ObjectKind`]: coarse shape of an object
//! - [`HostException`] / [`ExceptionKind`]: the pending error
//! - [`TypeFlags`]: class flags (`NATIVE`, `BASETYPE`)

pub mod exception;
mod heap;
mod interp;
mod module;
mod object;
mod types;
mod values;

pub use exception::{
    ExceptionKind, HostException, clear_error, error_occurred, fetch_error, peek_error,
    restore_error, set_error,
};
pub use heap::ObjRef;
pub use interp::{
    call, decref, find_override, getattr, incref, is_callable, is_instance, is_live, kind,
    live_objects, none, object_repr, object_str, refcount, setattr, type_name,
};
pub use module::{import, module_add, module_has, module_new, module_register};
pub use object::{HostFnBody, ObjectKind, TypeFlags};
pub use types::{
    function_new, instance_new, instance_set_payload, type_new, weakref_new,
    weakref_upgrade, with_payload,
};
pub use values::{
    as_bool, as_float, as_int, as_string, dict_get_item, dict_keys, dict_new, dict_set_item,
    dict_size, new_bool, new_float, new_int, new_str, tuple_get_item, tuple_new, tuple_set_item,
    tuple_size,
};
