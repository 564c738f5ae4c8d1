//! Functions, classes, instances and weak references.

use std::any::Any;

use rustc_hash::FxHashMap;

use crate::exception::{ExceptionKind, set_error};
use crate::heap::ObjRef;
use crate::interp::with;
use crate::object::{Function, HostFnBody, Instance, Object, TypeFlags, TypeObject};

/// New callable wrapping a native body.
pub fn function_new(name: &str, doc: &str, body: HostFnBody) -> Option<ObjRef> {
    Some(with(|interp| {
        interp.alloc(Object::Function(Function {
            name: name.to_string(),
            doc: doc.to_string(),
            body,
        }))
    }))
}

/// New class object. Attribute values are borrowed; the class takes its own
/// reference to each of them and to `base`.
pub fn type_new(
    name: &str,
    doc: &str,
    base: Option<ObjRef>,
    attrs: &[(&str, ObjRef)],
    flags: TypeFlags,
) -> Option<ObjRef> {
    if let Some(base) = base {
        let base_flags = with(|interp| match interp.heap.borrow().get(base) {
            Some(Object::Type(ty)) => Ok(ty.flags),
            _ => Err(interp.type_name(base)),
        });
        match base_flags {
            Ok(base_flags) if !base_flags.contains(TypeFlags::BASETYPE) => {
                let base_name = with(|interp| match interp.heap.borrow().get(base) {
                    Some(Object::Type(ty)) => ty.name.clone(),
                    _ => String::new(),
                });
                set_error(
                    ExceptionKind::TypeError,
                    format!("type '{base_name}' is not an acceptable base type"),
                );
                return None;
            }
            Ok(_) => {}
            Err(type_name) => {
                set_error(
                    ExceptionKind::TypeError,
                    format!("bases must be types, not '{type_name}'"),
                );
                return None;
            }
        }
    }

    Some(with(|interp| {
        let mut table = FxHashMap::default();
        for (key, value) in attrs {
            interp.incref(*value);
            if let Some(previous) = table.insert(key.to_string(), *value) {
                interp.decref(previous);
            }
        }
        if let Some(base) = base {
            interp.incref(base);
        }
        interp.alloc(Object::Type(TypeObject {
            name: name.to_string(),
            doc: doc.to_string(),
            base,
            attrs: table,
            flags,
        }))
    }))
}

/// Bare instance of `ty`, without running `__init__`.
pub fn instance_new(ty: ObjRef) -> Option<ObjRef> {
    let is_type = with(|interp| matches!(interp.heap.borrow().get(ty), Some(Object::Type(_))));
    if !is_type {
        let type_name = with(|interp| interp.type_name(ty));
        set_error(
            ExceptionKind::TypeError,
            format!("expected a type, got '{type_name}'"),
        );
        return None;
    }
    Some(with(|interp| {
        interp.incref(ty);
        interp.alloc(Object::Instance(Instance {
            ty,
            dict: FxHashMap::default(),
            payload: None,
        }))
    }))
}

/// Attach native state to an instance. It is dropped when the instance is
/// freed. An instance carries at most one payload.
#[must_use]
pub fn instance_set_payload(obj: ObjRef, payload: Box<dyn Any>) -> bool {
    let state = with(|interp| match interp.heap.borrow().get(obj) {
        Some(Object::Instance(instance)) => Some(instance.payload.is_some()),
        _ => None,
    });
    match state {
        Some(false) => with(|interp| {
            if let Some(Object::Instance(instance)) = interp.heap.borrow_mut().get_mut(obj) {
                instance.payload = Some(payload);
            }
        }),
        Some(true) => {
            let type_name = with(|interp| interp.type_name(obj));
            set_error(
                ExceptionKind::RuntimeError,
                format!("'{type_name}' instance is already initialized"),
            );
            return false;
        }
        None => {
            let type_name = with(|interp| interp.type_name(obj));
            set_error(
                ExceptionKind::TypeError,
                format!("'{type_name}' object cannot carry native state"),
            );
            return false;
        }
    }
    true
}

/// Run `f` against an instance's payload, if it has one.
///
/// The heap stays borrowed while `f` runs, so `f` must not call back into the
/// runtime; clone what is needed out of the payload instead.
pub fn with_payload<R>(obj: ObjRef, f: impl FnOnce(Option<&dyn Any>) -> R) -> R {
    with(|interp| {
        let heap = interp.heap.borrow();
        match heap.get(obj) {
            Some(Object::Instance(instance)) => f(instance.payload.as_deref()),
            _ => f(None),
        }
    })
}

/// New weak reference to an instance.
pub fn weakref_new(target: ObjRef) -> Option<ObjRef> {
    let is_instance = with(|interp| {
        matches!(interp.heap.borrow().get(target), Some(Object::Instance(_)))
    });
    if !is_instance {
        let type_name = with(|interp| interp.type_name(target));
        set_error(
            ExceptionKind::TypeError,
            format!("cannot create weak reference to '{type_name}' object"),
        );
        return None;
    }
    Some(with(|interp| interp.alloc(Object::WeakRef(target))))
}

/// New reference to the target, or to `None` once the target is gone.
pub fn weakref_upgrade(wr: ObjRef) -> Option<ObjRef> {
    let target = with(|interp| match interp.heap.borrow().get(wr) {
        Some(Object::WeakRef(target)) => Ok(*target),
        _ => Err(interp.type_name(wr)),
    });
    match target {
        Ok(target) => Some(with(|interp| {
            let live = interp.heap.borrow().is_live(target);
            let r = if live { target } else { interp.none() };
            interp.incref(r);
            r
        })),
        Err(type_name) => {
            set_error(
                ExceptionKind::TypeError,
                format!("expected weakref, got '{type_name}'"),
            );
            None
        }
    }
}
