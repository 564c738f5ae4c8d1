//! Module objects and the import table.

use rustc_hash::FxHashMap;

use crate::exception::{ExceptionKind, set_error};
use crate::heap::ObjRef;
use crate::interp::with;
use crate::object::{ModuleObject, Object};

pub fn module_new(name: &str, doc: &str) -> Option<ObjRef> {
    Some(with(|interp| {
        interp.alloc(Object::Module(ModuleObject {
            name: name.to_string(),
            doc: doc.to_string(),
            attrs: FxHashMap::default(),
        }))
    }))
}

/// Bind `name` in a module. `value` is borrowed. Rebinding replaces the old
/// value.
#[must_use]
pub fn module_add(module: ObjRef, name: &str, value: ObjRef) -> bool {
    let is_module = with(|interp| matches!(interp.heap.borrow().get(module), Some(Object::Module(_))));
    if !is_module {
        let type_name = with(|interp| interp.type_name(module));
        set_error(
            ExceptionKind::TypeError,
            format!("expected module, got '{type_name}'"),
        );
        return false;
    }
    with(|interp| {
        interp.incref(value);
        let previous = match interp.heap.borrow_mut().get_mut(module) {
            Some(Object::Module(m)) => m.attrs.insert(name.to_string(), value),
            _ => None,
        };
        if let Some(previous) = previous {
            interp.decref(previous);
        }
    });
    true
}

/// Whether the module already binds `name`.
pub fn module_has(module: ObjRef, name: &str) -> bool {
    with(|interp| match interp.heap.borrow().get(module) {
        Some(Object::Module(m)) => m.attrs.contains_key(name),
        _ => false,
    })
}

/// Make a module importable by name. The table takes its own reference.
#[must_use]
pub fn module_register(module: ObjRef) -> bool {
    let name = with(|interp| match interp.heap.borrow().get(module) {
        Some(Object::Module(m)) => Some(m.name.clone()),
        _ => None,
    });
    let Some(name) = name else {
        set_error(ExceptionKind::TypeError, "only modules can be registered");
        return false;
    };
    with(|interp| {
        if interp.modules.borrow().contains_key(&name) {
            set_error(
                ExceptionKind::ImportError,
                format!("module '{name}' is already registered"),
            );
            return false;
        }
        interp.incref(module);
        interp.modules.borrow_mut().insert(name, module);
        true
    })
}

/// New reference to a registered module.
pub fn import(name: &str) -> Option<ObjRef> {
    let found = with(|interp| interp.modules.borrow().get(name).copied());
    match found {
        Some(module) => {
            with(|interp| interp.incref(module));
            Some(module)
        }
        None => {
            set_error(ExceptionKind::ImportError, format!("No module named '{name}'"));
            None
        }
    }
}
