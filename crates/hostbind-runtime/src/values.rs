//! Scalars, tuples and dicts.
//!
//! Constructors return a new reference. Accessors that hand out an element
//! (`tuple_get_item`, `dict_get_item`) return a *borrowed* reference, valid
//! until the container is mutated or released.

use rustc_hash::FxHashMap;

use crate::exception::{ExceptionKind, set_error};
use crate::heap::ObjRef;
use crate::interp::{type_name_in, with};
use crate::object::{DictKey, Object};

pub fn new_bool(value: bool) -> Option<ObjRef> {
    Some(with(|interp| interp.alloc(Object::Bool(value))))
}

pub fn new_int(value: i64) -> Option<ObjRef> {
    Some(with(|interp| interp.alloc(Object::Int(value))))
}

pub fn new_float(value: f64) -> Option<ObjRef> {
    Some(with(|interp| interp.alloc(Object::Float(value))))
}

pub fn new_str(value: &str) -> Option<ObjRef> {
    Some(with(|interp| interp.alloc(Object::Str(value.to_string()))))
}

fn type_error(expected: &str, r: ObjRef) {
    let actual = with(|interp| interp.type_name(r));
    set_error(
        ExceptionKind::TypeError,
        format!("expected {expected}, got '{actual}'"),
    );
}

/// Read a bool. Only actual bools are accepted.
pub fn as_bool(r: ObjRef) -> Option<bool> {
    let value = with(|interp| match interp.heap.borrow().get(r) {
        Some(Object::Bool(b)) => Some(*b),
        _ => None,
    });
    if value.is_none() {
        type_error("bool", r);
    }
    value
}

/// Read an integer. Bools count as integers; floats do not.
pub fn as_int(r: ObjRef) -> Option<i64> {
    let value = with(|interp| match interp.heap.borrow().get(r) {
        Some(Object::Int(v)) => Some(*v),
        Some(Object::Bool(b)) => Some(*b as i64),
        _ => None,
    });
    if value.is_none() {
        let actual = with(|interp| interp.type_name(r));
        set_error(
            ExceptionKind::TypeError,
            format!("'{actual}' object cannot be interpreted as an integer"),
        );
    }
    value
}

/// Read a float, widening ints and bools.
pub fn as_float(r: ObjRef) -> Option<f64> {
    let value = with(|interp| match interp.heap.borrow().get(r) {
        Some(Object::Float(v)) => Some(*v),
        Some(Object::Int(v)) => Some(*v as f64),
        Some(Object::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    });
    if value.is_none() {
        type_error("a number", r);
    }
    value
}

pub fn as_string(r: ObjRef) -> Option<String> {
    let value = with(|interp| match interp.heap.borrow().get(r) {
        Some(Object::Str(s)) => Some(s.clone()),
        _ => None,
    });
    if value.is_none() {
        type_error("str", r);
    }
    value
}

// =============================================================================
// Tuples
// =============================================================================

/// New tuple of `len` empty slots, to be filled with [`tuple_set_item`].
pub fn tuple_new(len: isize) -> Option<ObjRef> {
    if len < 0 {
        set_error(ExceptionKind::SystemError, "negative tuple size");
        return None;
    }
    Some(with(|interp| {
        interp.alloc(Object::Tuple(vec![None; len as usize]))
    }))
}

/// Length of a tuple, or -1 with TypeError for anything else.
pub fn tuple_size(t: ObjRef) -> isize {
    match with(|interp| interp.with_tuple(t, <[_]>::len)) {
        Some(len) => len as isize,
        None => {
            type_error("tuple", t);
            -1
        }
    }
}

/// Borrowed reference to element `index`.
pub fn tuple_get_item(t: ObjRef, index: isize) -> Option<ObjRef> {
    let slot = with(|interp| {
        interp.with_tuple(t, |items| {
            usize::try_from(index)
                .ok()
                .and_then(|i| items.get(i).copied())
        })
    });
    match slot {
        None => {
            type_error("tuple", t);
            None
        }
        Some(None) => {
            set_error(ExceptionKind::IndexError, "tuple index out of range");
            None
        }
        Some(Some(None)) => {
            set_error(ExceptionKind::SystemError, "tuple slot has not been set");
            None
        }
        Some(Some(Some(item))) => Some(item),
    }
}

/// Store `item` in slot `index`.
///
/// On success the tuple takes over the caller's reference to `item` and any
/// previous occupant is released. On failure nothing is mutated and the
/// caller's reference is left alone.
#[must_use]
pub fn tuple_set_item(t: ObjRef, index: isize, item: ObjRef) -> bool {
    let outcome = with(|interp| {
        let mut heap = interp.heap.borrow_mut();
        if !heap.is_live(item) {
            return Err((ExceptionKind::SystemError, "tuple item is a freed object".to_string()));
        }
        let type_name = type_name_in(&heap, t);
        match heap.get_mut(t) {
            Some(Object::Tuple(items)) => {
                if index < 0 || index as usize >= items.len() {
                    return Err((
                        ExceptionKind::IndexError,
                        "tuple assignment index out of range".to_string(),
                    ));
                }
                Ok(items[index as usize].replace(item))
            }
            _ => Err((
                ExceptionKind::TypeError,
                format!("expected tuple, got '{type_name}'"),
            )),
        }
    });
    match outcome {
        Ok(previous) => {
            if let Some(previous) = previous {
                crate::interp::decref(previous);
            }
            true
        }
        Err((kind, message)) => {
            set_error(kind, message);
            false
        }
    }
}

// =============================================================================
// Dicts
// =============================================================================

pub fn dict_new() -> Option<ObjRef> {
    Some(with(|interp| interp.alloc(Object::Dict(FxHashMap::default()))))
}

/// Number of entries, or -1 with TypeError for anything else.
pub fn dict_size(d: ObjRef) -> isize {
    let size = with(|interp| match interp.heap.borrow().get(d) {
        Some(Object::Dict(entries)) => Some(entries.len() as isize),
        _ => None,
    });
    match size {
        Some(size) => size,
        None => {
            type_error("dict", d);
            -1
        }
    }
}

/// Insert or replace an entry. Both `key` and `value` are borrowed.
#[must_use]
pub fn dict_set_item(d: ObjRef, key: ObjRef, value: ObjRef) -> bool {
    let outcome = with(|interp| {
        let hash_key = {
            let heap = interp.heap.borrow();
            match (heap.get(d), heap.get(key)) {
                (Some(Object::Dict(_)), Some(key_object)) => Some(DictKey::of(key_object, key)),
                _ => None,
            }
        };
        let hash_key = hash_key?;
        interp.incref(key);
        interp.incref(value);
        let previous = match interp.heap.borrow_mut().get_mut(d) {
            Some(Object::Dict(entries)) => entries.insert(hash_key, (key, value)),
            _ => None,
        };
        Some(previous)
    });
    match outcome {
        Some(previous) => {
            if let Some((old_key, old_value)) = previous {
                crate::interp::decref(old_key);
                crate::interp::decref(old_value);
            }
            true
        }
        None => {
            type_error("dict", d);
            false
        }
    }
}

/// Borrowed reference to the value stored under `key`; `None` without an
/// exception when the key is absent.
pub fn dict_get_item(d: ObjRef, key: ObjRef) -> Option<ObjRef> {
    with(|interp| {
        let heap = interp.heap.borrow();
        match (heap.get(d), heap.get(key)) {
            (Some(Object::Dict(entries)), Some(key_object)) => entries
                .get(&DictKey::of(key_object, key))
                .map(|(_, value)| *value),
            _ => None,
        }
    })
}

/// New tuple holding the dict's keys.
pub fn dict_keys(d: ObjRef) -> Option<ObjRef> {
    let keys = with(|interp| match interp.heap.borrow().get(d) {
        Some(Object::Dict(entries)) => Some(entries.values().map(|(k, _)| *k).collect::<Vec<_>>()),
        _ => None,
    });
    let Some(keys) = keys else {
        type_error("dict", d);
        return None;
    };
    with(|interp| {
        for key in &keys {
            interp.incref(*key);
        }
        Some(interp.alloc(Object::Tuple(keys.into_iter().map(Some).collect())))
    })
}
