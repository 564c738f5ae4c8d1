//! Per-thread interpreter state and the generic object protocol.
//!
//! The interpreter owns the heap, the pending-exception indicator and the
//! module table. It lives in a `thread_local!`: one logical thread of control,
//! no locking. Entry points never hold a heap borrow while running host code,
//! so callables, `__init__` and payload destructors may re-enter freely.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::exception::{ExceptionKind, HostException, error_occurred, set_error};
use crate::heap::{Heap, ObjRef, Released};
use crate::object::{HostFnBody, Object, ObjectKind, TypeFlags};

pub(crate) struct Interpreter {
    pub(crate) heap: RefCell<Heap>,
    pub(crate) pending: RefCell<Option<HostException>>,
    pub(crate) modules: RefCell<FxHashMap<String, ObjRef>>,
    none: ObjRef,
}

thread_local! {
    static INTERP: Interpreter = Interpreter::new();
}

pub(crate) fn with<R>(f: impl FnOnce(&Interpreter) -> R) -> R {
    INTERP.with(f)
}

enum CallTarget {
    Function(HostFnBody),
    Bound { func: ObjRef, receiver: ObjRef },
    Type,
    NotCallable(String),
    Stale,
}

enum Resolved {
    Plain(ObjRef),
    Bind(ObjRef),
    Text(String),
    Missing,
    Stale,
}

enum Render {
    Text(String),
    Tuple(Vec<Option<ObjRef>>),
    Dict(Vec<(ObjRef, ObjRef)>),
    Hook(ObjRef, &'static str),
}

/// Walk a type and its bases looking for an attribute.
///
/// With `skip_native`, attributes of NATIVE types are ignored.
pub(crate) fn lookup_type_attr(
    heap: &Heap,
    ty: ObjRef,
    name: &str,
    skip_native: bool,
) -> Option<ObjRef> {
    let mut current = Some(ty);
    while let Some(t) = current {
        let Some(Object::Type(type_object)) = heap.get(t) else {
            break;
        };
        if !(skip_native && type_object.flags.contains(TypeFlags::NATIVE)) {
            if let Some(attr) = type_object.attrs.get(name) {
                return Some(*attr);
            }
        }
        current = type_object.base;
    }
    None
}

pub(crate) fn type_name_in(heap: &Heap, r: ObjRef) -> String {
    match heap.get(r) {
        Some(Object::Instance(instance)) => match heap.get(instance.ty) {
            Some(Object::Type(ty)) => ty.name.clone(),
            _ => ObjectKind::Instance.name().to_string(),
        },
        Some(object) => object.kind().name().to_string(),
        None => "<freed>".to_string(),
    }
}

impl Interpreter {
    fn new() -> Self {
        let mut heap = Heap::new();
        let none = heap.allocate(Object::None);
        Self {
            heap: RefCell::new(heap),
            pending: RefCell::new(None),
            modules: RefCell::new(FxHashMap::default()),
            none,
        }
    }

    pub(crate) fn none(&self) -> ObjRef {
        self.none
    }

    pub(crate) fn alloc(&self, object: Object) -> ObjRef {
        self.heap.borrow_mut().allocate(object)
    }

    pub(crate) fn incref(&self, r: ObjRef) {
        let ok = self.heap.borrow_mut().add_ref(r);
        if !ok {
            panic!("fatal: reference count increment on freed object {r}");
        }
    }

    pub(crate) fn decref(&self, r: ObjRef) {
        let released = self.heap.borrow_mut().release(r);
        match released {
            Released::Alive => {}
            Released::Freed(object) => self.dispose(object),
            Released::Stale => panic!("fatal: reference count decrement on freed object {r}"),
        }
    }

    /// Release everything a freed object owned, iteratively.
    fn dispose(&self, object: Object) {
        let mut queue = vec![object];
        let mut owned = Vec::new();
        while let Some(object) = queue.pop() {
            let payload = object.into_parts(&mut owned);
            drop(payload);
            for r in owned.drain(..) {
                let released = self.heap.borrow_mut().release(r);
                match released {
                    Released::Alive => {}
                    Released::Freed(child) => queue.push(child),
                    Released::Stale => {
                        panic!("fatal: freed object owned a dangling reference {r}")
                    }
                }
            }
        }
    }

    pub(crate) fn kind_of(&self, r: ObjRef) -> Option<ObjectKind> {
        self.heap.borrow().get(r).map(Object::kind)
    }

    pub(crate) fn type_name(&self, r: ObjRef) -> String {
        type_name_in(&self.heap.borrow(), r)
    }

    pub(crate) fn tuple_items(&self, r: ObjRef) -> Option<Vec<Option<ObjRef>>> {
        self.with_tuple(r, <[Option<ObjRef>]>::to_vec)
    }

    /// Run `f` over a tuple's slots in place. `f` must not touch the heap.
    pub(crate) fn with_tuple<R>(
        &self,
        r: ObjRef,
        f: impl FnOnce(&[Option<ObjRef>]) -> R,
    ) -> Option<R> {
        match self.heap.borrow().get(r) {
            Some(Object::Tuple(items)) => Some(f(items)),
            _ => None,
        }
    }

    fn dict_len(&self, r: ObjRef) -> usize {
        match self.heap.borrow().get(r) {
            Some(Object::Dict(entries)) => entries.len(),
            _ => 0,
        }
    }

    /// New tuple `(first, *rest)`.
    pub(crate) fn prepend(&self, first: ObjRef, rest: ObjRef) -> Option<ObjRef> {
        let Some(items) = self.tuple_items(rest) else {
            set_error(ExceptionKind::TypeError, "argument list must be a tuple");
            return None;
        };
        let mut all = Vec::with_capacity(items.len() + 1);
        all.push(first);
        for item in items {
            let Some(item) = item else {
                set_error(ExceptionKind::SystemError, "argument tuple has an empty slot");
                return None;
            };
            all.push(item);
        }
        for r in &all {
            self.incref(*r);
        }
        Some(self.alloc(Object::Tuple(all.into_iter().map(Some).collect())))
    }

    pub(crate) fn call(
        &self,
        callable: ObjRef,
        args: ObjRef,
        kwargs: Option<ObjRef>,
    ) -> Option<ObjRef> {
        if self.kind_of(args) != Some(ObjectKind::Tuple) {
            set_error(ExceptionKind::TypeError, "argument list must be a tuple");
            return None;
        }
        if let Some(kwargs) = kwargs {
            if self.kind_of(kwargs) != Some(ObjectKind::Dict) {
                set_error(ExceptionKind::TypeError, "keyword arguments must be a dict");
                return None;
            }
        }

        let target = {
            let heap = self.heap.borrow();
            match heap.get(callable) {
                Some(Object::Function(function)) => CallTarget::Function(Rc::clone(&function.body)),
                Some(Object::BoundMethod { func, receiver }) => CallTarget::Bound {
                    func: *func,
                    receiver: *receiver,
                },
                Some(Object::Type(_)) => CallTarget::Type,
                Some(_) => CallTarget::NotCallable(type_name_in(&heap, callable)),
                None => CallTarget::Stale,
            }
        };

        match target {
            CallTarget::Function(body) => {
                let result = body(args, kwargs);
                if result.is_none() && !error_occurred() {
                    set_error(ExceptionKind::SystemError, "error return without exception set");
                }
                result
            }
            CallTarget::Bound { func, receiver } => {
                // The bound method may be released while its function runs.
                self.incref(func);
                self.incref(receiver);
                let result = self.prepend(receiver, args).and_then(|full| {
                    let result = self.call(func, full, kwargs);
                    self.decref(full);
                    result
                });
                self.decref(receiver);
                self.decref(func);
                result
            }
            CallTarget::Type => {
                self.incref(callable);
                let result = self.instantiate(callable, args, kwargs);
                self.decref(callable);
                result
            }
            CallTarget::NotCallable(type_name) => {
                set_error(
                    ExceptionKind::TypeError,
                    format!("'{type_name}' object is not callable"),
                );
                None
            }
            CallTarget::Stale => {
                set_error(ExceptionKind::SystemError, "call on freed object");
                None
            }
        }
    }

    fn instantiate(&self, ty: ObjRef, args: ObjRef, kwargs: Option<ObjRef>) -> Option<ObjRef> {
        let (init, native, name) = {
            let heap = self.heap.borrow();
            let init = lookup_type_attr(&heap, ty, "__init__", false);
            let mut native = false;
            let mut name = String::new();
            let mut current = Some(ty);
            while let Some(t) = current {
                let Some(Object::Type(type_object)) = heap.get(t) else {
                    break;
                };
                if name.is_empty() {
                    name = type_object.name.clone();
                }
                native |= type_object.flags.contains(TypeFlags::NATIVE);
                current = type_object.base;
            }
            (init, native, name)
        };

        match init {
            Some(init) => {
                self.incref(ty);
                let instance = self.alloc(Object::Instance(crate::object::Instance {
                    ty,
                    dict: FxHashMap::default(),
                    payload: None,
                }));
                self.incref(init);
                let result = self.prepend(instance, args).and_then(|full| {
                    let result = self.call(init, full, kwargs);
                    self.decref(full);
                    result
                });
                self.decref(init);
                match result {
                    Some(result) => {
                        self.decref(result);
                        Some(instance)
                    }
                    None => {
                        self.decref(instance);
                        None
                    }
                }
            }
            None if native => {
                set_error(
                    ExceptionKind::TypeError,
                    format!("cannot create '{name}' instances"),
                );
                None
            }
            None => {
                let positional = self.with_tuple(args, <[_]>::len).unwrap_or(0);
                let keywords = kwargs.map_or(0, |k| self.dict_len(k));
                if positional + keywords > 0 {
                    set_error(ExceptionKind::TypeError, format!("{name}() takes no arguments"));
                    return None;
                }
                self.incref(ty);
                Some(self.alloc(Object::Instance(crate::object::Instance {
                    ty,
                    dict: FxHashMap::default(),
                    payload: None,
                })))
            }
        }
    }

    pub(crate) fn getattr(&self, obj: ObjRef, name: &str, overrides_only: bool) -> Option<ObjRef> {
        let resolved = {
            let heap = self.heap.borrow();
            match heap.get(obj) {
                Some(Object::Instance(instance)) => match instance.dict.get(name) {
                    Some(attr) => Resolved::Plain(*attr),
                    None => match lookup_type_attr(&heap, instance.ty, name, overrides_only) {
                        Some(attr) if matches!(heap.get(attr), Some(Object::Function(_))) => {
                            Resolved::Bind(attr)
                        }
                        Some(attr) => Resolved::Plain(attr),
                        None => Resolved::Missing,
                    },
                },
                Some(_) if overrides_only => Resolved::Missing,
                Some(Object::Type(ty)) => match name {
                    "__name__" => Resolved::Text(ty.name.clone()),
                    "__doc__" => Resolved::Text(ty.doc.clone()),
                    _ => lookup_type_attr(&heap, obj, name, false)
                        .map_or(Resolved::Missing, Resolved::Plain),
                },
                Some(Object::Module(module)) => match name {
                    "__name__" => Resolved::Text(module.name.clone()),
                    "__doc__" => Resolved::Text(module.doc.clone()),
                    _ => module
                        .attrs
                        .get(name)
                        .copied()
                        .map_or(Resolved::Missing, Resolved::Plain),
                },
                Some(Object::Function(function)) => match name {
                    "__name__" => Resolved::Text(function.name.clone()),
                    "__doc__" => Resolved::Text(function.doc.clone()),
                    _ => Resolved::Missing,
                },
                Some(_) => Resolved::Missing,
                None => Resolved::Stale,
            }
        };

        match resolved {
            Resolved::Plain(attr) => {
                self.incref(attr);
                Some(attr)
            }
            Resolved::Bind(func) => {
                self.incref(func);
                self.incref(obj);
                Some(self.alloc(Object::BoundMethod {
                    func,
                    receiver: obj,
                }))
            }
            Resolved::Text(text) => Some(self.alloc(Object::Str(text))),
            Resolved::Missing => {
                if !overrides_only {
                    let type_name = self.type_name(obj);
                    set_error(
                        ExceptionKind::AttributeError,
                        format!("'{type_name}' object has no attribute '{name}'"),
                    );
                }
                None
            }
            Resolved::Stale => {
                if !overrides_only {
                    set_error(ExceptionKind::SystemError, "attribute lookup on freed object");
                }
                None
            }
        }
    }

    pub(crate) fn setattr(&self, obj: ObjRef, name: &str, value: ObjRef) -> bool {
        let is_instance = matches!(self.heap.borrow().get(obj), Some(Object::Instance(_)));
        if !is_instance {
            let type_name = self.type_name(obj);
            set_error(
                ExceptionKind::AttributeError,
                format!("'{type_name}' object attributes are read-only"),
            );
            return false;
        }
        self.incref(value);
        let previous = match self.heap.borrow_mut().get_mut(obj) {
            Some(Object::Instance(instance)) => instance.dict.insert(name.to_string(), value),
            _ => None,
        };
        if let Some(previous) = previous {
            self.decref(previous);
        }
        true
    }

    pub(crate) fn is_instance(&self, obj: ObjRef, ty: ObjRef) -> bool {
        let heap = self.heap.borrow();
        let Some(Object::Instance(instance)) = heap.get(obj) else {
            return false;
        };
        let mut current = Some(instance.ty);
        while let Some(t) = current {
            if t == ty {
                return true;
            }
            current = match heap.get(t) {
                Some(Object::Type(type_object)) => type_object.base,
                _ => None,
            };
        }
        false
    }

    /// Textual form of an object; `repr` selects the unambiguous form.
    pub(crate) fn render(&self, obj: ObjRef, repr: bool) -> Option<String> {
        let plan = {
            let heap = self.heap.borrow();
            match heap.get(obj) {
                None => {
                    set_error(ExceptionKind::SystemError, "string conversion of freed object");
                    return None;
                }
                Some(Object::None) => Render::Text("None".to_string()),
                Some(Object::Bool(b)) => Render::Text(if *b { "True" } else { "False" }.to_string()),
                Some(Object::Int(v)) => Render::Text(v.to_string()),
                Some(Object::Float(v)) => Render::Text(format!("{v:?}")),
                Some(Object::Str(s)) if repr => Render::Text(format!("'{s}'")),
                Some(Object::Str(s)) => Render::Text(s.clone()),
                Some(Object::Tuple(items)) => Render::Tuple(items.clone()),
                Some(Object::Dict(entries)) => Render::Dict(entries.values().copied().collect()),
                Some(Object::Function(function)) => {
                    Render::Text(format!("<built-in function {}>", function.name))
                }
                Some(Object::BoundMethod { func, receiver }) => {
                    let func_name = match heap.get(*func) {
                        Some(Object::Function(function)) => function.name.clone(),
                        _ => "?".to_string(),
                    };
                    Render::Text(format!(
                        "<bound method {} of {} object>",
                        func_name,
                        type_name_in(&heap, *receiver)
                    ))
                }
                Some(Object::Type(ty)) => Render::Text(format!("<class '{}'>", ty.name)),
                Some(Object::Instance(instance)) => {
                    let hook = if repr { "__repr__" } else { "__str__" };
                    let found = lookup_type_attr(&heap, instance.ty, hook, false)
                        .map(|f| (f, hook))
                        .or_else(|| {
                            lookup_type_attr(&heap, instance.ty, "__repr__", false)
                                .map(|f| (f, "__repr__"))
                        });
                    match found {
                        Some((func, hook)) => Render::Hook(func, hook),
                        None => Render::Text(format!(
                            "<{} object at {}>",
                            type_name_in(&heap, obj),
                            obj
                        )),
                    }
                }
                Some(Object::WeakRef(target)) => {
                    if heap.is_live(*target) {
                        Render::Text(format!(
                            "<weakref at {}; to '{}'>",
                            obj,
                            type_name_in(&heap, *target)
                        ))
                    } else {
                        Render::Text(format!("<weakref at {obj}; dead>"))
                    }
                }
                Some(Object::Module(module)) => Render::Text(format!("<module '{}'>", module.name)),
            }
        };

        match plan {
            Render::Text(text) => Some(text),
            Render::Tuple(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Some(item) => parts.push(self.render(item, true)?),
                        None => parts.push("<NULL>".to_string()),
                    }
                }
                if parts.len() == 1 {
                    Some(format!("({},)", parts[0]))
                } else {
                    Some(format!("({})", parts.join(", ")))
                }
            }
            Render::Dict(entries) => {
                let mut parts = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    let key = self.render(key, true)?;
                    let value = self.render(value, true)?;
                    parts.push(format!("{key}: {value}"));
                }
                parts.sort();
                Some(format!("{{{}}}", parts.join(", ")))
            }
            Render::Hook(func, hook) => {
                self.incref(func);
                self.incref(obj);
                let args = self.alloc(Object::Tuple(vec![Some(obj)]));
                let result = self.call(func, args, None);
                self.decref(args);
                self.decref(func);
                let result = result?;
                let text = match self.heap.borrow().get(result) {
                    Some(Object::Str(s)) => Ok(s.clone()),
                    _ => Err(()),
                };
                let text = match text {
                    Ok(text) => Some(text),
                    Err(()) => {
                        let type_name = self.type_name(result);
                        set_error(
                            ExceptionKind::TypeError,
                            format!("{hook} returned non-string (type {type_name})"),
                        );
                        None
                    }
                };
                self.decref(result);
                text
            }
        }
    }
}

// =============================================================================
// Public object protocol
// =============================================================================

/// Borrowed reference to the `None` singleton.
pub fn none() -> ObjRef {
    with(Interpreter::none)
}

/// Take an extra reference. Touching a freed object is fatal.
pub fn incref(r: ObjRef) {
    with(|interp| interp.incref(r));
}

/// Drop a reference, freeing the object when it was the last one.
///
/// Silently does nothing once the thread's interpreter has been torn down.
pub fn decref(r: ObjRef) {
    let _ = INTERP.try_with(|interp| interp.decref(r));
}

/// Current reference count, `None` for a freed object.
pub fn refcount(r: ObjRef) -> Option<u32> {
    with(|interp| interp.heap.borrow().ref_count(r))
}

pub fn is_live(r: ObjRef) -> bool {
    with(|interp| interp.heap.borrow().is_live(r))
}

/// Number of objects currently alive on this thread's heap.
pub fn live_objects() -> usize {
    with(|interp| interp.heap.borrow().live_count())
}

pub fn kind(r: ObjRef) -> Option<ObjectKind> {
    with(|interp| interp.kind_of(r))
}

/// Type name used in messages: the class name for instances.
pub fn type_name(r: ObjRef) -> String {
    with(|interp| interp.type_name(r))
}

pub fn is_callable(r: ObjRef) -> bool {
    matches!(
        kind(r),
        Some(ObjectKind::Function | ObjectKind::Method | ObjectKind::Type)
    )
}

/// Call `callable(*args, **kwargs)`. Both argument objects are borrowed.
pub fn call(callable: ObjRef, args: ObjRef, kwargs: Option<ObjRef>) -> Option<ObjRef> {
    with(|interp| interp.call(callable, args, kwargs))
}

/// Attribute lookup: instance dict, then the type chain. Functions found on a
/// type are bound to the receiver.
pub fn getattr(obj: ObjRef, name: &str) -> Option<ObjRef> {
    with(|interp| interp.getattr(obj, name, false))
}

/// Like [`getattr`], but only the instance dict and host-defined classes are
/// searched, and absence is not an error.
pub fn find_override(obj: ObjRef, name: &str) -> Option<ObjRef> {
    with(|interp| interp.getattr(obj, name, true))
}

pub fn setattr(obj: ObjRef, name: &str, value: ObjRef) -> bool {
    with(|interp| interp.setattr(obj, name, value))
}

/// Whether `obj` is an instance of `ty` or of one of its subclasses.
pub fn is_instance(obj: ObjRef, ty: ObjRef) -> bool {
    with(|interp| interp.is_instance(obj, ty))
}

pub fn object_str(obj: ObjRef) -> Option<ObjRef> {
    with(|interp| {
        let text = interp.render(obj, false)?;
        Some(interp.alloc(Object::Str(text)))
    })
}

pub fn object_repr(obj: ObjRef) -> Option<ObjRef> {
    with(|interp| {
        let text = interp.render(obj, true)?;
        Some(interp.alloc(Object::Str(text)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::{clear_error, fetch_error};
    use crate::values::{new_int, new_str, tuple_new, tuple_set_item};

    fn int(v: i64) -> ObjRef {
        new_int(v).unwrap()
    }

    fn tuple_of(items: &[ObjRef]) -> ObjRef {
        let t = tuple_new(items.len() as isize).unwrap();
        for (i, item) in items.iter().enumerate() {
            incref(*item);
            assert!(tuple_set_item(t, i as isize, *item));
        }
        t
    }

    #[test]
    fn none_is_shared_and_never_freed() {
        let a = none();
        let b = none();
        assert_eq!(a, b);
        assert!(refcount(a).unwrap() >= 1);
    }

    #[test]
    fn tuple_release_frees_children() {
        let before = live_objects();
        let a = int(1);
        let b = int(2);
        let t = tuple_of(&[a, b]);
        decref(a);
        decref(b);
        assert_eq!(live_objects(), before + 3);

        decref(t);
        assert_eq!(live_objects(), before);
        assert!(!is_live(a));
    }

    #[test]
    fn calling_a_non_callable_sets_type_error() {
        let five = int(5);
        let args = tuple_new(0).unwrap();
        assert!(call(five, args, None).is_none());
        let exc = fetch_error().unwrap();
        assert_eq!(exc.kind, ExceptionKind::TypeError);
        assert!(exc.message.contains("not callable"));
        decref(args);
        decref(five);
    }

    #[test]
    fn missing_attribute_is_attribute_error() {
        let five = int(5);
        assert!(getattr(five, "real").is_none());
        assert_eq!(fetch_error().unwrap().kind, ExceptionKind::AttributeError);
        decref(five);
    }

    #[test]
    fn render_scalars_and_tuples() {
        let two = int(2);
        let s = new_str("hi").unwrap();
        let t = tuple_of(&[two, s]);
        let text = with(|interp| interp.render(t, true)).unwrap();
        assert_eq!(text, "(2, 'hi')");
        decref(two);
        decref(s);
        decref(t);
        clear_error();
    }

    #[test]
    fn single_element_tuple_has_trailing_comma() {
        let one = int(1);
        let t = tuple_of(&[one]);
        assert_eq!(with(|interp| interp.render(t, false)).unwrap(), "(1,)");
        decref(one);
        decref(t);
    }
}
