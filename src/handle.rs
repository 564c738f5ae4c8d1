//! Owning handle around one host object reference.

use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::rc::Rc;

use hostbind_runtime::{self as rt, ObjRef, ObjectKind};

use crate::error::{BridgeError, BridgeResult};
use crate::views::{DictView, TupleView};

/// One share of a host object.
///
/// A `Handle` is never null: constructing one from a null result yields
/// [`BridgeError::Pending`] instead. Cloning takes another share, moving
/// transfers this one, dropping releases it.
///
/// Handles are tied to the thread whose runtime owns the object, so they are
/// neither `Send` nor `Sync`.
pub struct Handle {
    ptr: ObjRef,
    _thread: PhantomData<Rc<()>>,
}

impl Handle {
    /// Take over a new reference. `None` means the runtime failed and has an
    /// exception pending.
    pub fn adopt(raw: Option<ObjRef>) -> BridgeResult<Self> {
        Self::adopt_at(raw, "adopt")
    }

    /// Take an extra share of a reference owned elsewhere.
    pub fn borrow(raw: Option<ObjRef>) -> BridgeResult<Self> {
        Self::borrow_at(raw, "borrow")
    }

    pub(crate) fn adopt_at(raw: Option<ObjRef>, site: &str) -> BridgeResult<Self> {
        match raw {
            Some(ptr) => Ok(Self {
                ptr,
                _thread: PhantomData,
            }),
            None => Err(BridgeError::pending(site)),
        }
    }

    pub(crate) fn borrow_at(raw: Option<ObjRef>, site: &str) -> BridgeResult<Self> {
        match raw {
            Some(ptr) => {
                rt::incref(ptr);
                Ok(Self {
                    ptr,
                    _thread: PhantomData,
                })
            }
            None => Err(BridgeError::pending(site)),
        }
    }

    /// The runtime's `None`.
    pub fn none() -> Self {
        let ptr = rt::none();
        rt::incref(ptr);
        Self {
            ptr,
            _thread: PhantomData,
        }
    }

    /// Borrowed raw reference, valid while `self` is alive.
    pub fn ptr(&self) -> ObjRef {
        self.ptr
    }

    /// Give this share back to the caller as a raw new reference.
    pub fn into_ptr(self) -> ObjRef {
        let ptr = self.ptr;
        mem::forget(self);
        ptr
    }

    /// Point this handle at `other`'s object.
    ///
    /// The new object gains its share before the old one loses this one, so
    /// self-assignment never frees anything.
    pub fn assign(&mut self, other: &Handle) {
        rt::incref(other.ptr);
        let old = mem::replace(&mut self.ptr, other.ptr);
        rt::decref(old);
    }

    /// Whether both handles name the same object.
    pub fn is(&self, other: &Handle) -> bool {
        self.ptr == other.ptr
    }

    /// Current share count, this handle's share included.
    pub fn refcount(&self) -> u32 {
        rt::refcount(self.ptr).unwrap_or(0)
    }

    /// Whether this is the runtime's `None`.
    pub fn is_none(&self) -> bool {
        self.ptr == rt::none()
    }

    /// Whether the object is a tuple.
    pub fn is_tuple(&self) -> bool {
        rt::kind(self.ptr) == Some(ObjectKind::Tuple)
    }

    /// Whether the object is a dict.
    pub fn is_dict(&self) -> bool {
        rt::kind(self.ptr) == Some(ObjectKind::Dict)
    }

    /// Whether the object is a function, bound method or class.
    pub fn is_callable(&self) -> bool {
        rt::is_callable(self.ptr)
    }

    /// Storage kind of the object. `None` only for a stale reference.
    pub fn kind(&self) -> Option<ObjectKind> {
        rt::kind(self.ptr)
    }

    /// Type name as the runtime reports it: the class name for instances.
    pub fn type_name(&self) -> String {
        rt::type_name(self.ptr)
    }

    /// Whether this object is an instance of the class `ty` or a subclass.
    pub fn is_instance(&self, ty: &Handle) -> bool {
        rt::is_instance(self.ptr, ty.ptr)
    }

    /// `self(*args)`. Callability is not checked up front; the runtime raises
    /// TypeError for non-callables.
    pub fn call(&self, args: &TupleView) -> BridgeResult<Handle> {
        Self::adopt_at(rt::call(self.ptr, args.ptr(), None), "call")
    }

    /// `self(*args, **kwargs)`.
    pub fn call_with(&self, args: &TupleView, kwargs: &DictView) -> BridgeResult<Handle> {
        Self::adopt_at(rt::call(self.ptr, args.ptr(), Some(kwargs.ptr())), "call")
    }

    /// `self.name`. A missing attribute raises AttributeError.
    pub fn getattr(&self, name: &str) -> BridgeResult<Handle> {
        Self::adopt_at(rt::getattr(self.ptr, name), name)
    }

    /// `self.name = value`. The object takes its own share of `value`.
    pub fn setattr(&self, name: &str, value: &Handle) -> BridgeResult<()> {
        if rt::setattr(self.ptr, name, value.ptr) {
            Ok(())
        } else {
            Err(BridgeError::pending(name))
        }
    }

    /// `self.name(*args)`.
    pub fn call_method(&self, name: &str, args: &TupleView) -> BridgeResult<Handle> {
        self.getattr(name)?.call(args)
    }

    /// `str(self)` as a host string object.
    pub fn str(&self) -> BridgeResult<Handle> {
        Self::adopt_at(rt::object_str(self.ptr), "str")
    }

    /// `repr(self)` as a host string object.
    pub fn repr(&self) -> BridgeResult<Handle> {
        Self::adopt_at(rt::object_repr(self.ptr), "repr")
    }

    /// `str(self)` as a Rust string.
    pub fn to_text(&self) -> BridgeResult<String> {
        let text = self.str()?;
        rt::as_string(text.ptr).ok_or_else(|| BridgeError::pending("str"))
    }
}

impl Clone for Handle {
    fn clone(&self) -> Self {
        rt::incref(self.ptr);
        Self {
            ptr: self.ptr,
            _thread: PhantomData,
        }
    }

    fn clone_from(&mut self, source: &Self) {
        self.assign(source);
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        rt::decref(self.ptr);
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::none()
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        self.is(other)
    }
}

impl Eq for Handle {}

/// Writes `str(self)`. A failing `__str__` is rendered as a placeholder; the
/// host exception it raised is consumed, not left pending.
impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_text() {
            Ok(text) => f.write_str(&text),
            Err(err) => write!(f, "<{} object (str() failed: {err})>", self.type_name()),
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("ptr", &format_args!("{}", self.ptr))
            .field("type", &self.type_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::NativeFn;

    /// Instance of a fresh host class carrying the given methods.
    fn instance_with(class_name: &str, methods: Vec<(&str, NativeFn)>) -> Handle {
        let funcs: Vec<(String, Handle)> = methods
            .into_iter()
            .map(|(name, func)| (name.to_string(), func.into_host_function("").unwrap()))
            .collect();
        let attrs: Vec<(&str, ObjRef)> = funcs.iter().map(|(n, f)| (n.as_str(), f.ptr())).collect();
        let class = Handle::adopt(rt::type_new(class_name, "", None, &attrs, rt::TypeFlags::BASETYPE))
            .unwrap();
        class.call(&TupleView::make(()).unwrap()).unwrap()
    }

    /// Runs its closure when the owning instance is freed.
    struct ReleaseHook(Box<dyn FnMut()>);

    impl Drop for ReleaseHook {
        fn drop(&mut self) {
            (self.0)()
        }
    }

    fn instance_with_hook(hook: impl FnMut() + 'static) -> Handle {
        let class = Handle::adopt(rt::type_new("Hooked", "", None, &[], rt::TypeFlags::BASETYPE)).unwrap();
        let obj = Handle::adopt(rt::instance_new(class.ptr())).unwrap();
        assert!(rt::instance_set_payload(obj.ptr(), Box::new(ReleaseHook(Box::new(hook)))));
        obj
    }

    fn returning(name: &str, text: &'static str) -> NativeFn {
        NativeFn::wrap(name, move |_this: Handle| text)
    }

    fn int(v: i64) -> Handle {
        Handle::adopt(rt::new_int(v)).unwrap()
    }

    #[test]
    fn clone_and_drop_balance() {
        let h = int(10);
        assert_eq!(h.refcount(), 1);
        let copy = h.clone();
        assert_eq!(h.refcount(), 2);
        drop(copy);
        assert_eq!(h.refcount(), 1);
    }

    #[test]
    fn move_does_not_touch_count() {
        let h = int(11);
        let moved = h;
        assert_eq!(moved.refcount(), 1);
    }

    #[test]
    fn self_assignment_keeps_object_alive() {
        let mut h = int(12);
        let alias = h.clone();
        h.assign(&alias);
        assert_eq!(h.refcount(), 2);
        drop(alias);
        assert_eq!(h.refcount(), 1);
        assert!(rt::is_live(h.ptr()));
    }

    #[test]
    fn assign_from_unowned_alias_never_frees() {
        let freed = Rc::new(std::cell::Cell::new(false));
        let flag = Rc::clone(&freed);
        let mut h = instance_with_hook(move || flag.set(true));
        assert_eq!(h.refcount(), 1);

        // Same object, holding no share of its own.
        let alias = mem::ManuallyDrop::new(Handle {
            ptr: h.ptr(),
            _thread: PhantomData,
        });
        h.assign(&alias);
        assert!(!freed.get());
        assert_eq!(h.refcount(), 1);

        drop(h);
        assert!(freed.get());
    }

    #[test]
    fn assign_shares_new_object_before_releasing_old() {
        let target = Handle::adopt(rt::new_str("target")).unwrap();
        let watched = target.ptr();
        let seen = Rc::new(std::cell::Cell::new(None));
        let slot = Rc::clone(&seen);
        let mut h = instance_with_hook(move || slot.set(Some(rt::refcount(watched))));

        h.assign(&target);
        // When the old object went away the new one already had both shares.
        assert_eq!(seen.get(), Some(Some(2)));
        assert!(h.is(&target));
    }

    #[test]
    fn clone_from_switches_objects() {
        let mut a = int(1);
        let b = int(2);
        let old = a.ptr();
        a.clone_from(&b);
        assert!(a.is(&b));
        assert_eq!(b.refcount(), 2);
        assert!(!rt::is_live(old));
    }

    #[test]
    fn adopting_null_is_pending() {
        rt::set_error(rt::ExceptionKind::ValueError, "boom");
        let err = Handle::adopt(None).unwrap_err();
        assert!(matches!(err, BridgeError::Pending { .. }));
        assert_eq!(err.exception_kind(), rt::ExceptionKind::ValueError);
    }

    #[test]
    fn borrow_takes_a_share() {
        let raw = rt::new_str("shared").unwrap();
        let h = Handle::borrow(Some(raw)).unwrap();
        assert_eq!(h.refcount(), 2);
        rt::decref(raw);
        assert_eq!(h.refcount(), 1);
    }

    #[test]
    fn into_ptr_hands_over_the_share() {
        let h = int(5);
        let raw = h.into_ptr();
        assert_eq!(rt::refcount(raw), Some(1));
        drop(Handle::adopt(Some(raw)).unwrap());
        assert!(!rt::is_live(raw));
    }

    #[test]
    fn none_and_predicates() {
        let n = Handle::default();
        assert!(n.is_none());
        assert!(!n.is_tuple());
        assert!(!n.is_callable());
        assert_eq!(n.to_text().unwrap(), "None");
    }

    #[test]
    fn display_uses_str() {
        let h = int(42);
        assert_eq!(h.to_string(), "42");
        let s = Handle::adopt(rt::new_str("text")).unwrap();
        assert_eq!(format!("{s}"), "text");
        assert_eq!(s.repr().unwrap().to_text().unwrap(), "'text'");
    }

    #[test]
    fn missing_attribute_is_pending_attribute_error() {
        let h = int(3);
        let err = h.getattr("nope").unwrap_err();
        assert_eq!(err.exception_kind(), rt::ExceptionKind::AttributeError);
    }

    #[test]
    fn host_str_and_repr_hooks_are_used() {
        let obj = instance_with(
            "Pretty",
            vec![("__str__", returning("__str__", "pretty")), ("__repr__", returning("__repr__", "Pretty()"))],
        );
        assert_eq!(obj.to_text().unwrap(), "pretty");
        assert_eq!(obj.repr().unwrap().to_text().unwrap(), "Pretty()");
        assert_eq!(obj.to_string(), "pretty");
    }

    #[test]
    fn str_falls_back_to_repr_hook() {
        let obj = instance_with("OnlyRepr", vec![("__repr__", returning("__repr__", "OnlyRepr()"))]);
        assert_eq!(obj.to_text().unwrap(), "OnlyRepr()");
    }

    #[test]
    fn instance_without_hooks_has_default_text() {
        let obj = instance_with("Plain", Vec::new());
        assert!(obj.to_text().unwrap().starts_with("<Plain object at "));
    }

    #[test]
    fn raising_str_hook_is_pending_error() {
        let raising = NativeFn::wrap("__str__", |_this: Handle| -> BridgeResult<String> {
            Err(BridgeError::native("no text today"))
        });
        let obj = instance_with("Shy", vec![("__str__", raising)]);

        let err = obj.str().unwrap_err();
        assert_eq!(err.exception_kind(), rt::ExceptionKind::RuntimeError);
        assert!(matches!(err, BridgeError::Pending { ref exception, .. } if exception.message == "no text today"));
        assert!(obj.to_text().is_err());
        assert!(!rt::error_occurred());
    }

    #[test]
    fn non_string_hooks_are_type_errors() {
        let obj = instance_with(
            "Numeric",
            vec![
                ("__str__", NativeFn::wrap("__str__", |_this: Handle| 5i64)),
                ("__repr__", NativeFn::wrap("__repr__", |_this: Handle| 6i64)),
            ],
        );

        let err = obj.str().unwrap_err();
        assert_eq!(err.exception_kind(), rt::ExceptionKind::TypeError);
        assert!(err.to_string().contains("__str__ returned non-string (type int)"), "{err}");

        let err = obj.repr().unwrap_err();
        assert!(err.to_string().contains("__repr__ returned non-string (type int)"), "{err}");
        assert!(!rt::error_occurred());
    }

    #[test]
    fn display_renders_placeholder_when_str_fails() {
        let obj = instance_with("Numeric", vec![("__str__", NativeFn::wrap("__str__", |_this: Handle| 5i64))]);
        let text = obj.to_string();
        assert!(text.starts_with("<Numeric object (str() failed: "), "{text}");
        assert!(text.contains("__str__ returned non-string"), "{text}");
        assert!(!rt::error_occurred());
    }
}
