//! Exposing native types to the host.
//!
//! An [`ExposedType<T>`] collects a constructor and a method table for `T`
//! and, on [`finalize`](ExposedType::finalize), creates the host class. `T`
//! may be unsized, so a trait object such as `dyn Shape` can be exposed and
//! implemented both natively and by host subclasses.
//!
//! ## Storage rule
//!
//! Every host instance of an exposed class owns exactly one `Rc<T>` as its
//! native payload. The payload is dropped with the instance, releasing the
//! native object if that was its last owner. `Rc<T>` converts to and from the
//! host through the per-thread class table filled in by `finalize`.

use std::any::{TypeId, type_name};
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use hostbind_runtime::{self as rt, ObjRef, TypeFlags};
use rustc_hash::FxHashMap;
use xxhash_rust::xxh64::xxh64;

use crate::adapter::{IntoConstructor, IntoNativeFn, NativeFn};
use crate::convert::{FromHost, ToHost, site_name};
use crate::error::{BridgeError, BridgeResult};
use crate::handle::Handle;

/// Domain markers mixed into tag hashes.
mod tag_constants {
    pub const TYPE: u64 = 0x2fac10b63a6cc57c;
    pub const METHOD: u64 = 0x7d3c8b4a92e15f6d;
}

/// Stable 64-bit identity of an exposed type or method, derived from its name.
///
/// Used in diagnostics; the same name always yields the same tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TypeTag(pub u64);

impl TypeTag {
    #[inline]
    pub fn from_name(name: &str) -> Self {
        TypeTag(tag_constants::TYPE ^ xxh64(name.as_bytes(), 0))
    }

    #[inline]
    pub fn from_method(owner: TypeTag, name: &str) -> Self {
        TypeTag(tag_constants::METHOD ^ owner.0.rotate_left(17) ^ xxh64(name.as_bytes(), 0))
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeTag({:016x})", self.0)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

// ============================================================================
// Class table
// ============================================================================

#[derive(Clone)]
struct ClassRecord {
    type_object: Handle,
    name: Rc<str>,
}

thread_local! {
    static CLASS_TABLE: RefCell<FxHashMap<TypeId, ClassRecord>> =
        RefCell::new(FxHashMap::default());
}

fn lookup_class<T: ?Sized + 'static>() -> Option<ClassRecord> {
    CLASS_TABLE.with(|table| table.borrow().get(&TypeId::of::<T>()).cloned())
}

fn is_registered<T: ?Sized + 'static>() -> bool {
    CLASS_TABLE.with(|table| table.borrow().contains_key(&TypeId::of::<T>()))
}

fn not_exposed<T: ?Sized>() -> BridgeError {
    BridgeError::registration(format!("type {} has not been exposed", type_name::<T>()))
}

/// Host class registered for `T` on this thread, if any.
pub fn exposed_type_object<T: ?Sized + 'static>() -> Option<Handle> {
    lookup_class::<T>().map(|record| record.type_object)
}

/// Make `value` the native payload of the host instance `this`.
pub(crate) fn attach_payload<T: ?Sized + 'static>(
    this: &Handle,
    value: Rc<T>,
    site: &str,
) -> BridgeResult<()> {
    if rt::instance_set_payload(this.ptr(), Box::new(value)) {
        Ok(())
    } else {
        Err(BridgeError::pending(site))
    }
}

fn payload_of<T: ?Sized + 'static>(obj: ObjRef) -> Option<Rc<T>> {
    rt::with_payload(obj, |payload| {
        payload
            .and_then(|payload| payload.downcast_ref::<Rc<T>>())
            .cloned()
    })
}

impl<T: ?Sized + 'static> FromHost for Rc<T> {
    fn from_host(handle: &Handle, site: Option<&str>) -> BridgeResult<Self> {
        let record = lookup_class::<T>().ok_or_else(not_exposed::<T>)?;
        if !handle.is_instance(&record.type_object) {
            return Err(BridgeError::conversion(
                site_name(site),
                &*record.name,
                handle.type_name(),
            ));
        }
        payload_of::<T>(handle.ptr()).ok_or_else(|| {
            BridgeError::conversion(
                site_name(site),
                format!("initialized {}", record.name),
                format!("uninitialized {}", handle.type_name()),
            )
        })
    }
}

impl<T: ?Sized + 'static> ToHost for Rc<T> {
    /// Wrap the shared object in a fresh host instance of its exposed class.
    fn to_host(self) -> BridgeResult<Handle> {
        let record = lookup_class::<T>().ok_or_else(not_exposed::<T>)?;
        let instance = Handle::adopt_at(rt::instance_new(record.type_object.ptr()), &record.name)?;
        attach_payload::<T>(&instance, self, &record.name)?;
        Ok(instance)
    }
}

// ============================================================================
// Exposed type record
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureState {
    /// Created, nothing attached yet.
    Unregistered,
    /// Constructor or methods attached; still open.
    Attached,
    /// Host class created; closed for changes.
    Finalized,
}

struct MethodEntry {
    name: String,
    doc: String,
    func: NativeFn,
}

/// Builder for the host class of native type `T`.
pub struct ExposedType<T: ?Sized + 'static> {
    name: String,
    doc: String,
    tag: TypeTag,
    constructor: Option<NativeFn>,
    methods: Vec<MethodEntry>,
    state: ExposureState,
    type_object: Option<Handle>,
    _marker: PhantomData<fn() -> Rc<T>>,
}

impl<T: ?Sized + 'static> ExposedType<T> {
    pub fn new(name: &str, doc: &str) -> Self {
        Self {
            name: name.to_string(),
            doc: doc.to_string(),
            tag: TypeTag::from_name(name),
            constructor: None,
            methods: Vec::new(),
            state: ExposureState::Unregistered,
            type_object: None,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    pub fn state(&self) -> ExposureState {
        self.state
    }

    /// Host class object, once finalized.
    pub fn type_object(&self) -> Option<&Handle> {
        self.type_object.as_ref()
    }

    fn ensure_open(&self, what: &str) -> BridgeResult<()> {
        if self.state == ExposureState::Finalized {
            return Err(BridgeError::registration(format!(
                "cannot add {what} to type '{}' after it has been finalized",
                self.name
            )));
        }
        Ok(())
    }

    /// Set the constructor run by `__init__`. A later call replaces an
    /// earlier one.
    pub fn add_constructor<F, Args>(&mut self, f: F) -> BridgeResult<&mut Self>
    where
        F: IntoConstructor<T, Args>,
    {
        self.ensure_open("a constructor")?;
        self.constructor = Some(f.into_constructor(&self.name));
        self.state = ExposureState::Attached;
        Ok(self)
    }

    /// Add a method. The receiver arrives as the first argument, typically as
    /// `Rc<T>`.
    pub fn add_method<F, Args>(&mut self, name: &str, doc: &str, f: F) -> BridgeResult<&mut Self>
    where
        F: IntoNativeFn<Args>,
    {
        let func = f.into_native_fn(&format!("{}.{}", self.name, name));
        self.add_native_method(name, doc, func)
    }

    /// Add a method from an already type-erased function.
    pub fn add_native_method(&mut self, name: &str, doc: &str, func: NativeFn) -> BridgeResult<&mut Self> {
        self.ensure_open("a method")?;
        if name == "__init__" {
            return Err(BridgeError::registration(format!(
                "use add_constructor to set {}.__init__",
                self.name
            )));
        }
        if self.methods.iter().any(|m| m.name == name) {
            return Err(BridgeError::registration(format!(
                "method '{}.{}' is already defined",
                self.name, name
            )));
        }
        self.methods.push(MethodEntry {
            name: name.to_string(),
            doc: doc.to_string(),
            func,
        });
        self.state = ExposureState::Attached;
        Ok(self)
    }

    /// Create the host class and register it for `T` on this thread.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn finalize(&mut self) -> BridgeResult<Handle> {
        if self.state == ExposureState::Finalized {
            return Err(BridgeError::registration(format!(
                "type '{}' has already been finalized",
                self.name
            )));
        }
        if is_registered::<T>() {
            return Err(BridgeError::registration(format!(
                "native type {} is already exposed on this thread",
                type_name::<T>()
            )));
        }

        let mut attrs: Vec<(String, Handle)> = Vec::with_capacity(self.methods.len() + 1);
        if let Some(constructor) = &self.constructor {
            attrs.push(("__init__".to_string(), constructor.clone().into_host_function("")?));
        }
        for method in &self.methods {
            tracing::trace!(
                method = %method.name,
                tag = %TypeTag::from_method(self.tag, &method.name),
                "binding method"
            );
            attrs.push((method.name.clone(), method.func.clone().into_host_function(&method.doc)?));
        }

        let raw_attrs: Vec<(&str, ObjRef)> = attrs
            .iter()
            .map(|(name, func)| (name.as_str(), func.ptr()))
            .collect();
        let type_object = Handle::adopt_at(
            rt::type_new(
                &self.name,
                &self.doc,
                None,
                &raw_attrs,
                TypeFlags::NATIVE | TypeFlags::BASETYPE,
            ),
            &self.name,
        )?;

        CLASS_TABLE.with(|table| {
            table.borrow_mut().insert(
                TypeId::of::<T>(),
                ClassRecord {
                    type_object: type_object.clone(),
                    name: Rc::from(self.name.as_str()),
                },
            )
        });
        self.state = ExposureState::Finalized;
        self.type_object = Some(type_object.clone());

        tracing::debug!(
            type_name = %self.name,
            tag = %self.tag,
            methods = self.methods.len(),
            constructible = self.constructor.is_some(),
            "exposed native type"
        );
        Ok(type_object)
    }
}

impl<T: ?Sized + 'static> fmt::Debug for ExposedType<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExposedType")
            .field("name", &self.name)
            .field("tag", &self.tag)
            .field("state", &self.state)
            .field("methods", &self.methods.iter().map(|m| &m.name).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::views::TupleView;
    use hostbind_runtime::ExceptionKind;

    #[derive(Debug)]
    struct Counter {
        start: i64,
    }

    impl Counter {
        fn value(&self) -> i64 {
            self.start
        }
    }

    fn expose_counter() -> Handle {
        let mut ty = ExposedType::<Counter>::new("Counter", "counts");
        ty.add_constructor(|_this: &Handle, start: i64| Rc::new(Counter { start }))
            .unwrap()
            .add_method("value", "current value", |c: Rc<Counter>| c.value())
            .unwrap();
        ty.finalize().unwrap()
    }

    #[test]
    fn tags_are_deterministic() {
        assert_eq!(TypeTag::from_name("X"), TypeTag::from_name("X"));
        assert_ne!(TypeTag::from_name("X"), TypeTag::from_name("Y"));
        let x = TypeTag::from_name("X");
        assert_ne!(TypeTag::from_method(x, "get"), TypeTag::from_method(x, "set"));
    }

    #[test]
    fn instantiate_and_call_method() {
        let counter = expose_counter();
        let obj = counter.call(&TupleView::make((5i64,)).unwrap()).unwrap();
        assert_eq!(obj.type_name(), "Counter");

        let value = obj.call_method("value", &TupleView::make(()).unwrap()).unwrap();
        assert_eq!(i64::from_host(&value, None).unwrap(), 5);

        let shared = Rc::<Counter>::from_host(&obj, None).unwrap();
        assert_eq!(shared.value(), 5);
    }

    #[test]
    fn rc_to_host_wraps_in_new_instance() {
        let counter = expose_counter();
        let native = Rc::new(Counter { start: 9 });
        let obj = Rc::clone(&native).to_host().unwrap();
        assert!(obj.is_instance(&counter));
        assert_eq!(Rc::strong_count(&native), 2);
        drop(obj);
        assert_eq!(Rc::strong_count(&native), 1);
    }

    #[test]
    fn wrong_instance_type_is_conversion_error() {
        expose_counter();
        let not_counter = 3i64.to_host().unwrap();
        let err = Rc::<Counter>::from_host(&not_counter, Some("arg")).unwrap_err();
        assert_eq!(err, BridgeError::conversion("arg", "Counter", "int"));
    }

    #[test]
    fn unexposed_type_is_registration_error() {
        struct Hidden;
        let err = Rc::new(Hidden).to_host().unwrap_err();
        assert!(matches!(err, BridgeError::Registration { .. }));
    }

    #[test]
    fn finalize_twice_fails() {
        let mut ty = ExposedType::<u8>::new("Byte", "");
        assert_eq!(ty.state(), ExposureState::Unregistered);
        ty.finalize().unwrap();
        assert_eq!(ty.state(), ExposureState::Finalized);
        assert!(matches!(ty.finalize(), Err(BridgeError::Registration { .. })));
    }

    #[test]
    fn attach_after_finalize_fails() {
        let mut ty = ExposedType::<u16>::new("Short", "");
        ty.finalize().unwrap();
        let err = ty.add_method("get", "", |v: Rc<u16>| *v).unwrap_err();
        assert!(matches!(err, BridgeError::Registration { .. }));
        let err = ty
            .add_constructor(|_this: &Handle| Rc::new(0u16))
            .unwrap_err();
        assert!(matches!(err, BridgeError::Registration { .. }));
    }

    #[test]
    fn same_native_type_cannot_be_exposed_twice() {
        let mut first = ExposedType::<u32>::new("First", "");
        first.finalize().unwrap();
        let mut second = ExposedType::<u32>::new("Second", "");
        assert!(matches!(second.finalize(), Err(BridgeError::Registration { .. })));
    }

    #[test]
    fn no_constructor_means_not_instantiable() {
        let mut ty = ExposedType::<i8>::new("Opaque", "");
        let class = ty.finalize().unwrap();
        let err = class.call(&TupleView::make(()).unwrap()).unwrap_err();
        assert_eq!(err.exception_kind(), ExceptionKind::TypeError);
        assert!(err.to_string().contains("cannot create 'Opaque' instances"));
    }

    #[test]
    fn duplicate_method_is_rejected() {
        let mut ty = ExposedType::<i16>::new("Dup", "");
        ty.add_method("m", "", |_: Rc<i16>| 0i32).unwrap();
        assert!(ty.add_method("m", "", |_: Rc<i16>| 1i32).is_err());
    }

    #[test]
    fn constructor_arity_excludes_receiver() {
        let counter = expose_counter();
        let err = counter.call(&TupleView::make(()).unwrap()).unwrap_err();
        assert!(err.to_string().contains("Counter() takes 1 positional arguments but 0 were given"));
    }
}
