//! Up-calls from native virtual methods into host overrides.
//!
//! When a host class derives from an exposed native type, its constructor
//! gives the native object a [`WeakBackRef`] to the host instance. Native code
//! that is asked to run a virtual method then looks for an override on that
//! instance and calls it:
//!
//! ```ignore
//! impl Shape for HostShape {
//!     fn area(&self) -> BridgeResult<f64> {
//!         self.back.call_override("area", ())
//!     }
//! }
//! ```
//!
//! The back-reference is weak: the host instance owns the native object, not
//! the other way round, so native code may outlive the instance and must cope
//! with [`BridgeError::Expired`].

use hostbind_runtime as rt;

use crate::convert::FromHost;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::Handle;
use crate::views::ToArgs;

/// Weak reference from a native object to the host instance wrapping it.
#[derive(Clone)]
pub struct WeakBackRef {
    weak: Handle,
    owner: String,
}

impl WeakBackRef {
    /// Weakly reference `target`, which must be a class instance.
    pub fn new(target: &Handle) -> BridgeResult<Self> {
        let weak = Handle::adopt_at(rt::weakref_new(target.ptr()), "weak reference")?;
        Ok(Self {
            weak,
            owner: target.type_name(),
        })
    }

    /// Class name of the instance at the time the reference was taken.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn is_alive(&self) -> bool {
        match Handle::adopt(rt::weakref_upgrade(self.weak.ptr())) {
            Ok(strong) => !strong.is_none(),
            Err(_) => false,
        }
    }

    /// Strong handle to the host instance, or [`BridgeError::Expired`].
    pub fn upgrade(&self) -> BridgeResult<Handle> {
        self.upgrade_at(&self.owner)
    }

    fn upgrade_at(&self, site: &str) -> BridgeResult<Handle> {
        let strong = Handle::adopt_at(rt::weakref_upgrade(self.weak.ptr()), site)?;
        if strong.is_none() {
            tracing::debug!(site, "weak back-reference used after its host object was released");
            return Err(BridgeError::Expired {
                site: site.to_string(),
            });
        }
        Ok(strong)
    }

    /// Host override of `name`, bound to the instance, if the instance
    /// provides one.
    ///
    /// Only the instance's own attributes and host-defined classes are
    /// searched; the native class's own methods never count, so a native
    /// method that dispatches here cannot end up calling itself.
    pub fn lookup_override(&self, name: &str) -> BridgeResult<Option<Handle>> {
        let site = format!("{}.{}", self.owner, name);
        let target = self.upgrade_at(&site)?;
        match rt::find_override(target.ptr(), name) {
            Some(method) => Handle::adopt_at(Some(method), &site).map(Some),
            None if rt::error_occurred() => Err(BridgeError::pending(site)),
            None => Ok(None),
        }
    }

    /// Call the host override of `name` with `args` and convert its result.
    ///
    /// Fails with [`BridgeError::Unimplemented`] when there is no override;
    /// host exceptions raised by the override come back as `Pending`.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn call_override<R, A>(&self, name: &str, args: A) -> BridgeResult<R>
    where
        R: FromHost,
        A: ToArgs,
    {
        let site = format!("{}.{}", self.owner, name);
        let Some(method) = self.lookup_override(name)? else {
            return Err(BridgeError::Unimplemented {
                type_name: self.owner.clone(),
                method: name.to_string(),
            });
        };
        let result = method.call(&args.into_args()?)?;
        R::from_host(&result, Some(&site))
    }
}

impl std::fmt::Debug for WeakBackRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakBackRef")
            .field("owner", &self.owner)
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::adapter::NativeFn;
    use crate::views::TupleView;
    use hostbind_runtime::{ExceptionKind, TypeFlags};

    /// Plain host class `name` with the given methods.
    fn host_class(name: &str, methods: &[(&str, NativeFn)]) -> Handle {
        let funcs: Vec<(String, Handle)> = methods
            .iter()
            .map(|(n, f)| (n.to_string(), f.clone().into_host_function("").unwrap()))
            .collect();
        let attrs: Vec<(&str, rt::ObjRef)> = funcs.iter().map(|(n, f)| (n.as_str(), f.ptr())).collect();
        Handle::adopt(rt::type_new(name, "", None, &attrs, TypeFlags::BASETYPE)).unwrap()
    }

    #[test]
    fn calls_host_override() {
        let class = host_class(
            "Doubler",
            &[("f", NativeFn::wrap("f", |_this: Handle, n: i64| n * 2))],
        );
        let obj = class.call(&TupleView::make(()).unwrap()).unwrap();
        let back = WeakBackRef::new(&obj).unwrap();

        let out: i64 = back.call_override("f", (21i64,)).unwrap();
        assert_eq!(out, 42);
        assert_eq!(back.owner(), "Doubler");
    }

    #[test]
    fn missing_override_is_unimplemented() {
        let class = host_class("Empty", &[]);
        let obj = class.call(&TupleView::make(()).unwrap()).unwrap();
        let back = WeakBackRef::new(&obj).unwrap();

        assert!(back.lookup_override("f").unwrap().is_none());
        let err = back.call_override::<i64, _>("f", (1i64,)).unwrap_err();
        assert_eq!(err.exception_kind(), ExceptionKind::NotImplementedError);
    }

    #[test]
    fn expires_with_instance() {
        let class = host_class("Short", &[]);
        let obj = class.call(&TupleView::make(()).unwrap()).unwrap();
        let back = WeakBackRef::new(&obj).unwrap();
        assert!(back.is_alive());

        drop(obj);
        assert!(!back.is_alive());
        let err = back.call_override::<i64, _>("f", ()).unwrap_err();
        assert!(matches!(err, BridgeError::Expired { .. }));
        assert_eq!(err.exception_kind(), ExceptionKind::ReferenceError);
    }

    #[test]
    fn back_reference_does_not_keep_instance_alive() {
        let class = host_class("Light", &[]);
        let obj = class.call(&TupleView::make(()).unwrap()).unwrap();
        let before = obj.refcount();
        let back = Rc::new(WeakBackRef::new(&obj).unwrap());
        assert_eq!(obj.refcount(), before);
        drop(back);
    }

    #[test]
    fn override_exception_passes_through() {
        let class = host_class(
            "Raiser",
            &[(
                "f",
                NativeFn::new("f", |_: &TupleView, _: &crate::views::DictView| -> BridgeResult<Handle> {
                    rt::set_error(ExceptionKind::ValueError, "bad input");
                    Err(BridgeError::pending("f"))
                }),
            )],
        );
        let obj = class.call(&TupleView::make(()).unwrap()).unwrap();
        let back = WeakBackRef::new(&obj).unwrap();
        let err = back.call_override::<i64, _>("f", ()).unwrap_err();
        assert!(err.is_pending());
        assert_eq!(err.exception_kind(), ExceptionKind::ValueError);
    }

    #[test]
    fn scalar_cannot_be_weakly_referenced() {
        let n = Handle::adopt(rt::new_int(1)).unwrap();
        let err = WeakBackRef::new(&n).unwrap_err();
        assert_eq!(err.exception_kind(), ExceptionKind::TypeError);
    }
}
