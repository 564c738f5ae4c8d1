//! Host object model.

use std::any::Any;
use std::rc::Rc;

use bitflags::bitflags;
use ordered_float::OrderedFloat;
use rustc_hash::FxHashMap;

use crate::heap::ObjRef;

/// Body of a host callable.
///
/// Receives a borrowed argument tuple and an optional borrowed keyword dict.
/// Returns a new reference, or `None` with an exception pending.
pub type HostFnBody = Rc<dyn Fn(ObjRef, Option<ObjRef>) -> Option<ObjRef>>;

bitflags! {
    /// Flags carried by a type object.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TypeFlags: u32 {
        /// Type was created by native code; its attributes are native
        /// implementations and never count as host overrides.
        const NATIVE = 1 << 0;
        /// Type may be used as a base class.
        const BASETYPE = 1 << 1;
    }
}

/// Coarse classification of an object, for shape checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    None,
    Bool,
    Int,
    Float,
    Str,
    Tuple,
    Dict,
    Function,
    Method,
    Type,
    Instance,
    WeakRef,
    Module,
}

impl ObjectKind {
    /// Name used in messages for non-instance objects.
    pub fn name(self) -> &'static str {
        match self {
            ObjectKind::None => "NoneType",
            ObjectKind::Bool => "bool",
            ObjectKind::Int => "int",
            ObjectKind::Float => "float",
            ObjectKind::Str => "str",
            ObjectKind::Tuple => "tuple",
            ObjectKind::Dict => "dict",
            ObjectKind::Function => "builtin_function",
            ObjectKind::Method => "method",
            ObjectKind::Type => "type",
            ObjectKind::Instance => "object",
            ObjectKind::WeakRef => "weakref",
            ObjectKind::Module => "module",
        }
    }
}

pub(crate) enum Object {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Slots stay empty between `tuple_new` and `tuple_set_item`.
    Tuple(Vec<Option<ObjRef>>),
    Dict(FxHashMap<DictKey, (ObjRef, ObjRef)>),
    Function(Function),
    BoundMethod { func: ObjRef, receiver: ObjRef },
    Type(TypeObject),
    Instance(Instance),
    /// Target is not owned.
    WeakRef(ObjRef),
    Module(ModuleObject),
}

pub(crate) struct Function {
    pub(crate) name: String,
    pub(crate) doc: String,
    pub(crate) body: HostFnBody,
}

pub(crate) struct TypeObject {
    pub(crate) name: String,
    pub(crate) doc: String,
    pub(crate) base: Option<ObjRef>,
    pub(crate) attrs: FxHashMap<String, ObjRef>,
    pub(crate) flags: TypeFlags,
}

pub(crate) struct Instance {
    pub(crate) ty: ObjRef,
    pub(crate) dict: FxHashMap<String, ObjRef>,
    pub(crate) payload: Option<Box<dyn Any>>,
}

pub(crate) struct ModuleObject {
    pub(crate) name: String,
    pub(crate) doc: String,
    pub(crate) attrs: FxHashMap<String, ObjRef>,
}

/// Hash key of a dict entry.
///
/// Scalars hash by value, with numerically equal bools, ints and integral
/// floats sharing a key. Everything else hashes by identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum DictKey {
    None,
    Int(i64),
    Float(OrderedFloat<f64>),
    Str(String),
    Identity(ObjRef),
}

impl DictKey {
    pub(crate) fn of(object: &Object, r: ObjRef) -> Self {
        match object {
            Object::None => DictKey::None,
            Object::Bool(b) => DictKey::Int(*b as i64),
            Object::Int(v) => DictKey::Int(*v),
            Object::Float(v) => {
                if v.fract() == 0.0 && *v >= i64::MIN as f64 && *v < i64::MAX as f64 {
                    DictKey::Int(*v as i64)
                } else {
                    DictKey::Float(OrderedFloat(*v))
                }
            }
            Object::Str(s) => DictKey::Str(s.clone()),
            _ => DictKey::Identity(r),
        }
    }
}

impl Object {
    pub(crate) fn kind(&self) -> ObjectKind {
        match self {
            Object::None => ObjectKind::None,
            Object::Bool(_) => ObjectKind::Bool,
            Object::Int(_) => ObjectKind::Int,
            Object::Float(_) => ObjectKind::Float,
            Object::Str(_) => ObjectKind::Str,
            Object::Tuple(_) => ObjectKind::Tuple,
            Object::Dict(_) => ObjectKind::Dict,
            Object::Function(_) => ObjectKind::Function,
            Object::BoundMethod { .. } => ObjectKind::Method,
            Object::Type(_) => ObjectKind::Type,
            Object::Instance(_) => ObjectKind::Instance,
            Object::WeakRef(_) => ObjectKind::WeakRef,
            Object::Module(_) => ObjectKind::Module,
        }
    }

    /// Split a freed object into the references it owned and its native payload.
    pub(crate) fn into_parts(self, owned: &mut Vec<ObjRef>) -> Option<Box<dyn Any>> {
        match self {
            Object::Tuple(items) => {
                owned.extend(items.into_iter().flatten());
                None
            }
            Object::Dict(entries) => {
                for (_, (key, value)) in entries {
                    owned.push(key);
                    owned.push(value);
                }
                None
            }
            Object::BoundMethod { func, receiver } => {
                owned.push(func);
                owned.push(receiver);
                None
            }
            Object::Type(ty) => {
                owned.extend(ty.base);
                owned.extend(ty.attrs.into_values());
                None
            }
            Object::Instance(instance) => {
                owned.push(instance.ty);
                owned.extend(instance.dict.into_values());
                instance.payload
            }
            Object::Module(module) => {
                owned.extend(module.attrs.into_values());
                None
            }
            Object::None
            | Object::Bool(_)
            | Object::Int(_)
            | Object::Float(_)
            | Object::Str(_)
            | Object::Function(_)
            | Object::WeakRef(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_keys_unify() {
        let r = ObjRef::new(0, 0);
        assert_eq!(DictKey::of(&Object::Bool(true), r), DictKey::Int(1));
        assert_eq!(DictKey::of(&Object::Float(1.0), r), DictKey::Int(1));
        assert_eq!(
            DictKey::of(&Object::Float(1.5), r),
            DictKey::Float(OrderedFloat(1.5))
        );
    }

    #[test]
    fn non_scalar_keys_use_identity() {
        let a = ObjRef::new(3, 0);
        let b = ObjRef::new(4, 0);
        assert_ne!(
            DictKey::of(&Object::Tuple(Vec::new()), a),
            DictKey::of(&Object::Tuple(Vec::new()), b)
        );
    }

    #[test]
    fn into_parts_collects_owned_references() {
        let item = ObjRef::new(1, 0);
        let mut owned = Vec::new();
        let payload = Object::Tuple(vec![Some(item), None]).into_parts(&mut owned);
        assert!(payload.is_none());
        assert_eq!(owned, vec![item]);
    }

    #[test]
    fn instance_hands_back_payload() {
        let ty = ObjRef::new(9, 2);
        let instance = Object::Instance(Instance {
            ty,
            dict: FxHashMap::default(),
            payload: Some(Box::new(5u8)),
        });
        let mut owned = Vec::new();
        let payload = instance.into_parts(&mut owned);
        assert_eq!(owned, vec![ty]);
        assert_eq!(payload.and_then(|p| p.downcast::<u8>().ok()).map(|b| *b), Some(5));
    }
}
