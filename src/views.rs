//! Shape-checked handles: positional arguments and keyword arguments.

use std::ops::Deref;

use hostbind_runtime as rt;

use crate::convert::ToHost;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::Handle;

fn index_arg(index: usize) -> isize {
    isize::try_from(index).unwrap_or(isize::MAX)
}

/// A handle known to refer to a host tuple.
#[derive(Clone, PartialEq, Eq)]
pub struct TupleView {
    handle: Handle,
}

impl TupleView {
    /// Check `handle` is a tuple. `site` names the caller in the error.
    pub fn new(handle: Handle, site: &str) -> BridgeResult<Self> {
        if !handle.is_tuple() {
            return Err(BridgeError::conversion(site, "tuple", handle.type_name()));
        }
        Ok(Self { handle })
    }

    /// Tuple of `len` empty slots.
    pub fn make_empty(len: usize) -> BridgeResult<Self> {
        let handle = Handle::adopt_at(rt::tuple_new(index_arg(len)), "tuple")?;
        Ok(Self { handle })
    }

    /// Tuple built from a Rust tuple of convertible values, in order.
    pub fn make<A: ToArgs>(values: A) -> BridgeResult<Self> {
        values.into_args()
    }

    /// Re-point this view, re-checking the shape. On failure the view is
    /// left unchanged.
    pub fn assign(&mut self, other: &Handle, site: &str) -> BridgeResult<()> {
        if !other.is_tuple() {
            return Err(BridgeError::conversion(site, "tuple", other.type_name()));
        }
        self.handle.assign(other);
        Ok(())
    }

    /// Number of slots, set or not.
    pub fn size(&self) -> usize {
        usize::try_from(rt::tuple_size(self.handle.ptr())).unwrap_or(0)
    }

    /// Whether the tuple has no slots.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Element `index`. Out of range raises IndexError.
    pub fn get(&self, index: usize) -> BridgeResult<Handle> {
        Handle::borrow_at(rt::tuple_get_item(self.handle.ptr(), index_arg(index)), "tuple item")
    }

    /// Store a share of `value` at `index`.
    ///
    /// The share is taken only once the runtime has accepted the write; a
    /// rejected write leaves both the tuple and `value` untouched.
    pub fn set(&self, index: usize, value: &Handle) -> BridgeResult<()> {
        if rt::tuple_set_item(self.handle.ptr(), index_arg(index), value.ptr()) {
            rt::incref(value.ptr());
            Ok(())
        } else {
            Err(BridgeError::pending("tuple item assignment"))
        }
    }

    /// Elements in order, each as its own share.
    pub fn iter(&self) -> impl Iterator<Item = BridgeResult<Handle>> + '_ {
        (0..self.size()).map(move |i| self.get(i))
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Drop the tuple guarantee and keep the share.
    pub fn into_handle(self) -> Handle {
        self.handle
    }
}

impl Deref for TupleView {
    type Target = Handle;

    fn deref(&self) -> &Handle {
        &self.handle
    }
}

impl std::fmt::Debug for TupleView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TupleView").field(&self.handle).finish()
    }
}

/// A handle known to refer to a host dict.
#[derive(Clone, PartialEq, Eq)]
pub struct DictView {
    handle: Handle,
}

impl DictView {
    /// Fresh, empty dict.
    pub fn new() -> BridgeResult<Self> {
        let handle = Handle::adopt_at(rt::dict_new(), "dict")?;
        Ok(Self { handle })
    }

    /// Check `handle` is a dict. `site` names the caller in the error.
    pub fn from_handle(handle: Handle, site: &str) -> BridgeResult<Self> {
        if !handle.is_dict() {
            return Err(BridgeError::conversion(site, "dict", handle.type_name()));
        }
        Ok(Self { handle })
    }

    /// Re-point this view at another dict; a non-dict leaves it unchanged.
    pub fn assign(&mut self, other: &Handle, site: &str) -> BridgeResult<()> {
        if !other.is_dict() {
            return Err(BridgeError::conversion(site, "dict", other.type_name()));
        }
        self.handle.assign(other);
        Ok(())
    }

    /// Number of entries.
    pub fn size(&self) -> usize {
        usize::try_from(rt::dict_size(self.handle.ptr())).unwrap_or(0)
    }

    /// Whether the dict has no entries.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Tuple of the dict's keys.
    pub fn keys(&self) -> BridgeResult<TupleView> {
        let keys = Handle::adopt_at(rt::dict_keys(self.handle.ptr()), "dict keys")?;
        TupleView::new(keys, "dict keys")
    }

    /// Keys rendered as text, sorted, for diagnostics.
    pub fn key_names(&self) -> BridgeResult<Vec<String>> {
        let mut names = self
            .keys()?
            .iter()
            .map(|key| key?.to_text())
            .collect::<BridgeResult<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    /// Value under `key`, `None` when absent.
    pub fn get(&self, key: &str) -> BridgeResult<Option<Handle>> {
        let key = key.to_host()?;
        match rt::dict_get_item(self.handle.ptr(), key.ptr()) {
            Some(value) => Handle::borrow_at(Some(value), "dict item").map(Some),
            None => Ok(None),
        }
    }

    /// Insert or replace the entry under `key`. The dict takes its own share
    /// of `value`.
    pub fn set(&self, key: &str, value: &Handle) -> BridgeResult<()> {
        let key = key.to_host()?;
        if rt::dict_set_item(self.handle.ptr(), key.ptr(), value.ptr()) {
            Ok(())
        } else {
            Err(BridgeError::pending("dict item assignment"))
        }
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Drop the dict guarantee and keep the share.
    pub fn into_handle(self) -> Handle {
        self.handle
    }
}

impl Deref for DictView {
    type Target = Handle;

    fn deref(&self) -> &Handle {
        &self.handle
    }
}

impl std::fmt::Debug for DictView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DictView").field(&self.handle).finish()
    }
}

/// A Rust tuple of convertible values that can become an argument tuple.
pub trait ToArgs {
    fn into_args(self) -> BridgeResult<TupleView>;
}

macro_rules! impl_to_args {
    ($len:expr; $($name:ident : $idx:tt),*) => {
        impl<$($name: ToHost),*> ToArgs for ($($name,)*) {
            #[allow(unused_variables)]
            fn into_args(self) -> BridgeResult<TupleView> {
                let tuple = TupleView::make_empty($len)?;
                $(
                    let item = self.$idx.to_host()?;
                    tuple.set($idx, &item)?;
                )*
                Ok(tuple)
            }
        }
    };
}

impl_to_args!(0;);
impl_to_args!(1; A0: 0);
impl_to_args!(2; A0: 0, A1: 1);
impl_to_args!(3; A0: 0, A1: 1, A2: 2);
impl_to_args!(4; A0: 0, A1: 1, A2: 2, A3: 3);
impl_to_args!(5; A0: 0, A1: 1, A2: 2, A3: 3, A4: 4);
impl_to_args!(6; A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5);
impl_to_args!(7; A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5, A6: 6);
impl_to_args!(8; A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5, A6: 6, A7: 7);
