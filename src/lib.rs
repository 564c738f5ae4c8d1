//! Bind native Rust functions and classes into an embedded dynamic runtime.
//!
//! The host runtime ([`hostbind_runtime`]) is a reference-counted object
//! system with a C-level API. This crate puts a typed, ownership-safe layer on
//! top of it:
//!
//! - [`Handle`]: one owned share of a host object
//! - [`TupleView`] / [`DictView`]: handles known to be tuples / dicts
//! - [`ToHost`] / [`FromHost`]: value conversions, resolved statically
//! - [`NativeFn`] / [`IntoNativeFn`]: typed functions behind the host calling
//!   convention, with errors and panics translated at the boundary
//! - [`ExposedType`]: native classes the host can instantiate and subclass
//! - [`WeakBackRef`]: up-calls from native virtual methods into host overrides
//! - [`ExtensionModule`]: the registration surface
//!
//! # Example
//!
//! ```
//! use hostbind::prelude::*;
//!
//! let mut m = ExtensionModule::new("demo", "A demo module").unwrap();
//! m.add_function("add", "Add two integers", |x: i64, y: i64| x + y).unwrap();
//! m.finalize().unwrap();
//!
//! let add = Handle::adopt(hostbind::runtime::import("demo"))
//!     .and_then(|module| module.getattr("add"))
//!     .unwrap();
//! let sum = add.call(&TupleView::make((2i64, 3i64)).unwrap()).unwrap();
//! assert_eq!(i64::from_host(&sum, None).unwrap(), 5);
//! ```

pub mod adapter;
pub mod convert;
pub mod error;
pub mod exposition;
pub mod handle;
pub mod module;
pub mod upcall;
pub mod views;

pub use adapter::{IntoConstructed, IntoConstructor, IntoNativeFn, NativeCallable, NativeFn};
pub use convert::{FromHost, IntoCallOutput, ToHost};
pub use error::{BridgeError, BridgeResult};
pub use exposition::{ExposedType, ExposureState, TypeTag, exposed_type_object};
pub use handle::Handle;
pub use module::ExtensionModule;
pub use upcall::WeakBackRef;
pub use views::{DictView, ToArgs, TupleView};

pub use hostbind_runtime as runtime;

pub mod prelude {
    pub use crate::adapter::{IntoNativeFn, NativeFn};
    pub use crate::convert::{FromHost, ToHost};
    pub use crate::error::{BridgeError, BridgeResult};
    pub use crate::exposition::ExposedType;
    pub use crate::handle::Handle;
    pub use crate::module::ExtensionModule;
    pub use crate::upcall::WeakBackRef;
    pub use crate::views::{DictView, TupleView};
}
