//! Extension module registration.
//!
//! An [`ExtensionModule`] collects functions and exposed types under a module
//! name and, on [`finalize`](ExtensionModule::finalize), installs the module in
//! the host runtime so it can be imported by name.

use hostbind_runtime as rt;

use crate::adapter::{IntoNativeFn, NativeFn};
use crate::error::{BridgeError, BridgeResult};
use crate::exposition::ExposedType;
use crate::handle::Handle;

/// A named collection of host bindings.
#[derive(Debug)]
pub struct ExtensionModule {
    name: String,
    module: Handle,
    bindings: usize,
    finalized: bool,
}

impl ExtensionModule {
    pub fn new(name: &str, doc: &str) -> BridgeResult<Self> {
        if name.is_empty() {
            return Err(BridgeError::registration("module name must not be empty"));
        }
        let module = Handle::adopt_at(rt::module_new(name, doc), name)?;
        Ok(Self {
            name: name.to_string(),
            module,
            bindings: 0,
            finalized: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Module object being populated.
    pub fn module(&self) -> &Handle {
        &self.module
    }

    fn check_bindable(&self, name: &str) -> BridgeResult<()> {
        if self.finalized {
            return Err(BridgeError::registration(format!(
                "cannot add '{name}' to module '{}' after it has been finalized",
                self.name
            )));
        }
        if rt::module_has(self.module.ptr(), name) {
            return Err(BridgeError::registration(format!(
                "module '{}' already binds '{name}'",
                self.name
            )));
        }
        Ok(())
    }

    fn bind(&mut self, name: &str, value: &Handle) -> BridgeResult<()> {
        if !rt::module_add(self.module.ptr(), name, value.ptr()) {
            return Err(BridgeError::pending(name));
        }
        self.bindings += 1;
        Ok(())
    }

    /// Bind a typed Rust function.
    pub fn add_function<F, Args>(&mut self, name: &str, doc: &str, f: F) -> BridgeResult<&mut Self>
    where
        F: IntoNativeFn<Args>,
    {
        self.add_native(name, doc, f.into_native_fn(name))
    }

    /// Bind an already type-erased function.
    pub fn add_native(&mut self, name: &str, doc: &str, func: NativeFn) -> BridgeResult<&mut Self> {
        self.check_bindable(name)?;
        let callable = func.into_host_function(doc)?;
        self.bind(name, &callable)?;
        Ok(self)
    }

    /// Finalize `ty` and bind its class under the type's name.
    pub fn add_type<T: ?Sized + 'static>(&mut self, ty: &mut ExposedType<T>) -> BridgeResult<&mut Self> {
        let name = ty.name().to_string();
        self.check_bindable(&name)?;
        let type_object = ty.finalize()?;
        self.bind(&name, &type_object)?;
        Ok(self)
    }

    /// Install the module in the runtime's import table. One-time.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn finalize(&mut self) -> BridgeResult<Handle> {
        if self.finalized {
            return Err(BridgeError::registration(format!(
                "module '{}' has already been finalized",
                self.name
            )));
        }
        if !rt::module_register(self.module.ptr()) {
            return Err(BridgeError::pending(self.name.as_str()));
        }
        self.finalized = true;
        tracing::debug!(module = %self.name, bindings = self.bindings, "module finalized");
        Ok(self.module.clone())
    }
}
