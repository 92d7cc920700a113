//! In-process Rust runtime
//!
//! Exposes registered [`NativeFunction`]s as entities of the plugin named
//! `rust`. Entity paths use `callable=<name>` (or `entity=<name>`, or the
//! bare name as the only item).

use core::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use super::path::EntityPath;
use super::plugin::RuntimePlugin;
use crate::callable::{export_function, release_exported, NativeFunction};
use crate::cdt::{format_signature, signatures_match, TypeInfo, XCall};
use crate::error::{HandleError, Result, XllrError};
use crate::handles::objects;
use crate::logging::{debug, log_entity_loaded};
use crate::value::Value;

/// Plugin name of the in-process runtime
pub const LOCAL_RUNTIME_NAME: &str = "rust";

static LOCAL_RUNTIME: Lazy<Arc<LocalRuntime>> = Lazy::new(|| Arc::new(LocalRuntime::new()));

/// Process-wide in-process runtime, shared by the engine and the plugin C ABI
pub fn local_runtime() -> &'static Arc<LocalRuntime> {
    &LOCAL_RUNTIME
}

#[derive(Debug, Default)]
pub struct LocalRuntime {
    functions: DashMap<(String, String), Arc<NativeFunction>>,
    loaded: AtomicBool,
}

impl LocalRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `function` under `module`, replacing any previous entry
    pub fn register(&self, module: &str, function: NativeFunction) -> Arc<NativeFunction> {
        let function = Arc::new(function);
        debug!(
            target: "xllr::plugin",
            module,
            entity = function.name(),
            "Registered native function"
        );
        self.functions
            .insert((module.to_string(), function.name().to_string()), function.clone());
        function
    }

    pub fn register_fn<F>(
        &self,
        module: &str,
        name: &str,
        params: Vec<TypeInfo>,
        retvals: Vec<TypeInfo>,
        func: F,
    ) -> Arc<NativeFunction>
    where
        F: Fn(Vec<Value>) -> Result<Vec<Value>> + Send + Sync + 'static,
    {
        self.register(module, NativeFunction::new(name, params, retvals, func))
    }

    pub fn unregister(&self, module: &str, name: &str) -> Option<Arc<NativeFunction>> {
        self.functions
            .remove(&(module.to_string(), name.to_string()))
            .map(|(_, f)| f)
    }

    pub fn function(&self, module: &str, name: &str) -> Option<Arc<NativeFunction>> {
        self.functions
            .get(&(module.to_string(), name.to_string()))
            .map(|f| f.value().clone())
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Resolve `entity_path` to a function and check its signature
    pub fn resolve(
        &self,
        module_path: &str,
        entity_path: &str,
        params: &[TypeInfo],
        retvals: &[TypeInfo],
    ) -> Result<Arc<NativeFunction>> {
        let path = EntityPath::parse(entity_path)?;
        let name = entity_name(&path).ok_or_else(|| {
            XllrError::InvalidEntityPath(format!("'{}' does not name a callable", entity_path))
        })?;

        let function = self.function(module_path, &name).ok_or_else(|| XllrError::EntityNotFound {
            module: module_path.to_string(),
            entity: entity_path.to_string(),
        })?;

        check_signature(&function, params, retvals)?;
        Ok(function)
    }

    /// Function registered in the objects table under `handle`
    pub fn registered_function(&self, handle: u64) -> Result<Arc<NativeFunction>> {
        let object = objects().resolve(handle).ok_or(HandleError::NotFound(handle))?;
        object.downcast::<NativeFunction>().ok_or_else(|| {
            XllrError::Invocation(format!(
                "handle {} holds {}, not a native function",
                handle,
                object.type_name()
            ))
        })
    }
}

fn check_signature(function: &NativeFunction, params: &[TypeInfo], retvals: &[TypeInfo]) -> Result<()> {
    if signatures_match(function.params(), params) && signatures_match(function.retvals(), retvals) {
        return Ok(());
    }
    Err(XllrError::SignatureMismatch {
        entity: function.name().to_string(),
        expected: format!(
            "{} -> {}",
            format_signature(function.params()),
            format_signature(function.retvals())
        ),
        found: format!("{} -> {}", format_signature(params), format_signature(retvals)),
    })
}

fn entity_name(path: &EntityPath) -> Option<String> {
    if let Some(name) = path.get("callable").or_else(|| path.get("entity")) {
        return (!name.is_empty()).then(|| name.to_string());
    }
    match path.len() {
        1 => path.iter().next().and_then(|(key, value)| value.is_empty().then(|| key.to_string())),
        _ => None,
    }
}

impl RuntimePlugin for LocalRuntime {
    fn name(&self) -> &str {
        LOCAL_RUNTIME_NAME
    }

    fn load_runtime(&self) -> Result<()> {
        self.loaded.store(true, Ordering::Release);
        Ok(())
    }

    fn free_runtime(&self) -> Result<()> {
        self.loaded.store(false, Ordering::Release);
        Ok(())
    }

    fn load_entity(
        &self,
        module_path: &str,
        entity_path: &str,
        params: &[TypeInfo],
        retvals: &[TypeInfo],
    ) -> Result<*mut XCall> {
        let function = self.resolve(module_path, entity_path, params, retvals)?;
        log_entity_loaded(LOCAL_RUNTIME_NAME, module_path, function.name());
        Ok(export_function(function))
    }

    fn free_xcall(&self, xcall: *mut XCall) -> Result<()> {
        unsafe { release_exported(xcall) }
    }

    /// `context` is the objects-table handle of a [`NativeFunction`]
    fn make_callable(&self, context: *mut c_void, params: &[TypeInfo], retvals: &[TypeInfo]) -> Result<*mut XCall> {
        let function = self.registered_function(context as usize as u64)?;
        check_signature(&function, params, retvals)?;
        debug!(target: "xllr::plugin", entity = function.name(), "Made callable");
        Ok(export_function(function))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdt::TypeTag;

    fn runtime() -> LocalRuntime {
        let rt = LocalRuntime::new();
        rt.register_fn(
            "math",
            "add",
            vec![TypeInfo::new(TypeTag::INT64), TypeInfo::new(TypeTag::INT64)],
            vec![TypeInfo::new(TypeTag::INT64)],
            |args| {
                let a = args[0].as_integer().unwrap_or(0) as i64;
                let b = args[1].as_integer().unwrap_or(0) as i64;
                Ok(vec![Value::I64(a + b)])
            },
        );
        rt
    }

    #[test]
    fn test_entity_name_forms() {
        let rt = runtime();
        let p = [TypeInfo::new(TypeTag::INT64), TypeInfo::new(TypeTag::INT64)];
        let r = [TypeInfo::new(TypeTag::INT64)];
        assert!(rt.resolve("math", "callable=add", &p, &r).is_ok());
        assert!(rt.resolve("math", "entity=add", &p, &r).is_ok());
        assert!(rt.resolve("math", "add", &p, &r).is_ok());
    }

    #[test]
    fn test_missing_entity() {
        let rt = runtime();
        let err = rt.resolve("math", "callable=sub", &[], &[]).unwrap_err();
        assert!(matches!(err, XllrError::EntityNotFound { .. }));
        let err = rt.resolve("other", "callable=add", &[], &[]).unwrap_err();
        assert!(matches!(err, XllrError::EntityNotFound { .. }));
    }

    #[test]
    fn test_signature_mismatch_ignores_alias() {
        let rt = runtime();
        let r = [TypeInfo::new(TypeTag::INT64)];
        let aliased = [
            TypeInfo::new(TypeTag::INT64).with_alias("long"),
            TypeInfo::new(TypeTag::INT64),
        ];
        assert!(rt.resolve("math", "callable=add", &aliased, &r).is_ok());

        let wrong = [TypeInfo::new(TypeTag::INT32), TypeInfo::new(TypeTag::INT64)];
        let err = rt.resolve("math", "callable=add", &wrong, &r).unwrap_err();
        assert!(matches!(err, XllrError::SignatureMismatch { .. }));
    }

    #[test]
    fn test_invalid_entity_path() {
        let rt = runtime();
        assert!(matches!(
            rt.resolve("math", "callable=a=b", &[], &[]),
            Err(XllrError::InvalidEntityPath(_))
        ));
        assert!(matches!(
            rt.resolve("math", "module=x,getter", &[], &[]),
            Err(XllrError::InvalidEntityPath(_))
        ));
    }

    #[test]
    fn test_load_and_free_xcall() {
        let rt = runtime();
        rt.load_runtime().unwrap();
        assert!(rt.is_loaded());
        let xcall = rt
            .load_entity(
                "math",
                "callable=add",
                &[TypeInfo::new(TypeTag::INT64), TypeInfo::new(TypeTag::INT64)],
                &[TypeInfo::new(TypeTag::INT64)],
            )
            .unwrap();
        assert!(!xcall.is_null());
        rt.free_xcall(xcall).unwrap();
        rt.free_runtime().unwrap();
        assert!(!rt.is_loaded());
    }

    #[test]
    fn test_make_callable_from_handle() {
        let rt = runtime();
        let i64_t = TypeInfo::new(TypeTag::INT64);
        let square = Arc::new(NativeFunction::new("square", vec![i64_t.clone()], vec![i64_t.clone()], |args| {
            let n = args[0].as_integer().unwrap_or(0) as i64;
            Ok(vec![Value::I64(n * n)])
        }));
        let handle = objects().register(crate::handles::Object::from_arc(square.clone()));
        let context = handle as usize as *mut c_void;

        let xcall = rt.make_callable(context, &[i64_t.clone()], &[i64_t.clone()]).unwrap();
        let made = unsafe { crate::callable::local_function(&*xcall) }.unwrap();
        assert!(Arc::ptr_eq(&made, &square));
        assert_eq!(made.call(vec![Value::I64(7)]).unwrap(), vec![Value::I64(49)]);
        rt.free_xcall(xcall).unwrap();

        assert!(matches!(
            rt.make_callable(context, &[], &[i64_t.clone()]),
            Err(XllrError::SignatureMismatch { .. })
        ));
        objects().release(handle).unwrap();
        assert!(matches!(
            rt.make_callable(context, &[i64_t.clone()], &[i64_t]),
            Err(XllrError::Handle(HandleError::NotFound(_)))
        ));
    }

    #[test]
    fn test_make_callable_rejects_other_objects() {
        let rt = runtime();
        let handle = objects().register(crate::handles::Object::new(5_u32));
        let err = rt.make_callable(handle as usize as *mut c_void, &[], &[]).unwrap_err();
        assert!(err.to_string().contains("not a native function"), "{}", err);
        objects().release(handle).unwrap();
    }
}
