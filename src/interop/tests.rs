//! Invocation protocol tests

use super::*;
use crate::cdt::{alloc, TypeInfo, TypeTag, XCall};
use crate::config::{XllrConfig, DYLIB_EXTENSION};
use crate::error::{Result, XllrError};
use crate::value::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

fn i64_t() -> TypeInfo {
    TypeInfo::new(TypeTag::INT64)
}

fn engine_with(runtime: LocalRuntime) -> Xllr {
    let engine = Xllr::default();
    engine.register_builtin(Arc::new(runtime));
    engine
}

fn math_runtime(sink: Arc<AtomicI64>) -> LocalRuntime {
    let rt = LocalRuntime::new();
    rt.register_fn("math", "add", vec![i64_t(), i64_t()], vec![i64_t()], |args| {
        let a: i64 = args[0].clone().into_native()?;
        let b: i64 = args[1].clone().into_native()?;
        Ok(vec![Value::I64(a + b)])
    });
    let store = sink.clone();
    rt.register_fn("math", "store", vec![i64_t()], vec![], move |args| {
        store.store(args[0].clone().into_native()?, Ordering::SeqCst);
        Ok(vec![])
    });
    rt.register_fn("math", "answer", vec![], vec![i64_t()], |_| Ok(vec![Value::I64(42)]));
    let tick = sink;
    rt.register_fn("math", "tick", vec![], vec![], move |_| {
        tick.fetch_add(1, Ordering::SeqCst);
        Ok(vec![])
    });
    rt.register_fn("math", "checked_div", vec![i64_t(), i64_t()], vec![i64_t()], |args| {
        let a: i64 = args[0].clone().into_native()?;
        let b: i64 = args[1].clone().into_native()?;
        if b == 0 {
            return Err(XllrError::Invocation("division by zero".to_string()));
        }
        Ok(vec![Value::I64(a / b)])
    });
    rt.register_fn("math", "explode", vec![], vec![], |_| panic!("boom"));
    rt
}

#[test]
fn test_call_shape_from_counts() {
    assert_eq!(CallShape::from_counts(2, 1), CallShape::ParamsRet);
    assert_eq!(CallShape::from_counts(1, 0), CallShape::ParamsNoRet);
    assert_eq!(CallShape::from_counts(0, 3), CallShape::NoParamsRet);
    assert_eq!(CallShape::from_counts(0, 0), CallShape::NoParamsNoRet);
    assert_eq!(CallShape::NoParamsRet.name(), "no_params_ret");
    assert!(CallShape::ParamsRet.has_params() && CallShape::ParamsRet.has_retvals());
    assert!(!CallShape::NoParamsNoRet.has_params());
}

#[test]
fn test_all_four_shapes() {
    let sink = Arc::new(AtomicI64::new(0));
    let engine = engine_with(math_runtime(sink.clone()));

    let add = engine
        .load_entity("rust", "math", "callable=add", &[i64_t(), i64_t()], &[i64_t()])
        .unwrap();
    assert_eq!(add.shape(), CallShape::ParamsRet);
    assert_eq!(add.call(vec![Value::I64(2), Value::I64(40)]).unwrap(), vec![Value::I64(42)]);

    let store = engine.load_entity("rust", "math", "callable=store", &[i64_t()], &[]).unwrap();
    assert_eq!(store.call(vec![Value::I64(7)]).unwrap(), vec![]);
    assert_eq!(sink.load(Ordering::SeqCst), 7);

    let answer = engine.load_entity("rust", "math", "answer", &[], &[i64_t()]).unwrap();
    assert_eq!(answer.shape(), CallShape::NoParamsRet);
    assert_eq!(answer.call(vec![]).unwrap(), vec![Value::I64(42)]);

    let tick = engine.load_entity("rust", "math", "callable=tick", &[], &[]).unwrap();
    tick.call(vec![]).unwrap();
    assert_eq!(sink.load(Ordering::SeqCst), 8);

    for entity in [add, store, answer, tick] {
        entity.free().unwrap();
    }
    engine.free_runtime_plugin("rust").unwrap();
}

#[test]
fn test_error_channel_leaves_entity_usable() {
    let engine = engine_with(math_runtime(Arc::new(AtomicI64::new(0))));
    let div = engine
        .load_entity("rust", "math", "callable=checked_div", &[i64_t(), i64_t()], &[i64_t()])
        .unwrap();

    let before = stats();
    let err = div.call(vec![Value::I64(1), Value::I64(0)]).unwrap_err();
    assert!(matches!(&err, XllrError::Invocation(msg) if msg.contains("division by zero")));
    assert!(stats().call_errors > before.call_errors);

    assert_eq!(div.call(vec![Value::I64(9), Value::I64(3)]).unwrap(), vec![Value::I64(3)]);
}

#[test]
fn test_panic_becomes_error() {
    let engine = engine_with(math_runtime(Arc::new(AtomicI64::new(0))));
    let explode = engine.load_entity("rust", "math", "callable=explode", &[], &[]).unwrap();
    let err = explode.call(vec![]).unwrap_err();
    assert!(err.to_string().contains("panic: boom"));
    assert!(!is_pinned());
}

#[test]
fn test_argument_count_checked_before_marshaling() {
    let engine = engine_with(math_runtime(Arc::new(AtomicI64::new(0))));
    let add = engine
        .load_entity("rust", "math", "callable=add", &[i64_t(), i64_t()], &[i64_t()])
        .unwrap();
    assert!(matches!(
        add.call(vec![Value::I64(1)]),
        Err(XllrError::ArgCountMismatch { expected: 2, got: 1 })
    ));
}

#[test]
fn test_load_entity_failures() {
    let engine = engine_with(math_runtime(Arc::new(AtomicI64::new(0))));
    assert!(matches!(
        engine.load_entity("rust", "math", "callable=missing", &[], &[]),
        Err(XllrError::EntityNotFound { .. })
    ));
    assert!(matches!(
        engine.load_entity("rust", "math", "callable=add", &[i64_t()], &[i64_t()]),
        Err(XllrError::SignatureMismatch { .. })
    ));
}

#[test]
fn test_raw_buffer_invocation() {
    let engine = engine_with(math_runtime(Arc::new(AtomicI64::new(0))));
    let add = engine
        .load_entity("rust", "math", "callable=add", &[i64_t(), i64_t()], &[i64_t()])
        .unwrap();

    let mut buffer = add.buffer();
    buffer.params_mut().cell_at_mut(0).set_i64(20);
    buffer.params_mut().cell_at_mut(1).set_i64(22);
    add.invoke(&mut buffer).unwrap();
    assert_eq!(buffer.retvals().cell_at(0).as_i64(), Some(42));
}

#[test]
fn test_raw_xcall_round_trip() {
    let engine = engine_with(math_runtime(Arc::new(AtomicI64::new(0))));
    let xcall = engine
        .load_entity_raw("rust", "math", "callable=answer", &[], &[i64_t()])
        .unwrap();

    let mut buffer = CallBuffer::new(0, 1);
    unsafe {
        invoke_xcall(&*xcall, CallShape::NoParamsRet, buffer.as_mut_ptr()).unwrap();
    }
    assert_eq!(buffer.retvals().cell_at(0).as_i64(), Some(42));
    engine.free_xcall_raw("rust", xcall).unwrap();
}

#[test]
fn test_buffer_pair_layout_and_cache() {
    let before = alloc::cache_in_use();
    {
        let buffer = CallBuffer::new(3, 2);
        assert_eq!(buffer.params().len(), 3);
        assert_eq!(buffer.retvals().len(), 2);
        assert_eq!(buffer.params().fixed_dimensions, 1);
        assert!(buffer.params().allocated_on_cache);
        // One cache block per half of the pair
        assert_eq!(alloc::cache_in_use(), before + 2);
    }
    assert_eq!(alloc::cache_in_use(), before);

    let raw = alloc_cdts_buffer(1, 1);
    unsafe {
        (*raw).cell_at_mut(0).set_string8("owned").unwrap();
        free_cdts_buffer(raw);
        free_cdts_buffer(core::ptr::null_mut());
    }
}

#[test]
fn test_take_error_frees_message() {
    unsafe {
        assert_eq!(take_error(core::ptr::null_mut()), None);
        let msg = alloc::alloc_c_string("failed");
        assert_eq!(take_error(msg).as_deref(), Some("failed"));
    }
}

#[test]
fn test_missing_plugin() {
    let engine = Xllr::default();
    assert!(matches!(engine.load_runtime_plugin("go"), Err(XllrError::HomeNotSet)));

    let home = tempfile::tempdir().unwrap();
    let engine = Xllr::new(XllrConfig::default().with_home(home.path()));
    let err = engine.load_runtime_plugin("go").unwrap_err();
    assert!(matches!(err, XllrError::PluginNotFound { ref name, .. } if name == "go"));
}

#[test]
fn test_invalid_plugin_library() {
    let home = tempfile::tempdir().unwrap();
    std::fs::write(
        home.path().join(format!("xllr.broken.{}", DYLIB_EXTENSION)),
        b"not a shared library",
    )
    .unwrap();
    let engine = Xllr::new(XllrConfig::default().with_home(home.path()));
    assert!(matches!(
        engine.load_runtime_plugin("broken"),
        Err(XllrError::PluginLoad { .. })
    ));
    assert!(!engine.is_loaded("broken"));
}

#[test]
fn test_plugin_lifecycle() {
    let engine = engine_with(LocalRuntime::new());
    assert!(engine.loaded_plugins().is_empty());
    engine.load_runtime_plugin("rust").unwrap();
    engine.load_runtime_plugin("rust").unwrap();
    assert_eq!(engine.loaded_plugins(), vec!["rust".to_string()]);
    engine.free_runtime_plugin("rust").unwrap();
    assert!(matches!(
        engine.free_runtime_plugin("rust"),
        Err(XllrError::PluginNotLoaded(_))
    ));
}

#[test]
fn test_shutdown_frees_everything() {
    let engine = engine_with(LocalRuntime::new());
    engine.load_runtime_plugin("rust").unwrap();
    engine.shutdown();
    assert!(engine.loaded_plugins().is_empty());
}

#[test]
fn test_runtime_flags() {
    let engine = Xllr::default();
    assert!(!engine.is_runtime_flag_set("trace_calls"));
    engine.set_runtime_flag("trace_calls");
    assert!(engine.is_runtime_flag_set("trace_calls"));
}

/// Local runtime that binds its entities to the resolving thread
struct AffineRuntime(LocalRuntime);

impl RuntimePlugin for AffineRuntime {
    fn name(&self) -> &str {
        "affine"
    }

    fn load_runtime(&self) -> Result<()> {
        self.0.load_runtime()
    }

    fn free_runtime(&self) -> Result<()> {
        self.0.free_runtime()
    }

    fn load_entity(
        &self,
        module_path: &str,
        entity_path: &str,
        params: &[TypeInfo],
        retvals: &[TypeInfo],
    ) -> Result<*mut XCall> {
        self.0.load_entity(module_path, entity_path, params, retvals)
    }

    fn free_xcall(&self, xcall: *mut XCall) -> Result<()> {
        self.0.free_xcall(xcall)
    }

    fn requires_thread_affinity(&self) -> bool {
        true
    }
}

#[test]
fn test_thread_affinity() {
    let engine = Xllr::default();
    engine.register_builtin(Arc::new(AffineRuntime(math_runtime(Arc::new(AtomicI64::new(0))))));
    let answer = engine.load_entity("affine", "math", "callable=answer", &[], &[i64_t()]).unwrap();
    assert!(answer.owner_thread().is_some());
    assert!(answer.call(vec![]).is_ok());

    std::thread::scope(|s| {
        let result = s.spawn(|| answer.call(vec![])).join().unwrap();
        assert!(matches!(result, Err(XllrError::ThreadAffinity { .. })));
    });
}

#[test]
fn test_pin_spans_marshaling() {
    let seen = Arc::new(AtomicI64::new(-1));
    let rt = LocalRuntime::new();
    let depth_seen = seen.clone();
    rt.register_fn("pins", "depth", vec![i64_t()], vec![i64_t()], move |args| {
        depth_seen.store(pin_depth() as i64, Ordering::SeqCst);
        Ok(args)
    });
    let engine = engine_with(rt);
    let entity = engine
        .load_entity("rust", "pins", "callable=depth", &[i64_t()], &[i64_t()])
        .unwrap();

    // One pin for the marshaling round trip, one for the raw call inside it
    assert_eq!(entity.call(vec![Value::I64(1)]).unwrap(), vec![Value::I64(1)]);
    assert_eq!(seen.load(Ordering::SeqCst), 2);
    assert!(!is_pinned());

    let mut buffer = entity.buffer();
    buffer.params_mut().cell_at_mut(0).set_i64(5);
    entity.invoke(&mut buffer).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert!(!is_pinned());
}

#[test]
fn test_loaded_plugin_debug() {
    let engine = engine_with(LocalRuntime::new());
    let loaded = engine.load_runtime_plugin("rust").unwrap();
    let text = format!("{:?}", loaded);
    assert!(text.contains("\"rust\""), "{}", text);
    assert!(text.contains("live_entities: 0"), "{}", text);
}
