/*!
Integration tests for the invocation protocol: entities loaded through the
engine and called through both the Rust API and the C ABI
*/

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use xllr::cdt::CTypeInfoArray;
use xllr::ffi::*;
use xllr::interop::stats;
use xllr::{local_runtime, Callable, TypeInfo, TypeTag, Value, Xllr, XllrConfig, XllrError};

fn i64_t() -> TypeInfo {
    TypeInfo::new(TypeTag::INT64)
}

unsafe fn take(err: *mut c_char) -> Option<String> {
    if err.is_null() {
        return None;
    }
    let message = CStr::from_ptr(err).to_string_lossy().into_owned();
    xllr_free_string(err);
    Some(message)
}

#[test]
fn test_entity_call_and_error_channel() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    local_runtime().register_fn("protocol", "even_only", vec![i64_t()], vec![i64_t()], move |args| {
        counter.fetch_add(1, Ordering::SeqCst);
        let n: i64 = args[0].clone().into_native()?;
        if n % 2 != 0 {
            return Err(XllrError::Invocation(format!("{} is odd", n)));
        }
        Ok(vec![Value::I64(n / 2)])
    });

    let engine = Xllr::default();
    let entity = engine
        .load_entity("rust", "protocol", "callable=even_only", &[i64_t()], &[i64_t()])
        .unwrap();

    let before = stats();
    assert_eq!(entity.call(vec![Value::I64(8)]).unwrap(), vec![Value::I64(4)]);
    assert_eq!(entity.call(vec![Value::I64(3)]).unwrap_err().to_string(), "3 is odd");
    // A failed call leaves the entity usable
    assert_eq!(entity.call(vec![Value::I64(10)]).unwrap(), vec![Value::I64(5)]);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    let after = stats();
    assert!(after.calls_made >= before.calls_made + 3);
    assert!(after.call_errors > before.call_errors);

    engine.free_entity(entity).unwrap();
}

#[test]
fn test_callback_argument() {
    local_runtime().register_fn(
        "protocol",
        "apply_twice",
        vec![TypeInfo::new(TypeTag::CALLABLE), i64_t()],
        vec![i64_t()],
        |mut args| {
            let n = args.pop().unwrap_or(Value::Null);
            let f = args.pop().and_then(|v| v.as_callable().cloned()).ok_or_else(|| {
                XllrError::Invocation("expected a callable".to_string())
            })?;
            let once = f.call(vec![n])?;
            f.call(once)
        },
    );

    let engine = Xllr::default();
    let apply = engine
        .load_entity(
            "rust",
            "protocol",
            "callable=apply_twice",
            &[TypeInfo::new(TypeTag::CALLABLE), i64_t()],
            &[i64_t()],
        )
        .unwrap();
    let square = Callable::local("square", vec![i64_t()], vec![i64_t()], |args| {
        let n: i64 = args[0].clone().into_native()?;
        Ok(vec![Value::I64(n * n)])
    });
    let result = apply.call(vec![Value::Callable(square), Value::I64(3)]).unwrap();
    assert_eq!(result, vec![Value::I64(81)]);
    apply.free().unwrap();
}

#[test]
fn test_signature_checked_on_load() {
    local_runtime().register_fn("protocol", "typed", vec![i64_t()], vec![], |_| Ok(vec![]));

    let engine = Xllr::default();
    let err = engine
        .load_entity("rust", "protocol", "callable=typed", &[TypeInfo::new(TypeTag::FLOAT64)], &[])
        .unwrap_err();
    assert!(matches!(err, XllrError::SignatureMismatch { .. }), "{}", err);

    let err = engine
        .load_entity("rust", "protocol", "callable=absent", &[], &[])
        .unwrap_err();
    assert!(matches!(err, XllrError::EntityNotFound { .. }), "{}", err);
}

#[test]
fn test_missing_plugin_file() {
    let home = tempfile::tempdir().unwrap();
    let engine = Xllr::new(XllrConfig::default().with_home(home.path()));
    let err = engine.load_runtime_plugin("nowhere").unwrap_err();
    assert!(matches!(err, XllrError::PluginNotFound { .. }), "{}", err);
    assert!(!engine.is_loaded("nowhere"));
}

#[test]
fn test_c_abi_round_trip() {
    local_runtime().register_fn(
        "protocol_c",
        "greet",
        vec![TypeInfo::new(TypeTag::STRING8)],
        vec![TypeInfo::new(TypeTag::STRING8)],
        |args| {
            let name: String = args[0].clone().into_native()?;
            Ok(vec![Value::String8(format!("hello, {}", name))])
        },
    );

    let plugin = CString::new("rust").unwrap();
    let module = CString::new("protocol_c").unwrap();
    let entity = CString::new("callable=greet").unwrap();
    let string8 = TypeInfo::new(TypeTag::STRING8);
    let mut params = CTypeInfoArray::new(&[string8.clone()]).unwrap();
    let mut retvals = CTypeInfoArray::new(&[string8]).unwrap();

    unsafe {
        let mut err: *mut c_char = std::ptr::null_mut();
        xllr_load_runtime_plugin(plugin.as_ptr(), &mut err);
        assert_eq!(take(err), None);

        let xcall = xllr_load_entity(
            plugin.as_ptr(),
            module.as_ptr(),
            entity.as_ptr(),
            params.as_mut_ptr(),
            params.len(),
            retvals.as_mut_ptr(),
            retvals.len(),
            &mut err,
        );
        assert_eq!(take(err), None);

        let buffer = xllr_alloc_cdts_buffer(1, 1);
        (*buffer).cell_at_mut(0).set_string8("C").unwrap();
        xllr_xcall_params_ret(xcall, buffer, &mut err);
        assert_eq!(take(err), None);
        let reply = (*buffer.add(1)).cell_at(0).as_string();
        assert_eq!(reply.as_deref(), Some("hello, C"));
        xllr_free_cdts_buffer(buffer);

        xllr_free_xcall(plugin.as_ptr(), xcall, &mut err);
        assert_eq!(take(err), None);
    }
}
