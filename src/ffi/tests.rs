use super::*;
use crate::cdt::{CTypeInfoArray, Cdts, TypeInfo, TypeTag};
use crate::interop::local_runtime;
use crate::value::Value;
use crate::error::XllrError;
use core::ffi::{c_char, c_void, CStr};
use std::ffi::CString;

fn c(s: &str) -> CString {
    CString::new(s).unwrap()
}

fn register_module(module: &str) {
    let f64_t = TypeInfo::new(TypeTag::FLOAT64);
    local_runtime().register_fn(module, "scale", vec![f64_t.clone(), f64_t.clone()], vec![f64_t], |args| {
        let x: f64 = args[0].clone().into_native()?;
        let k: f64 = args[1].clone().into_native()?;
        Ok(vec![Value::F64(x * k)])
    });
    local_runtime().register_fn(module, "fail", vec![], vec![], |_| {
        Err(XllrError::Invocation("fail was called".to_string()))
    });
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
fn test_host_round_trip() {
    register_module("ffi_host");
    let f64_t = TypeInfo::new(TypeTag::FLOAT64);
    let mut params = CTypeInfoArray::new(&[f64_t.clone(), f64_t.clone()]).unwrap();
    let mut retvals = CTypeInfoArray::new(&[f64_t]).unwrap();

    unsafe {
        let mut err: *mut c_char = core::ptr::null_mut();
        let xcall = xllr_load_entity(
            c("rust").as_ptr(),
            c("ffi_host").as_ptr(),
            c("callable=scale").as_ptr(),
            params.as_mut_ptr(),
            params.len(),
            retvals.as_mut_ptr(),
            retvals.len(),
            &mut err,
        );
        assert_eq!(take(err), None);
        assert!(!xcall.is_null());

        let buffer = xllr_alloc_cdts_buffer(2, 1);
        (*buffer).cell_at_mut(0).set_f64(1.5);
        (*buffer).cell_at_mut(1).set_f64(4.0);
        xllr_xcall_params_ret(xcall, buffer, &mut err);
        assert_eq!(take(err), None);
        let retvals: &Cdts = &*buffer.add(1);
        assert_eq!(retvals.cell_at(0).as_f64(), Some(6.0));
        xllr_free_cdts_buffer(buffer);

        xllr_free_xcall(c("rust").as_ptr(), xcall, &mut err);
        assert_eq!(take(err), None);
    }
}

#[test]
fn test_host_error_channel() {
    register_module("ffi_errors");
    unsafe {
        let mut err: *mut c_char = core::ptr::null_mut();
        let xcall = xllr_load_entity(
            c("rust").as_ptr(),
            c("ffi_errors").as_ptr(),
            c("callable=fail").as_ptr(),
            core::ptr::null(),
            0,
            core::ptr::null(),
            0,
            &mut err,
        );
        assert_eq!(take(err), None);

        for _ in 0..2 {
            xllr_xcall_no_params_no_ret(xcall, &mut err);
            assert_eq!(take(err).as_deref(), Some("fail was called"));
        }
        xllr_free_xcall(c("rust").as_ptr(), xcall, &mut err);
        assert_eq!(take(err), None);
    }
}

#[test]
fn test_host_reports_resolution_errors() {
    unsafe {
        let mut err: *mut c_char = core::ptr::null_mut();
        let xcall = xllr_load_entity(
            c("rust").as_ptr(),
            c("ffi_nowhere").as_ptr(),
            c("callable=nothing").as_ptr(),
            core::ptr::null(),
            0,
            core::ptr::null(),
            0,
            &mut err,
        );
        assert!(xcall.is_null());
        let message = take(err).unwrap();
        assert!(message.contains("nothing"), "{}", message);

        xllr_load_runtime_plugin(core::ptr::null(), &mut err);
        assert!(take(err).unwrap().contains("is null"));

        xllr_xcall_no_params_no_ret(core::ptr::null_mut(), &mut err);
        assert_eq!(take(err).as_deref(), Some("xcall is null"));
    }
}

#[test]
fn test_runtime_flags_through_c() {
    unsafe {
        let flag = c("ffi_test_flag");
        assert_eq!(xllr_is_runtime_flag_set(flag.as_ptr()), 0);
        xllr_set_runtime_flag(flag.as_ptr());
        assert_eq!(xllr_is_runtime_flag_set(flag.as_ptr()), 1);
        assert_eq!(xllr_is_runtime_flag_set(core::ptr::null()), 0);
    }
}

#[test]
fn test_shared_memory_helpers() {
    unsafe {
        let mem = xllr_alloc_memory(16) as *mut u8;
        assert!(!mem.is_null());
        assert!((0..16).all(|i| *mem.add(i) == 0));
        xllr_free_memory(mem as *mut c_void);
        xllr_free_memory(core::ptr::null_mut());
        xllr_free_string(core::ptr::null_mut());
    }
}

#[cfg(feature = "plugin-abi")]
#[test]
fn test_plugin_abi_entry_points() {
    register_module("ffi_plugin");
    let f64_t = TypeInfo::new(TypeTag::FLOAT64);
    let mut params = CTypeInfoArray::new(&[f64_t.clone(), f64_t.clone()]).unwrap();
    let mut retvals = CTypeInfoArray::new(&[f64_t]).unwrap();

    unsafe {
        let mut err: *mut c_char = core::ptr::null_mut();
        load_runtime(&mut err);
        assert_eq!(take(err), None);

        let xcall = load_entity(
            c("ffi_plugin").as_ptr(),
            c("callable=scale").as_ptr(),
            params.as_mut_ptr(),
            params.len(),
            retvals.as_mut_ptr(),
            retvals.len(),
            &mut err,
        );
        assert_eq!(take(err), None);

        let buffer = xllr_alloc_cdts_buffer(2, 1);
        (*buffer).cell_at_mut(0).set_f64(2.0);
        (*buffer).cell_at_mut(1).set_f64(3.0);
        xcall_params_ret((*xcall).context(), buffer, &mut err);
        assert_eq!(take(err), None);
        assert_eq!((*buffer.add(1)).cell_at(0).as_f64(), Some(6.0));
        xllr_free_cdts_buffer(buffer);

        free_xcall(xcall, &mut err);
        assert_eq!(take(err), None);
    }
}

fn register_doubler() -> u64 {
    let f64_t = TypeInfo::new(TypeTag::FLOAT64);
    let double = crate::callable::NativeFunction::new("double", vec![f64_t.clone()], vec![f64_t], |args| {
        let x: f64 = args[0].clone().into_native()?;
        Ok(vec![Value::F64(x * 2.0)])
    });
    crate::handles::objects().register(crate::handles::Object::new(double))
}

#[test]
fn test_host_make_callable() {
    let handle = register_doubler();
    let f64_t = TypeInfo::new(TypeTag::FLOAT64);
    let mut params = CTypeInfoArray::new(&[f64_t.clone()]).unwrap();
    let mut retvals = CTypeInfoArray::new(&[f64_t]).unwrap();

    unsafe {
        let mut err: *mut c_char = core::ptr::null_mut();
        let xcall = xllr_make_callable(
            c("rust").as_ptr(),
            handle as usize as *mut c_void,
            params.as_mut_ptr(),
            params.len(),
            retvals.as_mut_ptr(),
            retvals.len(),
            &mut err,
        );
        assert_eq!(take(err), None);
        assert!(!xcall.is_null());

        let buffer = xllr_alloc_cdts_buffer(1, 1);
        (*buffer).cell_at_mut(0).set_f64(21.0);
        xllr_xcall_params_ret(xcall, buffer, &mut err);
        assert_eq!(take(err), None);
        assert_eq!((*buffer.add(1)).cell_at(0).as_f64(), Some(42.0));
        xllr_free_cdts_buffer(buffer);

        xllr_free_xcall(c("rust").as_ptr(), xcall, &mut err);
        assert_eq!(take(err), None);

        // Signature must match the registered function
        let xcall = xllr_make_callable(
            c("rust").as_ptr(),
            handle as usize as *mut c_void,
            core::ptr::null(),
            0,
            retvals.as_mut_ptr(),
            retvals.len(),
            &mut err,
        );
        assert!(xcall.is_null());
        assert!(take(err).unwrap().contains("Signature mismatch"));
    }
    crate::handles::objects().release(handle).unwrap();
}

#[cfg(feature = "plugin-abi")]
#[test]
fn test_plugin_abi_make_callable() {
    let handle = register_doubler();
    let f64_t = TypeInfo::new(TypeTag::FLOAT64);
    let mut params = CTypeInfoArray::new(&[f64_t.clone()]).unwrap();
    let mut retvals = CTypeInfoArray::new(&[f64_t]).unwrap();

    unsafe {
        let mut err: *mut c_char = core::ptr::null_mut();
        let xcall = make_callable(
            handle as usize as *mut c_void,
            params.as_mut_ptr(),
            params.len(),
            retvals.as_mut_ptr(),
            retvals.len(),
            &mut err,
        );
        assert_eq!(take(err), None);

        let buffer = xllr_alloc_cdts_buffer(1, 1);
        (*buffer).cell_at_mut(0).set_f64(0.25);
        xcall_params_ret((*xcall).context(), buffer, &mut err);
        assert_eq!(take(err), None);
        assert_eq!((*buffer.add(1)).cell_at(0).as_f64(), Some(0.5));
        xllr_free_cdts_buffer(buffer);

        free_xcall(xcall, &mut err);
        assert_eq!(take(err), None);

        let missing = make_callable(u64::MAX as usize as *mut c_void, core::ptr::null(), 0, core::ptr::null(), 0, &mut err);
        assert!(missing.is_null());
        assert!(take(err).unwrap().contains("not found"));
    }
    crate::handles::objects().release(handle).unwrap();
}
