//! Value Cell (CDT) and the records it may point to

use core::ffi::{c_char, c_void};

use super::alloc::{self, alloc_units, units_len};
use super::array::Cdts;
use super::chars::{Char16, Char32, Char8};
use super::types::{signature_count, TypeTag};
use crate::error::MarshalError;

/// Release callback carried by every handle
pub type ReleaseFn = unsafe extern "C" fn(*mut CdtHandle);

/// Dispatcher for shapes that pass a value buffer
pub type XCallWithBufferFn = unsafe extern "C" fn(*mut c_void, *mut Cdts, *mut *mut c_char);

/// Dispatcher for the no-params, no-retvals shape
pub type XCallNoBufferFn = unsafe extern "C" fn(*mut c_void, *mut *mut c_char);

/// Opaque object reference owned by some runtime
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CdtHandle {
    pub handle: *mut c_void,
    pub runtime_id: u64,
    pub release: Option<ReleaseFn>,
}

/// Dispatcher/context pair invoked across the boundary
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XCall {
    pub pxcall_and_context: [*mut c_void; 2],
}

impl XCall {
    pub fn new(dispatcher: *mut c_void, context: *mut c_void) -> Self {
        Self {
            pxcall_and_context: [dispatcher, context],
        }
    }

    #[inline]
    pub fn dispatcher(&self) -> *mut c_void {
        self.pxcall_and_context[0]
    }

    #[inline]
    pub fn context(&self) -> *mut c_void {
        self.pxcall_and_context[1]
    }

    /// # Safety
    /// The dispatcher must have the buffer-taking signature and `buffer`
    /// must be laid out for the entity's call shape.
    pub unsafe fn call_with_buffer(&self, buffer: *mut Cdts, out_err: *mut *mut c_char) {
        let f: XCallWithBufferFn = core::mem::transmute(self.dispatcher());
        f(self.context(), buffer, out_err)
    }

    /// # Safety
    /// The dispatcher must have the no-buffer signature.
    pub unsafe fn call_no_buffer(&self, out_err: *mut *mut c_char) {
        let f: XCallNoBufferFn = core::mem::transmute(self.dispatcher());
        f(self.context(), out_err)
    }
}

/// Callable value: xcall plus its wire signature
#[repr(C)]
#[derive(Debug)]
pub struct CdtCallable {
    pub val: *mut XCall,
    pub parameters_types: *mut u64,
    pub params_types_length: i8,
    pub retval_types: *mut u64,
    pub retval_types_length: i8,
}

impl CdtCallable {
    /// Allocate a record with copies of the signature tags
    pub fn alloc(
        xcall: *mut XCall,
        params: &[TypeTag],
        retvals: &[TypeTag],
    ) -> Result<*mut CdtCallable, MarshalError> {
        let params_types_length = signature_count(params.len())?;
        let retval_types_length = signature_count(retvals.len())?;
        let record = alloc::calloc::<CdtCallable>(1);
        unsafe {
            record.write(CdtCallable {
                val: xcall,
                parameters_types: copy_tags(params),
                params_types_length,
                retval_types: copy_tags(retvals),
                retval_types_length,
            });
        }
        Ok(record)
    }

    pub fn params(&self) -> Vec<TypeTag> {
        read_tags(self.parameters_types, self.params_types_length)
    }

    pub fn retvals(&self) -> Vec<TypeTag> {
        read_tags(self.retval_types, self.retval_types_length)
    }

    /// Free the record and its tag arrays; the xcall is not touched
    ///
    /// # Safety
    /// `record` must come from [`CdtCallable::alloc`] or the C allocator.
    pub unsafe fn free(record: *mut CdtCallable) {
        if record.is_null() {
            return;
        }
        alloc::free((*record).parameters_types);
        alloc::free((*record).retval_types);
        alloc::free(record);
    }
}

fn copy_tags(tags: &[TypeTag]) -> *mut u64 {
    if tags.is_empty() {
        return core::ptr::null_mut();
    }
    let ptr = alloc::calloc::<u64>(tags.len());
    for (i, tag) in tags.iter().enumerate() {
        unsafe { *ptr.add(i) = tag.bits() };
    }
    ptr
}

fn read_tags(ptr: *const u64, len: i8) -> Vec<TypeTag> {
    if ptr.is_null() || len <= 0 {
        return Vec::new();
    }
    unsafe { core::slice::from_raw_parts(ptr, len as usize) }
        .iter()
        .map(|bits| TypeTag(*bits))
        .collect()
}

/// Cell payload; interpretation is selected by the cell's tag
#[repr(C)]
#[derive(Clone, Copy)]
pub union CdtVal {
    pub float64_val: f64,
    pub float32_val: f32,
    pub int8_val: i8,
    pub uint8_val: u8,
    pub int16_val: i16,
    pub uint16_val: u16,
    pub int32_val: i32,
    pub uint32_val: u32,
    pub int64_val: i64,
    pub uint64_val: u64,
    pub bool_val: u8,
    pub char8_val: Char8,
    pub string8_val: *mut u8,
    pub char16_val: Char16,
    pub string16_val: *mut u16,
    pub char32_val: Char32,
    pub string32_val: *mut u32,
    pub handle_val: *mut CdtHandle,
    pub callable_val: *mut CdtCallable,
    pub array_val: *mut Cdts,
}

/// One tagged value on the wire
#[repr(C)]
pub struct Cdt {
    pub type_tag: TypeTag,
    pub cdt_val: CdtVal,
    pub free_required: bool,
}

impl Default for Cdt {
    fn default() -> Self {
        Self::null()
    }
}

macro_rules! scalar_accessors {
    ($($set:ident, $get:ident, $field:ident, $ty:ty, $tag:ident;)*) => {
        $(
            pub fn $set(&mut self, v: $ty) {
                self.free();
                self.type_tag = TypeTag::$tag;
                self.cdt_val = CdtVal { $field: v };
                self.free_required = false;
            }

            pub fn $get(&self) -> Option<$ty> {
                if self.type_tag == TypeTag::$tag {
                    Some(unsafe { self.cdt_val.$field })
                } else {
                    None
                }
            }
        )*
    };
}

impl Cdt {
    pub const fn null() -> Self {
        Self {
            type_tag: TypeTag::NULL,
            cdt_val: CdtVal { uint64_val: 0 },
            free_required: false,
        }
    }

    #[inline]
    pub fn tag(&self) -> TypeTag {
        self.type_tag
    }

    pub fn is_null(&self) -> bool {
        self.type_tag == TypeTag::NULL
    }

    scalar_accessors! {
        set_f64, as_f64, float64_val, f64, FLOAT64;
        set_f32, as_f32, float32_val, f32, FLOAT32;
        set_i8, as_i8, int8_val, i8, INT8;
        set_i16, as_i16, int16_val, i16, INT16;
        set_i32, as_i32, int32_val, i32, INT32;
        set_i64, as_i64, int64_val, i64, INT64;
        set_u8, as_u8, uint8_val, u8, UINT8;
        set_u16, as_u16, uint16_val, u16, UINT16;
        set_u32, as_u32, uint32_val, u32, UINT32;
        set_u64, as_u64, uint64_val, u64, UINT64;
        set_size, as_size, uint64_val, u64, SIZE;
    }

    pub fn set_null(&mut self) {
        self.free();
    }

    pub fn set_bool(&mut self, v: bool) {
        self.free();
        self.type_tag = TypeTag::BOOL;
        self.cdt_val = CdtVal { bool_val: v as u8 };
        self.free_required = false;
    }

    pub fn as_bool(&self) -> Option<bool> {
        (self.type_tag == TypeTag::BOOL).then(|| unsafe { self.cdt_val.bool_val } != 0)
    }

    pub fn set_char8(&mut self, ch: char) {
        self.free();
        self.type_tag = TypeTag::CHAR8;
        self.cdt_val = CdtVal {
            char8_val: Char8::encode(ch),
        };
        self.free_required = false;
    }

    pub fn set_char16(&mut self, ch: char) {
        self.free();
        self.type_tag = TypeTag::CHAR16;
        self.cdt_val = CdtVal {
            char16_val: Char16::encode(ch),
        };
        self.free_required = false;
    }

    pub fn set_char32(&mut self, ch: char) {
        self.free();
        self.type_tag = TypeTag::CHAR32;
        self.cdt_val = CdtVal {
            char32_val: Char32::encode(ch),
        };
        self.free_required = false;
    }

    /// Decoded char for any of the three widths; `None` on tag mismatch or
    /// invalid encoding
    pub fn as_char(&self) -> Option<char> {
        unsafe {
            match self.type_tag {
                TypeTag::CHAR8 => self.cdt_val.char8_val.decode(),
                TypeTag::CHAR16 => self.cdt_val.char16_val.decode(),
                TypeTag::CHAR32 => self.cdt_val.char32_val.decode(),
                _ => None,
            }
        }
    }

    /// Store a NUL-terminated copy; fails on interior NUL
    pub fn set_string8(&mut self, s: &str) -> Result<(), InteriorNul> {
        if s.contains('\0') {
            return Err(InteriorNul);
        }
        self.free();
        self.type_tag = TypeTag::STRING8;
        self.cdt_val = CdtVal {
            string8_val: alloc_units(s.as_bytes()),
        };
        self.free_required = true;
        Ok(())
    }

    pub fn set_string16(&mut self, s: &str) -> Result<(), InteriorNul> {
        if s.contains('\0') {
            return Err(InteriorNul);
        }
        let units: Vec<u16> = s.encode_utf16().collect();
        self.free();
        self.type_tag = TypeTag::STRING16;
        self.cdt_val = CdtVal {
            string16_val: alloc_units(&units),
        };
        self.free_required = true;
        Ok(())
    }

    pub fn set_string32(&mut self, s: &str) -> Result<(), InteriorNul> {
        if s.contains('\0') {
            return Err(InteriorNul);
        }
        let units: Vec<u32> = s.chars().map(|c| c as u32).collect();
        self.free();
        self.type_tag = TypeTag::STRING32;
        self.cdt_val = CdtVal {
            string32_val: alloc_units(&units),
        };
        self.free_required = true;
        Ok(())
    }

    /// Decoded string for any of the three widths
    ///
    /// `None` on tag mismatch or invalid encoding; a null buffer reads as "".
    pub fn as_string(&self) -> Option<String> {
        unsafe {
            match self.type_tag {
                TypeTag::STRING8 => {
                    let ptr = self.cdt_val.string8_val;
                    if ptr.is_null() {
                        return Some(String::new());
                    }
                    let bytes = core::slice::from_raw_parts(ptr, units_len(ptr));
                    core::str::from_utf8(bytes).ok().map(str::to_owned)
                }
                TypeTag::STRING16 => {
                    let ptr = self.cdt_val.string16_val;
                    if ptr.is_null() {
                        return Some(String::new());
                    }
                    let units = core::slice::from_raw_parts(ptr, units_len(ptr));
                    String::from_utf16(units).ok()
                }
                TypeTag::STRING32 => {
                    let ptr = self.cdt_val.string32_val;
                    if ptr.is_null() {
                        return Some(String::new());
                    }
                    core::slice::from_raw_parts(ptr, units_len(ptr))
                        .iter()
                        .map(|u| char::from_u32(*u))
                        .collect()
                }
                _ => None,
            }
        }
    }

    /// Take ownership of `array`; the cell tag becomes `common | ARRAY`
    pub fn set_array(&mut self, array: *mut Cdts, common: TypeTag) {
        self.free();
        self.type_tag = common.with_array();
        self.cdt_val = CdtVal { array_val: array };
        self.free_required = true;
    }

    pub fn as_array(&self) -> Option<&Cdts> {
        if !self.type_tag.is_array() {
            return None;
        }
        unsafe { self.cdt_val.array_val.as_ref() }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Cdts> {
        if !self.type_tag.is_array() {
            return None;
        }
        unsafe { self.cdt_val.array_val.as_mut() }
    }

    /// Store a copy of `record` in a freshly allocated handle record
    pub fn set_handle(&mut self, record: CdtHandle) {
        self.free();
        let ptr = alloc::calloc::<CdtHandle>(1);
        unsafe { ptr.write(record) };
        self.type_tag = TypeTag::HANDLE;
        self.cdt_val = CdtVal { handle_val: ptr };
        self.free_required = true;
    }

    pub fn as_handle(&self) -> Option<&CdtHandle> {
        if self.type_tag != TypeTag::HANDLE {
            return None;
        }
        unsafe { self.cdt_val.handle_val.as_ref() }
    }

    /// Take ownership of `record`
    pub fn set_callable(&mut self, record: *mut CdtCallable) {
        self.free();
        self.type_tag = TypeTag::CALLABLE;
        self.cdt_val = CdtVal {
            callable_val: record,
        };
        self.free_required = true;
    }

    pub fn as_callable(&self) -> Option<&CdtCallable> {
        if self.type_tag != TypeTag::CALLABLE {
            return None;
        }
        unsafe { self.cdt_val.callable_val.as_ref() }
    }

    /// Release the payload if this cell owns it and reset to null
    ///
    /// Handle records are freed but the referenced object is not released.
    /// Callable records are freed; their xcall is released only when the
    /// record was minted for this cell from a local function.
    pub fn free(&mut self) {
        if self.free_required {
            let tag = self.type_tag;
            unsafe {
                if tag.is_array() {
                    Cdts::free(self.cdt_val.array_val);
                } else {
                    match tag {
                        TypeTag::STRING8 => alloc::free(self.cdt_val.string8_val),
                        TypeTag::STRING16 => alloc::free(self.cdt_val.string16_val),
                        TypeTag::STRING32 => alloc::free(self.cdt_val.string32_val),
                        TypeTag::HANDLE => alloc::free(self.cdt_val.handle_val),
                        TypeTag::CALLABLE => {
                            let record = self.cdt_val.callable_val;
                            if let Some(callable) = record.as_ref() {
                                crate::callable::release_cell_export(callable.val);
                            }
                            CdtCallable::free(record);
                        }
                        _ => {}
                    }
                }
            }
        }
        self.type_tag = TypeTag::NULL;
        self.cdt_val = CdtVal { uint64_val: 0 };
        self.free_required = false;
    }
}

/// String payload contained a NUL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteriorNul;
