//! Parameter/return value buffer pair

use core::ptr::NonNull;

use crate::cdt::{alloc, Cdts};

/// Allocate the pair: parameters at `[0]`, return values at `[1]`
///
/// Cells come from this thread's cache when they fit.
pub fn alloc_cdts_buffer(params_count: u64, retvals_count: u64) -> *mut Cdts {
    let buffer = alloc::calloc::<Cdts>(2);
    unsafe {
        buffer.write(Cdts::empty());
        buffer.add(1).write(Cdts::empty());
        (*buffer).init(params_count, 1, true);
        (*buffer.add(1)).init(retvals_count, 1, true);
    }
    buffer
}

/// Free a pair from [`alloc_cdts_buffer`], releasing every owned payload
///
/// # Safety
/// `buffer` must be null or a pair from [`alloc_cdts_buffer`], freed once.
pub unsafe fn free_cdts_buffer(buffer: *mut Cdts) {
    if buffer.is_null() {
        return;
    }
    // Reverse allocation order keeps the cell cache LIFO
    (*buffer.add(1)).free_cells();
    (*buffer).free_cells();
    alloc::free(buffer);
}

/// Owned buffer pair, freed on drop
pub struct CallBuffer {
    ptr: NonNull<Cdts>,
}

impl CallBuffer {
    pub fn new(params_count: u64, retvals_count: u64) -> Self {
        let ptr = alloc_cdts_buffer(params_count, retvals_count);
        // calloc aborts instead of returning null
        Self {
            ptr: NonNull::new(ptr).unwrap_or_else(|| unreachable!()),
        }
    }

    /// Adopt a pair from [`alloc_cdts_buffer`]
    ///
    /// # Safety
    /// Ownership moves into the returned value.
    pub unsafe fn from_raw(ptr: *mut Cdts) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr })
    }

    /// Release ownership without freeing
    pub fn into_raw(self) -> *mut Cdts {
        let ptr = self.ptr.as_ptr();
        core::mem::forget(self);
        ptr
    }

    pub fn as_mut_ptr(&mut self) -> *mut Cdts {
        self.ptr.as_ptr()
    }

    pub fn params(&self) -> &Cdts {
        unsafe { &*self.ptr.as_ptr() }
    }

    pub fn params_mut(&mut self) -> &mut Cdts {
        unsafe { &mut *self.ptr.as_ptr() }
    }

    pub fn retvals(&self) -> &Cdts {
        unsafe { &*self.ptr.as_ptr().add(1) }
    }

    pub fn retvals_mut(&mut self) -> &mut Cdts {
        unsafe { &mut *self.ptr.as_ptr().add(1) }
    }
}

impl Drop for CallBuffer {
    fn drop(&mut self) {
        unsafe { free_cdts_buffer(self.ptr.as_ptr()) };
    }
}
