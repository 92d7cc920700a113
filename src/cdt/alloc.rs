//! Memory shared across the runtime boundary
//!
//! Design: Two allocation paths for wire memory:
//! 1. C allocator (`malloc`/`free`) for everything another runtime may free
//! 2. Per-thread bump cache of cells for short-lived call buffers
//!
//! Cache blocks are released in LIFO order; the cache resets once nothing
//! is borrowed from it.

use core::cell::RefCell;
use core::ffi::{c_char, c_void};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::alloc::Layout;

use super::cell::Cdt;

/// Cells per thread available to call buffers
pub const DEFAULT_CACHE_CELLS: usize = 100;

static CACHE_CAPACITY: AtomicUsize = AtomicUsize::new(DEFAULT_CACHE_CELLS);

thread_local! {
    static CELL_CACHE: RefCell<CellCache> =
        RefCell::new(CellCache::new(CACHE_CAPACITY.load(Ordering::Relaxed)));
}

/// Zeroed C allocation of `count` values of `T`; aborts on exhaustion
pub fn calloc<T>(count: usize) -> *mut T {
    let count = count.max(1);
    let ptr = unsafe { libc::calloc(count, core::mem::size_of::<T>()) } as *mut T;
    if ptr.is_null() {
        let layout = Layout::array::<T>(count).unwrap_or_else(|_| Layout::new::<T>());
        std::alloc::handle_alloc_error(layout);
    }
    ptr
}

/// Release memory obtained from [`calloc`] or from another runtime's `malloc`
///
/// # Safety
/// `ptr` must be null or a live C allocation.
pub unsafe fn free<T>(ptr: *mut T) {
    if !ptr.is_null() {
        libc::free(ptr as *mut c_void);
    }
}

/// Copy `msg` into a C-allocated NUL-terminated string
///
/// Interior NULs are replaced so the message is never truncated.
pub fn alloc_c_string(msg: &str) -> *mut c_char {
    let bytes = msg.as_bytes();
    let ptr = calloc::<u8>(bytes.len() + 1);
    unsafe {
        for (i, b) in bytes.iter().enumerate() {
            *ptr.add(i) = if *b == 0 { b' ' } else { *b };
        }
    }
    ptr as *mut c_char
}

/// Copy `units` plus a terminating zero into a C allocation
pub(crate) fn alloc_units<T: Copy + Default>(units: &[T]) -> *mut T {
    let ptr = calloc::<T>(units.len() + 1);
    unsafe {
        core::ptr::copy_nonoverlapping(units.as_ptr(), ptr, units.len());
        *ptr.add(units.len()) = T::default();
    }
    ptr
}

/// Number of units before the terminating zero
///
/// # Safety
/// `ptr` must point to a zero-terminated sequence.
pub(crate) unsafe fn units_len<T: Copy + Default + PartialEq>(ptr: *const T) -> usize {
    let zero = T::default();
    let mut len = 0;
    while *ptr.add(len) != zero {
        len += 1;
    }
    len
}

/// Bump cache of cells for one thread
pub struct CellCache {
    cells: Vec<Cdt>,
    next: usize,
    live: usize,
}

impl CellCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            cells: (0..capacity).map(|_| Cdt::null()).collect(),
            next: 0,
            live: 0,
        }
    }

    /// Borrow `count` contiguous cells, or `None` when exhausted
    pub fn try_alloc(&mut self, count: usize) -> Option<NonNull<Cdt>> {
        if count == 0 {
            return None;
        }
        let end = self.next.checked_add(count)?;
        if end > self.cells.len() {
            return None;
        }
        let ptr = unsafe { self.cells.as_mut_ptr().add(self.next) };
        self.next = end;
        self.live += 1;
        NonNull::new(ptr)
    }

    /// Return a block obtained from [`CellCache::try_alloc`]
    pub fn release(&mut self, ptr: *mut Cdt, count: usize) {
        debug_assert!(self.owns(ptr), "cell block not from this cache");
        self.live = self.live.saturating_sub(1);
        let top = unsafe { self.cells.as_mut_ptr().add(self.next) };
        if unsafe { ptr.add(count) } == top {
            self.next -= count;
        }
        if self.live == 0 {
            self.next = 0;
        }
    }

    pub fn owns(&self, ptr: *const Cdt) -> bool {
        let range = self.cells.as_ptr_range();
        range.start <= ptr && ptr < range.end
    }

    pub fn remaining(&self) -> usize {
        self.cells.len() - self.next
    }

    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    /// Blocks currently borrowed
    pub fn in_use(&self) -> usize {
        self.live
    }

    /// Resize; ignored while blocks are borrowed
    fn resize(&mut self, capacity: usize) -> bool {
        if self.live != 0 {
            return false;
        }
        *self = Self::new(capacity);
        true
    }
}

/// Set the cache capacity for threads created from now on, and this thread
pub fn set_cache_capacity(cells: usize) {
    CACHE_CAPACITY.store(cells, Ordering::Relaxed);
    CELL_CACHE.with(|cache| {
        if let Ok(mut cache) = cache.try_borrow_mut() {
            if cache.capacity() != cells {
                cache.resize(cells);
            }
        }
    });
}

/// Cells borrowed from this thread's cache, for diagnostics and tests
pub fn cache_in_use() -> usize {
    CELL_CACHE.with(|cache| cache.borrow().in_use())
}

/// Allocate `count` null cells; returns the block and whether it is cache-backed
pub(crate) fn alloc_cells(count: usize, prefer_cache: bool) -> (*mut Cdt, bool) {
    if count == 0 {
        return (core::ptr::null_mut(), false);
    }
    if prefer_cache {
        let cached = CELL_CACHE.with(|cache| cache.borrow_mut().try_alloc(count));
        if let Some(ptr) = cached {
            let ptr = ptr.as_ptr();
            for i in 0..count {
                unsafe { ptr.add(i).write(Cdt::null()) };
            }
            return (ptr, true);
        }
    }
    let ptr = calloc::<Cdt>(count);
    for i in 0..count {
        unsafe { ptr.add(i).write(Cdt::null()) };
    }
    (ptr, false)
}

/// Counterpart of [`alloc_cells`]; cells must already be freed
///
/// # Safety
/// `ptr`/`count`/`on_cache` must describe a block from [`alloc_cells`].
pub(crate) unsafe fn release_cells(ptr: *mut Cdt, count: usize, on_cache: bool) {
    if ptr.is_null() {
        return;
    }
    if on_cache {
        CELL_CACHE.with(|cache| cache.borrow_mut().release(ptr, count));
    } else {
        free(ptr);
    }
}
