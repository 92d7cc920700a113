//! Value Array (CDTS)

use super::alloc::{self, alloc_cells, release_cells};
use super::cell::Cdt;
use super::types::MIXED_OR_UNKNOWN_DIMENSIONS;

/// Fixed-length sequence of cells plus its dimension metadata
#[repr(C)]
pub struct Cdts {
    pub arr: *mut Cdt,
    pub length: u64,
    /// Uniform nesting depth, or [`MIXED_OR_UNKNOWN_DIMENSIONS`]
    pub fixed_dimensions: i64,
    pub allocated_on_cache: bool,
}

impl Default for Cdts {
    fn default() -> Self {
        Self::empty()
    }
}

impl Cdts {
    pub const fn empty() -> Self {
        Self {
            arr: core::ptr::null_mut(),
            length: 0,
            fixed_dimensions: MIXED_OR_UNKNOWN_DIMENSIONS,
            allocated_on_cache: false,
        }
    }

    /// Heap-allocate an array record with `length` null cells
    ///
    /// Nested arrays always use the C allocator since their lifetime is
    /// not bound to a call.
    pub fn alloc(length: u64, fixed_dimensions: i64) -> *mut Cdts {
        let record = alloc::calloc::<Cdts>(1);
        unsafe {
            record.write(Cdts::empty());
            (*record).init(length, fixed_dimensions, false);
        }
        record
    }

    /// Attach `length` fresh null cells to this (empty) record
    pub fn init(&mut self, length: u64, fixed_dimensions: i64, prefer_cache: bool) {
        debug_assert!(self.arr.is_null(), "array already initialized");
        let (arr, on_cache) = alloc_cells(length as usize, prefer_cache);
        self.arr = arr;
        self.length = length;
        self.fixed_dimensions = fixed_dimensions;
        self.allocated_on_cache = on_cache;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.length as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Cell at `index`; out-of-range access is a contract violation
    #[inline]
    pub fn cell_at(&self, index: u64) -> &Cdt {
        assert!(
            index < self.length,
            "cell index {} out of range for array of length {}",
            index,
            self.length
        );
        unsafe { &*self.arr.add(index as usize) }
    }

    #[inline]
    pub fn cell_at_mut(&mut self, index: u64) -> &mut Cdt {
        assert!(
            index < self.length,
            "cell index {} out of range for array of length {}",
            index,
            self.length
        );
        unsafe { &mut *self.arr.add(index as usize) }
    }

    pub fn cells(&self) -> &[Cdt] {
        if self.arr.is_null() {
            return &[];
        }
        unsafe { core::slice::from_raw_parts(self.arr, self.len()) }
    }

    pub fn cells_mut(&mut self) -> &mut [Cdt] {
        if self.arr.is_null() {
            return &mut [];
        }
        unsafe { core::slice::from_raw_parts_mut(self.arr, self.len()) }
    }

    /// Free every owned payload, then the cells themselves
    pub fn free_cells(&mut self) {
        for cell in self.cells_mut() {
            cell.free();
        }
        unsafe { release_cells(self.arr, self.len(), self.allocated_on_cache) };
        self.arr = core::ptr::null_mut();
        self.length = 0;
        self.allocated_on_cache = false;
    }

    /// Free a record from [`Cdts::alloc`] together with its contents
    ///
    /// # Safety
    /// `record` must be null or an unaliased array record from the C allocator.
    pub unsafe fn free(record: *mut Cdts) {
        if record.is_null() {
            return;
        }
        (*record).free_cells();
        alloc::free(record);
    }
}
