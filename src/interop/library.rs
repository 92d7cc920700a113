//! Shared library loading for runtime plugins
//!
//! Thin wrapper over dlopen/LoadLibrary. Symbols are resolved lazily and the
//! library stays mapped until the last plugin reference is dropped.

use core::ffi::c_void;
use core::fmt;
use core::ptr::NonNull;
use std::ffi::CString;
use std::path::{Path, PathBuf};

/// Mapped plugin library
pub struct Library {
    handle: NonNull<c_void>,
    path: PathBuf,
}

impl Library {
    /// Map the library at `path`, resolving all symbols immediately
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        let handle = Self::open_impl(path)?;
        Ok(Self {
            handle,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn open_impl(path: &Path) -> Result<NonNull<c_void>, LoadError> {
        use std::os::unix::ffi::OsStrExt;

        let cpath = CString::new(path.as_os_str().as_bytes()).map_err(|_| LoadError::InvalidName)?;
        unsafe {
            // RTLD_GLOBAL so a plugin's own dependencies can see xllr symbols
            let handle = libc::dlopen(cpath.as_ptr(), libc::RTLD_NOW | libc::RTLD_GLOBAL);
            NonNull::new(handle).ok_or_else(|| LoadError::LoadFailed(last_dl_error()))
        }
    }

    #[cfg(windows)]
    fn open_impl(path: &Path) -> Result<NonNull<c_void>, LoadError> {
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::errhandlingapi::GetLastError;
        use winapi::um::libloaderapi::LoadLibraryW;

        let wide: Vec<u16> = path.as_os_str().encode_wide().chain(Some(0)).collect();
        unsafe {
            let handle = LoadLibraryW(wide.as_ptr());
            NonNull::new(handle as *mut c_void)
                .ok_or_else(|| LoadError::LoadFailed(format!("error code {}", GetLastError())))
        }
    }

    /// Address of `name`
    pub fn symbol(&self, name: &str) -> Result<NonNull<c_void>, SymbolError> {
        let cname = CString::new(name).map_err(|_| SymbolError::InvalidName)?;
        NonNull::new(self.symbol_impl(&cname)).ok_or_else(|| SymbolError::NotFound(name.to_string()))
    }

    /// Like [`Library::symbol`], but absence is not an error
    pub fn optional_symbol(&self, name: &str) -> Option<NonNull<c_void>> {
        self.symbol(name).ok()
    }

    #[cfg(unix)]
    fn symbol_impl(&self, name: &CString) -> *mut c_void {
        unsafe { libc::dlsym(self.handle.as_ptr(), name.as_ptr()) }
    }

    #[cfg(windows)]
    fn symbol_impl(&self, name: &CString) -> *mut c_void {
        use winapi::um::libloaderapi::GetProcAddress;

        unsafe { GetProcAddress(self.handle.as_ptr() as _, name.as_ptr()) as *mut c_void }
    }
}

#[cfg(unix)]
fn last_dl_error() -> String {
    unsafe {
        let err = libc::dlerror();
        if err.is_null() {
            "unknown dlopen error".into()
        } else {
            std::ffi::CStr::from_ptr(err).to_string_lossy().into_owned()
        }
    }
}

impl Drop for Library {
    #[cfg(unix)]
    fn drop(&mut self) {
        unsafe {
            libc::dlclose(self.handle.as_ptr());
        }
    }

    #[cfg(windows)]
    fn drop(&mut self) {
        use winapi::um::libloaderapi::FreeLibrary;

        unsafe {
            FreeLibrary(self.handle.as_ptr() as _);
        }
    }
}

impl fmt::Debug for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Library").field("path", &self.path).finish()
    }
}

// Safety: dl handles are process-global and usable from any thread
unsafe impl Send for Library {}
unsafe impl Sync for Library {}

/// Library mapping errors
#[derive(Debug)]
pub enum LoadError {
    InvalidName,
    LoadFailed(String),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName => write!(f, "library path contains a NUL byte"),
            Self::LoadFailed(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for LoadError {}

/// Symbol lookup errors
#[derive(Debug)]
pub enum SymbolError {
    InvalidName,
    NotFound(String),
}

impl fmt::Display for SymbolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName => write!(f, "symbol name contains a NUL byte"),
            Self::NotFound(name) => write!(f, "symbol '{}' not found", name),
        }
    }
}

impl std::error::Error for SymbolError {}
