// Copyright 2025 the keel developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::ffi::c_void;
use core::fmt;
use core::mem;

#[derive(Debug, onlyerror::Error)]
pub enum LibraryError {
    /// The platform loader could not open the library.
    Open(#[from] libloading::Error),
}

/// A dynamic library (or the running process) as a symbol source.
///
/// Opening with no path binds to the running process; such a handle is
/// not owned and is left alone on close. Only handles this bridge opened
/// itself are released back to the loader.
pub struct ForeignLibrary {
    handle: Option<libloading::Library>,
    owns_handle: bool,
}

impl fmt::Debug for ForeignLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignLibrary")
            .field("open", &self.handle.is_some())
            .field("owns_handle", &self.owns_handle)
            .finish_non_exhaustive()
    }
}

impl ForeignLibrary {
    /// Opens `path`, or the running process when `path` is `None` or
    /// empty.
    ///
    /// # Errors
    ///
    /// [`LibraryError::Open`] with the loader's diagnostics.
    pub fn open(path: Option<&str>) -> Result<Self, LibraryError> {
        match path {
            None | Some("") => Ok(Self {
                handle: Some(this_process()?),
                owns_handle: false,
            }),
            Some(path) => {
                // Safety: loading a library runs its initialisers; the
                // bridge requires well-behaved native libraries, which is
                // the contract of the FFI surface as a whole.
                let handle = unsafe { libloading::Library::new(path) }?;
                Ok(Self {
                    handle: Some(handle),
                    owns_handle: true,
                })
            }
        }
    }

    #[must_use]
    pub fn owns_handle(&self) -> bool {
        self.owns_handle
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Resolves `name` to a raw address; `None` for empty names, unknown
    /// symbols or a closed handle.
    #[must_use]
    pub fn symbol(&self, name: &str) -> Option<*const c_void> {
        if name.is_empty() {
            return None;
        }
        let handle = self.handle.as_ref()?;

        // Safety: the symbol is surfaced as a raw address; all typed use
        // goes through `call_address`, which owns the signature contract.
        let symbol = unsafe { handle.get::<*mut c_void>(name.as_bytes()) }.ok()?;
        Some((*symbol).cast_const())
    }

    /// Releases the handle. Unowned (this-process) handles are forgotten
    /// rather than closed.
    pub fn close(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        if !self.owns_handle {
            mem::forget(handle);
        }
        self.owns_handle = false;
    }
}

impl Drop for ForeignLibrary {
    fn drop(&mut self) {
        self.close();
    }
}

fn this_process() -> Result<libloading::Library, libloading::Error> {
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            Ok(libloading::os::unix::Library::this().into())
        } else if #[cfg(windows)] {
            Ok(libloading::os::windows::Library::this()?.into())
        } else {
            compile_error!("no dynamic loader for this platform")
        }
    }
}
