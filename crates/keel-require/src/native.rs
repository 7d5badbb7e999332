// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Native extension loader.
//!
//! A native extension is a shared library exporting at least one of
//!
//! - `<prefix>_<stem>_gem_init`: `extern "C" fn(*mut c_void)`, called with
//!   the interpreter handle
//! - `gem_mrblib_irep_<stem>`: a bytecode image, run after the initializer
//!
//! and optionally `<prefix>_<stem>_gem_final`, called at shutdown. The stem is
//! the file name without its extension, with `-` replaced by `_`.
//!
//! Libraries are reached through [`LibraryOpener`] and [`NativeLibrary`] so
//! hosts and tests can supply their own symbol tables. [`DylibOpener`] uses
//! the platform dynamic loader.

use keel_vm::dump::{image_size, HEADER_SIZE};
use keel_vm::Vm;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::bytecode::load_bytecode_blob;
use crate::context::{context, context_mut};
use crate::error::{RequireError, Result};
use crate::resolver::basename;

/// Signature of extension initializers and finalizers.
pub type GemEntry = unsafe extern "C" fn(*mut c_void);

/// Symbols a library is looked up by.
pub trait NativeLibrary {
    /// An entry point exported under `symbol`.
    fn entry(&self, symbol: &str) -> Option<GemEntry>;

    /// A bytecode image exported under `symbol`.
    fn image(&self, symbol: &str) -> Option<&[u8]>;
}

/// Opens native libraries.
pub trait LibraryOpener {
    /// Opens the library at `path`. Failures are [`RequireError::LibraryOpen`].
    fn open(&self, path: &Path) -> Result<Rc<dyn NativeLibrary>>;
}

/// Conventional entry symbol names for one library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySymbols {
    /// `<prefix>_<stem>_gem_init`
    pub init: String,
    /// `<prefix>_<stem>_gem_final`
    pub fini: String,
    /// `gem_mrblib_irep_<stem>`
    pub image: String,
}

impl EntrySymbols {
    /// Derives the symbol names for the library file `path`.
    pub fn derive(path: &str, prefix: &str) -> Self {
        let stem = symbol_stem(path);
        Self {
            init: format!("{}_{}_gem_init", prefix, stem),
            fini: format!("{}_{}_gem_final", prefix, stem),
            image: format!("gem_mrblib_irep_{}", stem),
        }
    }
}

/// The file name of `path` without its extension, `-` replaced by `_`.
pub fn symbol_stem(path: &str) -> String {
    let base = basename(path);
    let stem = base.rfind('.').map_or(base, |i| &base[..i]);
    stem.replace('-', "_")
}

/// Opens libraries with the platform dynamic loader.
#[derive(Debug, Default, Clone, Copy)]
pub struct DylibOpener;

impl LibraryOpener for DylibOpener {
    fn open(&self, path: &Path) -> Result<Rc<dyn NativeLibrary>> {
        // SAFETY: loading an extension runs its static initializers; the
        // library is trusted by virtue of being on the load path.
        let library = unsafe { libloading::Library::new(path) }.map_err(|e| {
            RequireError::LibraryOpen {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;
        tracing::debug!("opened native library {}", path.display());
        Ok(Rc::new(Dylib { library }))
    }
}

struct Dylib {
    library: libloading::Library,
}

impl NativeLibrary for Dylib {
    fn entry(&self, symbol: &str) -> Option<GemEntry> {
        // SAFETY: by convention the symbol is an `extern "C" fn(*mut c_void)`.
        let entry = unsafe { self.library.get::<GemEntry>(symbol.as_bytes()) }.ok()?;
        Some(*entry)
    }

    fn image(&self, symbol: &str) -> Option<&[u8]> {
        // SAFETY: the symbol addresses a byte array starting with an image
        // header; the header's size field bounds the rest.
        let start: *const u8 = unsafe {
            let symbol = self.library.get::<*const u8>(symbol.as_bytes()).ok()?;
            *symbol
        };
        if start.is_null() {
            return None;
        }

        let header = unsafe { std::slice::from_raw_parts(start, HEADER_SIZE) };
        let len = match image_size(header) {
            Ok(len) => len,
            Err(e) => {
                tracing::warn!("{} does not start with an image header: {}", symbol, e);
                HEADER_SIZE
            }
        };
        Some(unsafe { std::slice::from_raw_parts(start, len) })
    }
}

/// Loads the native extension at `path`.
///
/// The initializer runs first, then the embedded image, which may depend on
/// what the initializer defined. The library stays open afterwards.
pub fn load_native(vm: &mut Vm, path: &Path) -> Result<()> {
    let full = canonicalize(path)?;
    let (opener, prefix) = {
        let ctx = context(vm)?;
        (ctx.opener(), ctx.symbol_prefix().to_string())
    };

    let library = opener.open(&full)?;
    let symbols = EntrySymbols::derive(&full.to_string_lossy(), &prefix);
    let init = library.entry(&symbols.init);
    let has_image = library.image(&symbols.image).is_some();
    if init.is_none() && !has_image {
        return Err(RequireError::MissingSymbols {
            init: symbols.init,
            image: symbols.image,
            path: full,
        });
    }

    context_mut(vm)?.retain_library(full.clone(), Rc::clone(&library));

    if let Some(init) = init {
        tracing::debug!("calling {} in {}", symbols.init, full.display());
        call_entry(vm, init)?;
    }
    if let Some(image) = library.image(&symbols.image) {
        load_bytecode_blob(vm, image, &symbols.image)?;
    }
    Ok(())
}

/// Calls the finalizer of the native extension at `path`.
///
/// Reuses the library opened by [`load_native`] when there is one.
pub fn unload_native(vm: &mut Vm, path: &Path) -> Result<()> {
    let full = canonicalize(path)?;
    let (retained, opener, prefix) = {
        let ctx = context(vm)?;
        (ctx.library(&full), ctx.opener(), ctx.symbol_prefix().to_string())
    };
    let library = match retained {
        Some(library) => library,
        None => opener.open(&full)?,
    };

    let symbols = EntrySymbols::derive(&full.to_string_lossy(), &prefix);
    let fini = library
        .entry(&symbols.fini)
        .ok_or_else(|| RequireError::MissingFinalizer {
            symbol: symbols.fini.clone(),
            path: full.clone(),
        })?;

    tracing::debug!("calling {} in {}", symbols.fini, full.display());
    call_entry(vm, fini)
}

fn canonicalize(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).map_err(|source| RequireError::Canonicalize {
        path: path.to_path_buf(),
        source,
    })
}

/// Invokes an entry point with the interpreter handle.
///
/// An exception the extension leaves pending is returned as an error.
fn call_entry(vm: &mut Vm, entry: GemEntry) -> Result<()> {
    let handle = vm.as_handle();
    // SAFETY: `handle` points at `vm`, which is not touched until the call
    // returns.
    unsafe { entry(handle) };
    match vm.take_exception() {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
