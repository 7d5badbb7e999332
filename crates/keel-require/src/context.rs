// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Per-interpreter loader state

use keel_vm::Vm;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::{RequireError, Result};
use crate::native::{LibraryOpener, NativeLibrary};

/// Loader state owned by one interpreter.
///
/// Stored in the interpreter's extension slot by [`crate::install`]. The
/// script-visible sets (`$:` and `$"`) live in the interpreter's globals;
/// everything here is private to the loader.
pub struct LoaderContext {
    /// Paths in the middle of a `require`, in start order
    loading: Vec<PathBuf>,
    /// Prefix of native entry symbols
    symbol_prefix: String,
    /// Opens native libraries
    opener: Rc<dyn LibraryOpener>,
    /// Libraries opened by `load_native`, kept open until the process exits
    libraries: Vec<(PathBuf, Rc<dyn NativeLibrary>)>,
}

impl LoaderContext {
    /// Create a context with no loads in progress
    pub fn new(symbol_prefix: impl Into<String>, opener: Rc<dyn LibraryOpener>) -> Self {
        Self {
            loading: Vec::new(),
            symbol_prefix: symbol_prefix.into(),
            opener,
            libraries: Vec::new(),
        }
    }

    /// Prefix of native entry symbols
    pub fn symbol_prefix(&self) -> &str {
        &self.symbol_prefix
    }

    /// The configured library opener
    pub fn opener(&self) -> Rc<dyn LibraryOpener> {
        Rc::clone(&self.opener)
    }

    /// Paths currently being required
    pub fn loading(&self) -> &[PathBuf] {
        &self.loading
    }

    /// Whether `path` is being required
    pub fn is_loading(&self, path: &Path) -> bool {
        self.loading.iter().any(|p| p == path)
    }

    pub(crate) fn push_loading(&mut self, path: PathBuf) {
        self.loading.push(path);
    }

    pub(crate) fn remove_loading(&mut self, path: &Path) {
        if let Some(index) = self.loading.iter().rposition(|p| p == path) {
            self.loading.remove(index);
        }
    }

    /// A library previously opened for `path`
    pub fn library(&self, path: &Path) -> Option<Rc<dyn NativeLibrary>> {
        self.libraries
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, lib)| Rc::clone(lib))
    }

    pub(crate) fn retain_library(&mut self, path: PathBuf, library: Rc<dyn NativeLibrary>) {
        if self.library(&path).is_none() {
            self.libraries.push((path, library));
        }
    }
}

impl std::fmt::Debug for LoaderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderContext")
            .field("loading", &self.loading)
            .field("symbol_prefix", &self.symbol_prefix)
            .field(
                "libraries",
                &self.libraries.iter().map(|(p, _)| p).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// The loader state installed on `vm`
pub fn context(vm: &Vm) -> Result<&LoaderContext> {
    vm.extension::<LoaderContext>().ok_or_else(not_installed)
}

/// Mutable loader state installed on `vm`
pub fn context_mut(vm: &mut Vm) -> Result<&mut LoaderContext> {
    vm.extension_mut::<LoaderContext>().ok_or_else(not_installed)
}

fn not_installed() -> RequireError {
    RequireError::config("require is not installed on this interpreter")
}
