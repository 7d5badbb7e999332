// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Shared fixtures for the integration tests

#![allow(dead_code)]

use keel_require::{
    install_with_opener, GemEntry, LibraryOpener, LoaderConfig, NativeLibrary, RequireError,
};
use keel_vm::dump::dump;
use keel_vm::{compile, Value, Vm};
use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Global the fixture scripts append to.
pub const RUNS: &str = "$runs";

/// Config searching `dirs` with no preloads.
pub fn config(dirs: &[&Path]) -> LoaderConfig {
    LoaderConfig {
        search_path: dirs.iter().map(|d| d.to_string_lossy().into_owned()).collect(),
        gems_root: None,
        preload: Vec::new(),
        symbol_prefix: "mrb".to_string(),
    }
}

/// An interpreter with require installed and `$runs` set to `[]`.
pub fn installed(dirs: &[&Path]) -> Vm {
    installed_with(&config(dirs), Rc::new(FakeOpener::default()))
}

pub fn installed_with(config: &LoaderConfig, opener: Rc<dyn LibraryOpener>) -> Vm {
    let mut vm = Vm::new();
    vm.set_global(RUNS, Value::array(Vec::new()));
    install_with_opener(&mut vm, config, opener).unwrap();
    vm
}

/// Writes `content` to `dir/name`.
pub fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

/// Compiles `source` and writes it as a bytecode image to `dir/name`.
pub fn write_image(dir: &Path, name: &str, source: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, dump(&compile(source, name).unwrap())).unwrap();
    path
}

/// What the fixtures recorded in `$runs`.
pub fn runs(vm: &Vm) -> Vec<String> {
    strings(&vm.global(RUNS))
}

/// Appends `entry` to `$runs`; used by the fake extensions.
pub fn record(vm: &mut Vm, entry: &str) {
    if let Some(items) = vm.global(RUNS).as_array() {
        items.borrow_mut().push(Value::from(entry));
    }
}

/// `$"` as strings.
pub fn loaded_features(vm: &Vm) -> Vec<String> {
    strings(&vm.global("$\""))
}

fn strings(value: &Value) -> Vec<String> {
    let items = value.as_array().expect("not an array");
    let items = items.borrow();
    items.iter().map(|v| v.to_string()).collect()
}

/// An in-memory symbol table standing in for a shared library.
#[derive(Default)]
pub struct FakeLibrary {
    entries: Vec<(String, GemEntry)>,
    images: Vec<(String, Vec<u8>)>,
}

impl FakeLibrary {
    pub fn with_entry(mut self, symbol: &str, entry: GemEntry) -> Self {
        self.entries.push((symbol.to_string(), entry));
        self
    }

    pub fn with_image(mut self, symbol: &str, image: Vec<u8>) -> Self {
        self.images.push((symbol.to_string(), image));
        self
    }
}

impl NativeLibrary for FakeLibrary {
    fn entry(&self, symbol: &str) -> Option<GemEntry> {
        self.entries
            .iter()
            .find(|(name, _)| name == symbol)
            .map(|(_, entry)| *entry)
    }

    fn image(&self, symbol: &str) -> Option<&[u8]> {
        self.images
            .iter()
            .find(|(name, _)| name == symbol)
            .map(|(_, image)| image.as_slice())
    }
}

/// Opens [`FakeLibrary`] tables by file name, counting opens.
#[derive(Default)]
pub struct FakeOpener {
    libraries: RefCell<Vec<(String, Rc<FakeLibrary>)>>,
    opens: Cell<usize>,
}

impl FakeOpener {
    pub fn register(&self, file_name: &str, library: FakeLibrary) {
        self.libraries
            .borrow_mut()
            .push((file_name.to_string(), Rc::new(library)));
    }

    pub fn opens(&self) -> usize {
        self.opens.get()
    }
}

impl LibraryOpener for FakeOpener {
    fn open(&self, path: &Path) -> keel_require::Result<Rc<dyn NativeLibrary>> {
        self.opens.set(self.opens.get() + 1);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.libraries
            .borrow()
            .iter()
            .find(|(name, _)| *name == file_name)
            .map(|(_, lib)| Rc::clone(lib) as Rc<dyn NativeLibrary>)
            .ok_or_else(|| RequireError::LibraryOpen {
                path: path.to_path_buf(),
                reason: "not a registered library".to_string(),
            })
    }
}
