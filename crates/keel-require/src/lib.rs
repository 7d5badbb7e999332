// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # keel-require
//!
//! `require` and `load` for the keel interpreter.
//!
//! A module name is resolved against the load path (`$:`) to a source script
//! (`.rb`), a precompiled image (`.mrb`) or a native extension
//! (`.so`/`.dll`/`.dylib`) and handed to the matching loader. `require`
//! records completed loads in `$"` and skips paths already loaded or still
//! loading; `load` always runs the file.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keel_require::{install, finalize, LoaderConfig};
//! use keel_vm::Vm;
//!
//! let mut vm = Vm::new();
//! install(&mut vm, &LoaderConfig::load(None)?)?;
//! vm.eval("require \"json\"", "main.rb")?;
//! finalize(&mut vm)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bytecode;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod kernel;
pub mod native;
pub mod resolver;
pub mod source;
pub mod tracker;
pub mod unloader;

use keel_vm::{Value, Vm};
use std::rc::Rc;

// Re-exports for convenience
pub use config::LoaderConfig;
pub use context::LoaderContext;
pub use error::{RequireError, Result};
pub use kernel::{load, require};
pub use native::{DylibOpener, EntrySymbols, GemEntry, LibraryOpener, NativeLibrary};
pub use resolver::{resolve, LOAD_PATH};
pub use tracker::LOADED_FEATURES;

/// Installs `require`/`load` on `vm` using the platform dynamic loader.
pub fn install(vm: &mut Vm, config: &LoaderConfig) -> Result<()> {
    install_with_opener(vm, config, Rc::new(DylibOpener))
}

/// Installs `require`/`load` on `vm` with a custom library opener.
///
/// Resets `$:` from `config`, empties `$"`, then requires each preload name
/// in order. The first failing preload aborts the install.
pub fn install_with_opener(
    vm: &mut Vm,
    config: &LoaderConfig,
    opener: Rc<dyn LibraryOpener>,
) -> Result<()> {
    vm.define_function("require", kernel::f_require);
    vm.define_function("load", kernel::f_load);
    vm.insert_extension(LoaderContext::new(config.symbol_prefix.clone(), opener));

    let load_path = config.load_path();
    tracing::debug!("load path: {:?}", load_path);
    vm.set_global(
        LOAD_PATH,
        Value::array(load_path.into_iter().map(Value::String).collect()),
    );
    vm.set_global(LOADED_FEATURES, Value::array(Vec::new()));

    for name in &config.preload {
        tracing::debug!("preloading {}", name);
        require(vm, name)?;
    }
    Ok(())
}

/// Runs native extension finalizers. Call once before dropping `vm`.
pub fn finalize(vm: &mut Vm) -> Result<()> {
    unloader::unload_all(vm)
}
