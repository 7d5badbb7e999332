// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Load-state bookkeeping for `require`.
//!
//! Completed loads are recorded in the script-visible `$"` array. Loads in
//! progress are tracked in the [`LoaderContext`](crate::context::LoaderContext)
//! so a file that requires itself, directly or through a cycle, is not
//! executed twice.

use keel_vm::{Value, Vm};
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use crate::context::{context, context_mut};
use crate::error::{RequireError, Result};

/// Global holding completed loads.
pub const LOADED_FEATURES: &str = "$\"";

/// The `$"` array.
pub fn loaded_features(vm: &Vm) -> Result<Rc<RefCell<Vec<Value>>>> {
    vm.global(LOADED_FEATURES)
        .as_array()
        .cloned()
        .ok_or_else(|| RequireError::config(format!("{} is not an Array", LOADED_FEATURES)))
}

/// Whether `path` completed a `require`.
pub fn already_loaded(vm: &Vm, path: &Path) -> Result<bool> {
    let key = path_key(path);
    let features = loaded_features(vm)?;
    let found = features
        .borrow()
        .iter()
        .any(|v| v.as_str() == Some(key.as_str()));
    Ok(found)
}

/// Whether a `require` of `path` is underway.
pub fn in_progress(vm: &Vm, path: &Path) -> Result<bool> {
    Ok(context(vm)?.is_loading(path))
}

/// Marks `path` as being loaded.
pub fn begin(vm: &mut Vm, path: &Path) -> Result<()> {
    context_mut(vm)?.push_loading(path.to_path_buf());
    Ok(())
}

/// Records a successful load. The in-progress mark stays.
pub fn commit(vm: &mut Vm, path: &Path) -> Result<()> {
    loaded_features(vm)?
        .borrow_mut()
        .push(Value::String(path_key(path)));
    Ok(())
}

/// Clears the in-progress mark after a failed load so it can be retried.
pub fn abort(vm: &mut Vm, path: &Path) {
    if let Ok(ctx) = context_mut(vm) {
        ctx.remove_loading(path);
    }
}

/// String form of a path as stored in `$"`.
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
