// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Shutdown teardown of native extensions

use keel_vm::Vm;
use std::path::Path;

use crate::dispatch::{classify, Strategy};
use crate::error::Result;
use crate::native::unload_native;
use crate::tracker::loaded_features;

/// Runs the finalizer of every native extension in `$"`, in load order.
///
/// Each finalizer is attempted once even if an earlier one fails; the first
/// failure is returned.
pub fn unload_all(vm: &mut Vm) -> Result<()> {
    let features = loaded_features(vm)?;
    let mut natives: Vec<String> = Vec::new();
    for feature in features.borrow().iter() {
        let Some(path) = feature.as_str() else {
            continue;
        };
        let native = matches!(classify(Path::new(path)), Ok(Strategy::Native));
        if native && !natives.iter().any(|p| p == path) {
            natives.push(path.to_string());
        }
    }

    let mut first_error = None;
    for path in &natives {
        if let Err(e) = unload_native(vm, Path::new(path)) {
            tracing::warn!("finalizing {} failed: {}", path, e);
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
