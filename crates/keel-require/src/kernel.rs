// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! `require` and `load`

use keel_vm::{Value, Vm};

use crate::dispatch::dispatch;
use crate::error::{RequireError, Result};
use crate::resolver::resolve_in;
use crate::tracker;

/// Loads `name` unless its resolved path was already required.
///
/// Returns `false` when the file is loaded or still loading. A failed load
/// may be retried.
pub fn require(vm: &mut Vm, name: &str) -> Result<bool> {
    let path = resolve_in(vm, name)?;

    if tracker::already_loaded(vm, &path)? || tracker::in_progress(vm, &path)? {
        tracing::debug!("{} already required", path.display());
        return Ok(false);
    }

    tracker::begin(vm, &path)?;
    if let Err(e) = dispatch(vm, &path).and_then(|()| tracker::commit(vm, &path)) {
        tracker::abort(vm, &path);
        return Err(e);
    }
    tracing::debug!("required {}", path.display());
    Ok(true)
}

/// Loads `name` unconditionally.
pub fn load(vm: &mut Vm, name: &str) -> Result<bool> {
    let path = resolve_in(vm, name)?;
    dispatch(vm, &path)?;
    Ok(true)
}

pub(crate) fn f_require(vm: &mut Vm, args: &[Value]) -> keel_vm::Result<Value> {
    let name = name_arg(args)?;
    Ok(Value::Bool(require(vm, &name)?))
}

pub(crate) fn f_load(vm: &mut Vm, args: &[Value]) -> keel_vm::Result<Value> {
    let name = name_arg(args)?;
    Ok(Value::Bool(load(vm, &name)?))
}

fn name_arg(args: &[Value]) -> Result<String> {
    match args {
        [Value::String(name)] => Ok(name.clone()),
        [other] => Err(RequireError::TypeConversion(other.inspect())),
        _ => Err(RequireError::Arity(args.len())),
    }
}
