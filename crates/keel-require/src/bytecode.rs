// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Precompiled bytecode loader.
//!
//! Images end in `STOP`, which would halt the interpreter when the unit runs
//! as a callable. Before running, a trailing `STOP` is replaced with
//! `LOADNIL` and an appended `RETURN`. Units decoded from a borrowed buffer
//! are copied before the patch.

use keel_vm::irep::INSTRUCTION_SIZE;
use keel_vm::{Instruction, Irep, OpCode, Vm};
use std::path::Path;

use crate::error::{RequireError, Result};

/// Rewrites a trailing `STOP` into `LOADNIL; RETURN`.
///
/// Returns whether the unit was patched.
pub fn replace_stop_with_return(irep: &mut Irep<'_>) -> bool {
    let last = match irep.last_instruction() {
        Some(instr) if instr.opcode == OpCode::Stop => (irep.ilen() - 1) * INSTRUCTION_SIZE,
        _ => return false,
    };

    let iseq = irep.iseq_mut();
    iseq.truncate(last + INSTRUCTION_SIZE);
    iseq[last..].copy_from_slice(&Instruction::simple(OpCode::LoadNil).encode());
    iseq.extend_from_slice(&Instruction::simple(OpCode::Return).encode());
    true
}

/// Loads a bytecode image file.
pub fn load_bytecode(vm: &mut Vm, path: &Path) -> Result<()> {
    let data = std::fs::read(path).map_err(|source| RequireError::CannotLoad {
        path: path.to_path_buf(),
        source,
    })?;

    let origin = path.to_string_lossy();
    tracing::debug!("loading bytecode {} ({} bytes)", origin, data.len());
    let irep = vm.read_irep(&data);
    run(vm, irep, &origin)
}

/// Loads an in-memory image, such as one embedded in a native extension.
///
/// `origin` names the image in diagnostics.
pub fn load_bytecode_blob(vm: &mut Vm, data: &[u8], origin: &str) -> Result<()> {
    tracing::debug!("loading bytecode blob {} ({} bytes)", origin, data.len());
    let irep = vm.read_irep(data);
    run(vm, irep, origin)
}

fn run(vm: &mut Vm, irep: Option<Irep<'_>>, origin: &str) -> Result<()> {
    match irep {
        Some(mut irep) => {
            if replace_stop_with_return(&mut irep) {
                tracing::trace!("patched trailing STOP in {}", origin);
            }
            vm.call_irep(&irep)?;
            Ok(())
        }
        None => match vm.take_exception() {
            Some(source) => Err(RequireError::Fatal {
                origin: origin.to_string(),
                source,
            }),
            None => {
                tracing::debug!("empty bytecode image {}, nothing to run", origin);
                Ok(())
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_vm::dump::{dump, read_irep};
    use keel_vm::{compile, Value, VmError};
    use tempfile::tempdir;

    #[test]
    fn test_patch_replaces_trailing_stop() {
        let mut irep = compile("$x = 1", "t.rb").unwrap();
        let before = irep.ilen();
        assert!(replace_stop_with_return(&mut irep));
        assert_eq!(irep.ilen(), before + 1);
        assert_eq!(irep.instruction(before - 1).unwrap().opcode, OpCode::LoadNil);
        assert_eq!(irep.last_instruction().unwrap().opcode, OpCode::Return);

        // already patched
        assert!(!replace_stop_with_return(&mut irep));
    }

    #[test]
    fn test_patch_copies_borrowed_buffer() {
        let image = dump(&compile("$x = 1", "t.rb").unwrap());
        let pristine = image.clone();

        let mut irep = read_irep(&image).unwrap();
        assert!(irep.is_borrowed());
        assert!(replace_stop_with_return(&mut irep));
        assert!(!irep.is_borrowed());
        assert_eq!(image, pristine);
    }

    #[test]
    fn test_blob_runs_without_halting_caller() {
        fn load_blob(vm: &mut Vm, _args: &[Value]) -> keel_vm::Result<Value> {
            let image = dump(&compile("$inner = 1", "blob.rb")?);
            load_bytecode_blob(vm, &image, "blob")?;
            Ok(Value::Nil)
        }

        let mut vm = Vm::new();
        vm.define_function("load_blob", load_blob);
        vm.eval("load_blob\n$after = 2", "main.rb").unwrap();
        assert_eq!(vm.global("$inner"), Value::Int(1));
        assert_eq!(vm.global("$after"), Value::Int(2));
        assert!(!vm.is_halted());
    }

    #[test]
    fn test_corrupt_image_is_fatal() {
        let mut vm = Vm::new();
        let err = load_bytecode_blob(&mut vm, b"KEEL0001garbage!", "corrupt").unwrap_err();
        assert!(err.is_fatal());
        assert!(!vm.has_exception());
    }

    #[test]
    fn test_pending_exception_with_empty_image_is_fatal() {
        let mut vm = Vm::new();
        vm.set_exception(VmError::runtime("earlier failure"));
        let err = load_bytecode_blob(&mut vm, &[], "empty").unwrap_err();
        assert!(matches!(err, RequireError::Fatal { .. }));
    }

    #[test]
    fn test_empty_image_is_a_no_op() {
        let mut vm = Vm::new();
        load_bytecode_blob(&mut vm, &[], "empty").unwrap();
    }

    #[test]
    fn test_load_bytecode_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("unit.mrb");
        std::fs::write(&path, dump(&compile("$loaded = \"yes\"", "unit.rb").unwrap())).unwrap();

        let mut vm = Vm::new();
        load_bytecode(&mut vm, &path).unwrap();
        assert_eq!(vm.global("$loaded"), Value::from("yes"));

        let missing = dir.path().join("missing.mrb");
        assert!(matches!(
            load_bytecode(&mut vm, &missing),
            Err(RequireError::CannotLoad { .. })
        ));
    }
}
