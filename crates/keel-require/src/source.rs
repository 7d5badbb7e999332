// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Source script loader

use keel_vm::{Value, Vm};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{RequireError, Result};

/// Global naming the script being run.
pub const PROGRAM_NAME: &str = "$0";

/// Compiles `path` and runs it at top level.
///
/// The file is opened again even though resolution already checked it; a file
/// removed in between fails here with a load error.
pub fn load_source(vm: &mut Vm, path: &Path) -> Result<()> {
    let cannot_load = |source| RequireError::CannotLoad {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(cannot_load)?;
    let mut source = String::new();
    file.read_to_string(&mut source).map_err(cannot_load)?;
    drop(file);

    let filename = path.to_string_lossy();
    tracing::debug!("loading source {}", filename);
    vm.set_global(PROGRAM_NAME, Value::string(filename.to_string()));
    vm.eval(&source, &filename)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_vm::VmError;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_runs_at_top_level_and_sets_program_name() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("script.rb");
        fs::write(&path, "$seen = $0\n").unwrap();

        let mut vm = Vm::new();
        load_source(&mut vm, &path).unwrap();
        assert_eq!(vm.global("$seen").as_str(), path.to_str());
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let dir = tempdir().unwrap();
        let mut vm = Vm::new();
        let err = load_source(&mut vm, &dir.path().join("gone.rb")).unwrap_err();
        assert!(matches!(err, RequireError::CannotLoad { .. }));
        assert_eq!(err.class_name(), "LoadError");
    }

    #[test]
    fn test_syntax_errors_name_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.rb");
        fs::write(&path, "$x = \"unterminated\n").unwrap();

        let mut vm = Vm::new();
        let err = load_source(&mut vm, &path).unwrap_err();
        match err {
            RequireError::Script(VmError::Syntax { file, .. }) => {
                assert_eq!(file, path.to_string_lossy())
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_runtime_errors_propagate_unchanged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raises.rb");
        fs::write(&path, "raise \"ArgumentError\", \"bad\"\n").unwrap();

        let mut vm = Vm::new();
        let err = load_source(&mut vm, &path).unwrap_err();
        assert_eq!(err.class_name(), "ArgumentError");
        assert_eq!(err.to_string(), "bad (ArgumentError)");
    }
}
