// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Routes a resolved file to its loader by extension

use keel_vm::Vm;
use std::path::Path;

use crate::bytecode::load_bytecode;
use crate::error::{RequireError, Result};
use crate::native::load_native;
use crate::resolver::{BYTECODE_EXT, NATIVE_EXTS, SOURCE_EXT};
use crate::source::load_source;

/// How a file is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Compile and run source text
    Source,
    /// Run a precompiled image
    Bytecode,
    /// Open a shared library
    Native,
}

/// Picks the strategy for `path`. Extensions match case-sensitively.
pub fn classify(path: &Path) -> Result<Strategy> {
    let Some(ext) = path.extension() else {
        return Ok(Strategy::Source);
    };
    match ext.to_str() {
        Some(SOURCE_EXT) => Ok(Strategy::Source),
        Some(BYTECODE_EXT) => Ok(Strategy::Bytecode),
        Some(ext) if NATIVE_EXTS.contains(&ext) => Ok(Strategy::Native),
        _ => Err(RequireError::UnsupportedExtension(path.to_path_buf())),
    }
}

/// Loads `path` with the strategy its extension selects.
pub fn dispatch(vm: &mut Vm, path: &Path) -> Result<()> {
    match classify(path)? {
        Strategy::Source => load_source(vm, path),
        Strategy::Bytecode => load_bytecode(vm, path),
        Strategy::Native => load_native(vm, path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify(Path::new("/a/b.rb")).unwrap(), Strategy::Source);
        assert_eq!(classify(Path::new("/a/b")).unwrap(), Strategy::Source);
        assert_eq!(classify(Path::new("/a/b.mrb")).unwrap(), Strategy::Bytecode);
        for lib in ["/a/b.so", "/a/b.dll", "/a/b.dylib"] {
            assert_eq!(classify(Path::new(lib)).unwrap(), Strategy::Native);
        }
    }

    #[test]
    fn test_unknown_extension_names_path() {
        let err = classify(Path::new("/a/b.txt")).unwrap_err();
        assert!(matches!(err, RequireError::UnsupportedExtension(_)));
        assert_eq!(err.to_string(), "Filepath '/a/b.txt' has invalid extension");
        assert!(classify(Path::new("/a/b.RB")).is_err());
    }
}
