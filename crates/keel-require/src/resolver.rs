// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module path resolution.
//!
//! A name is resolved against the load path (`$:`), trying the implied
//! extensions `.rb`, `.mrb` and the platform library extension when the name
//! has none. Directory order takes priority over extension order.

use keel_vm::{Value, Vm};
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::{RequireError, Result};

/// Global holding the load path.
pub const LOAD_PATH: &str = "$:";

/// Extension of source scripts.
pub const SOURCE_EXT: &str = "rb";
/// Extension of precompiled bytecode images.
pub const BYTECODE_EXT: &str = "mrb";
/// Extensions recognized as native libraries.
pub const NATIVE_EXTS: [&str; 3] = ["so", "dll", "dylib"];

/// Reads the load path from the interpreter.
pub fn search_path(vm: &Vm) -> Result<Vec<String>> {
    let value = vm.global(LOAD_PATH);
    let entries = value
        .as_array()
        .ok_or_else(|| RequireError::config(format!("{} is not an Array", LOAD_PATH)))?;

    let entries = entries.borrow();
    entries
        .iter()
        .map(|entry| match entry {
            Value::String(dir) => Ok(dir.clone()),
            other => Err(RequireError::config(format!(
                "{} entry {} is not a String",
                LOAD_PATH,
                other.inspect()
            ))),
        })
        .collect()
}

/// Resolves `name` against the interpreter's current load path.
pub fn resolve_in(vm: &Vm, name: &str) -> Result<PathBuf> {
    let dirs = search_path(vm)?;
    resolve(name, &dirs)
}

/// Resolves `name` to the canonical path of an openable file.
pub fn resolve(name: &str, search_path: &[String]) -> Result<PathBuf> {
    if name.is_empty() {
        return Err(RequireError::config("empty file name"));
    }

    if is_absolute(name) {
        return probe(Path::new(name)).ok_or_else(|| RequireError::not_found(name));
    }

    let extensions = candidate_extensions(name);
    let dot = [".".to_string()];
    let dirs = if name.starts_with('.') { &dot[..] } else { search_path };

    for dir in dirs {
        for ext in &extensions {
            let candidate = format!("{}/{}{}", dir, name, ext.as_deref().unwrap_or(""));
            tracing::trace!("probing {}", candidate);
            if let Some(path) = probe(Path::new(&candidate)) {
                tracing::debug!("resolved '{}' to {}", name, path.display());
                return Ok(path);
            }
        }
    }

    Err(RequireError::not_found(name))
}

/// Extensions to try for `name`: `[None]` when it already has one.
pub fn candidate_extensions(name: &str) -> Vec<Option<String>> {
    if extension(basename(name)).is_some() {
        vec![None]
    } else {
        vec![
            Some(format!(".{}", SOURCE_EXT)),
            Some(format!(".{}", BYTECODE_EXT)),
            Some(format!(".{}", std::env::consts::DLL_EXTENSION)),
        ]
    }
}

/// The part of `name` after its last `/` or `\`.
pub fn basename(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// Text after the last `.` of `base`, if any.
pub fn extension(base: &str) -> Option<&str> {
    base.rfind('.').map(|i| &base[i + 1..])
}

/// Whether the platform treats `name` as absolute.
pub fn is_absolute(name: &str) -> bool {
    name.starts_with('/') || (cfg!(windows) && name.as_bytes().get(1) == Some(&b':'))
}

/// Canonicalizes `path` and confirms it opens as a regular file.
///
/// The handle is closed again immediately; loaders reopen the file.
fn probe(path: &Path) -> Option<PathBuf> {
    let canonical = std::fs::canonicalize(path).ok()?;
    let file = File::open(&canonical).ok()?;
    let is_file = file.metadata().map(|m| m.is_file()).unwrap_or(false);
    is_file.then_some(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn dir_string(path: &Path) -> String {
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn test_candidate_extensions() {
        assert_eq!(candidate_extensions("foo.rb"), vec![None]);
        assert_eq!(candidate_extensions("lib/foo.so"), vec![None]);
        let implied = candidate_extensions("lib.d/foo");
        assert_eq!(implied.len(), 3);
        assert_eq!(implied[0].as_deref(), Some(".rb"));
        assert_eq!(implied[1].as_deref(), Some(".mrb"));
    }

    #[test]
    fn test_basename_and_extension() {
        assert_eq!(basename("a/b\\c.rb"), "c.rb");
        assert_eq!(basename("plain"), "plain");
        assert_eq!(extension("c.tar.gz"), Some("gz"));
        assert_eq!(extension("noext"), None);
    }

    #[test]
    fn test_source_beats_bytecode_beats_native() {
        let dir = tempdir().unwrap();
        let native = format!("mod.{}", std::env::consts::DLL_EXTENSION);
        for file in ["mod.rb", "mod.mrb", native.as_str()] {
            fs::write(dir.path().join(file), b"").unwrap();
        }

        let resolved = resolve("mod", &[dir_string(dir.path())]).unwrap();
        assert_eq!(resolved.file_name().unwrap(), "mod.rb");

        fs::remove_file(dir.path().join("mod.rb")).unwrap();
        let resolved = resolve("mod", &[dir_string(dir.path())]).unwrap();
        assert_eq!(resolved.file_name().unwrap(), "mod.mrb");
    }

    #[test]
    fn test_directory_order_beats_extension_order() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        fs::write(first.path().join("dep.mrb"), b"").unwrap();
        fs::write(second.path().join("dep.rb"), b"").unwrap();

        let resolved = resolve(
            "dep",
            &[dir_string(first.path()), dir_string(second.path())],
        )
        .unwrap();
        assert_eq!(resolved, fs::canonicalize(first.path().join("dep.mrb")).unwrap());
    }

    #[test]
    fn test_named_extension_is_used_verbatim() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("dep.rb"), b"").unwrap();
        let dirs = [dir_string(dir.path())];

        assert!(resolve("dep.rb", &dirs).is_ok());
        assert!(matches!(
            resolve("dep.mrb", &dirs),
            Err(RequireError::NotFound(_))
        ));
    }

    #[test]
    fn test_nested_names_resolve_under_directory() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg/util.rb"), b"").unwrap();

        let resolved = resolve("pkg/util", &[dir_string(dir.path())]).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("pkg/util.rb"));
    }

    #[test]
    fn test_absolute_path_bypasses_search_path() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("abs.rb");
        fs::write(&file, b"").unwrap();
        let dirs = [dir_string(dir.path())];

        assert_eq!(
            resolve(file.to_str().unwrap(), &dirs).unwrap(),
            fs::canonicalize(&file).unwrap()
        );

        let missing = dir.path().join("missing.rb");
        assert!(matches!(
            resolve(missing.to_str().unwrap(), &dirs),
            Err(RequireError::NotFound(_))
        ));
    }

    #[test]
    fn test_dot_prefix_ignores_search_path() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("keel_only_in_search_path.rb"), b"").unwrap();
        let dirs = [dir_string(dir.path())];

        assert!(resolve("keel_only_in_search_path", &dirs).is_ok());
        assert!(matches!(
            resolve("./keel_only_in_search_path", &dirs),
            Err(RequireError::NotFound(_))
        ));
    }

    #[test]
    fn test_directories_are_not_files() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("pkg.rb")).unwrap();
        assert!(resolve("pkg", &[dir_string(dir.path())]).is_err());
    }

    #[test]
    fn test_empty_name_is_config_error() {
        assert!(matches!(resolve("", &[]), Err(RequireError::Config(_))));
    }

    #[test]
    fn test_search_path_must_be_array_of_strings() {
        let mut vm = Vm::new();
        assert!(matches!(search_path(&vm), Err(RequireError::Config(_))));

        vm.set_global(LOAD_PATH, Value::array(vec![Value::from("lib"), Value::Int(1)]));
        assert!(matches!(search_path(&vm), Err(RequireError::Config(_))));

        vm.set_global(LOAD_PATH, Value::array(vec![Value::from("lib")]));
        assert_eq!(search_path(&vm).unwrap(), vec!["lib"]);
    }
}
