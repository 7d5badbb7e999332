// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Error types for require/load

use keel_vm::VmError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for require/load operations
pub type Result<T> = std::result::Result<T, RequireError>;

/// Errors that can occur while resolving or loading a file
#[derive(Debug, Error)]
pub enum RequireError {
    /// No candidate path could be opened
    #[error("cannot load such file -- {0}")]
    NotFound(String),

    /// Load path variable or configuration is missing or malformed
    #[error("configuration error: {0}")]
    Config(String),

    /// File resolved earlier but cannot be opened now
    #[error("cannot load such file -- {}", path.display())]
    CannotLoad {
        /// File that failed to open
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Extension matches no loader strategy
    #[error("Filepath '{}' has invalid extension", .0.display())]
    UnsupportedExtension(PathBuf),

    /// Path could not be made absolute
    #[error("failed to convert {} to full path: {source}", path.display())]
    Canonicalize {
        /// Path as given
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The platform loader refused the library
    #[error("failed to load {}: {reason}", path.display())]
    LibraryOpen {
        /// Library path
        path: PathBuf,
        /// Dynamic loader diagnostic
        reason: String,
    },

    /// Neither conventional entry symbol exists
    #[error("failed to attach {init} or {image} in library {}", path.display())]
    MissingSymbols {
        /// Initializer symbol name
        init: String,
        /// Embedded image symbol name
        image: String,
        /// Library path
        path: PathBuf,
    },

    /// Finalizer symbol is absent
    #[error("can't attach {symbol} in library {}", path.display())]
    MissingFinalizer {
        /// Finalizer symbol name
        symbol: String,
        /// Library path
        path: PathBuf,
    },

    /// Bytecode decoding failed with an exception pending; do not recover
    #[error("failed to load bytecode {origin}: {source}")]
    Fatal {
        /// File path or library symbol the image came from
        origin: String,
        /// The pending exception
        #[source]
        source: VmError,
    },

    /// Argument was not a string
    #[error("can't convert {0} into String")]
    TypeConversion(String),

    /// Wrong number of arguments
    #[error("wrong number of arguments (given {0}, expected 1)")]
    Arity(usize),

    /// Error raised by the loaded code itself
    #[error(transparent)]
    Script(#[from] VmError),
}

impl RequireError {
    /// Create a not-found error for `name`
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Exception class scripts see for this error
    pub fn class_name(&self) -> &str {
        match self {
            RequireError::Config(_) => "RuntimeError",
            RequireError::TypeConversion(_) => "TypeError",
            RequireError::Arity(_) => "ArgumentError",
            RequireError::Fatal { .. } => "fatal",
            RequireError::Script(e) => e.class_name(),
            _ => "LoadError",
        }
    }

    /// Whether this error must unwind to the top-level boundary
    pub fn is_fatal(&self) -> bool {
        match self {
            RequireError::Fatal { .. } => true,
            RequireError::Script(e) => e.is_fatal(),
            _ => false,
        }
    }
}

impl From<RequireError> for VmError {
    fn from(err: RequireError) -> Self {
        match err {
            RequireError::Script(inner) => inner,
            fatal @ RequireError::Fatal { .. } => VmError::Fatal(fatal.to_string()),
            other => VmError::raised(other.class_name().to_string(), other.to_string()),
        }
    }
}
