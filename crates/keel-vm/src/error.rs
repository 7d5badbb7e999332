// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Error types for the interpreter

use thiserror::Error;

/// Result type for interpreter operations
pub type Result<T> = std::result::Result<T, VmError>;

/// Errors raised while compiling or executing script code
#[derive(Debug, Clone, Error)]
pub enum VmError {
    /// Source text could not be compiled
    #[error("{file}:{line}: SyntaxError: {message}")]
    Syntax {
        /// File the source came from
        file: String,
        /// 1-based line number
        line: usize,
        /// What went wrong
        message: String,
    },

    /// A script-level exception
    #[error("{message} ({class})")]
    Raised {
        /// Exception class name (`LoadError`, `TypeError`, ...)
        class: String,
        /// Exception message
        message: String,
    },

    /// Unrecoverable error; only the top-level boundary may handle it
    #[error("fatal: {0}")]
    Fatal(String),

    /// Malformed bytecode image
    #[error("{0}")]
    Decode(#[from] DecodeError),
}

impl VmError {
    /// Create a raised exception of the given class
    pub fn raised(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Raised {
            class: class.into(),
            message: message.into(),
        }
    }

    /// Create a RuntimeError
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::raised("RuntimeError", message)
    }

    /// Create a TypeError
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::raised("TypeError", message)
    }

    /// Create an ArgumentError
    pub fn argument(message: impl Into<String>) -> Self {
        Self::raised("ArgumentError", message)
    }

    /// Exception class name as a script would see it
    pub fn class_name(&self) -> &str {
        match self {
            VmError::Syntax { .. } => "SyntaxError",
            VmError::Raised { class, .. } => class,
            VmError::Fatal(_) => "fatal",
            VmError::Decode(_) => "ScriptError",
        }
    }

    /// Whether this error must unwind to the top-level boundary
    pub fn is_fatal(&self) -> bool {
        matches!(self, VmError::Fatal(_))
    }
}

/// Errors found while decoding a bytecode image
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Image does not start with the `KEEL` magic
    #[error("bytecode image has invalid magic")]
    BadMagic,

    /// Image was produced by an incompatible compiler
    #[error("unsupported bytecode version {0:?}")]
    UnsupportedVersion([u8; 4]),

    /// Image ends before its declared contents
    #[error("bytecode image truncated at offset {0}")]
    Truncated(usize),

    /// Declared size disagrees with the data
    #[error("bytecode image size mismatch: header says {declared}, found {actual}")]
    SizeMismatch {
        /// Size recorded in the header
        declared: usize,
        /// Size actually available
        actual: usize,
    },

    /// Unknown opcode in the instruction stream
    #[error("invalid opcode {opcode:#04x} at instruction {index}")]
    InvalidOpcode {
        /// Instruction index
        index: usize,
        /// Offending opcode byte
        opcode: u8,
    },

    /// Operand refers outside the string pool
    #[error("pool index {pool_index} out of range at instruction {index}")]
    PoolIndex {
        /// Instruction index
        index: usize,
        /// Offending pool index
        pool_index: usize,
    },

    /// Pool string is not UTF-8
    #[error("pool entry {0} is not valid UTF-8")]
    InvalidUtf8(usize),
}
