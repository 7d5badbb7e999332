// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # keel-vm
//!
//! A small reference interpreter that hosts the keel require/load facility.
//!
//! It provides the services a loader needs from its host:
//! - compiling and running source text at top level ([`Vm::eval`])
//! - decoding precompiled images ([`Vm::read_irep`]) and invoking them as
//!   callables ([`Vm::call_irep`])
//! - a global variable store scripts can read and mutate
//! - a root function table for host-exposed functions
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keel_vm::{Value, Vm};
//!
//! let mut vm = Vm::new();
//! let result = vm.eval("$greeting = \"hello\"", "inline.rb")?;
//! assert_eq!(result, Value::from("hello"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compiler;
pub mod dump;
pub mod error;
pub mod irep;
pub mod value;
pub mod vm;

// Re-exports for convenience
pub use compiler::compile;
pub use error::{DecodeError, Result, VmError};
pub use irep::{Instruction, Irep, OpCode};
pub use value::Value;
pub use vm::{NativeFn, Vm};

/// Version of the interpreter
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
