// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Executable units and the instruction set.
//!
//! Instructions are fixed-width, four bytes each: `[op, a, bx_hi, bx_lo]`.

use std::borrow::Cow;

/// Width of one encoded instruction in bytes.
pub const INSTRUCTION_SIZE: usize = 4;

/// Operation codes for the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Do nothing
    Nop = 0x00,
    /// Push nil
    LoadNil = 0x01,
    /// Push true
    LoadTrue = 0x02,
    /// Push false
    LoadFalse = 0x03,
    /// Push the signed integer in `bx`
    LoadInt = 0x04,
    /// Push pool string `bx`
    String = 0x05,
    /// Push global named by pool entry `bx`
    GetGlobal = 0x06,
    /// Pop into global named by pool entry `bx`
    SetGlobal = 0x07,
    /// Pop `bx` values into a new array
    Array = 0x08,
    /// Pop a value and append it to the array below it
    ArrayPush = 0x09,
    /// Call function named by pool entry `bx` with `a` arguments
    Send = 0x0a,
    /// Pop the top value
    Pop = 0x0b,
    /// Return the top value (or nil) from the current unit
    Return = 0x0c,
    /// Halt the interpreter
    Stop = 0x0d,
}

impl OpCode {
    /// Decode an opcode byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x00 => OpCode::Nop,
            0x01 => OpCode::LoadNil,
            0x02 => OpCode::LoadTrue,
            0x03 => OpCode::LoadFalse,
            0x04 => OpCode::LoadInt,
            0x05 => OpCode::String,
            0x06 => OpCode::GetGlobal,
            0x07 => OpCode::SetGlobal,
            0x08 => OpCode::Array,
            0x09 => OpCode::ArrayPush,
            0x0a => OpCode::Send,
            0x0b => OpCode::Pop,
            0x0c => OpCode::Return,
            0x0d => OpCode::Stop,
            _ => return None,
        })
    }

    /// Whether `bx` indexes the string pool.
    pub fn uses_pool(self) -> bool {
        matches!(
            self,
            OpCode::String | OpCode::GetGlobal | OpCode::SetGlobal | OpCode::Send
        )
    }
}

/// A single decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// The operation code
    pub opcode: OpCode,
    /// Small operand (argument count)
    pub a: u8,
    /// Wide operand (pool index, count, or integer)
    pub bx: u16,
}

impl Instruction {
    /// Creates an instruction with no operands.
    pub fn simple(opcode: OpCode) -> Self {
        Self { opcode, a: 0, bx: 0 }
    }

    /// Creates an instruction with a wide operand.
    pub fn with_bx(opcode: OpCode, bx: u16) -> Self {
        Self { opcode, a: 0, bx }
    }

    /// Encodes the instruction into its four-byte form.
    pub fn encode(self) -> [u8; INSTRUCTION_SIZE] {
        let [hi, lo] = self.bx.to_be_bytes();
        [self.opcode as u8, self.a, hi, lo]
    }

    /// Decodes four bytes. Returns `None` for an unknown opcode.
    pub fn decode(bytes: [u8; INSTRUCTION_SIZE]) -> Option<Self> {
        Some(Self {
            opcode: OpCode::from_byte(bytes[0])?,
            a: bytes[1],
            bx: u16::from_be_bytes([bytes[2], bytes[3]]),
        })
    }
}

/// An executable unit: a string pool plus an instruction buffer.
///
/// The buffer is either owned or borrowed from the image it was decoded from.
/// Mutation goes through [`Irep::iseq_mut`], which copies a borrowed buffer
/// before handing it out, so the underlying image is never written.
#[derive(Debug, Clone, PartialEq)]
pub struct Irep<'a> {
    /// String pool (literals, global names, function names)
    pub pool: Vec<String>,
    iseq: Cow<'a, [u8]>,
}

impl Irep<'static> {
    /// Creates a unit owning its instruction buffer.
    pub fn new(pool: Vec<String>, iseq: Vec<u8>) -> Self {
        Self {
            pool,
            iseq: Cow::Owned(iseq),
        }
    }
}

impl<'a> Irep<'a> {
    /// Creates a unit whose instructions live in someone else's buffer.
    pub fn borrowed(pool: Vec<String>, iseq: &'a [u8]) -> Self {
        Self {
            pool,
            iseq: Cow::Borrowed(iseq),
        }
    }

    /// Number of instructions.
    pub fn ilen(&self) -> usize {
        self.iseq.len() / INSTRUCTION_SIZE
    }

    /// Raw instruction bytes.
    pub fn iseq(&self) -> &[u8] {
        &self.iseq
    }

    /// Mutable instruction bytes, copying a borrowed buffer first.
    pub fn iseq_mut(&mut self) -> &mut Vec<u8> {
        self.iseq.to_mut()
    }

    /// Whether the instruction buffer is borrowed (read-only).
    pub fn is_borrowed(&self) -> bool {
        matches!(self.iseq, Cow::Borrowed(_))
    }

    /// Decodes the instruction at `index`.
    pub fn instruction(&self, index: usize) -> Option<Instruction> {
        let start = index.checked_mul(INSTRUCTION_SIZE)?;
        let bytes = self.iseq.get(start..start + INSTRUCTION_SIZE)?;
        Instruction::decode([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// The final instruction, if any.
    pub fn last_instruction(&self) -> Option<Instruction> {
        self.ilen().checked_sub(1).and_then(|i| self.instruction(i))
    }

    /// Detaches the unit from the buffer it borrowed.
    pub fn into_owned(self) -> Irep<'static> {
        Irep {
            pool: self.pool,
            iseq: Cow::Owned(self.iseq.into_owned()),
        }
    }
}
