// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Bytecode image reading and writing.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! "KEEL" "0001" size:u32 | npool:u16 (len:u16 bytes)* | ilen:u32 iseq[ilen*4]
//! ```
//!
//! `size` covers the whole image including the header, so an image embedded
//! in a native library can be bounded from its first twelve bytes.

use crate::error::DecodeError;
use crate::irep::{INSTRUCTION_SIZE, Instruction, Irep};

/// Image magic.
pub const MAGIC: &[u8; 4] = b"KEEL";
/// Current image version.
pub const VERSION: &[u8; 4] = b"0001";
/// Bytes needed to learn an image's total size.
pub const HEADER_SIZE: usize = 12;

/// Serializes a unit into an image.
pub fn dump(irep: &Irep<'_>) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(irep.pool.len() as u16).to_be_bytes());
    for entry in &irep.pool {
        body.extend_from_slice(&(entry.len() as u16).to_be_bytes());
        body.extend_from_slice(entry.as_bytes());
    }
    body.extend_from_slice(&(irep.ilen() as u32).to_be_bytes());
    body.extend_from_slice(irep.iseq());

    let mut image = Vec::with_capacity(HEADER_SIZE + body.len());
    image.extend_from_slice(MAGIC);
    image.extend_from_slice(VERSION);
    image.extend_from_slice(&((HEADER_SIZE + body.len()) as u32).to_be_bytes());
    image.extend_from_slice(&body);
    image
}

/// Reads the total image size from its header.
pub fn image_size(header: &[u8]) -> Result<usize, DecodeError> {
    if header.len() < HEADER_SIZE {
        return Err(DecodeError::Truncated(header.len()));
    }
    if &header[0..4] != MAGIC {
        return Err(DecodeError::BadMagic);
    }
    if &header[4..8] != VERSION {
        let mut version = [0u8; 4];
        version.copy_from_slice(&header[4..8]);
        return Err(DecodeError::UnsupportedVersion(version));
    }
    let size = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
    if size < HEADER_SIZE {
        return Err(DecodeError::SizeMismatch {
            declared: size,
            actual: HEADER_SIZE,
        });
    }
    Ok(size)
}

/// Decodes an image. The instruction buffer borrows from `data`.
pub fn read_irep(data: &[u8]) -> Result<Irep<'_>, DecodeError> {
    let size = image_size(data)?;
    if size > data.len() {
        return Err(DecodeError::SizeMismatch {
            declared: size,
            actual: data.len(),
        });
    }

    let mut reader = Reader {
        data: &data[..size],
        pos: HEADER_SIZE,
    };

    let npool = reader.u16()? as usize;
    let mut pool = Vec::with_capacity(npool);
    for index in 0..npool {
        let len = reader.u16()? as usize;
        let bytes = reader.take(len)?;
        let entry = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8(index))?;
        pool.push(entry.to_string());
    }

    let ilen = reader.u32()? as usize;
    let iseq = reader.take(ilen.saturating_mul(INSTRUCTION_SIZE))?;
    if reader.pos != size {
        return Err(DecodeError::SizeMismatch {
            declared: size,
            actual: reader.pos,
        });
    }

    let irep = Irep::borrowed(pool, iseq);
    validate(&irep)?;
    Ok(irep)
}

fn validate(irep: &Irep<'_>) -> Result<(), DecodeError> {
    for (index, chunk) in irep.iseq().chunks_exact(INSTRUCTION_SIZE).enumerate() {
        let instr = Instruction::decode([chunk[0], chunk[1], chunk[2], chunk[3]]).ok_or(
            DecodeError::InvalidOpcode {
                index,
                opcode: chunk[0],
            },
        )?;
        if instr.opcode.uses_pool() && instr.bx as usize >= irep.pool.len() {
            return Err(DecodeError::PoolIndex {
                index,
                pool_index: instr.bx as usize,
            });
        }
    }
    Ok(())
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(DecodeError::Truncated(self.data.len()))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}
