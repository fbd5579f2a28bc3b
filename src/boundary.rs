// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Copies across the caller boundary.
//!
//! A [`UserBuffer`] is the caller-owned side of a request. The handlers never touch caller memory
//! directly; they copy it into a scratch buffer first (`copy_in`) and, for probes, copy the result
//! back (`copy_out`). Either direction can fail on its own.

use std::fmt;
use std::result;

use vm_memory::{Bytes, GuestAddress, GuestMemory, GuestMemoryError};

/// Errors raised while copying to or from a caller buffer.
#[derive(Debug)]
pub enum BoundaryError {
    /// The guest memory backing the caller buffer could not be accessed.
    GuestMemory(GuestMemoryError),
    /// The copy does not fit inside the caller buffer.
    OutOfBounds {
        /// Bytes requested by the copy.
        len: usize,
        /// Bytes available in the caller buffer.
        available: usize,
    },
    /// The caller range faulted.
    Fault,
}

impl fmt::Display for BoundaryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BoundaryError::GuestMemory(e) => write!(f, "guest memory error: {}", e),
            BoundaryError::OutOfBounds { len, available } => write!(
                f,
                "copy of {} bytes exceeds caller buffer of {} bytes",
                len, available
            ),
            BoundaryError::Fault => write!(f, "caller buffer faulted"),
        }
    }
}

impl std::error::Error for BoundaryError {}

/// The caller-owned side of a request.
///
/// `len` is the size the caller asserts for its request. Copies always start at the beginning of
/// the buffer.
pub trait UserBuffer {
    /// The size of the caller buffer, in bytes.
    fn len(&self) -> usize;

    /// Returns `true` if the caller buffer is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill `dst` from the start of the caller buffer.
    fn copy_in(&self, dst: &mut [u8]) -> result::Result<(), BoundaryError>;

    /// Write `src` to the start of the caller buffer.
    fn copy_out(&mut self, src: &[u8]) -> result::Result<(), BoundaryError>;
}

fn check_fits(len: usize, available: usize) -> result::Result<(), BoundaryError> {
    if len > available {
        return Err(BoundaryError::OutOfBounds { len, available });
    }
    Ok(())
}

impl UserBuffer for [u8] {
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn copy_in(&self, dst: &mut [u8]) -> result::Result<(), BoundaryError> {
        check_fits(dst.len(), <[u8]>::len(self))?;
        dst.copy_from_slice(&self[..dst.len()]);
        Ok(())
    }

    fn copy_out(&mut self, src: &[u8]) -> result::Result<(), BoundaryError> {
        check_fits(src.len(), <[u8]>::len(self))?;
        self[..src.len()].copy_from_slice(src);
        Ok(())
    }
}

impl UserBuffer for Vec<u8> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn copy_in(&self, dst: &mut [u8]) -> result::Result<(), BoundaryError> {
        self[..].copy_in(dst)
    }

    fn copy_out(&mut self, src: &[u8]) -> result::Result<(), BoundaryError> {
        self[..].copy_out(src)
    }
}

/// A caller buffer living in guest memory, such as a request handed over by a guest driver.
pub struct GuestBuffer<'a, M: GuestMemory> {
    mem: &'a M,
    addr: GuestAddress,
    len: usize,
}

impl<'a, M: GuestMemory> GuestBuffer<'a, M> {
    /// Describe `len` bytes of `mem` starting at `addr`.
    ///
    /// The range is not validated here; an inaccessible range surfaces as a
    /// [`BoundaryError::GuestMemory`] on the first copy.
    pub fn new(mem: &'a M, addr: GuestAddress, len: usize) -> Self {
        GuestBuffer { mem, addr, len }
    }

    /// Returns the guest address of the buffer.
    pub fn addr(&self) -> GuestAddress {
        self.addr
    }
}

impl<'a, M: GuestMemory> UserBuffer for GuestBuffer<'a, M> {
    fn len(&self) -> usize {
        self.len
    }

    fn copy_in(&self, dst: &mut [u8]) -> result::Result<(), BoundaryError> {
        check_fits(dst.len(), self.len)?;
        self.mem
            .read_slice(dst, self.addr)
            .map_err(BoundaryError::GuestMemory)
    }

    fn copy_out(&mut self, src: &[u8]) -> result::Result<(), BoundaryError> {
        check_fits(src.len(), self.len)?;
        self.mem
            .write_slice(src, self.addr)
            .map_err(BoundaryError::GuestMemory)
    }
}
