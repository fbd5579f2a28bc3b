// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Physical disk probe and grant requests.

pub mod handler;
pub mod layout;
pub mod privcmd;
pub mod scratch;

use std::fmt;
use std::result;
use std::sync::Arc;

use crate::boundary::BoundaryError;
use crate::endpoint::RegistrationError;

use self::layout::Opcode;

/// The broad class of a request failure, as seen by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Wrong request size, or the hypervisor refused the request.
    InvalidArgument,
    /// No scratch buffer could be acquired.
    OutOfMemory,
    /// A copy across the caller boundary failed.
    BoundaryFault,
}

impl ErrorKind {
    /// The negative status code reported to the caller.
    pub fn errno(self) -> i32 {
        match self {
            ErrorKind::InvalidArgument => -libc::EINVAL,
            ErrorKind::OutOfMemory => -libc::ENOMEM,
            ErrorKind::BoundaryFault => -libc::EFAULT,
        }
    }
}

/// Physical disk control related errors.
#[derive(Debug)]
pub enum Error {
    /// Caller gave us a request that is not exactly the size of the wire structure.
    SizeMismatch {
        /// Size of the wire structure.
        expected: usize,
        /// Size asserted by the caller.
        actual: usize,
    },
    /// The hypervisor returned a non-zero status.
    HypervisorRejected {
        /// The forwarded operation.
        opcode: Opcode,
        /// The raw status returned by the control channel.
        status: i32,
    },
    /// A scratch buffer of the given size could not be allocated.
    OutOfMemory {
        /// Requested scratch size, in bytes.
        size: usize,
    },
    /// Copying the request in from the caller failed.
    CopyIn(BoundaryError),
    /// Copying the result back to the caller failed.
    CopyOut(BoundaryError),
    /// The control node could not be registered.
    Registration(RegistrationError),
}

impl Error {
    /// Returns the caller-visible class of this error.
    ///
    /// All hypervisor failures collapse into [`ErrorKind::InvalidArgument`]; the raw status is
    /// only kept for diagnostics.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::SizeMismatch { .. } | Error::HypervisorRejected { .. } => {
                ErrorKind::InvalidArgument
            }
            Error::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            Error::CopyIn(_) | Error::CopyOut(_) => ErrorKind::BoundaryFault,
            Error::Registration(_) => ErrorKind::InvalidArgument,
        }
    }

    /// The negative status code reported to the caller.
    pub fn errno(&self) -> i32 {
        match self {
            Error::Registration(e) => e.errno(),
            _ => self.kind().errno(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::SizeMismatch { expected, actual } => write!(
                f,
                "request size mismatch: expected {} bytes, got {}",
                expected, actual
            ),
            Error::HypervisorRejected { opcode, status } => {
                write!(f, "hypervisor rejected {:?} with status {}", opcode, status)
            }
            Error::OutOfMemory { size } => {
                write!(f, "failed to allocate {} byte scratch buffer", size)
            }
            Error::CopyIn(e) => write!(f, "failed to copy request from caller: {}", e),
            Error::CopyOut(e) => write!(f, "failed to copy result to caller: {}", e),
            Error::Registration(e) => write!(f, "failed to register control node: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::CopyIn(e) | Error::CopyOut(e) => Some(e),
            Error::Registration(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for physical disk control operations.
pub type Result<T> = result::Result<T, Error>;

/// The synchronous call through which control messages reach the hypervisor.
///
/// `buf` is the scratch buffer holding the message; the hypervisor may update it in place.
/// `len` is the message length, which can be shorter than `buf`. A zero return means success.
///
/// Implementations are called concurrently from any thread that drives a handler; isolation
/// between concurrent messages is up to the hypervisor.
pub trait ControlChannel {
    /// Forward `len` bytes of `buf` as a message of type `opcode`.
    fn send(&self, opcode: Opcode, buf: &mut [u8], len: usize) -> i32;
}

impl<C: ControlChannel + ?Sized> ControlChannel for &C {
    fn send(&self, opcode: Opcode, buf: &mut [u8], len: usize) -> i32 {
        (**self).send(opcode, buf, len)
    }
}

impl<C: ControlChannel + ?Sized> ControlChannel for Box<C> {
    fn send(&self, opcode: Opcode, buf: &mut [u8], len: usize) -> i32 {
        (**self).send(opcode, buf, len)
    }
}

impl<C: ControlChannel + ?Sized> ControlChannel for Arc<C> {
    fn send(&self, opcode: Opcode, buf: &mut [u8], len: usize) -> i32 {
        (**self).send(opcode, buf, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let e = Error::SizeMismatch {
            expected: 20,
            actual: 19,
        };
        assert_eq!(e.kind(), ErrorKind::InvalidArgument);
        assert_eq!(e.errno(), -libc::EINVAL);

        let e = Error::HypervisorRejected {
            opcode: Opcode::PhysdevGrant,
            status: -1,
        };
        assert_eq!(e.kind(), ErrorKind::InvalidArgument);
        assert_eq!(e.errno(), -libc::EINVAL);

        let e = Error::OutOfMemory { size: 4076 };
        assert_eq!(e.errno(), -libc::ENOMEM);

        let e = Error::CopyOut(BoundaryError::Fault);
        assert_eq!(e.kind(), ErrorKind::BoundaryFault);
        assert_eq!(e.errno(), -libc::EFAULT);

        let e = Error::Registration(RegistrationError::AlreadyExists("xeno/dom0/phd".into()));
        assert_eq!(e.errno(), -libc::EEXIST);
    }

    #[test]
    fn test_display() {
        let e = Error::SizeMismatch {
            expected: 20,
            actual: 21,
        };
        assert_eq!(
            e.to_string(),
            "request size mismatch: expected 20 bytes, got 21"
        );
    }
}
