// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Physical disk control endpoint.
//!
//! Exposes the hypervisor's "probe physical disks" and "grant physical disk access" operations
//! behind a single administrative control node. Reads on the node forward a fixed-size probe
//! buffer to the hypervisor and hand the (possibly updated) buffer back; writes forward a
//! fixed-size grant request and only report a status.
//!
//! Requests are treated as opaque bytes of a known size. The only checks performed here are the
//! exact size of the request and the success of each copy across the caller boundary.

#[macro_use]
extern crate log;
#[macro_use]
extern crate vmm_sys_util;

pub mod boundary;
pub mod config;
pub mod endpoint;
pub mod physdisk;

pub use boundary::{BoundaryError, GuestBuffer, UserBuffer};
pub use config::Config;
pub use endpoint::{ControlNode, NodeRegistry, PhysdiskModule, ProcTree, RegistrationError};
pub use physdisk::handler::PhysdiskHandler;
pub use physdisk::layout::{Opcode, WireLayout, PROBE_BUF, XP_DISK};
pub use physdisk::privcmd::PrivcmdChannel;
pub use physdisk::scratch::{HeapPool, ScratchBuf, ScratchPool};
pub use physdisk::{ControlChannel, Error, ErrorKind, Result};
