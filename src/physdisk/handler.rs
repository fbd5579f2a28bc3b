// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Probe and grant request handlers.

use crate::boundary::UserBuffer;

use super::layout::{Opcode, N_ACES, PROBE_BUF, XP_DISK};
use super::scratch::{HeapPool, ScratchBuf, ScratchPool};
use super::{ControlChannel, Error, Result};

/// Forwards probe and grant requests from callers to the hypervisor.
///
/// The handler holds no per-request state. Each call validates the caller's size, copies the
/// request into its own scratch buffer, forwards it through the control channel and releases the
/// buffer before returning, so calls from different threads do not interact here.
pub struct PhysdiskHandler<C, P = HeapPool> {
    channel: C,
    pool: P,
}

impl<C: ControlChannel> PhysdiskHandler<C> {
    /// Create a handler forwarding to `channel`, with heap-allocated scratch buffers.
    pub fn new(channel: C) -> Self {
        PhysdiskHandler {
            channel,
            pool: HeapPool,
        }
    }
}

impl<C: ControlChannel, P: ScratchPool> PhysdiskHandler<C, P> {
    /// Create a handler forwarding to `channel`, drawing scratch buffers from `pool`.
    pub fn with_pool(channel: C, pool: P) -> Self {
        PhysdiskHandler { channel, pool }
    }

    /// Returns the control channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Returns the scratch buffer pool.
    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Probe the physical disks: forward the caller's probe buffer and copy the hypervisor's
    /// answer back into it.
    ///
    /// Returns the number of bytes written back, which is always the probe buffer size. If the
    /// copy back fails after the hypervisor accepted the probe, the error is reported and the
    /// caller never sees the result.
    pub fn probe<B: UserBuffer + ?Sized>(&self, user: &mut B) -> Result<usize> {
        let size = PROBE_BUF.size;
        PROBE_BUF.check_len(user.len())?;

        let mut buf = ScratchBuf::acquire(&self.pool, size)?;
        user.copy_in(&mut buf[..]).map_err(Error::CopyIn)?;

        debug!("physdisk probe: n_aces {:#x}", N_ACES.read(&buf).unwrap_or(0));
        let status = self.channel.send(Opcode::PhysdevProbe, &mut buf[..], size);
        debug!(
            "physdisk probe: n_aces {:#x} after status {}",
            N_ACES.read(&buf).unwrap_or(0),
            status
        );

        if status != 0 {
            warn!("hypervisor rejected physdisk probe: {}", status);
            return Err(Error::HypervisorRejected {
                opcode: Opcode::PhysdevProbe,
                status,
            });
        }

        user.copy_out(&buf[..]).map_err(Error::CopyOut)?;
        Ok(size)
    }

    /// Probe with an in-memory request, returning the updated buffer.
    pub fn probe_bytes(&self, request: &[u8]) -> Result<Vec<u8>> {
        PROBE_BUF.check_len(request.len())?;
        let mut out = request.to_vec();
        self.probe(&mut out[..])?;
        Ok(out)
    }

    /// Grant physical disk access: forward the caller's grant request.
    ///
    /// Nothing is copied back; on success the number of bytes accepted is returned.
    pub fn grant<B: UserBuffer + ?Sized>(&self, user: &B) -> Result<usize> {
        let count = user.len();
        XP_DISK.check_len(count)?;

        // One spare byte so the forwarded message is always followed by a terminator.
        let mut buf = ScratchBuf::acquire(&self.pool, count + 1)?;
        user.copy_in(&mut buf[..count]).map_err(Error::CopyIn)?;
        buf[count] = 0;

        let status = self.channel.send(Opcode::PhysdevGrant, &mut buf[..], count);
        if status != 0 {
            warn!("hypervisor rejected physdisk grant: {}", status);
            return Err(Error::HypervisorRejected {
                opcode: Opcode::PhysdevGrant,
                status,
            });
        }

        Ok(count)
    }
}
