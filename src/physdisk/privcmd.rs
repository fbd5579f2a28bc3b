// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Control channel over the privileged command device.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

use vmm_sys_util::errno;
use vmm_sys_util::ioctl::{ioctl_with_mut_ref, _IOC_NONE};

use super::layout::Opcode;
use super::ControlChannel;

/// Hypercall carrying block interface control messages.
pub const HYPERVISOR_BLOCK_IO_OP: u64 = 11;

const PRIVCMD_IOCTL_TYPE: u32 = b'P' as u32;

ioctl_ioc_nr!(
    IOCTL_PRIVCMD_HYPERCALL,
    _IOC_NONE,
    PRIVCMD_IOCTL_TYPE,
    0,
    std::mem::size_of::<PrivcmdHypercall>() as u32
);

/// Argument block of `IOCTL_PRIVCMD_HYPERCALL`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
struct PrivcmdHypercall {
    op: u64,
    arg: [u64; 5],
}

impl PrivcmdHypercall {
    fn control_msg(hypercall: u64, opcode: Opcode, buf: &mut [u8], len: usize) -> Self {
        PrivcmdHypercall {
            op: hypercall,
            arg: [
                u64::from(u32::from(opcode)),
                buf.as_mut_ptr() as u64,
                len as u64,
                0,
                0,
            ],
        }
    }
}

/// Sends control messages to the hypervisor through a privileged command device node.
pub struct PrivcmdChannel {
    file: File,
    hypercall: u64,
}

impl PrivcmdChannel {
    /// Open the control device at `path`; messages are carried by hypercall `hypercall`.
    pub fn open<P: AsRef<Path>>(path: P, hypercall: u64) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(PrivcmdChannel { file, hypercall })
    }
}

impl AsRawFd for PrivcmdChannel {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl ControlChannel for PrivcmdChannel {
    fn send(&self, opcode: Opcode, buf: &mut [u8], len: usize) -> i32 {
        if len > buf.len() {
            error!(
                "control message of {} bytes exceeds its {} byte buffer",
                len,
                buf.len()
            );
            return -libc::EINVAL;
        }

        let mut call = PrivcmdHypercall::control_msg(self.hypercall, opcode, buf, len);
        // Safe because `call` is a valid `privcmd_hypercall_t` for the lifetime of the ioctl, and
        // the buffer it points to stays mutably borrowed and at least `len` bytes long until the
        // ioctl returns.
        let ret = unsafe { ioctl_with_mut_ref(self, IOCTL_PRIVCMD_HYPERCALL(), &mut call) };
        if ret < 0 {
            let e = errno::Error::last();
            error!("control message {:?} failed: {}", opcode, e);
            return -e.errno();
        }
        ret
    }
}
