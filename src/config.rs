// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Settings for the control node and the channel to the hypervisor.

use std::path::PathBuf;

use crate::physdisk::privcmd::HYPERVISOR_BLOCK_IO_OP;

/// Path of the control node, relative to the root of the administrative tree.
pub const DEFAULT_NODE_PATH: &str = "xeno/dom0/phd";

/// Permission bits of the control node (`rw-r--r--`).
pub const DEFAULT_NODE_MODE: u32 = 0o644;

/// Privileged control device used to reach the hypervisor.
pub const DEFAULT_CONTROL_DEVICE: &str = "/proc/xeno/privcmd";

/// Configuration of a [`PhysdiskModule`](crate::PhysdiskModule) and its control channel.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Where the control node is registered.
    pub node_path: String,
    /// Permission bits the control node is registered with.
    pub node_mode: u32,
    /// Device node opened by [`PrivcmdChannel`](crate::PrivcmdChannel).
    pub control_device: PathBuf,
    /// Hypercall number carrying the control messages.
    pub hypercall: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            node_path: DEFAULT_NODE_PATH.to_owned(),
            node_mode: DEFAULT_NODE_MODE,
            control_device: PathBuf::from(DEFAULT_CONTROL_DEVICE),
            hypercall: HYPERVISOR_BLOCK_IO_OP,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.node_path, "xeno/dom0/phd");
        assert_eq!(cfg.node_mode, 0o644);
        assert_eq!(cfg.control_device, PathBuf::from("/proc/xeno/privcmd"));
        assert_eq!(cfg.hypercall, HYPERVISOR_BLOCK_IO_OP);
    }
}
