// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! The administrative control node and its registration.
//!
//! A single node is registered at a well-known path when the module initialises. Reads on the
//! node are probe requests and writes are grant requests.

mod proc_tree;

use std::fmt;
use std::io;
use std::result;
use std::sync::Arc;

use crate::boundary::UserBuffer;
use crate::config::Config;
use crate::physdisk::handler::PhysdiskHandler;
use crate::physdisk::privcmd::PrivcmdChannel;
use crate::physdisk::scratch::ScratchPool;
use crate::physdisk::{ControlChannel, Error, Result};

pub use proc_tree::ProcTree;

/// Operations reachable through a registered control node.
pub trait ControlNode: Send + Sync {
    /// Handle a read of `user.len()` bytes into `user`.
    fn read(&self, user: &mut dyn UserBuffer) -> Result<usize>;

    /// Handle a write of the bytes in `user`.
    fn write(&self, user: &dyn UserBuffer) -> Result<usize>;
}

impl<C, P> ControlNode for PhysdiskHandler<C, P>
where
    C: ControlChannel + Send + Sync,
    P: ScratchPool + Send + Sync,
{
    fn read(&self, user: &mut dyn UserBuffer) -> Result<usize> {
        self.probe(user)
    }

    fn write(&self, user: &dyn UserBuffer) -> Result<usize> {
        self.grant(user)
    }
}

/// Node registration failures.
#[derive(Debug, PartialEq)]
pub enum RegistrationError {
    /// A node is already registered at this path.
    AlreadyExists(String),
    /// The path cannot name a node.
    InvalidPath(String),
}

impl RegistrationError {
    /// The negative status code matching this failure.
    pub fn errno(&self) -> i32 {
        match self {
            RegistrationError::AlreadyExists(_) => -libc::EEXIST,
            RegistrationError::InvalidPath(_) => -libc::EINVAL,
        }
    }
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RegistrationError::AlreadyExists(p) => write!(f, "node {} already exists", p),
            RegistrationError::InvalidPath(p) => write!(f, "invalid node path {:?}", p),
        }
    }
}

impl std::error::Error for RegistrationError {}

/// A hierarchy control nodes can be registered in.
pub trait NodeRegistry {
    /// Register `node` at `path` with permission bits `mode`.
    fn register(
        &self,
        path: &str,
        mode: u32,
        node: Arc<dyn ControlNode>,
    ) -> result::Result<(), RegistrationError>;

    /// Remove the node at `path`. Returns `false` if there was none.
    fn unregister(&self, path: &str) -> bool;
}

impl<R: NodeRegistry + ?Sized> NodeRegistry for &R {
    fn register(
        &self,
        path: &str,
        mode: u32,
        node: Arc<dyn ControlNode>,
    ) -> result::Result<(), RegistrationError> {
        (**self).register(path, mode, node)
    }

    fn unregister(&self, path: &str) -> bool {
        (**self).unregister(path)
    }
}

impl<R: NodeRegistry + ?Sized> NodeRegistry for Arc<R> {
    fn register(
        &self,
        path: &str,
        mode: u32,
        node: Arc<dyn ControlNode>,
    ) -> result::Result<(), RegistrationError> {
        (**self).register(path, mode, node)
    }

    fn unregister(&self, path: &str) -> bool {
        (**self).unregister(path)
    }
}

/// Owns the control node registration.
///
/// `init` registers the node and `teardown` removes it. Both are idempotent, and the node is
/// removed when the module is dropped.
pub struct PhysdiskModule<R: NodeRegistry> {
    registry: R,
    config: Config,
    node: Arc<dyn ControlNode>,
    registered: bool,
}

impl<R: NodeRegistry> PhysdiskModule<R> {
    /// Create an uninitialised module that will register `node` in `registry`.
    pub fn new(registry: R, config: Config, node: Arc<dyn ControlNode>) -> Self {
        PhysdiskModule {
            registry,
            config,
            node,
            registered: false,
        }
    }

    /// Create an uninitialised module forwarding to the control device named in `config`.
    pub fn open_privcmd(registry: R, config: Config) -> io::Result<Self> {
        let channel = PrivcmdChannel::open(&config.control_device, config.hypercall)?;
        let node = Arc::new(PhysdiskHandler::new(channel));
        Ok(Self::new(registry, config, node))
    }

    /// Returns the module configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns `true` while the control node is registered.
    pub fn is_initialized(&self) -> bool {
        self.registered
    }

    /// Register the control node.
    ///
    /// A registration failure leaves the module uninitialised and must stop the caller's own
    /// initialisation.
    pub fn init(&mut self) -> Result<()> {
        if self.registered {
            return Ok(());
        }

        self.registry
            .register(
                &self.config.node_path,
                self.config.node_mode,
                self.node.clone(),
            )
            .map_err(|e| {
                error!("Can't create {} control node: {}", self.config.node_path, e);
                Error::Registration(e)
            })?;

        info!(
            "registered physdisk control node {} ({:o})",
            self.config.node_path, self.config.node_mode
        );
        self.registered = true;
        Ok(())
    }

    /// Remove the control node, if registered.
    pub fn teardown(&mut self) {
        if !self.registered {
            return;
        }
        if !self.registry.unregister(&self.config.node_path) {
            warn!(
                "physdisk control node {} was already gone",
                self.config.node_path
            );
        }
        self.registered = false;
        info!("removed physdisk control node {}", self.config.node_path);
    }
}

impl<R: NodeRegistry> Drop for PhysdiskModule<R> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::physdisk::handler::tests::StubChannel;
    use crate::physdisk::layout::{N_ACES, PROBE_BUF, XP_DISK};
    use crate::physdisk::ErrorKind;

    fn module(tree: &ProcTree) -> PhysdiskModule<&ProcTree> {
        let node = Arc::new(PhysdiskHandler::new(StubChannel::new(0)));
        PhysdiskModule::new(tree, Config::default(), node)
    }

    #[test]
    fn test_init_registers_node() {
        let tree = ProcTree::new();
        let mut m = module(&tree);
        assert!(!m.is_initialized());
        assert!(!tree.contains("xeno/dom0/phd"));

        m.init().unwrap();
        assert!(m.is_initialized());
        assert_eq!(tree.mode("xeno/dom0/phd"), Some(0o644));

        // Idempotent.
        m.init().unwrap();
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_teardown() {
        let tree = ProcTree::new();
        let mut m = module(&tree);

        // Nothing to undo yet.
        m.teardown();
        assert!(!m.is_initialized());

        m.init().unwrap();
        m.teardown();
        assert!(!m.is_initialized());
        assert!(!tree.contains("xeno/dom0/phd"));
        m.teardown();

        // Can come back after teardown.
        m.init().unwrap();
        assert!(tree.contains("xeno/dom0/phd"));
        drop(m);
        assert!(tree.is_empty());
    }

    #[test]
    fn test_registration_failure_is_fatal() {
        let tree = ProcTree::new();
        let mut first = module(&tree);
        first.init().unwrap();

        let mut second = module(&tree);
        match second.init() {
            Err(Error::Registration(RegistrationError::AlreadyExists(p))) => {
                assert_eq!(p, "xeno/dom0/phd")
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(!second.is_initialized());

        // Dropping the failed module must not remove the first module's node.
        drop(second);
        assert!(tree.contains("xeno/dom0/phd"));

        let mut bad = PhysdiskModule::new(
            &tree,
            Config {
                node_path: String::new(),
                ..Config::default()
            },
            Arc::new(PhysdiskHandler::new(StubChannel::new(0))),
        );
        let err = bad.init().unwrap_err();
        assert_eq!(err.errno(), -libc::EINVAL);
    }

    #[test]
    fn test_dispatch() {
        let tree = ProcTree::new();
        let channel = Arc::new(StubChannel::mutating(|buf| {
            N_ACES.write(buf, 7).unwrap();
        }));
        let mut m = PhysdiskModule::new(
            &tree,
            Config::default(),
            Arc::new(PhysdiskHandler::new(channel.clone())),
        );
        m.init().unwrap();

        let mut probe = vec![0u8; PROBE_BUF.size];
        N_ACES.write(&mut probe, 3).unwrap();
        assert_eq!(
            tree.read("xeno/dom0/phd", &mut probe),
            PROBE_BUF.size as isize
        );
        assert_eq!(N_ACES.read(&probe), Some(7));

        let grant = vec![0u8; XP_DISK.size];
        assert_eq!(tree.write("xeno/dom0/phd", &grant), 20);
        let short = vec![0u8; XP_DISK.size - 1];
        assert_eq!(tree.write("xeno/dom0/phd", &short), -libc::EINVAL as isize);
        let mut short = vec![0u8; 4];
        assert_eq!(tree.read("xeno/dom0/phd", &mut short), -libc::EINVAL as isize);

        let calls = channel.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].len, XP_DISK.size);

        m.teardown();
        assert_eq!(tree.write("xeno/dom0/phd", &grant), -libc::ENOENT as isize);
    }

    #[test]
    fn test_node_errors_keep_kind() {
        let handler = PhysdiskHandler::new(StubChannel::new(-5));
        let node: &dyn ControlNode = &handler;
        let grant = vec![0u8; 20];
        assert_eq!(
            node.write(&grant).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn test_open_privcmd_missing_device() {
        let tree = ProcTree::new();
        let config = Config {
            control_device: "/nonexistent/privcmd".into(),
            ..Config::default()
        };
        assert!(PhysdiskModule::open_privcmd(&tree, config).is_err());
        assert!(tree.is_empty());
    }
}
