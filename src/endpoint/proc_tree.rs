// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

use std::collections::HashMap;
use std::result;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::boundary::UserBuffer;

use super::{ControlNode, NodeRegistry, RegistrationError};

const S_IRUSR: u32 = 0o400;
const S_IWUSR: u32 = 0o200;

struct Entry {
    mode: u32,
    node: Arc<dyn ControlNode>,
}

/// An in-process tree of control nodes, addressed by `/`-separated relative paths.
///
/// Reads and writes are dispatched to the registered node and report `ssize_t`-style results: a
/// byte count, or a negative errno.
#[derive(Default)]
pub struct ProcTree {
    nodes: Mutex<HashMap<String, Entry>>,
}

impl ProcTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        ProcTree::default()
    }

    fn nodes(&self) -> MutexGuard<HashMap<String, Entry>> {
        // A poisoned lock only means another caller panicked; the map itself stays consistent.
        self.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lookup(&self, path: &str, access: u32) -> result::Result<Arc<dyn ControlNode>, i32> {
        let nodes = self.nodes();
        let entry = nodes.get(path).ok_or(-libc::ENOENT)?;
        if entry.mode & access == 0 {
            return Err(-libc::EACCES);
        }
        Ok(entry.node.clone())
    }

    /// Returns `true` if a node is registered at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.nodes().contains_key(path)
    }

    /// Returns the permission bits of the node at `path`.
    pub fn mode(&self, path: &str) -> Option<u32> {
        self.nodes().get(path).map(|e| e.mode)
    }

    /// Returns the number of registered nodes.
    pub fn len(&self) -> usize {
        self.nodes().len()
    }

    /// Returns `true` if no node is registered.
    pub fn is_empty(&self) -> bool {
        self.nodes().is_empty()
    }

    /// Read from the node at `path` into `user`.
    pub fn read(&self, path: &str, user: &mut dyn UserBuffer) -> isize {
        let node = match self.lookup(path, S_IRUSR) {
            Ok(node) => node,
            Err(errno) => return errno as isize,
        };
        match node.read(user) {
            Ok(n) => n as isize,
            Err(e) => {
                error!("read of {} failed: {}", path, e);
                e.errno() as isize
            }
        }
    }

    /// Write the bytes in `user` to the node at `path`.
    pub fn write(&self, path: &str, user: &dyn UserBuffer) -> isize {
        let node = match self.lookup(path, S_IWUSR) {
            Ok(node) => node,
            Err(errno) => return errno as isize,
        };
        match node.write(user) {
            Ok(n) => n as isize,
            Err(e) => {
                error!("write to {} failed: {}", path, e);
                e.errno() as isize
            }
        }
    }
}

fn valid_path(path: &str) -> bool {
    !path.is_empty() && !path.starts_with('/') && path.split('/').all(|c| !c.is_empty())
}

impl NodeRegistry for ProcTree {
    fn register(
        &self,
        path: &str,
        mode: u32,
        node: Arc<dyn ControlNode>,
    ) -> result::Result<(), RegistrationError> {
        if !valid_path(path) {
            return Err(RegistrationError::InvalidPath(path.to_owned()));
        }

        let mut nodes = self.nodes();
        if nodes.contains_key(path) {
            return Err(RegistrationError::AlreadyExists(path.to_owned()));
        }
        nodes.insert(path.to_owned(), Entry { mode, node });
        Ok(())
    }

    fn unregister(&self, path: &str) -> bool {
        self.nodes().remove(path).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::physdisk::Result;

    struct Echo;

    impl ControlNode for Echo {
        fn read(&self, user: &mut dyn UserBuffer) -> Result<usize> {
            let len = user.len();
            user.copy_out(&vec![0xee; len]).map_err(crate::Error::CopyOut)?;
            Ok(len)
        }

        fn write(&self, user: &dyn UserBuffer) -> Result<usize> {
            Ok(user.len())
        }
    }

    #[test]
    fn test_paths() {
        assert!(valid_path("xeno/dom0/phd"));
        assert!(valid_path("phd"));
        assert!(!valid_path(""));
        assert!(!valid_path("/xeno/dom0/phd"));
        assert!(!valid_path("xeno//phd"));
        assert!(!valid_path("xeno/dom0/"));
    }

    #[test]
    fn test_register_unregister() {
        let tree = ProcTree::new();
        assert!(tree.is_empty());
        tree.register("a/b", 0o644, Arc::new(Echo)).unwrap();
        assert_eq!(
            tree.register("a/b", 0o600, Arc::new(Echo)),
            Err(RegistrationError::AlreadyExists("a/b".to_owned()))
        );
        assert_eq!(tree.mode("a/b"), Some(0o644));
        tree.register("a/c", 0o600, Arc::new(Echo)).unwrap();
        assert_eq!(tree.len(), 2);

        assert!(tree.unregister("a/b"));
        assert!(!tree.unregister("a/b"));
        assert!(!tree.contains("a/b"));
        assert!(tree.contains("a/c"));
    }

    #[test]
    fn test_dispatch_and_permissions() {
        let tree = ProcTree::new();
        tree.register("rw", 0o644, Arc::new(Echo)).unwrap();
        tree.register("ro", 0o444, Arc::new(Echo)).unwrap();
        tree.register("wo", 0o200, Arc::new(Echo)).unwrap();

        let mut buf = vec![0u8; 3];
        assert_eq!(tree.read("rw", &mut buf), 3);
        assert_eq!(buf, [0xee; 3]);
        assert_eq!(tree.write("rw", &buf), 3);

        assert_eq!(tree.read("ro", &mut buf), 3);
        assert_eq!(tree.write("ro", &buf), -libc::EACCES as isize);
        assert_eq!(tree.read("wo", &mut buf), -libc::EACCES as isize);
        assert_eq!(tree.write("wo", &buf), 3);

        assert_eq!(tree.read("missing", &mut buf), -libc::ENOENT as isize);
    }
}
