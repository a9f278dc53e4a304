//! Device handles and buffers
//!
//! A process holds at most one handle per device path. Buffers keep only a
//! weak reference to their handle, so closing the handle invalidates every
//! buffer obtained from it.

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use once_cell::sync::Lazy;
use tracing::{debug, info, trace};

use super::{BufferType, DeviceDriver, DeviceInfo, DeviceNode, RuntimeError};

/// Filesystem identity of a device node: `(st_dev, st_ino)` of the stat target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct DeviceId(u64, u64);

impl DeviceId {
    /// Resolve `path` (following symlinks) to the node it names
    fn of(path: &Path) -> io::Result<Self> {
        let st = nix::sys::stat::stat(path).map_err(io::Error::from)?;
        Ok(Self(st.st_dev as u64, st.st_ino as u64))
    }
}

/// Devices currently owned by a live handle in this process
static CLAIMED: Lazy<Mutex<HashSet<DeviceId>>> = Lazy::new(|| Mutex::new(HashSet::new()));

fn claims() -> MutexGuard<'static, HashSet<DeviceId>> {
    CLAIMED.lock().unwrap_or_else(|e| e.into_inner())
}

struct HandleInner {
    node: Option<Box<dyn DeviceNode>>,
}

impl HandleInner {
    fn node_mut(&mut self) -> Result<&mut Box<dyn DeviceNode>, RuntimeError> {
        self.node.as_mut().ok_or(RuntimeError::BufferInvalidated)
    }
}

/// Open, verified device node
pub struct DeviceHandle {
    path: PathBuf,
    id: DeviceId,
    info: DeviceInfo,
    inner: Arc<Mutex<HandleInner>>,
    closed: bool,
}

impl DeviceHandle {
    /// Claim the device behind `path`, open it and issue the capability query.
    ///
    /// Claims are keyed by device identity, so an alias of a claimed node is
    /// also busy. On any failure the node is closed and the claim released.
    pub fn open(driver: &dyn DeviceDriver, path: &Path) -> Result<Self, RuntimeError> {
        let id = DeviceId::of(path)?;
        if !claims().insert(id) {
            return Err(RuntimeError::Busy(path.to_path_buf()));
        }

        let opened = driver.open(path).and_then(|mut node| {
            let info = node.query_info()?;
            Ok((node, info))
        });

        match opened {
            Ok((node, info)) => {
                info!(device = %path.display(), aie = %format!("{}.{}", info.aie_major, info.aie_minor), "NPU device responded to capability query");
                Ok(Self {
                    path: path.to_path_buf(),
                    id,
                    info,
                    inner: Arc::new(Mutex::new(HandleInner { node: Some(node) })),
                    closed: false,
                })
            }
            Err(e) => {
                claims().remove(&id);
                Err(RuntimeError::IoError(e))
            }
        }
    }

    /// Device path this handle owns
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Capability query answer
    pub fn info(&self) -> DeviceInfo {
        self.info
    }

    pub fn is_open(&self) -> bool {
        !self.closed
    }

    fn lock(&self) -> MutexGuard<'_, HandleInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the node reports a hardware execution path
    pub fn supports_execution(&self) -> bool {
        self.lock()
            .node
            .as_ref()
            .is_some_and(|node| node.supports_execution())
    }

    /// Allocate a device-heap buffer sized to `payload` and bind the payload to it
    pub fn allocate(&self, payload: Vec<u8>) -> Result<DeviceBuffer, RuntimeError> {
        let size = payload.len();
        if size == 0 {
            return Err(RuntimeError::Allocation {
                size,
                reason: "empty payload".to_string(),
            });
        }

        let mut inner = self.lock();
        let node = inner.node_mut().map_err(|_| RuntimeError::NotOpen)?;
        let buffer_handle = node
            .create_buffer(size as u64, BufferType::DevHeap)
            .map_err(|e| RuntimeError::Allocation {
                size,
                reason: e.to_string(),
            })?;

        debug!(device = %self.path.display(), handle = buffer_handle, size, "Device buffer allocated");

        Ok(DeviceBuffer {
            owner: Arc::downgrade(&self.inner),
            handle: buffer_handle,
            payload,
            released: false,
        })
    }

    /// Close the node and release the claim. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // Dropping the node closes the fd; buffers see `None` from here on
        self.lock().node = None;
        claims().remove(&self.id);
        info!(device = %self.path.display(), "NPU device closed");
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("path", &self.path)
            .field("info", &self.info)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Device buffer holding a bound model payload.
///
/// Freed on the device by [`DeviceBuffer::release`] or when dropped; closing
/// the owning handle frees it implicitly.
pub struct DeviceBuffer {
    owner: Weak<Mutex<HandleInner>>,
    handle: u32,
    payload: Vec<u8>,
    released: bool,
}

impl DeviceBuffer {
    /// Buffer object handle returned by the device
    pub fn handle(&self) -> u32 {
        self.handle
    }

    /// Size of the bound payload in bytes
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Whether the buffer is live and its owning handle still open
    pub fn is_valid(&self) -> bool {
        if self.released {
            return false;
        }
        self.owner.upgrade().is_some_and(|inner| {
            inner
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .node
                .is_some()
        })
    }

    /// Bound payload; fails once the handle is closed
    pub fn payload(&self) -> Result<&[u8], RuntimeError> {
        if self.is_valid() {
            Ok(&self.payload)
        } else {
            Err(RuntimeError::BufferInvalidated)
        }
    }

    /// Free the buffer on the device.
    ///
    /// Fails with [`RuntimeError::BufferInvalidated`] once the owning handle
    /// is closed; the device already dropped the buffer with the handle.
    pub fn release(mut self) -> Result<(), RuntimeError> {
        self.free()
    }

    fn free(&mut self) -> Result<(), RuntimeError> {
        let result = self.with_node(|node, handle| node.free_buffer(handle));
        self.released = true;
        result??;
        debug!(handle = self.handle, size = self.payload.len(), "Device buffer freed");
        Ok(())
    }

    /// Run `f` against the owning device node
    pub(crate) fn with_node<T>(
        &self,
        f: impl FnOnce(&mut dyn DeviceNode, u32) -> T,
    ) -> Result<T, RuntimeError> {
        if self.released {
            return Err(RuntimeError::BufferInvalidated);
        }
        let inner = self.owner.upgrade().ok_or(RuntimeError::BufferInvalidated)?;
        let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
        let node = inner.node_mut()?;
        Ok(f(node.as_mut(), self.handle))
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.free() {
            trace!(handle = self.handle, error = %e, "Buffer not freed on drop");
        }
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("handle", &self.handle)
            .field("size", &self.payload.len())
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::npu::MockDriver;

    fn device_path() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accel0");
        std::fs::write(&path, b"").unwrap();
        (dir, path)
    }

    #[test]
    fn test_one_handle_per_path() {
        let (_dir, path) = device_path();
        let driver = MockDriver::new();

        let mut first = DeviceHandle::open(&driver, &path).unwrap();
        assert!(matches!(
            DeviceHandle::open(&driver, &path),
            Err(RuntimeError::Busy(_))
        ));
        assert_eq!(driver.live_nodes(), 1);

        first.close();
        let second = DeviceHandle::open(&driver, &path).unwrap();
        assert!(second.is_open());
    }

    #[test]
    fn test_failed_query_releases_claim() {
        let (_dir, path) = device_path();
        let driver = MockDriver::new();
        driver.reject_query(&path);

        assert!(matches!(
            DeviceHandle::open(&driver, &path),
            Err(RuntimeError::IoError(_))
        ));
        assert_eq!(driver.live_nodes(), 0);

        driver.accept_query(&path);
        assert!(DeviceHandle::open(&driver, &path).is_ok());
    }

    #[test]
    fn test_close_invalidates_buffers() {
        let (_dir, path) = device_path();
        let driver = MockDriver::new();
        let mut handle = DeviceHandle::open(&driver, &path).unwrap();

        let buffer = handle.allocate(vec![1, 2, 3]).unwrap();
        assert!(buffer.is_valid());
        assert_eq!(buffer.payload().unwrap(), &[1, 2, 3]);

        handle.close();
        handle.close();
        assert!(!buffer.is_valid());
        assert!(matches!(buffer.payload(), Err(RuntimeError::BufferInvalidated)));
        assert_eq!(driver.live_nodes(), 0);
    }

    #[test]
    fn test_alias_of_claimed_device_is_busy() {
        let (dir, path) = device_path();
        let alias = dir.path().join("npu-alias");
        std::os::unix::fs::symlink(&path, &alias).unwrap();
        let driver = MockDriver::new();

        let _first = DeviceHandle::open(&driver, &path).unwrap();
        assert!(matches!(
            DeviceHandle::open(&driver, &alias),
            Err(RuntimeError::Busy(_))
        ));
        assert_eq!(driver.live_nodes(), 1);
    }

    #[test]
    fn test_release_frees_on_device() {
        let (_dir, path) = device_path();
        let driver = MockDriver::new();
        let mut handle = DeviceHandle::open(&driver, &path).unwrap();

        let first = handle.allocate(vec![1; 8]).unwrap();
        let first_id = first.handle();
        first.release().unwrap();
        assert_eq!(driver.freed_buffers(), vec![first_id]);

        // Dropping frees too
        let second = handle.allocate(vec![2; 8]).unwrap();
        let second_id = second.handle();
        drop(second);
        assert_eq!(driver.freed_buffers(), vec![first_id, second_id]);

        let third = handle.allocate(vec![3; 8]).unwrap();
        handle.close();
        assert!(matches!(third.release(), Err(RuntimeError::BufferInvalidated)));
        assert_eq!(driver.freed_buffers().len(), 2);
    }

    #[test]
    fn test_allocation_failure() {
        let (_dir, path) = device_path();
        let driver = MockDriver::new();
        driver.set_fail_allocation(true);
        let handle = DeviceHandle::open(&driver, &path).unwrap();

        assert!(matches!(
            handle.allocate(vec![0; 64]),
            Err(RuntimeError::Allocation { size: 64, .. })
        ));
        assert!(matches!(
            handle.allocate(Vec::new()),
            Err(RuntimeError::Allocation { size: 0, .. })
        ));
    }
}
