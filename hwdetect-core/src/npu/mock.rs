//! Mock NPU driver for testing

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{BufferType, DeviceDriver, DeviceInfo, DeviceNode, SynthesisInputs};

#[derive(Debug, Default)]
struct MockState {
    rejected: Mutex<HashSet<PathBuf>>,
    fail_allocation: AtomicBool,
    execution_output: Mutex<Option<Vec<f32>>>,
    next_handle: AtomicU32,
    live_nodes: AtomicUsize,
    opened: Mutex<Vec<PathBuf>>,
    freed: Mutex<Vec<u32>>,
}

/// Simulated device driver.
///
/// Every existing path opens; paths marked with [`MockDriver::reject_query`]
/// fail the capability query. Live nodes are counted so tests can check that
/// no handle leaks.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the capability query on `path` fail
    pub fn reject_query(&self, path: &Path) {
        self.state
            .rejected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_path_buf());
    }

    /// Let the capability query on `path` succeed again
    pub fn accept_query(&self, path: &Path) {
        self.state
            .rejected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(path);
    }

    /// Set whether buffer allocation should fail
    pub fn set_fail_allocation(&self, fail: bool) {
        self.state.fail_allocation.store(fail, Ordering::SeqCst);
    }

    /// Wire a hardware execution path returning `audio`
    pub fn set_execution_output(&self, audio: Vec<f32>) {
        *self
            .state
            .execution_output
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(audio);
    }

    /// Number of nodes currently open
    pub fn live_nodes(&self) -> usize {
        self.state.live_nodes.load(Ordering::SeqCst)
    }

    /// Buffer handles freed on the device, in order
    pub fn freed_buffers(&self) -> Vec<u32> {
        self.state
            .freed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Paths passed to `open`, in order
    pub fn opened(&self) -> Vec<PathBuf> {
        self.state
            .opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl DeviceDriver for MockDriver {
    fn open(&self, path: &Path) -> io::Result<Box<dyn DeviceNode>> {
        self.state
            .opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(path.to_path_buf());

        if !path.exists() {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }

        self.state.live_nodes.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockNode {
            path: path.to_path_buf(),
            state: self.state.clone(),
        }))
    }
}

struct MockNode {
    path: PathBuf,
    state: Arc<MockState>,
}

impl DeviceNode for MockNode {
    fn query_info(&mut self) -> io::Result<DeviceInfo> {
        let rejected = self
            .state
            .rejected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&self.path);

        if rejected {
            return Err(io::Error::from_raw_os_error(25)); // ENOTTY
        }
        Ok(DeviceInfo {
            aie_major: 1,
            aie_minor: 1,
        })
    }

    fn create_buffer(&mut self, _size: u64, _kind: BufferType) -> io::Result<u32> {
        if self.state.fail_allocation.load(Ordering::SeqCst) {
            return Err(io::Error::from_raw_os_error(12)); // ENOMEM
        }
        Ok(self.state.next_handle.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn free_buffer(&mut self, handle: u32) -> io::Result<()> {
        self.state
            .freed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
        Ok(())
    }

    fn supports_execution(&self) -> bool {
        self.state
            .execution_output
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    fn execute(&mut self, _buffer: u32, _inputs: &SynthesisInputs) -> io::Result<Vec<f32>> {
        self.state
            .execution_output
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| io::Error::from(io::ErrorKind::Unsupported))
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        self.state.live_nodes.fetch_sub(1, Ordering::SeqCst);
    }
}
