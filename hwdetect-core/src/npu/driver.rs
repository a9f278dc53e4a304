//! Device driver seam and the XDNA ioctl implementation

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use tracing::debug;

use super::SynthesisInputs;

/// Buffer object placement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BufferType {
    /// Host shared memory
    Shmem = 1,
    /// Device heap
    DevHeap = 2,
}

/// Answer to the capability query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceInfo {
    /// AIE array version reported by the firmware
    pub aie_major: u32,
    pub aie_minor: u32,
}

/// Opens device nodes
pub trait DeviceDriver: Send + Sync {
    /// Open `path` read/write. The returned node is closed when dropped.
    fn open(&self, path: &Path) -> io::Result<Box<dyn DeviceNode>>;
}

/// An open device node
pub trait DeviceNode: Send {
    /// Issue the capability-query control operation
    fn query_info(&mut self) -> io::Result<DeviceInfo>;

    /// Allocate a buffer object of `size` bytes, returning its handle
    fn create_buffer(&mut self, size: u64, kind: BufferType) -> io::Result<u32>;

    /// Free the buffer object `handle`
    fn free_buffer(&mut self, handle: u32) -> io::Result<()>;

    /// Whether a hardware command-submission path is wired for this node
    fn supports_execution(&self) -> bool {
        false
    }

    /// Execute the model bound to `buffer` on the device
    fn execute(&mut self, buffer: u32, inputs: &SynthesisInputs) -> io::Result<Vec<f32>> {
        let _ = (buffer, inputs);
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "no command submission path for this device",
        ))
    }
}

#[cfg(target_os = "linux")]
mod ioctl {
    /// `struct amdxdna_drm_get_info`
    #[repr(C)]
    #[derive(Debug, Default)]
    pub struct GetInfo {
        pub param: u32,
        pub buffer_size: u32,
        pub buffer: u64,
    }

    /// `struct amdxdna_drm_query_aie_version`
    #[repr(C)]
    #[derive(Debug, Default)]
    pub struct AieVersion {
        pub major: u32,
        pub minor: u32,
    }

    /// `struct amdxdna_drm_create_bo`
    #[repr(C)]
    #[derive(Debug, Default)]
    pub struct CreateBo {
        pub flags: u64,
        pub vaddr: u64,
        pub size: u64,
        pub bo_type: u32,
        pub handle: u32,
    }

    /// `struct drm_gem_close`
    #[repr(C)]
    #[derive(Debug, Default)]
    pub struct GemClose {
        pub handle: u32,
        pub pad: u32,
    }

    pub const QUERY_AIE_VERSION: u32 = 2;

    // DRM_COMMAND_BASE (0x40) + command index
    nix::ioctl_readwrite!(amdxdna_create_bo, b'd', 0x43, CreateBo);
    nix::ioctl_readwrite!(amdxdna_get_info, b'd', 0x47, GetInfo);
    // Core DRM ioctl, shared by every GEM driver
    nix::ioctl_write_ptr!(drm_gem_close, b'd', 0x09, GemClose);
}

/// Real driver for the amdxdna kernel module
#[derive(Debug, Default, Clone, Copy)]
pub struct XdnaDriver;

impl DeviceDriver for XdnaDriver {
    fn open(&self, path: &Path) -> io::Result<Box<dyn DeviceNode>> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        debug!(device = %path.display(), "Device node opened");
        Ok(Box::new(XdnaNode { file }))
    }
}

/// Open amdxdna device node
#[derive(Debug)]
pub struct XdnaNode {
    file: File,
}

#[cfg(target_os = "linux")]
impl DeviceNode for XdnaNode {
    fn query_info(&mut self) -> io::Result<DeviceInfo> {
        use std::os::fd::AsRawFd;

        let mut version = ioctl::AieVersion::default();
        let mut request = ioctl::GetInfo {
            param: ioctl::QUERY_AIE_VERSION,
            buffer_size: std::mem::size_of::<ioctl::AieVersion>() as u32,
            buffer: &mut version as *mut ioctl::AieVersion as u64,
        };

        // SAFETY: `request` and `version` outlive the call and match the
        // kernel's layout; the fd is owned by `self.file`.
        unsafe { ioctl::amdxdna_get_info(self.file.as_raw_fd(), &mut request) }
            .map_err(io::Error::from)?;

        Ok(DeviceInfo {
            aie_major: version.major,
            aie_minor: version.minor,
        })
    }

    fn create_buffer(&mut self, size: u64, kind: BufferType) -> io::Result<u32> {
        use std::os::fd::AsRawFd;

        let mut request = ioctl::CreateBo {
            size,
            bo_type: kind as u32,
            ..Default::default()
        };

        // SAFETY: `request` matches `struct amdxdna_drm_create_bo` and lives
        // across the call.
        unsafe { ioctl::amdxdna_create_bo(self.file.as_raw_fd(), &mut request) }
            .map_err(io::Error::from)?;

        Ok(request.handle)
    }

    fn free_buffer(&mut self, handle: u32) -> io::Result<()> {
        use std::os::fd::AsRawFd;

        let request = ioctl::GemClose { handle, pad: 0 };

        // SAFETY: `request` matches `struct drm_gem_close` and lives across
        // the call; the kernel only reads it.
        unsafe { ioctl::drm_gem_close(self.file.as_raw_fd(), &request) }
            .map_err(io::Error::from)?;

        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
impl DeviceNode for XdnaNode {
    fn query_info(&mut self) -> io::Result<DeviceInfo> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "amdxdna requires Linux"))
    }

    fn create_buffer(&mut self, _size: u64, _kind: BufferType) -> io::Result<u32> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "amdxdna requires Linux"))
    }

    fn free_buffer(&mut self, _handle: u32) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "amdxdna requires Linux"))
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn test_request_codes() {
        assert_eq!(std::mem::size_of::<ioctl::GetInfo>(), 16);
        assert_eq!(std::mem::size_of::<ioctl::CreateBo>(), 32);
        assert_eq!(
            nix::request_code_readwrite!(b'd', 0x47, std::mem::size_of::<ioctl::GetInfo>()) as u32,
            0xC010_6447
        );
        assert_eq!(
            nix::request_code_readwrite!(b'd', 0x43, std::mem::size_of::<ioctl::CreateBo>()) as u32,
            0xC020_6443
        );
        assert_eq!(std::mem::size_of::<ioctl::GemClose>(), 8);
        assert_eq!(
            nix::request_code_write!(b'd', 0x09, std::mem::size_of::<ioctl::GemClose>()) as u32,
            0x4008_6409
        );
    }

    #[test]
    fn test_regular_file_rejects_query() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut node = XdnaDriver.open(file.path()).unwrap();
        assert!(node.query_info().is_err());
        assert!(!node.supports_execution());
    }
}
