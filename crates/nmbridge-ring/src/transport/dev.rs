//! The `/dev/netmap` character device.

use super::{DeviceHandle, NetmapTransport};
use crate::error::TransportError;

/// Default device path
pub const NETMAP_DEVICE: &str = "/dev/netmap";

/// Transport backed by the netmap character device
#[derive(Debug, Clone)]
pub struct DevNetmap {
    path: String,
}

impl DevNetmap {
    /// Use the default device path
    pub fn new() -> Self {
        Self::with_path(NETMAP_DEVICE)
    }

    /// Use a non-default device path
    pub fn with_path(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Device path
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Default for DevNetmap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use std::fs::{File, OpenOptions};
    use std::io;
    use std::os::fd::AsRawFd;

    use memmap2::MmapOptions;

    use super::*;
    use crate::layout::{NIOCGINFO, NIOCREGIF, NIOCRXSYNC, NIOCTXSYNC, NmReq};
    use crate::shm::SharedMemory;

    pub(super) struct DevHandle {
        file: File,
    }

    impl DevHandle {
        fn request(&self, request: &'static str, nr: u32, arg: *mut NmReq) -> Result<(), TransportError> {
            // SAFETY: `file` is an open netmap descriptor. The register/info
            // requests take a pointer to a live, correctly sized nmreq; the sync
            // requests take no argument and the kernel ignores the null pointer.
            let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), nr as _, arg) };
            if ret < 0 {
                return Err(TransportError::Ioctl {
                    request,
                    source: io::Error::last_os_error(),
                });
            }
            Ok(())
        }
    }

    impl DeviceHandle for DevHandle {
        fn get_info(&mut self, req: &mut NmReq) -> Result<(), TransportError> {
            self.request("NIOCGINFO", NIOCGINFO, req)
        }

        fn register(&mut self, req: &mut NmReq) -> Result<(), TransportError> {
            self.request("NIOCREGIF", NIOCREGIF, req)
        }

        fn map(&self, size: usize) -> Result<SharedMemory, TransportError> {
            // SAFETY: the kernel owns the layout of this mapping; all access goes
            // through bounds-checked accessors and the mapping is never truncated
            // while the process runs.
            let map = unsafe { MmapOptions::new().len(size).map_mut(&self.file) }
                .map_err(|source| TransportError::Map { size, source })?;
            Ok(SharedMemory::from_mmap(map))
        }

        fn tx_sync(&self) -> Result<(), TransportError> {
            self.request("NIOCTXSYNC", NIOCTXSYNC, std::ptr::null_mut())
        }

        fn rx_sync(&self) -> Result<(), TransportError> {
            self.request("NIOCRXSYNC", NIOCRXSYNC, std::ptr::null_mut())
        }
    }

    pub(super) fn open(path: &str) -> Result<Box<dyn DeviceHandle>, TransportError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| TransportError::Open {
                path: path.to_string(),
                source,
            })?;
        tracing::trace!(path, fd = file.as_raw_fd(), "Opened netmap device");
        Ok(Box::new(DevHandle { file }))
    }
}

impl NetmapTransport for DevNetmap {
    #[cfg(target_os = "linux")]
    fn open(&self) -> Result<Box<dyn DeviceHandle>, TransportError> {
        linux::open(&self.path)
    }

    #[cfg(not(target_os = "linux"))]
    fn open(&self) -> Result<Box<dyn DeviceHandle>, TransportError> {
        Err(TransportError::Unsupported)
    }
}
