//! Link-layer address lookup.

use std::fmt;
use std::io;

use thiserror::Error;

/// Errors from [`mac_address`]
#[derive(Debug, Error)]
pub enum MacError {
    /// No link-layer entry with that name
    #[error("No link-layer address for interface '{0}'")]
    NotFound(String),

    /// Listing interface addresses failed
    #[error("Failed to enumerate interface addresses: {0}")]
    Enumerate(#[source] io::Error),

    /// Link-layer lookup is not available on this platform
    #[error("Link-layer address lookup is only supported on Linux")]
    Unsupported,
}

/// An Ethernet hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// Address bytes
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Hardware address of interface `ifname`
///
/// Only `AF_PACKET` entries are considered, so an interface that also has
/// IPv4 or IPv6 addresses is matched by its link-layer entry.
#[cfg(target_os = "linux")]
pub fn mac_address(ifname: &str) -> Result<MacAddr, MacError> {
    use std::ffi::CStr;
    use std::ptr;

    /// Frees the list on every return path
    struct IfAddrs(*mut libc::ifaddrs);

    impl Drop for IfAddrs {
        fn drop(&mut self) {
            // SAFETY: the pointer came from a successful getifaddrs() and is freed once.
            unsafe { libc::freeifaddrs(self.0) };
        }
    }

    let mut head: *mut libc::ifaddrs = ptr::null_mut();
    // SAFETY: getifaddrs writes a list head into `head` and returns 0 on success.
    if unsafe { libc::getifaddrs(&mut head) } != 0 {
        return Err(MacError::Enumerate(io::Error::last_os_error()));
    }
    let list = IfAddrs(head);

    let mut cur = list.0;
    while !cur.is_null() {
        // SAFETY: `cur` is a node of the list owned by `list`, alive until drop.
        let entry = unsafe { &*cur };
        cur = entry.ifa_next;

        if entry.ifa_addr.is_null() || entry.ifa_name.is_null() {
            continue;
        }
        // SAFETY: non-null sockaddr provided by the kernel.
        let family = unsafe { (*entry.ifa_addr).sa_family };
        if i32::from(family) != libc::AF_PACKET {
            continue;
        }
        // SAFETY: non-null, NUL-terminated interface name.
        let name = unsafe { CStr::from_ptr(entry.ifa_name) };
        if name.to_bytes() != ifname.as_bytes() {
            continue;
        }

        // SAFETY: AF_PACKET entries carry a sockaddr_ll.
        let ll = unsafe { &*entry.ifa_addr.cast::<libc::sockaddr_ll>() };
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&ll.sll_addr[..6]);
        return Ok(MacAddr(mac));
    }

    Err(MacError::NotFound(ifname.to_string()))
}

/// Hardware address of interface `ifname`
#[cfg(not(target_os = "linux"))]
pub fn mac_address(_ifname: &str) -> Result<MacAddr, MacError> {
    Err(MacError::Unsupported)
}
