//! Shadow packet descriptors.

use std::ptr::{self, NonNull};

/// Pointer + length view of the buffer behind one ring slot
///
/// One descriptor exists per slot for the lifetime of the ring. The data
/// pointer is always derived from the slot's current buffer index; a null
/// pointer means the index did not resolve and the ring is corrupt.
#[derive(Debug)]
pub struct PacketBuf {
    data: *mut u8,
    pkt_len: u32,
    data_len: u16,
    buf_size: u32,
}

impl PacketBuf {
    pub(crate) fn new(data: Option<NonNull<u8>>, len: u16, buf_size: u32) -> Self {
        Self {
            data: data.map_or(ptr::null_mut(), NonNull::as_ptr),
            pkt_len: u32::from(len),
            data_len: len,
            buf_size,
        }
    }

    /// Start of the packet data
    #[inline(always)]
    pub fn data_ptr(&self) -> *mut u8 {
        self.data
    }

    /// Whether the descriptor lost its buffer
    #[inline(always)]
    pub fn is_null(&self) -> bool {
        self.data.is_null()
    }

    /// Total packet length
    #[inline(always)]
    pub fn pkt_len(&self) -> u32 {
        self.pkt_len
    }

    /// Length of the data in this buffer
    #[inline(always)]
    pub fn data_len(&self) -> u16 {
        self.data_len
    }

    /// Capacity of the underlying buffer
    pub fn buf_size(&self) -> u32 {
        self.buf_size
    }

    /// Set both packet and data length
    #[inline(always)]
    pub fn set_len(&mut self, len: u16) {
        self.pkt_len = u32::from(len);
        self.data_len = len;
    }

    #[inline(always)]
    pub(crate) fn rebind(&mut self, data: Option<NonNull<u8>>) {
        self.data = data.map_or(ptr::null_mut(), NonNull::as_ptr);
    }
}

// SAFETY: the pointer targets shared ring memory kept alive by the owning
// queue's region handle; descriptors move together with their queue.
unsafe impl Send for PacketBuf {}
