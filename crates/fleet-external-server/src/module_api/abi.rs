//! C ABI types of the module handler libraries.
//!
//! Layout mirrors the Fleet Protocol module-maintainer headers. Ownership
//! rule: the engine owns every buffer it passes in; the library owns every
//! buffer it returns, and the engine releases those only through the
//! library's exported `deallocate`.

use std::os::raw::{c_int, c_uint, c_void};

/// `struct buffer { void *data; size_t size; }`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Buffer {
    /// Start of the payload; may be null for an empty buffer.
    pub data: *mut c_void,
    /// Payload length in bytes.
    pub size: usize,
}

impl Buffer {
    /// An empty buffer (null data, zero size).
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            data: std::ptr::null_mut(),
            size: 0,
        }
    }

    /// Borrows `slice` for the duration of one library call. The library
    /// must not retain the pointer past the call.
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Self {
        Self {
            data: slice.as_ptr().cast_mut().cast(),
            size: slice.len(),
        }
    }

    /// Copies the buffer contents into owned memory.
    ///
    /// # Safety
    ///
    /// `data` must either be null or point to at least `size` readable
    /// bytes.
    #[must_use]
    pub unsafe fn to_vec(&self) -> Vec<u8> {
        if self.data.is_null() || self.size == 0 {
            return Vec::new();
        }
        std::slice::from_raw_parts(self.data.cast::<u8>(), self.size).to_vec()
    }
}

/// `struct device_identification`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DeviceIdentification {
    /// Module id.
    pub module: c_int,
    /// Module-specific device type.
    pub device_type: c_uint,
    /// Role string bytes (not NUL-terminated; `size` is authoritative).
    pub device_role: Buffer,
    /// Name string bytes.
    pub device_name: Buffer,
    /// Device priority, lower is more important.
    pub priority: c_uint,
}

impl DeviceIdentification {
    /// An all-empty identification, used as an out-parameter.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            module: 0,
            device_type: 0,
            device_role: Buffer::empty(),
            device_name: Buffer::empty(),
            priority: 0,
        }
    }
}

/// `struct key_value { buffer key; buffer value; }`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct KeyValue {
    /// Key bytes.
    pub key: Buffer,
    /// Value bytes.
    pub value: Buffer,
}

/// `struct config { key_value *parameters; size_t size; }`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Start of the key-value array.
    pub parameters: *const KeyValue,
    /// Number of pairs.
    pub size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_reads_as_empty_vec() {
        let buffer = Buffer::empty();
        assert!(unsafe { buffer.to_vec() }.is_empty());
    }

    #[test]
    fn buffer_roundtrip_through_raw_parts() {
        let payload = b"press".to_vec();
        let buffer = Buffer::from_slice(&payload);
        assert_eq!(buffer.size, 5);
        assert_eq!(unsafe { buffer.to_vec() }, payload);
    }
}
