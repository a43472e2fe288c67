use std::io;

/// Plain number types that can back a receive buffer.
///
/// Every implementor is at least 4 bytes aligned, so `f32` payloads can be viewed in place right
/// after the 4 byte message header.
pub trait Align4: bytemuck::Pod {}

impl Align4 for u32 {}
impl Align4 for u64 {}
impl Align4 for f32 {}
impl Align4 for f64 {}

/// Writes a value into an outgoing frame.
///
/// Implementors write small headers into `buf` and may return a trailing slice
/// that is sent as is, avoiding a copy of large payloads.
pub trait Serialize<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}

/// Builds a value from a raw received frame, possibly borrowing from it.
pub trait Deserialize<'a>: Sized {
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self>;
}
