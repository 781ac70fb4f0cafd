//! Write side of a [`Packet`].

use crate::{ByteOrder, Packet, Primitive};


/// Builds a [`Packet`] out of many small writes.
///
/// Typed writes encode with the builder's [`ByteOrder`], big-endian unless changed. The built
/// packet inherits that byte order for its typed reads.
#[derive(Debug, Clone, Default)]
pub struct PacketBuilder {
    packet: Packet,
}

impl PacketBuilder {
    /// Construct empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.packet.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.packet.is_empty()
    }

    /// Byte order used by typed writes.
    pub fn byte_order(&self) -> ByteOrder {
        self.packet.byte_order()
    }

    /// Set the byte order used by subsequent typed writes.
    pub fn set_byte_order(&mut self, byte_order: ByteOrder) -> &mut Self {
        self.packet.set_byte_order(byte_order);
        self
    }

    /// Chain-friendly version of [`set_byte_order`](Self::set_byte_order).
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.set_byte_order(byte_order);
        self
    }

    /// Append a copy of `buf`.
    pub fn write(&mut self, buf: &[u8]) -> &mut Self {
        self.packet.copy_in(buf);
        self
    }

    /// Append `bytes` without copying, unless they are small.
    pub fn write_zc(&mut self, bytes: impl Into<Packet>) -> &mut Self {
        self.packet.append(bytes);
        self
    }

    /// Append an encoded primitive.
    pub fn write_primitive<P: Primitive>(&mut self, value: P) -> &mut Self {
        let repr = value.encode(self.byte_order());
        self.write(repr.as_ref())
    }

    /// Append a boolean as a single `0` or `1` byte.
    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.write_primitive(value as u8)
    }

    /// Append the UTF-8 encoding of `text`.
    pub fn write_str_utf8(&mut self, text: &str) -> &mut Self {
        self.write(text.as_bytes())
    }

    /// Finish building.
    pub fn build(self) -> Packet {
        self.packet
    }
}
