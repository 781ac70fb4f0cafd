//! Length-bearing byte payloads for batching many small writes into one bulk channel transfer.
//!
//! A [`Packet`] is a sequence of bytes stored as an array of [`bytes::Bytes`] fragments, built up
//! with a [`PacketBuilder`] and consumed from the front.

pub extern crate bytes;

mod small_queue;
mod builder;
mod order;

pub use crate::{
    builder::PacketBuilder,
    order::{ByteOrder, Primitive},
};

use crate::small_queue::SmallQueue;
use bytes::{Bytes, BytesMut};
use std::string::FromUtf8Error;
use thiserror::Error;

// this many fragments may be stored without a heap allocated array of fragments.
const IN_PLACE_FRAGMENTS: usize = 2;
// size that newly allocated copy-in fragments start at without any doublings.
const START_CAPACITY: usize = 64;
// payloads smaller than this are copied rather than appended zero-copy.
const MIN_ZC_BYTES: usize = 64;

/// Byte payload stored as an array of [`bytes::Bytes`] fragments.
///
/// If there are 2 or fewer fragments, the pointers to them are stored inline. Empty fragments are
/// filtered out. Typed reads decode with the packet's [`ByteOrder`], big-endian unless changed.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    // invariant: never holds an empty fragment
    fragments: SmallQueue<Bytes, IN_PLACE_FRAGMENTS>,
    // total length
    len: usize,
    // incremented each time a copy-in fragment is allocated, reset on zero-copy append
    doublings: u8,
    byte_order: ByteOrder,
}

impl Packet {
    /// Construct empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes remaining.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no bytes remain.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte order used by typed reads.
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Set the byte order used by typed reads.
    pub fn set_byte_order(&mut self, byte_order: ByteOrder) -> &mut Self {
        self.byte_order = byte_order;
        self
    }

    /// Chain-friendly version of [`set_byte_order`](Self::set_byte_order).
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.set_byte_order(byte_order);
        self
    }

    // remove the next `n` bytes from the front as a sequence of fragments, passing each to `f`.
    //
    // caller must have already checked and subtracted `n` from `self.len`.
    fn take_front(&mut self, mut n: usize, mut f: impl FnMut(Bytes)) {
        while n > 0 {
            let fragment = if n < self.fragments[0].len() {
                self.fragments[0].split_to(n)
            } else {
                match self.fragments.pop_front() {
                    Some(fragment) => fragment,
                    None => unreachable!("Packet len exceeds fragments (internal bug)"),
                }
            };
            n -= fragment.len();
            f(fragment);
        }
    }

    /// Copy the first `buf.len()` bytes to `buf` and advance past them.
    ///
    /// Errors without consuming anything if not that many bytes remain.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<(), TooFewBytesError> {
        self.len = self.len.checked_sub(buf.len()).ok_or(TooFewBytesError)?;
        let mut filled = 0;
        self.take_front(buf.len(), |fragment| {
            buf[filled..filled + fragment.len()].copy_from_slice(&fragment);
            filled += fragment.len();
        });
        Ok(())
    }

    /// Split off the next `n` bytes as a new packet without copying.
    ///
    /// Errors without consuming anything if not that many bytes remain.
    pub fn read_zc(&mut self, n: usize) -> Result<Packet, TooFewBytesError> {
        self.len = self.len.checked_sub(n).ok_or(TooFewBytesError)?;
        let mut out = Packet::new().with_byte_order(self.byte_order);
        self.take_front(n, |fragment| out.append(fragment));
        Ok(out)
    }

    /// Advance past the next `n` bytes.
    ///
    /// Errors without consuming anything if not that many bytes remain.
    pub fn skip(&mut self, n: usize) -> Result<(), TooFewBytesError> {
        self.len = self.len.checked_sub(n).ok_or(TooFewBytesError)?;
        self.take_front(n, drop);
        Ok(())
    }

    /// Decode the next primitive with this packet's byte order.
    pub fn read_primitive<P: Primitive>(&mut self) -> Result<P, TooFewBytesError> {
        let mut repr = P::Repr::default();
        self.read(repr.as_mut())?;
        Ok(P::decode(repr, self.byte_order))
    }

    /// Read the next byte as a boolean (any non-zero byte is `true`).
    pub fn read_bool(&mut self) -> Result<bool, TooFewBytesError> {
        Ok(self.read_primitive::<u8>()? != 0)
    }

    /// Read bytes up to and including the next `\n` and decode them as UTF-8, without the line
    /// terminator (`\n` or `\r\n`).
    ///
    /// If no `\n` remains, the rest of the packet is returned as the final line. Returns `None` if
    /// the packet is empty.
    pub fn read_utf8_line(&mut self) -> Result<Option<String>, FromUtf8Error> {
        if self.is_empty() {
            return Ok(None);
        }
        let mut line = Vec::new();
        let mut found = false;
        for fragment in self.fragments.iter() {
            match fragment.iter().position(|&b| b == b'\n') {
                Some(i) => {
                    line.extend_from_slice(&fragment[..=i]);
                    found = true;
                    break;
                }
                None => line.extend_from_slice(fragment),
            }
        }
        self.len -= line.len();
        self.take_front(line.len(), drop);
        if found {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        String::from_utf8(line).map(Some)
    }

    // append the bytes of `other` at the back, zero-copy unless small.
    pub(crate) fn append(&mut self, other: impl Into<Packet>) {
        let other = other.into();
        if other.len() < MIN_ZC_BYTES {
            for fragment in other.fragments {
                self.copy_in(&fragment);
            }
        } else {
            self.len += other.len();
            for fragment in other.fragments {
                self.fragments.push_back(fragment);
            }
            self.doublings = 0;
        }
    }

    // append a copy of `buf` at the back, filling spare capacity in the last fragment first.
    pub(crate) fn copy_in(&mut self, mut buf: &[u8]) {
        self.len += buf.len();
        if buf.is_empty() {
            return;
        }

        if let Some(back_idx) = self.fragments.len().checked_sub(1) {
            // the last fragment can only be extended in place if nothing else references it
            let back = std::mem::take(&mut self.fragments[back_idx]);
            match back.try_into_mut() {
                Ok(mut back) => {
                    let copy_len = buf.len().min(back.capacity() - back.len());
                    back.extend_from_slice(&buf[..copy_len]);
                    buf = &buf[copy_len..];
                    self.fragments[back_idx] = back.freeze();
                }
                Err(back) => self.fragments[back_idx] = back,
            }
        }

        if buf.is_empty() {
            return;
        }

        while START_CAPACITY << self.doublings < buf.len() {
            self.doublings += 1;
        }
        let mut fragment = BytesMut::with_capacity(START_CAPACITY << self.doublings);
        self.doublings += 1;
        fragment.extend_from_slice(buf);
        self.fragments.push_back(fragment.freeze());
    }

    /// Convert into an iterator over fragments.
    ///
    /// Fragment boundaries carry no meaning.
    pub fn fragments(self) -> impl Iterator<Item = Bytes> {
        self.fragments
    }

    /// Convert into a single [`Bytes`], copying if there is more than one fragment.
    pub fn defragment(mut self) -> Bytes {
        if self.fragments.len() <= 1 {
            return self.fragments.pop_front().unwrap_or_default();
        }
        let mut out = BytesMut::with_capacity(self.len);
        for fragment in self.fragments {
            out.extend_from_slice(&fragment);
        }
        out.freeze()
    }
}

impl From<Bytes> for Packet {
    fn from(bytes: Bytes) -> Self {
        let mut packet = Packet::new();
        packet.len = bytes.len();
        if !bytes.is_empty() {
            packet.fragments.push_back(bytes);
        }
        packet
    }
}

// implement `Packet: From<T>` by composing `Bytes: From<T>` + `Packet: From<Bytes>`
macro_rules! transitive_from {
    ($($t:ty),*)=>{$(
        impl From<$t> for Packet {
            fn from(t: $t) -> Self {
                Packet::from(Bytes::from(t))
            }
        }
    )*};
}
transitive_from!(&'static [u8], &'static str, Vec<u8>, String);

impl PartialEq<[u8]> for Packet {
    fn eq(&self, mut rhs: &[u8]) -> bool {
        if self.len() != rhs.len() {
            return false;
        }
        for fragment in self.fragments.iter() {
            let (rhs1, rhs2) = rhs.split_at(fragment.len());
            if &fragment[..] != rhs1 {
                return false;
            }
            rhs = rhs2;
        }
        true
    }
}

/// Error for trying to read more bytes than remain in a [`Packet`].
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
#[error("too few bytes remaining in packet")]
pub struct TooFewBytesError;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_then_typed_reads() {
        let mut builder = PacketBuilder::new();
        builder
            .write_primitive(0x1234u16)
            .write_primitive(-7i64)
            .write_bool(true)
            .write_str_utf8("héllo");
        let mut packet = builder.build();
        assert_eq!(packet.len(), 2 + 8 + 1 + "héllo".len());

        assert_eq!(packet.read_primitive::<u16>(), Ok(0x1234));
        assert_eq!(packet.read_primitive::<i64>(), Ok(-7));
        assert_eq!(packet.read_bool(), Ok(true));
        let mut rest = vec![0; packet.len()];
        packet.read(&mut rest).unwrap();
        assert_eq!(rest, "héllo".as_bytes());
        assert_eq!(packet.read_primitive::<u8>(), Err(TooFewBytesError));
    }

    #[test]
    fn little_endian_builder() {
        let mut builder = PacketBuilder::new().with_byte_order(ByteOrder::LittleEndian);
        builder.write_primitive(1u32);
        let packet = builder.build();
        assert_eq!(packet, [1, 0, 0, 0][..]);
        let mut packet = packet.with_byte_order(ByteOrder::BigEndian);
        assert_eq!(packet.read_primitive::<u32>(), Ok(0x01000000));
    }

    #[test]
    fn too_few_bytes_consumes_nothing() {
        let mut packet = Packet::from(&b"abc"[..]);
        let mut buf = [0; 4];
        assert_eq!(packet.read(&mut buf), Err(TooFewBytesError));
        assert_eq!(packet.skip(4), Err(TooFewBytesError));
        assert_eq!(packet.len(), 3);
        assert_eq!(packet, b"abc"[..]);
    }

    #[test]
    fn read_zc_across_fragments() {
        let big_1 = vec![1u8; 100];
        let big_2 = vec![2u8; 100];
        let mut builder = PacketBuilder::new();
        builder.write_zc(big_1.clone()).write_zc(big_2.clone()).write(&[3; 10]);
        let mut packet = builder.build();
        assert_eq!(packet.len(), 210);

        let front = packet.read_zc(150).unwrap();
        let mut expected = big_1.clone();
        expected.extend_from_slice(&big_2[..50]);
        assert_eq!(front, expected[..]);
        packet.skip(50).unwrap();
        assert_eq!(packet.defragment(), Bytes::from(vec![3u8; 10]));
    }

    #[test]
    fn utf8_lines() {
        let mut packet = Packet::from("first\r\nsecond\nlast");
        assert_eq!(packet.read_utf8_line().unwrap().as_deref(), Some("first"));
        assert_eq!(packet.read_utf8_line().unwrap().as_deref(), Some("second"));
        assert_eq!(packet.read_utf8_line().unwrap().as_deref(), Some("last"));
        assert_eq!(packet.read_utf8_line().unwrap(), None);

        let mut packet = Packet::from(vec![0xff, b'\n']);
        assert!(packet.read_utf8_line().is_err());
    }

    #[test]
    fn many_small_writes() {
        let mut builder = PacketBuilder::new();
        for i in 0..1000u32 {
            builder.write_primitive(i);
        }
        let mut packet = builder.build();
        assert_eq!(packet.len(), 4000);
        for i in 0..1000u32 {
            assert_eq!(packet.read_primitive::<u32>(), Ok(i));
        }
        assert!(packet.is_empty());
    }
}
