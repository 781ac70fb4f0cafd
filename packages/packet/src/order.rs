//! Byte order and fixed-width primitive encoding.

/// Byte order in which multi-byte primitives are encoded and decoded.
///
/// Defaults to [`BigEndian`](ByteOrder::BigEndian).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum ByteOrder {
    /// Most significant byte first
    #[default]
    BigEndian,
    /// Least significant byte first
    LittleEndian,
}

/// Fixed-width value which can be encoded to and decoded from bytes in a given [`ByteOrder`].
pub trait Primitive: Copy + Send + 'static {
    /// Encoded width in bytes.
    const SIZE: usize;

    /// Encoded representation, always exactly `SIZE` bytes.
    type Repr: AsRef<[u8]> + AsMut<[u8]> + Default + Copy;

    /// Encode in the given byte order.
    fn encode(self, order: ByteOrder) -> Self::Repr;

    /// Decode from the given byte order.
    fn decode(repr: Self::Repr, order: ByteOrder) -> Self;
}

macro_rules! impl_primitive {
    ($($t:ty),*)=>{$(
        impl Primitive for $t {
            const SIZE: usize = size_of::<$t>();

            type Repr = [u8; size_of::<$t>()];

            fn encode(self, order: ByteOrder) -> Self::Repr {
                match order {
                    ByteOrder::BigEndian => self.to_be_bytes(),
                    ByteOrder::LittleEndian => self.to_le_bytes(),
                }
            }

            fn decode(repr: Self::Repr, order: ByteOrder) -> Self {
                match order {
                    ByteOrder::BigEndian => <$t>::from_be_bytes(repr),
                    ByteOrder::LittleEndian => <$t>::from_le_bytes(repr),
                }
            }
        }
    )*};
}

impl_primitive!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposite_order_swaps_bytes() {
        let repr = 0x001fu16.encode(ByteOrder::BigEndian);
        assert_eq!(u16::decode(repr, ByteOrder::LittleEndian), 0x1f00);

        let repr = 0x01020304i32.encode(ByteOrder::LittleEndian);
        assert_eq!(repr, [4, 3, 2, 1]);
        assert_eq!(i32::decode(repr, ByteOrder::BigEndian), 0x04030201);

        let x = 1.05f64;
        let repr = x.encode(ByteOrder::BigEndian);
        assert_eq!(f64::decode(repr, ByteOrder::LittleEndian).to_bits(), x.to_bits().swap_bytes());
    }
}
