//! The sixteen concrete compact-integer encodings: every width in
//! `{8, 16, 24, 32, 40, 48, 56, 64}` bits, signed and unsigned, sharing one
//! logical 64-bit signed domain.

/// A tag identifying one compact-integer on-disk encoding.
///
/// All encodings are little-endian. Odd widths (24/40/48/56-bit) are
/// sign-extended on decode when signed, zero-extended when unsigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    I8,
    U8,
    I16,
    U16,
    I24,
    U24,
    I32,
    U32,
    I40,
    U40,
    I48,
    U48,
    I56,
    U56,
    I64,
    U64,
}

impl Encoding {
    pub const ALL: [Encoding; 16] = [
        Encoding::I8,
        Encoding::U8,
        Encoding::I16,
        Encoding::U16,
        Encoding::I24,
        Encoding::U24,
        Encoding::I32,
        Encoding::U32,
        Encoding::I40,
        Encoding::U40,
        Encoding::I48,
        Encoding::U48,
        Encoding::I56,
        Encoding::U56,
        Encoding::I64,
        Encoding::U64,
    ];

    pub fn bits(self) -> u32 {
        match self {
            Encoding::I8 | Encoding::U8 => 8,
            Encoding::I16 | Encoding::U16 => 16,
            Encoding::I24 | Encoding::U24 => 24,
            Encoding::I32 | Encoding::U32 => 32,
            Encoding::I40 | Encoding::U40 => 40,
            Encoding::I48 | Encoding::U48 => 48,
            Encoding::I56 | Encoding::U56 => 56,
            Encoding::I64 | Encoding::U64 => 64,
        }
    }

    pub fn bytes(self) -> usize {
        (self.bits() as usize) / 8
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            Encoding::I8
                | Encoding::I16
                | Encoding::I24
                | Encoding::I32
                | Encoding::I40
                | Encoding::I48
                | Encoding::I56
                | Encoding::I64
        )
    }

    /// The smallest representable logical value, in the 64-bit signed
    /// domain every encoding is presented through. `U64`'s natural range
    /// tops out above `i64::MAX`; since the façade is always `i64`-typed,
    /// its representable maximum is capped at `i64::MAX` rather than
    /// `u64::MAX`.
    pub fn min_value(self) -> i64 {
        let bits = self.bits();
        if bits >= 64 {
            i64::MIN
        } else if self.is_signed() {
            -(1i64 << (bits - 1))
        } else {
            0
        }
    }

    pub fn max_value(self) -> i64 {
        let bits = self.bits();
        if bits >= 64 {
            i64::MAX
        } else if self.is_signed() {
            (1i64 << (bits - 1)) - 1
        } else {
            (1i64 << bits) - 1
        }
    }

    /// Writes `v` into `dst[..self.bytes()]`, little-endian. `v` must
    /// already be known to lie within `[min_value(), max_value()]`.
    pub fn encode_into(self, v: i64, dst: &mut [u8]) {
        let width = self.bytes();
        debug_assert!(dst.len() >= width);
        let bytes = v.to_le_bytes();
        dst[..width].copy_from_slice(&bytes[..width]);
    }

    /// Reads a logical value from `src[..self.bytes()]`.
    pub fn decode_from(self, src: &[u8]) -> i64 {
        let width = self.bytes();
        debug_assert!(src.len() >= width);
        let mut buf = [0u8; 8];
        buf[..width].copy_from_slice(&src[..width]);
        let raw = i64::from_le_bytes(buf);

        if self.is_signed() && width < 8 {
            let shift = 64 - (width as u32) * 8;
            (raw << shift) >> shift
        } else {
            raw
        }
    }

    /// The stable on-disk data-type tag for this encoding.
    pub fn data_type_tag(self) -> u32 {
        use crate::tags;
        match self {
            Encoding::I8 => tags::I8,
            Encoding::U8 => tags::U8,
            Encoding::I16 => tags::I16,
            Encoding::U16 => tags::U16,
            Encoding::I24 => tags::I24_AS_I64,
            Encoding::U24 => tags::U24_AS_I64,
            Encoding::I32 => tags::I32,
            Encoding::U32 => tags::U32,
            Encoding::I40 => tags::I40_AS_I64,
            Encoding::U40 => tags::U40_AS_I64,
            Encoding::I48 => tags::I48_AS_I64,
            Encoding::U48 => tags::U48_AS_I64,
            Encoding::I56 => tags::I56_AS_I64,
            Encoding::U56 => tags::U56_AS_I64,
            Encoding::I64 => tags::I64,
            Encoding::U64 => tags::U64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_within_range() {
        for &enc in Encoding::ALL.iter() {
            let mut buf = [0u8; 8];
            for &v in &[enc.min_value(), 0, enc.max_value()] {
                enc.encode_into(v, &mut buf);
                assert_eq!(enc.decode_from(&buf), v, "encoding {:?} value {}", enc, v);
            }
        }
    }

    #[test]
    fn u24_max_is_one_less_than_2_24() {
        assert_eq!(Encoding::U24.max_value(), (1 << 24) - 1);
        assert_eq!(Encoding::U24.min_value(), 0);
    }

    #[test]
    fn i24_sign_extends() {
        let mut buf = [0u8; 8];
        Encoding::I24.encode_into(-1, &mut buf);
        assert_eq!(Encoding::I24.decode_from(&buf), -1);
    }

    #[test]
    fn u64_logical_max_is_i64_max() {
        assert_eq!(Encoding::U64.max_value(), i64::MAX);
    }
}

#[cfg(test)]
mod round_trip_law {
    use super::*;
    use proptest::prelude::*;

    fn encoding() -> impl Strategy<Value = Encoding> {
        prop_oneof![
            Just(Encoding::I8),
            Just(Encoding::U8),
            Just(Encoding::I16),
            Just(Encoding::U16),
            Just(Encoding::I24),
            Just(Encoding::U24),
            Just(Encoding::I32),
            Just(Encoding::U32),
            Just(Encoding::I40),
            Just(Encoding::U40),
            Just(Encoding::I48),
            Just(Encoding::U48),
            Just(Encoding::I56),
            Just(Encoding::U56),
            Just(Encoding::I64),
            Just(Encoding::U64),
        ]
    }

    proptest! {
        /// `decode(encode(v)) == v` for every `v` in the representable
        /// range, for every encoding (the compact-encoding round-trip
        /// law).
        #[test]
        fn decode_undoes_encode(enc in encoding(), raw in any::<i64>()) {
            let v = raw.clamp(enc.min_value(), enc.max_value());
            let mut buf = [0u8; 8];
            enc.encode_into(v, &mut buf);
            prop_assert_eq!(enc.decode_from(&buf), v);
        }

        /// Bytes past `enc.bytes()` in the scratch buffer never leak into
        /// the decoded value, whatever garbage they hold.
        #[test]
        fn decode_ignores_trailing_garbage(enc in encoding(), raw in any::<i64>(), garbage in any::<[u8; 8]>()) {
            let v = raw.clamp(enc.min_value(), enc.max_value());
            let mut buf = garbage;
            enc.encode_into(v, &mut buf);
            prop_assert_eq!(enc.decode_from(&buf), v);
        }
    }
}
