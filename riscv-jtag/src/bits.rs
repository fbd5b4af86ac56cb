//! Fixed-width bit sequences.
//!
//! [`BitSequence`] is the currency of every scan operation. Bits are stored and iterated most
//! significant bit first, while JTAG controllers shift them onto the wire least significant bit
//! first (see [`BitSequence::iter_lsb`]).

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use bitvec::prelude::*;

/// Errors raised by [`BitSequence`] operations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BitsError {
    /// The value does not fit into the requested width.
    #[error("value {value:#x} does not fit into {width} bits")]
    ValueTooWide { value: u128, width: usize },
    /// More bits were requested than the sequence holds.
    #[error("cannot take {requested} bits from a sequence of {available} bits")]
    NotEnoughBits { requested: usize, available: usize },
    /// A binary operation was applied to sequences of different width.
    #[error("width mismatch: {left} bits vs. {right} bits")]
    WidthMismatch { left: usize, right: usize },
    /// The sequence holds significant bits above bit 127.
    #[error("sequence of {0} bits does not fit into a 128 bit integer")]
    Overflow(usize),
    /// Decrementing a zero sequence without wrapping.
    #[error("decrement of a zero sequence")]
    Underflow,
    /// A bit string contained something other than `0`, `1` or `_`.
    #[error("invalid character {0:?} in bit string")]
    InvalidDigit(char),
}

/// Behaviour of [`BitSequence::increment`] and [`BitSequence::decrement`] on carry/borrow out of
/// the most significant bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overflow {
    /// Keep the width, wrap around modulo `2^width`.
    Wrap,
    /// Grow the width by one bit on carry. A borrow out of a zero sequence is an error.
    Grow,
}

/// An ordered sequence of bits of a fixed width.
///
/// The numeric value of the sequence is always smaller than `2^len()`.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct BitSequence {
    // Index 0 is the most significant bit.
    bits: BitVec<u8, Msb0>,
}

impl BitSequence {
    /// Creates an empty sequence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sequence of `width` bits holding `value`.
    pub fn from_value(value: u128, width: usize) -> Result<Self, BitsError> {
        if width < 128 && value >> width != 0 {
            return Err(BitsError::ValueTooWide { value, width });
        }

        let bits = (0..width)
            .rev()
            .map(|index| index < 128 && (value >> index) & 1 == 1)
            .collect();

        Ok(Self { bits })
    }

    /// Creates a sequence of `width` zero bits.
    pub fn zeros(width: usize) -> Self {
        Self {
            bits: BitVec::repeat(false, width),
        }
    }

    /// Creates a sequence of `width` one bits.
    pub fn ones(width: usize) -> Self {
        Self {
            bits: BitVec::repeat(true, width),
        }
    }

    /// Builds a sequence from bits given most significant bit first.
    pub fn from_msb_bits(bits: impl IntoIterator<Item = bool>) -> Self {
        Self {
            bits: bits.into_iter().collect(),
        }
    }

    /// Builds a sequence from bits given least significant bit first, i.e. in wire order.
    pub fn from_lsb_bits(bits: impl IntoIterator<Item = bool>) -> Self {
        let mut bits: BitVec<u8, Msb0> = bits.into_iter().collect();
        bits.reverse();
        Self { bits }
    }

    /// Width of the sequence in bits.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Returns `true` if the sequence holds no bits.
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// The numeric value of the sequence.
    pub fn value(&self) -> Result<u128, BitsError> {
        let excess = self.len().saturating_sub(128);
        if self.bits[..excess].any() {
            return Err(BitsError::Overflow(self.len()));
        }

        Ok(self.bits[excess..]
            .iter()
            .by_vals()
            .fold(0u128, |acc, bit| (acc << 1) | u128::from(bit)))
    }

    /// The numeric value of the sequence, which must fit into 64 bits.
    pub fn to_u64(&self) -> Result<u64, BitsError> {
        let value = self.value()?;
        u64::try_from(value).map_err(|_| BitsError::Overflow(self.len()))
    }

    /// Bit at `index`, counted from the most significant bit.
    pub fn get(&self, index: usize) -> Option<bool> {
        self.bits.get(index).map(|bit| *bit)
    }

    /// Appends `other` on the most significant side.
    pub fn push_left(&mut self, other: &BitSequence) {
        let mut bits = other.bits.clone();
        bits.extend_from_bitslice(&self.bits);
        self.bits = bits;
    }

    /// Appends `other` on the least significant side.
    pub fn push_right(&mut self, other: &BitSequence) {
        self.bits.extend_from_bitslice(&other.bits);
    }

    /// Removes the `count` most significant bits and returns them.
    pub fn pop_left(&mut self, count: usize) -> Result<BitSequence, BitsError> {
        self.check_available(count)?;

        let rest = self.bits.split_off(count);
        let popped = std::mem::replace(&mut self.bits, rest);

        Ok(Self { bits: popped })
    }

    /// Removes the `count` least significant bits and returns them.
    pub fn pop_right(&mut self, count: usize) -> Result<BitSequence, BitsError> {
        self.check_available(count)?;

        let popped = self.bits.split_off(self.len() - count);

        Ok(Self { bits: popped })
    }

    fn check_available(&self, requested: usize) -> Result<(), BitsError> {
        if requested > self.len() {
            return Err(BitsError::NotEnoughBits {
                requested,
                available: self.len(),
            });
        }
        Ok(())
    }

    /// Reverses the bit order in place.
    pub fn reverse(&mut self) {
        self.bits.reverse();
    }

    /// Inverts every bit in place.
    pub fn invert(&mut self) {
        let bits = std::mem::take(&mut self.bits);
        self.bits = !bits;
    }

    /// Rotates towards the most significant bit, modulo the width.
    pub fn rotate_left(&mut self, count: usize) {
        if !self.is_empty() {
            let count = count % self.len();
            self.bits.rotate_left(count);
        }
    }

    /// Rotates towards the least significant bit, modulo the width.
    pub fn rotate_right(&mut self, count: usize) {
        if !self.is_empty() {
            let count = count % self.len();
            self.bits.rotate_right(count);
        }
    }

    /// Adds one to the value.
    pub fn increment(&mut self, overflow: Overflow) {
        for mut bit in self.bits.iter_mut().rev() {
            if *bit {
                *bit = false;
            } else {
                *bit = true;
                return;
            }
        }

        if overflow == Overflow::Grow {
            self.bits.insert(0, true);
        }
    }

    /// Subtracts one from the value.
    pub fn decrement(&mut self, overflow: Overflow) -> Result<(), BitsError> {
        if overflow == Overflow::Grow && self.bits.not_any() {
            return Err(BitsError::Underflow);
        }

        for mut bit in self.bits.iter_mut().rev() {
            if *bit {
                *bit = false;
                break;
            }
            *bit = true;
        }

        Ok(())
    }

    /// Bitwise AND of two sequences of equal width.
    pub fn and(&self, other: &BitSequence) -> Result<BitSequence, BitsError> {
        self.zip_with(other, |a, b| a & b)
    }

    /// Bitwise OR of two sequences of equal width.
    pub fn or(&self, other: &BitSequence) -> Result<BitSequence, BitsError> {
        self.zip_with(other, |a, b| a | b)
    }

    /// Bitwise XOR of two sequences of equal width.
    pub fn xor(&self, other: &BitSequence) -> Result<BitSequence, BitsError> {
        self.zip_with(other, |a, b| a ^ b)
    }

    fn zip_with(
        &self,
        other: &BitSequence,
        op: impl Fn(bool, bool) -> bool,
    ) -> Result<BitSequence, BitsError> {
        if self.len() != other.len() {
            return Err(BitsError::WidthMismatch {
                left: self.len(),
                right: other.len(),
            });
        }

        Ok(Self::from_msb_bits(
            self.iter().zip(other.iter()).map(|(a, b)| op(a, b)),
        ))
    }

    /// Iterates the bits most significant bit first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = bool> + ExactSizeIterator + '_ {
        self.bits.iter().by_vals()
    }

    /// Iterates the bits least significant bit first, which is the order they are shifted out.
    pub fn iter_lsb(&self) -> impl Iterator<Item = bool> + ExactSizeIterator + '_ {
        self.iter().rev()
    }
}

impl std::ops::Not for BitSequence {
    type Output = BitSequence;

    fn not(mut self) -> Self::Output {
        self.invert();
        self
    }
}

impl From<bool> for BitSequence {
    fn from(bit: bool) -> Self {
        Self::from_msb_bits([bit])
    }
}

impl From<BitVec<u8, Msb0>> for BitSequence {
    fn from(bits: BitVec<u8, Msb0>) -> Self {
        Self { bits }
    }
}

impl From<BitSequence> for BitVec<u8, Msb0> {
    fn from(sequence: BitSequence) -> Self {
        sequence.bits
    }
}

impl Ord for BitSequence {
    fn cmp(&self, other: &Self) -> Ordering {
        // For equal widths, lexicographic order of the MSB-first bits is numeric order.
        self.len()
            .cmp(&other.len())
            .then_with(|| self.iter().cmp(other.iter()))
    }
}

impl PartialOrd for BitSequence {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for BitSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bit in self.iter() {
            f.write_str(if bit { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl fmt::Debug for BitSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitSequence(0b{self}, {})", self.len())
    }
}

impl FromStr for BitSequence {
    type Err = BitsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bits = BitVec::new();
        for c in s.chars() {
            match c {
                '0' => bits.push(false),
                '1' => bits.push(true),
                '_' => {}
                other => return Err(BitsError::InvalidDigit(other)),
            }
        }
        Ok(Self { bits })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn seq(value: u128, width: usize) -> BitSequence {
        BitSequence::from_value(value, width).unwrap()
    }

    #[test_case(0, 0)]
    #[test_case(0, 1)]
    #[test_case(1, 1)]
    #[test_case(0xC4, 8)]
    #[test_case(0x1_2345_6789, 41)]
    #[test_case(u128::MAX, 128)]
    fn value_and_width_survive_construction(value: u128, width: usize) {
        let s = seq(value, width);
        assert_eq!(s.value(), Ok(value));
        assert_eq!(s.len(), width);
    }

    #[test]
    fn value_must_fit_width() {
        assert_eq!(
            BitSequence::from_value(0x100, 8),
            Err(BitsError::ValueTooWide {
                value: 0x100,
                width: 8
            })
        );
    }

    #[test]
    fn iterates_msb_first() {
        let s = seq(0xC4, 8);
        let bits: Vec<u8> = s.iter().map(u8::from).collect();
        assert_eq!(bits, vec![1, 1, 0, 0, 0, 1, 0, 0]);
        assert_eq!(s.to_string(), "11000100");

        let lsb: Vec<u8> = s.iter_lsb().map(u8::from).collect();
        assert_eq!(lsb, vec![0, 0, 1, 0, 0, 0, 1, 1]);
    }

    #[test]
    fn parses_bit_strings() {
        assert_eq!("1100_0100".parse::<BitSequence>(), Ok(seq(0xC4, 8)));
        assert_eq!(
            "10x".parse::<BitSequence>(),
            Err(BitsError::InvalidDigit('x'))
        );
    }

    #[test]
    fn lsb_bits_build_the_same_value() {
        let s = BitSequence::from_lsb_bits([false, false, true, false, false, false, true, true]);
        assert_eq!(s, seq(0xC4, 8));
    }

    #[test]
    fn push_then_pop_right_restores_operand() {
        let mut s = seq(0b101, 3);
        let x = seq(0b0110, 4);
        s.push_right(&x);
        assert_eq!(s, seq(0b101_0110, 7));
        assert_eq!(s.pop_right(4), Ok(x));
        assert_eq!(s, seq(0b101, 3));
    }

    #[test]
    fn push_then_pop_left_restores_operand() {
        let mut s = seq(0b101, 3);
        let x = seq(0b0110, 4);
        s.push_left(&x);
        assert_eq!(s, seq(0b0110_101, 7));
        assert_eq!(s.pop_left(4), Ok(x));
        assert_eq!(s, seq(0b101, 3));
    }

    #[test]
    fn pop_more_than_available_fails() {
        let mut s = seq(0b11, 2);
        assert_eq!(
            s.pop_right(3),
            Err(BitsError::NotEnoughBits {
                requested: 3,
                available: 2
            })
        );
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn reverse_and_invert_are_involutions() {
        let original = seq(0b1101_0010_1, 9);

        let mut s = original.clone();
        s.reverse();
        assert_eq!(s, seq(0b1010_0101_1, 9));
        s.reverse();
        assert_eq!(s, original);

        let mut s = original.clone();
        s.invert();
        assert_eq!(s, seq(0b0010_1101_0, 9));
        s.invert();
        assert_eq!(s, original);
    }

    #[test_case(0)]
    #[test_case(1)]
    #[test_case(5)]
    #[test_case(13)]
    fn rotations_cancel(count: usize) {
        let original = seq(0b1000_0110, 8);
        let mut s = original.clone();
        s.rotate_left(count);
        s.rotate_right(count);
        assert_eq!(s, original);
    }

    #[test]
    fn rotate_left_moves_msb_to_lsb() {
        let mut s = seq(0b1000_0110, 8);
        s.rotate_left(1);
        assert_eq!(s, seq(0b0000_1101, 8));
    }

    #[test]
    fn increment_wraps_or_grows() {
        let mut s = seq(0xff, 8);
        s.increment(Overflow::Wrap);
        assert_eq!(s, seq(0, 8));

        let mut s = seq(0xff, 8);
        s.increment(Overflow::Grow);
        assert_eq!(s, seq(0x100, 9));

        let mut s = seq(0b0111, 4);
        s.increment(Overflow::Wrap);
        assert_eq!(s, seq(0b1000, 4));
    }

    #[test]
    fn decrement_wraps_or_fails() {
        let mut s = seq(0, 4);
        assert_eq!(s.decrement(Overflow::Wrap), Ok(()));
        assert_eq!(s, seq(0xf, 4));

        let mut s = seq(0, 4);
        assert_eq!(s.decrement(Overflow::Grow), Err(BitsError::Underflow));
        assert_eq!(s, seq(0, 4));

        let mut s = seq(0b1000, 4);
        assert_eq!(s.decrement(Overflow::Grow), Ok(()));
        assert_eq!(s, seq(0b0111, 4));
    }

    #[test]
    fn bitwise_operations_require_equal_width() {
        let a = seq(0b1100, 4);
        let b = seq(0b1010, 4);
        assert_eq!(a.and(&b), Ok(seq(0b1000, 4)));
        assert_eq!(a.or(&b), Ok(seq(0b1110, 4)));
        assert_eq!(a.xor(&b), Ok(seq(0b0110, 4)));
        assert_eq!(!a.clone(), seq(0b0011, 4));

        assert_eq!(
            a.and(&seq(1, 1)),
            Err(BitsError::WidthMismatch { left: 4, right: 1 })
        );
    }

    #[test]
    fn ordering_is_width_then_value() {
        assert!(seq(0xff, 8) < seq(0, 9));
        assert!(seq(3, 4) < seq(4, 4));
        assert_eq!(seq(5, 4).cmp(&seq(5, 4)), Ordering::Equal);
    }

    #[test]
    fn wide_sequences_report_overflow() {
        let mut s = BitSequence::ones(1);
        s.push_right(&BitSequence::zeros(128));
        assert_eq!(s.value(), Err(BitsError::Overflow(129)));

        let mut s = BitSequence::zeros(1);
        s.push_right(&BitSequence::ones(128));
        assert_eq!(s.value(), Ok(u128::MAX));
    }
}
