//! # Bit Buffers
//!
//! Cursor-based readers and writers over a byte slice with bit granularity.
//!
//! Every codec in this crate is built on these two types. Fields are packed
//! MSB-first: a 1-bit flag followed by a 7-bit value occupies exactly one
//! byte, the flag being the top bit.
//!
//! ## Guarantees
//!
//! - A read advances the cursor by exactly the requested number of bits or
//!   fails with [`ModbusError::BufferUnderflow`] and leaves the cursor where it was.
//! - The cursor only moves forward.
//! - Writes grow the backing buffer as needed.
//!
//! Ending a frame on a byte boundary is the caller's responsibility.
//!
//! ```rust
//! use voltage_modbus_driver::buffer::{ReadBuffer, WriteBuffer};
//!
//! let mut wb = WriteBuffer::new();
//! wb.write_bit(true).unwrap();
//! wb.write_u8(7, 0x03).unwrap();
//! wb.write_u16(16, 0x1234).unwrap();
//! assert_eq!(wb.as_slice(), &[0x83, 0x12, 0x34]);
//!
//! let bytes = wb.to_vec();
//! let mut rb = ReadBuffer::new(&bytes);
//! assert!(rb.read_bit().unwrap());
//! assert_eq!(rb.read_u8(7).unwrap(), 0x03);
//! assert_eq!(rb.read_u16(16).unwrap(), 0x1234);
//! assert_eq!(rb.pos(), 24);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ModbusError, ModbusResult};

#[inline]
fn check_width(bits: u8, max: u8) -> ModbusResult<usize> {
    if bits == 0 || bits > max {
        return Err(ModbusError::invalid_data(format!(
            "Invalid field width: {} bits (must be 1-{})",
            bits, max
        )));
    }
    Ok(bits as usize)
}

#[inline]
fn sign_extend(value: u64, bits: usize) -> i64 {
    if bits >= 64 {
        return value as i64;
    }
    let sign_bit = 1u64 << (bits - 1);
    if value & sign_bit != 0 {
        (value | !((1u64 << bits) - 1)) as i64
    } else {
        value as i64
    }
}

/// Bit-granular reader over a borrowed frame.
#[derive(Debug, Clone)]
pub struct ReadBuffer<'a> {
    data: &'a [u8],
    /// Bit offset of the cursor
    pos: usize,
}

impl<'a> ReadBuffer<'a> {
    /// Create a reader positioned at bit 0.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current bit offset.
    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Total size of the underlying frame in bits.
    #[inline]
    pub fn len_bits(&self) -> usize {
        self.data.len() * 8
    }

    /// Bits left between the cursor and the end of the frame.
    #[inline]
    pub fn remaining_bits(&self) -> usize {
        self.len_bits() - self.pos
    }

    /// Whether at least `bits` more bits can be read.
    #[inline]
    pub fn has_more(&self, bits: usize) -> bool {
        self.remaining_bits() >= bits
    }

    /// Whether the cursor sits on a byte boundary.
    #[inline]
    pub fn is_byte_aligned(&self) -> bool {
        self.pos % 8 == 0
    }

    fn take_bits(&mut self, bits: usize) -> ModbusResult<u64> {
        let remaining = self.remaining_bits();
        if bits > remaining {
            return Err(ModbusError::underflow(bits, remaining));
        }

        let mut value: u64 = 0;
        let mut pos = self.pos;
        let mut left = bits;
        while left > 0 {
            let byte = self.data[pos / 8];
            let available = 8 - pos % 8;
            let take = available.min(left);
            let mask = ((1u16 << take) - 1) as u8;
            let chunk = (byte >> (available - take)) & mask;
            value = (value << take) | u64::from(chunk);
            pos += take;
            left -= take;
        }
        self.pos = pos;
        Ok(value)
    }

    /// Read a single bit.
    pub fn read_bit(&mut self) -> ModbusResult<bool> {
        Ok(self.take_bits(1)? != 0)
    }

    /// Read an unsigned value of `bits` (1-8) bits.
    pub fn read_u8(&mut self, bits: u8) -> ModbusResult<u8> {
        let bits = check_width(bits, 8)?;
        Ok(self.take_bits(bits)? as u8)
    }

    /// Read an unsigned value of `bits` (1-16) bits.
    pub fn read_u16(&mut self, bits: u8) -> ModbusResult<u16> {
        let bits = check_width(bits, 16)?;
        Ok(self.take_bits(bits)? as u16)
    }

    /// Read an unsigned value of `bits` (1-32) bits.
    pub fn read_u32(&mut self, bits: u8) -> ModbusResult<u32> {
        let bits = check_width(bits, 32)?;
        Ok(self.take_bits(bits)? as u32)
    }

    /// Read an unsigned value of `bits` (1-64) bits.
    pub fn read_u64(&mut self, bits: u8) -> ModbusResult<u64> {
        let bits = check_width(bits, 64)?;
        self.take_bits(bits)
    }

    /// Read a two's complement value of `bits` (1-8) bits, sign-extended.
    pub fn read_i8(&mut self, bits: u8) -> ModbusResult<i8> {
        let bits = check_width(bits, 8)?;
        Ok(sign_extend(self.take_bits(bits)?, bits) as i8)
    }

    /// Read a two's complement value of `bits` (1-16) bits, sign-extended.
    pub fn read_i16(&mut self, bits: u8) -> ModbusResult<i16> {
        let bits = check_width(bits, 16)?;
        Ok(sign_extend(self.take_bits(bits)?, bits) as i16)
    }

    /// Read a two's complement value of `bits` (1-32) bits, sign-extended.
    pub fn read_i32(&mut self, bits: u8) -> ModbusResult<i32> {
        let bits = check_width(bits, 32)?;
        Ok(sign_extend(self.take_bits(bits)?, bits) as i32)
    }

    /// Read a two's complement value of `bits` (1-64) bits, sign-extended.
    pub fn read_i64(&mut self, bits: u8) -> ModbusResult<i64> {
        let bits = check_width(bits, 64)?;
        Ok(sign_extend(self.take_bits(bits)?, bits))
    }

    /// Read an IEEE-754 single. Only a width of 32 bits is supported.
    pub fn read_f32(&mut self, bits: u8) -> ModbusResult<f32> {
        if bits != 32 {
            return Err(ModbusError::invalid_data(format!(
                "Unsupported float32 width: {} bits",
                bits
            )));
        }
        Ok(f32::from_bits(self.take_bits(32)? as u32))
    }

    /// Read an IEEE-754 double. Only a width of 64 bits is supported.
    pub fn read_f64(&mut self, bits: u8) -> ModbusResult<f64> {
        if bits != 64 {
            return Err(ModbusError::invalid_data(format!(
                "Unsupported float64 width: {} bits",
                bits
            )));
        }
        Ok(f64::from_bits(self.take_bits(64)?))
    }

    /// Read `count` raw bytes.
    pub fn read_byte_array(&mut self, count: usize) -> ModbusResult<Vec<u8>> {
        let bits = count * 8;
        let remaining = self.remaining_bits();
        if bits > remaining {
            return Err(ModbusError::underflow(bits, remaining));
        }
        if self.is_byte_aligned() {
            let start = self.pos / 8;
            self.pos += bits;
            return Ok(self.data[start..start + count].to_vec());
        }
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.take_bits(8)? as u8);
        }
        Ok(out)
    }

    /// Read `count` signed bytes.
    pub fn read_i8_array(&mut self, count: usize) -> ModbusResult<Vec<i8>> {
        Ok(self
            .read_byte_array(count)?
            .into_iter()
            .map(|b| b as i8)
            .collect())
    }
}

/// Bit-granular writer backed by a growable [`BytesMut`].
#[derive(Debug, Clone, Default)]
pub struct WriteBuffer {
    data: BytesMut,
    /// Bit offset of the cursor
    pos: usize,
}

impl WriteBuffer {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with room for `bytes` bytes before reallocating.
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(bytes),
            pos: 0,
        }
    }

    /// Current bit offset (number of bits written so far).
    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Whether the cursor sits on a byte boundary.
    #[inline]
    pub fn is_byte_aligned(&self) -> bool {
        self.pos % 8 == 0
    }

    /// Bytes written so far; a trailing partial byte is zero-padded.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Copy out the written bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    /// Consume the writer and return the frozen bytes.
    pub fn into_bytes(self) -> Bytes {
        self.data.freeze()
    }

    fn put_bits(&mut self, bits: usize, value: u64) {
        let mut left = bits;
        while left > 0 {
            let bit_offset = self.pos % 8;
            if bit_offset == 0 {
                self.data.put_u8(0);
            }
            let available = 8 - bit_offset;
            let take = available.min(left);
            let chunk = ((value >> (left - take)) & ((1u64 << take) - 1)) as u8;
            let idx = self.pos / 8;
            self.data[idx] |= chunk << (available - take);
            self.pos += take;
            left -= take;
        }
    }

    fn put_unsigned(&mut self, bits: usize, value: u64) -> ModbusResult<()> {
        if bits < 64 && value >> bits != 0 {
            return Err(ModbusError::invalid_data(format!(
                "Value {} does not fit in {} bits",
                value, bits
            )));
        }
        self.put_bits(bits, value);
        Ok(())
    }

    fn put_signed(&mut self, bits: usize, value: i64) -> ModbusResult<()> {
        if bits < 64 {
            let min = -(1i64 << (bits - 1));
            let max = (1i64 << (bits - 1)) - 1;
            if value < min || value > max {
                return Err(ModbusError::invalid_data(format!(
                    "Value {} does not fit in {} signed bits",
                    value, bits
                )));
            }
            self.put_bits(bits, (value as u64) & ((1u64 << bits) - 1));
        } else {
            self.put_bits(bits, value as u64);
        }
        Ok(())
    }

    /// Write a single bit.
    pub fn write_bit(&mut self, value: bool) -> ModbusResult<()> {
        self.put_bits(1, u64::from(value));
        Ok(())
    }

    /// Write an unsigned value using `bits` (1-8) bits.
    pub fn write_u8(&mut self, bits: u8, value: u8) -> ModbusResult<()> {
        let bits = check_width(bits, 8)?;
        self.put_unsigned(bits, u64::from(value))
    }

    /// Write an unsigned value using `bits` (1-16) bits.
    pub fn write_u16(&mut self, bits: u8, value: u16) -> ModbusResult<()> {
        let bits = check_width(bits, 16)?;
        self.put_unsigned(bits, u64::from(value))
    }

    /// Write an unsigned value using `bits` (1-32) bits.
    pub fn write_u32(&mut self, bits: u8, value: u32) -> ModbusResult<()> {
        let bits = check_width(bits, 32)?;
        self.put_unsigned(bits, u64::from(value))
    }

    /// Write an unsigned value using `bits` (1-64) bits.
    pub fn write_u64(&mut self, bits: u8, value: u64) -> ModbusResult<()> {
        let bits = check_width(bits, 64)?;
        self.put_unsigned(bits, value)
    }

    /// Write a two's complement value using `bits` (1-8) bits.
    pub fn write_i8(&mut self, bits: u8, value: i8) -> ModbusResult<()> {
        let bits = check_width(bits, 8)?;
        self.put_signed(bits, i64::from(value))
    }

    /// Write a two's complement value using `bits` (1-16) bits.
    pub fn write_i16(&mut self, bits: u8, value: i16) -> ModbusResult<()> {
        let bits = check_width(bits, 16)?;
        self.put_signed(bits, i64::from(value))
    }

    /// Write a two's complement value using `bits` (1-32) bits.
    pub fn write_i32(&mut self, bits: u8, value: i32) -> ModbusResult<()> {
        let bits = check_width(bits, 32)?;
        self.put_signed(bits, i64::from(value))
    }

    /// Write a two's complement value using `bits` (1-64) bits.
    pub fn write_i64(&mut self, bits: u8, value: i64) -> ModbusResult<()> {
        let bits = check_width(bits, 64)?;
        self.put_signed(bits, value)
    }

    /// Write an IEEE-754 single. Only a width of 32 bits is supported.
    pub fn write_f32(&mut self, bits: u8, value: f32) -> ModbusResult<()> {
        if bits != 32 {
            return Err(ModbusError::invalid_data(format!(
                "Unsupported float32 width: {} bits",
                bits
            )));
        }
        self.put_bits(32, u64::from(value.to_bits()));
        Ok(())
    }

    /// Write an IEEE-754 double. Only a width of 64 bits is supported.
    pub fn write_f64(&mut self, bits: u8, value: f64) -> ModbusResult<()> {
        if bits != 64 {
            return Err(ModbusError::invalid_data(format!(
                "Unsupported float64 width: {} bits",
                bits
            )));
        }
        self.put_bits(64, value.to_bits());
        Ok(())
    }

    /// Write raw bytes.
    pub fn write_byte_array(&mut self, values: &[u8]) -> ModbusResult<()> {
        if self.is_byte_aligned() {
            self.data.extend_from_slice(values);
            self.pos += values.len() * 8;
            return Ok(());
        }
        for &b in values {
            self.put_bits(8, u64::from(b));
        }
        Ok(())
    }

    /// Write signed bytes.
    pub fn write_i8_array(&mut self, values: &[i8]) -> ModbusResult<()> {
        for &v in values {
            self.put_bits(8, u64::from(v as u8));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_and_function_share_one_byte() {
        let mut rb = ReadBuffer::new(&[0x83, 0x02]);
        assert!(rb.read_bit().unwrap());
        assert_eq!(rb.read_u8(7).unwrap(), 0x03);
        assert_eq!(rb.pos(), 8);
        assert_eq!(rb.read_u8(8).unwrap(), 0x02);
        assert_eq!(rb.remaining_bits(), 0);
    }

    #[test]
    fn test_unaligned_reads_cross_byte_boundaries() {
        // 0b1010_1100 0b0011_0101
        let data = [0xAC, 0x35];
        let mut rb = ReadBuffer::new(&data);
        assert_eq!(rb.read_u8(3).unwrap(), 0b101);
        assert_eq!(rb.read_u16(10).unwrap(), 0b01100_00110);
        assert_eq!(rb.read_u8(3).unwrap(), 0b101);
        assert_eq!(rb.pos(), 16);
    }

    #[test]
    fn test_underflow_leaves_cursor_untouched() {
        let mut rb = ReadBuffer::new(&[0x12]);
        rb.read_u8(4).unwrap();
        let err = rb.read_u8(8).unwrap_err();
        assert_eq!(err, ModbusError::underflow(8, 4));
        assert_eq!(rb.pos(), 4);

        let err = rb.read_byte_array(1).unwrap_err();
        assert!(matches!(err, ModbusError::BufferUnderflow { .. }));
        assert_eq!(rb.read_u8(4).unwrap(), 0x02);
    }

    #[test]
    fn test_invalid_width_rejected() {
        let mut rb = ReadBuffer::new(&[0xFF, 0xFF, 0xFF]);
        assert!(rb.read_u8(0).is_err());
        assert!(rb.read_u8(9).is_err());
        assert!(rb.read_f32(16).is_err());
        assert_eq!(rb.pos(), 0);
    }

    #[test]
    fn test_signed_reads_sign_extend() {
        let mut rb = ReadBuffer::new(&[0xF0, 0x80, 0x00]);
        assert_eq!(rb.read_i8(4).unwrap(), -1);
        assert_eq!(rb.read_i8(4).unwrap(), 0);
        assert_eq!(rb.read_i16(16).unwrap(), i16::MIN);
    }

    #[test]
    fn test_write_mirrors_read() {
        let mut wb = WriteBuffer::new();
        wb.write_bit(false).unwrap();
        wb.write_u8(7, 0x10).unwrap();
        wb.write_i16(16, -2).unwrap();
        wb.write_u32(32, 0xDEADBEEF).unwrap();
        wb.write_f32(32, 1.5).unwrap();
        wb.write_f64(64, -0.25).unwrap();
        wb.write_i64(64, i64::MIN).unwrap();
        wb.write_u64(64, u64::MAX).unwrap();
        wb.write_i8_array(&[-1, 2]).unwrap();
        assert!(wb.is_byte_aligned());

        let bytes = wb.to_vec();
        let mut rb = ReadBuffer::new(&bytes);
        assert!(!rb.read_bit().unwrap());
        assert_eq!(rb.read_u8(7).unwrap(), 0x10);
        assert_eq!(rb.read_i16(16).unwrap(), -2);
        assert_eq!(rb.read_u32(32).unwrap(), 0xDEADBEEF);
        assert_eq!(rb.read_f32(32).unwrap(), 1.5);
        assert_eq!(rb.read_f64(64).unwrap(), -0.25);
        assert_eq!(rb.read_i64(64).unwrap(), i64::MIN);
        assert_eq!(rb.read_u64(64).unwrap(), u64::MAX);
        assert_eq!(rb.read_i8_array(2).unwrap(), vec![-1, 2]);
        assert_eq!(rb.remaining_bits(), 0);
    }

    #[test]
    fn test_unaligned_byte_array() {
        let mut wb = WriteBuffer::new();
        wb.write_u8(4, 0xA).unwrap();
        wb.write_byte_array(&[0x12, 0x34]).unwrap();
        wb.write_u8(4, 0xB).unwrap();
        assert_eq!(wb.as_slice(), &[0xA1, 0x23, 0x4B]);

        let bytes = wb.to_vec();
        let mut rb = ReadBuffer::new(&bytes);
        assert_eq!(rb.read_u8(4).unwrap(), 0xA);
        assert_eq!(rb.read_byte_array(2).unwrap(), vec![0x12, 0x34]);
        assert_eq!(rb.read_u8(4).unwrap(), 0xB);
    }

    #[test]
    fn test_write_rejects_values_wider_than_field() {
        let mut wb = WriteBuffer::new();
        assert!(wb.write_u8(7, 0x80).is_err());
        assert!(wb.write_i8(4, 8).is_err());
        assert!(wb.write_i8(4, -9).is_err());
        assert_eq!(wb.pos(), 0);
        assert!(wb.write_i8(4, -8).is_ok());
    }

    #[test]
    fn test_trailing_partial_byte_is_zero_padded() {
        let mut wb = WriteBuffer::new();
        wb.write_bit(true).unwrap();
        assert_eq!(wb.pos(), 1);
        assert_eq!(wb.into_bytes().as_ref(), &[0x80]);
    }
}
