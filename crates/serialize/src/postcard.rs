//! Postcard-style binary encoding format.
//!
//! [`PostcardEncoder`] and [`PostcardDecoder`] implement [`Encoder`] and
//! [`Decoder`] with a format similar to the `postcard` crate:
//!
//! - **Variable-length integers**: LEB128 varints for everything from `u16`
//!   up, so small values stay compact. Signed integers are zigzag-encoded
//!   first so small negative numbers also stay short.
//! - **Fixed-size primitives**: `u8`, `i8`, `bool` are single bytes.
//! - **Floating-point**: IEEE 754 little-endian bit patterns.
//! - **Strings/bytes**: varint length prefix followed by the raw bytes.

use std::io::{self, Read, Write};

use crate::{Decoder, Encoder};

const MAX_VARINT_U64_BYTES: usize = 10;
const MAX_VARINT_U128_BYTES: usize = 19;

#[inline]
#[allow(clippy::cast_possible_truncation)]
const fn encode_varint_u64(
    mut value: u64,
    buf: &mut [u8; MAX_VARINT_U64_BYTES],
) -> usize {
    let mut i = 0;
    while value >= 0x80 {
        buf[i] = (value as u8) | 0x80;
        value >>= 7;
        i += 1;
    }
    buf[i] = value as u8;
    i + 1
}

#[inline]
#[allow(clippy::cast_possible_truncation)]
const fn encode_varint_u128(
    mut value: u128,
    buf: &mut [u8; MAX_VARINT_U128_BYTES],
) -> usize {
    let mut i = 0;
    while value >= 0x80 {
        buf[i] = (value as u8) | 0x80;
        value >>= 7;
        i += 1;
    }
    buf[i] = value as u8;
    i + 1
}

#[inline]
const fn zigzag_encode_64(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

#[inline]
const fn zigzag_decode_64(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

#[inline]
const fn zigzag_encode_128(v: i128) -> u128 {
    ((v << 1) ^ (v >> 127)) as u128
}

#[inline]
const fn zigzag_decode_128(v: u128) -> i128 {
    ((v >> 1) as i128) ^ -((v & 1) as i128)
}

/// An [`Encoder`] writing the postcard format to any [`Write`] sink.
#[derive(Debug)]
pub struct PostcardEncoder<W> {
    writer: W,
}

impl<W: Write> PostcardEncoder<W> {
    /// Creates an encoder writing to `writer`.
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Consumes the encoder and returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn emit_varint_u64(&mut self, v: u64) -> io::Result<()> {
        let mut buf = [0u8; MAX_VARINT_U64_BYTES];
        let len = encode_varint_u64(v, &mut buf);
        self.writer.write_all(&buf[..len])
    }

    fn emit_varint_u128(&mut self, v: u128) -> io::Result<()> {
        let mut buf = [0u8; MAX_VARINT_U128_BYTES];
        let len = encode_varint_u128(v, &mut buf);
        self.writer.write_all(&buf[..len])
    }
}

impl<W: Write> Encoder for PostcardEncoder<W> {
    fn emit_u8(&mut self, v: u8) -> io::Result<()> {
        self.writer.write_all(&[v])
    }

    fn emit_u16(&mut self, v: u16) -> io::Result<()> {
        self.emit_varint_u64(u64::from(v))
    }

    fn emit_u32(&mut self, v: u32) -> io::Result<()> {
        self.emit_varint_u64(u64::from(v))
    }

    fn emit_u64(&mut self, v: u64) -> io::Result<()> {
        self.emit_varint_u64(v)
    }

    fn emit_u128(&mut self, v: u128) -> io::Result<()> {
        self.emit_varint_u128(v)
    }

    fn emit_i8(&mut self, v: i8) -> io::Result<()> {
        self.emit_u8(v as u8)
    }

    fn emit_i16(&mut self, v: i16) -> io::Result<()> {
        self.emit_varint_u64(zigzag_encode_64(i64::from(v)))
    }

    fn emit_i32(&mut self, v: i32) -> io::Result<()> {
        self.emit_varint_u64(zigzag_encode_64(i64::from(v)))
    }

    fn emit_i64(&mut self, v: i64) -> io::Result<()> {
        self.emit_varint_u64(zigzag_encode_64(v))
    }

    fn emit_i128(&mut self, v: i128) -> io::Result<()> {
        self.emit_varint_u128(zigzag_encode_128(v))
    }

    fn emit_raw_bytes(&mut self, s: &[u8]) -> io::Result<()> {
        self.writer.write_all(s)
    }

    // floats stay fixed-width; varints would inflate their high-entropy bits

    fn emit_f32(&mut self, v: f32) -> io::Result<()> {
        self.writer.write_all(&v.to_bits().to_le_bytes())
    }

    fn emit_f64(&mut self, v: f64) -> io::Result<()> {
        self.writer.write_all(&v.to_bits().to_le_bytes())
    }
}

/// A [`Decoder`] reading the postcard format from any [`Read`] source.
#[derive(Debug)]
pub struct PostcardDecoder<R> {
    reader: R,
}

impl<R: Read> PostcardDecoder<R> {
    /// Creates a decoder reading from `reader`.
    pub const fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Consumes the decoder and returns the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.reader.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_varint_u64(&mut self) -> io::Result<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_byte()?;
            if shift >= 64 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "varint too long for u64",
                ));
            }
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn read_varint_u128(&mut self) -> io::Result<u128> {
        let mut value = 0u128;
        let mut shift = 0u32;
        loop {
            let byte = self.read_byte()?;
            if shift >= 128 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "varint too long for u128",
                ));
            }
            value |= u128::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn read_varint_bounded(&mut self, max: u64, what: &str) -> io::Result<u64> {
        let v = self.read_varint_u64()?;
        if v > max {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("varint {v} out of range for {what}"),
            ));
        }
        Ok(v)
    }
}

impl<R: Read> Decoder for PostcardDecoder<R> {
    fn read_u8(&mut self) -> io::Result<u8> {
        self.read_byte()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read_u16(&mut self) -> io::Result<u16> {
        Ok(self.read_varint_bounded(u64::from(u16::MAX), "u16")? as u16)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read_u32(&mut self) -> io::Result<u32> {
        Ok(self.read_varint_bounded(u64::from(u32::MAX), "u32")? as u32)
    }

    fn read_u64(&mut self) -> io::Result<u64> {
        self.read_varint_u64()
    }

    fn read_u128(&mut self) -> io::Result<u128> {
        self.read_varint_u128()
    }

    fn read_i8(&mut self) -> io::Result<i8> {
        Ok(self.read_byte()? as i8)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read_i16(&mut self) -> io::Result<i16> {
        let v = zigzag_decode_64(self.read_varint_u64()?);
        i16::try_from(v).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("value {v} out of range for i16"),
            )
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read_i32(&mut self) -> io::Result<i32> {
        let v = zigzag_decode_64(self.read_varint_u64()?);
        i32::try_from(v).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("value {v} out of range for i32"),
            )
        })
    }

    fn read_i64(&mut self) -> io::Result<i64> {
        Ok(zigzag_decode_64(self.read_varint_u64()?))
    }

    fn read_i128(&mut self) -> io::Result<i128> {
        Ok(zigzag_decode_128(self.read_varint_u128()?))
    }

    fn read_raw_bytes(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.reader.read_exact(buf)
    }

    fn read_f32(&mut self) -> io::Result<f32> {
        let mut buf = [0u8; 4];
        self.reader.read_exact(&mut buf)?;
        Ok(f32::from_bits(u32::from_le_bytes(buf)))
    }

    fn read_f64(&mut self) -> io::Result<f64> {
        let mut buf = [0u8; 8];
        self.reader.read_exact(&mut buf)?;
        Ok(f64::from_bits(u64::from_le_bytes(buf)))
    }
}
