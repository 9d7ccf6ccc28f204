//! Encoding traits and implementations for serialization.
//!
//! [`Encoder`] is the low-level sink of primitive values; [`Encode`] is the
//! high-level trait for serializable types.

use std::{
    borrow::Cow,
    collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque},
    io,
    rc::Rc,
    sync::Arc,
    time::Duration,
};

/// A sink of primitive values in some binary format.
///
/// The required methods are the integer emitters plus [`emit_raw_bytes`];
/// everything else has a default in terms of those and may be overridden for
/// format-specific reasons.
///
/// [`emit_raw_bytes`]: Encoder::emit_raw_bytes
pub trait Encoder {
    /// Emits a single unsigned byte.
    fn emit_u8(&mut self, v: u8) -> io::Result<()>;

    /// Emits a 16-bit unsigned integer.
    fn emit_u16(&mut self, v: u16) -> io::Result<()>;

    /// Emits a 32-bit unsigned integer.
    fn emit_u32(&mut self, v: u32) -> io::Result<()>;

    /// Emits a 64-bit unsigned integer.
    fn emit_u64(&mut self, v: u64) -> io::Result<()>;

    /// Emits a 128-bit unsigned integer.
    fn emit_u128(&mut self, v: u128) -> io::Result<()>;

    /// Emits a platform-sized unsigned integer, widened to 64 bits for
    /// portability.
    fn emit_usize(&mut self, v: usize) -> io::Result<()> {
        self.emit_u64(v as u64)
    }

    /// Emits a single signed byte.
    fn emit_i8(&mut self, v: i8) -> io::Result<()>;

    /// Emits a 16-bit signed integer.
    fn emit_i16(&mut self, v: i16) -> io::Result<()>;

    /// Emits a 32-bit signed integer.
    fn emit_i32(&mut self, v: i32) -> io::Result<()>;

    /// Emits a 64-bit signed integer.
    fn emit_i64(&mut self, v: i64) -> io::Result<()>;

    /// Emits a 128-bit signed integer.
    fn emit_i128(&mut self, v: i128) -> io::Result<()>;

    /// Emits a platform-sized signed integer, widened to 64 bits for
    /// portability.
    fn emit_isize(&mut self, v: isize) -> io::Result<()> {
        self.emit_i64(v as i64)
    }

    /// Emits raw bytes directly to the output, without a length prefix.
    fn emit_raw_bytes(&mut self, s: &[u8]) -> io::Result<()>;

    /// Emits a boolean as a single byte.
    fn emit_bool(&mut self, v: bool) -> io::Result<()> {
        self.emit_u8(u8::from(v))
    }

    /// Emits a character as its Unicode scalar value.
    fn emit_char(&mut self, v: char) -> io::Result<()> {
        self.emit_u32(v as u32)
    }

    /// Emits a 32-bit float via its IEEE 754 bit pattern.
    fn emit_f32(&mut self, v: f32) -> io::Result<()> {
        self.emit_u32(v.to_bits())
    }

    /// Emits a 64-bit float via its IEEE 754 bit pattern.
    fn emit_f64(&mut self, v: f64) -> io::Result<()> {
        self.emit_u64(v.to_bits())
    }

    /// Emits a string as a length prefix followed by UTF-8 bytes.
    fn emit_str(&mut self, v: &str) -> io::Result<()> {
        self.emit_usize(v.len())?;
        self.emit_raw_bytes(v.as_bytes())
    }

    /// Emits a byte slice as a length prefix followed by the raw bytes.
    fn emit_bytes(&mut self, v: &[u8]) -> io::Result<()> {
        self.emit_usize(v.len())?;
        self.emit_raw_bytes(v)
    }
}

/// A type that can serialize itself through an [`Encoder`].
pub trait Encode {
    /// Encodes `self` into the given encoder.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors from the underlying writer.
    fn encode<E: Encoder + ?Sized>(&self, encoder: &mut E) -> io::Result<()>;
}

macro_rules! impl_encode_primitive {
    ($($ty:ty => $method:ident),* $(,)?) => {
        $(
            impl Encode for $ty {
                fn encode<E: Encoder + ?Sized>(
                    &self,
                    encoder: &mut E,
                ) -> io::Result<()> {
                    encoder.$method(*self)
                }
            }
        )*
    };
}

impl_encode_primitive! {
    u8 => emit_u8,
    u16 => emit_u16,
    u32 => emit_u32,
    u64 => emit_u64,
    u128 => emit_u128,
    usize => emit_usize,
    i8 => emit_i8,
    i16 => emit_i16,
    i32 => emit_i32,
    i64 => emit_i64,
    i128 => emit_i128,
    isize => emit_isize,
    bool => emit_bool,
    char => emit_char,
    f32 => emit_f32,
    f64 => emit_f64,
}

impl Encode for str {
    fn encode<E: Encoder + ?Sized>(&self, encoder: &mut E) -> io::Result<()> {
        encoder.emit_str(self)
    }
}

impl Encode for String {
    fn encode<E: Encoder + ?Sized>(&self, encoder: &mut E) -> io::Result<()> {
        encoder.emit_str(self)
    }
}

impl<T: Encode + ?Sized> Encode for &T {
    fn encode<E: Encoder + ?Sized>(&self, encoder: &mut E) -> io::Result<()> {
        (**self).encode(encoder)
    }
}

impl<T: Encode + ?Sized> Encode for Box<T> {
    fn encode<E: Encoder + ?Sized>(&self, encoder: &mut E) -> io::Result<()> {
        (**self).encode(encoder)
    }
}

impl<T: Encode + ?Sized> Encode for Rc<T> {
    fn encode<E: Encoder + ?Sized>(&self, encoder: &mut E) -> io::Result<()> {
        (**self).encode(encoder)
    }
}

impl<T: Encode + ?Sized> Encode for Arc<T> {
    fn encode<E: Encoder + ?Sized>(&self, encoder: &mut E) -> io::Result<()> {
        (**self).encode(encoder)
    }
}

impl<T: Encode + ToOwned + ?Sized> Encode for Cow<'_, T> {
    fn encode<E: Encoder + ?Sized>(&self, encoder: &mut E) -> io::Result<()> {
        (**self).encode(encoder)
    }
}

impl<T: Encode> Encode for [T] {
    fn encode<E: Encoder + ?Sized>(&self, encoder: &mut E) -> io::Result<()> {
        encoder.emit_usize(self.len())?;
        for item in self {
            item.encode(encoder)?;
        }
        Ok(())
    }
}

impl<T: Encode, const N: usize> Encode for [T; N] {
    fn encode<E: Encoder + ?Sized>(&self, encoder: &mut E) -> io::Result<()> {
        // fixed length, no prefix
        for item in self {
            item.encode(encoder)?;
        }
        Ok(())
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode<E: Encoder + ?Sized>(&self, encoder: &mut E) -> io::Result<()> {
        self.as_slice().encode(encoder)
    }
}

impl<T: Encode> Encode for VecDeque<T> {
    fn encode<E: Encoder + ?Sized>(&self, encoder: &mut E) -> io::Result<()> {
        encoder.emit_usize(self.len())?;
        for item in self {
            item.encode(encoder)?;
        }
        Ok(())
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode<E: Encoder + ?Sized>(&self, encoder: &mut E) -> io::Result<()> {
        match self {
            None => encoder.emit_u8(0),
            Some(value) => {
                encoder.emit_u8(1)?;
                value.encode(encoder)
            }
        }
    }
}

impl<T: Encode, Er: Encode> Encode for Result<T, Er> {
    fn encode<E: Encoder + ?Sized>(&self, encoder: &mut E) -> io::Result<()> {
        match self {
            Ok(value) => {
                encoder.emit_u8(0)?;
                value.encode(encoder)
            }
            Err(error) => {
                encoder.emit_u8(1)?;
                error.encode(encoder)
            }
        }
    }
}

impl<K: Encode, V: Encode> Encode for BTreeMap<K, V> {
    fn encode<E: Encoder + ?Sized>(&self, encoder: &mut E) -> io::Result<()> {
        encoder.emit_usize(self.len())?;
        for (key, value) in self {
            key.encode(encoder)?;
            value.encode(encoder)?;
        }
        Ok(())
    }
}

impl<T: Encode> Encode for BTreeSet<T> {
    fn encode<E: Encoder + ?Sized>(&self, encoder: &mut E) -> io::Result<()> {
        encoder.emit_usize(self.len())?;
        for value in self {
            value.encode(encoder)?;
        }
        Ok(())
    }
}

impl<K: Encode, V: Encode, S> Encode for HashMap<K, V, S> {
    fn encode<E: Encoder + ?Sized>(&self, encoder: &mut E) -> io::Result<()> {
        encoder.emit_usize(self.len())?;
        for (key, value) in self {
            key.encode(encoder)?;
            value.encode(encoder)?;
        }
        Ok(())
    }
}

impl<T: Encode, S> Encode for HashSet<T, S> {
    fn encode<E: Encoder + ?Sized>(&self, encoder: &mut E) -> io::Result<()> {
        encoder.emit_usize(self.len())?;
        for value in self {
            value.encode(encoder)?;
        }
        Ok(())
    }
}

impl Encode for () {
    fn encode<E: Encoder + ?Sized>(&self, _encoder: &mut E) -> io::Result<()> {
        Ok(())
    }
}

macro_rules! impl_encode_tuple {
    ($($name:ident),+) => {
        impl<$($name: Encode),+> Encode for ($($name,)+) {
            #[allow(non_snake_case)]
            fn encode<En: Encoder + ?Sized>(
                &self,
                encoder: &mut En,
            ) -> io::Result<()> {
                let ($($name,)+) = self;
                $($name.encode(encoder)?;)+
                Ok(())
            }
        }
    };
}

impl_encode_tuple!(A);
impl_encode_tuple!(A, B);
impl_encode_tuple!(A, B, C);
impl_encode_tuple!(A, B, C, D);
impl_encode_tuple!(A, B, C, D, E);
impl_encode_tuple!(A, B, C, D, E, F);

impl Encode for Duration {
    fn encode<E: Encoder + ?Sized>(&self, encoder: &mut E) -> io::Result<()> {
        encoder.emit_u64(self.as_secs())?;
        encoder.emit_u32(self.subsec_nanos())
    }
}

impl Encode for std::path::Path {
    fn encode<E: Encoder + ?Sized>(&self, encoder: &mut E) -> io::Result<()> {
        // paths in persisted state must be valid UTF-8
        let s = self.to_str().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("non-UTF-8 path cannot be encoded: {}", self.display()),
            )
        })?;
        encoder.emit_str(s)
    }
}

impl Encode for std::path::PathBuf {
    fn encode<E: Encoder + ?Sized>(&self, encoder: &mut E) -> io::Result<()> {
        self.as_path().encode(encoder)
    }
}
