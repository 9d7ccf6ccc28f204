//! Decoding traits and implementations for deserialization.
//!
//! [`Decoder`] is the low-level source of primitive values; [`Decode`] is the
//! high-level trait for deserializable types.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque},
    hash::{BuildHasher, Hash},
    io,
    rc::Rc,
    sync::Arc,
    time::Duration,
};

/// A source of primitive values in some binary format.
///
/// The counterpart of [`Encoder`](crate::Encoder); every `emit_*` method has
/// a matching `read_*` here.
pub trait Decoder {
    /// Reads a single unsigned byte.
    fn read_u8(&mut self) -> io::Result<u8>;

    /// Reads a 16-bit unsigned integer.
    fn read_u16(&mut self) -> io::Result<u16>;

    /// Reads a 32-bit unsigned integer.
    fn read_u32(&mut self) -> io::Result<u32>;

    /// Reads a 64-bit unsigned integer.
    fn read_u64(&mut self) -> io::Result<u64>;

    /// Reads a 128-bit unsigned integer.
    fn read_u128(&mut self) -> io::Result<u128>;

    /// Reads a platform-sized unsigned integer (encoded as 64 bits).
    fn read_usize(&mut self) -> io::Result<usize> {
        let v = self.read_u64()?;
        usize::try_from(v).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("length {v} does not fit in usize on this platform"),
            )
        })
    }

    /// Reads a single signed byte.
    fn read_i8(&mut self) -> io::Result<i8>;

    /// Reads a 16-bit signed integer.
    fn read_i16(&mut self) -> io::Result<i16>;

    /// Reads a 32-bit signed integer.
    fn read_i32(&mut self) -> io::Result<i32>;

    /// Reads a 64-bit signed integer.
    fn read_i64(&mut self) -> io::Result<i64>;

    /// Reads a 128-bit signed integer.
    fn read_i128(&mut self) -> io::Result<i128>;

    /// Reads a platform-sized signed integer (encoded as 64 bits).
    fn read_isize(&mut self) -> io::Result<isize> {
        let v = self.read_i64()?;
        isize::try_from(v).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("value {v} does not fit in isize on this platform"),
            )
        })
    }

    /// Reads exactly `buf.len()` raw bytes.
    fn read_raw_bytes(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Reads a boolean encoded as a single byte.
    fn read_bool(&mut self) -> io::Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid boolean byte: {other}"),
            )),
        }
    }

    /// Reads a character from its Unicode scalar value.
    fn read_char(&mut self) -> io::Result<char> {
        let v = self.read_u32()?;
        char::from_u32(v).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid unicode scalar value: {v}"),
            )
        })
    }

    /// Reads a 32-bit float from its IEEE 754 bit pattern.
    fn read_f32(&mut self) -> io::Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    /// Reads a 64-bit float from its IEEE 754 bit pattern.
    fn read_f64(&mut self) -> io::Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Reads a length-prefixed UTF-8 string.
    fn read_string(&mut self) -> io::Result<String> {
        let bytes = self.read_byte_vec()?;
        String::from_utf8(bytes).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, e.to_string())
        })
    }

    /// Reads a length-prefixed byte vector.
    fn read_byte_vec(&mut self) -> io::Result<Vec<u8>> {
        let len = self.read_usize()?;
        let mut buf = vec![0u8; len];
        self.read_raw_bytes(&mut buf)?;
        Ok(buf)
    }
}

/// A type that can deserialize itself through a [`Decoder`].
pub trait Decode: Sized {
    /// Decodes a value from the given decoder.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed or truncated input.
    fn decode<D: Decoder + ?Sized>(decoder: &mut D) -> io::Result<Self>;
}

macro_rules! impl_decode_primitive {
    ($($ty:ty => $method:ident),* $(,)?) => {
        $(
            impl Decode for $ty {
                fn decode<D: Decoder + ?Sized>(
                    decoder: &mut D,
                ) -> io::Result<Self> {
                    decoder.$method()
                }
            }
        )*
    };
}

impl_decode_primitive! {
    u8 => read_u8,
    u16 => read_u16,
    u32 => read_u32,
    u64 => read_u64,
    u128 => read_u128,
    usize => read_usize,
    i8 => read_i8,
    i16 => read_i16,
    i32 => read_i32,
    i64 => read_i64,
    i128 => read_i128,
    isize => read_isize,
    bool => read_bool,
    char => read_char,
    f32 => read_f32,
    f64 => read_f64,
    String => read_string,
}

impl<T: Decode> Decode for Box<T> {
    fn decode<D: Decoder + ?Sized>(decoder: &mut D) -> io::Result<Self> {
        Ok(Box::new(T::decode(decoder)?))
    }
}

impl<T: Decode> Decode for Rc<T> {
    fn decode<D: Decoder + ?Sized>(decoder: &mut D) -> io::Result<Self> {
        Ok(Rc::new(T::decode(decoder)?))
    }
}

impl<T: Decode> Decode for Arc<T> {
    fn decode<D: Decoder + ?Sized>(decoder: &mut D) -> io::Result<Self> {
        Ok(Arc::new(T::decode(decoder)?))
    }
}

impl Decode for Box<str> {
    fn decode<D: Decoder + ?Sized>(decoder: &mut D) -> io::Result<Self> {
        Ok(decoder.read_string()?.into_boxed_str())
    }
}

impl Decode for Arc<str> {
    fn decode<D: Decoder + ?Sized>(decoder: &mut D) -> io::Result<Self> {
        Ok(Arc::from(decoder.read_string()?))
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode<D: Decoder + ?Sized>(decoder: &mut D) -> io::Result<Self> {
        let len = decoder.read_usize()?;
        let mut out = Vec::with_capacity(len.min(4096));
        for _ in 0..len {
            out.push(T::decode(decoder)?);
        }
        Ok(out)
    }
}

impl<T: Decode> Decode for Box<[T]> {
    fn decode<D: Decoder + ?Sized>(decoder: &mut D) -> io::Result<Self> {
        Ok(Vec::<T>::decode(decoder)?.into_boxed_slice())
    }
}

impl<T: Decode> Decode for Arc<[T]> {
    fn decode<D: Decoder + ?Sized>(decoder: &mut D) -> io::Result<Self> {
        Ok(Arc::from(Vec::<T>::decode(decoder)?))
    }
}

impl<T: Decode> Decode for VecDeque<T> {
    fn decode<D: Decoder + ?Sized>(decoder: &mut D) -> io::Result<Self> {
        Ok(Vec::<T>::decode(decoder)?.into())
    }
}

impl<T: Decode, const N: usize> Decode for [T; N] {
    fn decode<D: Decoder + ?Sized>(decoder: &mut D) -> io::Result<Self> {
        // fixed length, no prefix
        let mut out = Vec::with_capacity(N);
        for _ in 0..N {
            out.push(T::decode(decoder)?);
        }
        out.try_into().map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidData, "array length mismatch")
        })
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode<D: Decoder + ?Sized>(decoder: &mut D) -> io::Result<Self> {
        match decoder.read_u8()? {
            0 => Ok(None),
            1 => Ok(Some(T::decode(decoder)?)),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid Option tag: {other}"),
            )),
        }
    }
}

impl<T: Decode, E: Decode> Decode for Result<T, E> {
    fn decode<D: Decoder + ?Sized>(decoder: &mut D) -> io::Result<Self> {
        match decoder.read_u8()? {
            0 => Ok(Ok(T::decode(decoder)?)),
            1 => Ok(Err(E::decode(decoder)?)),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid Result tag: {other}"),
            )),
        }
    }
}

impl<K: Decode + Ord, V: Decode> Decode for BTreeMap<K, V> {
    fn decode<D: Decoder + ?Sized>(decoder: &mut D) -> io::Result<Self> {
        let len = decoder.read_usize()?;
        let mut out = Self::new();
        for _ in 0..len {
            let key = K::decode(decoder)?;
            let value = V::decode(decoder)?;
            out.insert(key, value);
        }
        Ok(out)
    }
}

impl<T: Decode + Ord> Decode for BTreeSet<T> {
    fn decode<D: Decoder + ?Sized>(decoder: &mut D) -> io::Result<Self> {
        let len = decoder.read_usize()?;
        let mut out = Self::new();
        for _ in 0..len {
            out.insert(T::decode(decoder)?);
        }
        Ok(out)
    }
}

impl<K, V, S> Decode for HashMap<K, V, S>
where
    K: Decode + Eq + Hash,
    V: Decode,
    S: BuildHasher + Default,
{
    fn decode<D: Decoder + ?Sized>(decoder: &mut D) -> io::Result<Self> {
        let len = decoder.read_usize()?;
        let mut out = Self::with_capacity_and_hasher(
            len.min(4096),
            S::default(),
        );
        for _ in 0..len {
            let key = K::decode(decoder)?;
            let value = V::decode(decoder)?;
            out.insert(key, value);
        }
        Ok(out)
    }
}

impl<T, S> Decode for HashSet<T, S>
where
    T: Decode + Eq + Hash,
    S: BuildHasher + Default,
{
    fn decode<D: Decoder + ?Sized>(decoder: &mut D) -> io::Result<Self> {
        let len = decoder.read_usize()?;
        let mut out = Self::with_capacity_and_hasher(
            len.min(4096),
            S::default(),
        );
        for _ in 0..len {
            out.insert(T::decode(decoder)?);
        }
        Ok(out)
    }
}

impl Decode for () {
    fn decode<D: Decoder + ?Sized>(_decoder: &mut D) -> io::Result<Self> {
        Ok(())
    }
}

macro_rules! impl_decode_tuple {
    ($($name:ident),+) => {
        impl<$($name: Decode),+> Decode for ($($name,)+) {
            fn decode<De: Decoder + ?Sized>(
                decoder: &mut De,
            ) -> io::Result<Self> {
                Ok(($($name::decode(decoder)?,)+))
            }
        }
    };
}

impl_decode_tuple!(A);
impl_decode_tuple!(A, B);
impl_decode_tuple!(A, B, C);
impl_decode_tuple!(A, B, C, D);
impl_decode_tuple!(A, B, C, D, E);
impl_decode_tuple!(A, B, C, D, E, F);

impl Decode for Duration {
    fn decode<D: Decoder + ?Sized>(decoder: &mut D) -> io::Result<Self> {
        let secs = decoder.read_u64()?;
        let nanos = decoder.read_u32()?;
        Ok(Self::new(secs, nanos))
    }
}

impl Decode for std::path::PathBuf {
    fn decode<D: Decoder + ?Sized>(decoder: &mut D) -> io::Result<Self> {
        Ok(Self::from(decoder.read_string()?))
    }
}
