//! # Stable Hash Library
//!
//! Hashing that produces the same value across program runs and platforms.
//! Standard library hashes are randomly seeded per process; a build engine
//! that persists fingerprints on disk needs hashes that stay meaningful after
//! a restart, so every persisted key in ravel goes through this crate.
//!
//! The main components:
//!
//! - [`StableHash`] trait: how a type feeds itself into a stable hasher
//! - [`StableHasher`] trait: the interface of a stable hash function
//! - [`Sip128Hasher`]: the SipHash 128-bit implementation used everywhere
//! - [`Value`] trait: hash outputs that can be combined commutatively
//!
//! ## Example
//!
//! ```rust
//! use ravel_stable_hash::{StableHash, StableHasher, Sip128Hasher};
//!
//! let mut hasher = Sip128Hasher::new();
//! "hello world".stable_hash(&mut hasher);
//! let hash = StableHasher::finish(&hasher);
//! ```

use std::hash::Hash;

pub use siphasher::sip128::SipHasher as Sip128Hasher;

extern crate self as ravel_stable_hash;
pub use ravel_stable_hash_derive::StableHash;
use siphasher::sip128::Hasher128;

/// A hash output value that can be combined with another.
///
/// Order-insensitive collections (`HashMap`, `HashSet`) hash each element in
/// a sub-hasher and fold the results with [`wrapping_add`], so iteration
/// order does not affect the final hash.
///
/// [`wrapping_add`]: Value::wrapping_add
pub trait Value: Default + StableHash + Send + Sync + 'static {
    /// Wrapping addition, used to combine element hashes.
    #[must_use]
    fn wrapping_add(self, other: Self) -> Self;
}

/// A stable hash function.
///
/// Mirrors [`std::hash::Hasher`] but with a pluggable output type and
/// little-endian, platform-independent encodings for every primitive write.
pub trait StableHasher: Send + Sync + 'static {
    /// The type of hash value produced by this hasher.
    type Hash: Value;

    /// Returns the hash of everything written so far.
    fn finish(&self) -> Self::Hash;

    /// Writes a slice of bytes. All other `write_*` methods funnel here.
    fn write(&mut self, bytes: &[u8]);

    fn write_u8(&mut self, i: u8) {
        self.write(&[i]);
    }

    fn write_i8(&mut self, i: i8) {
        self.write(&i.to_le_bytes());
    }

    fn write_u16(&mut self, i: u16) {
        self.write(&i.to_le_bytes());
    }

    fn write_i16(&mut self, i: i16) {
        self.write(&i.to_le_bytes());
    }

    fn write_u32(&mut self, i: u32) {
        self.write(&i.to_le_bytes());
    }

    fn write_i32(&mut self, i: i32) {
        self.write(&i.to_le_bytes());
    }

    fn write_u64(&mut self, i: u64) {
        self.write(&i.to_le_bytes());
    }

    fn write_i64(&mut self, i: i64) {
        self.write(&i.to_le_bytes());
    }

    fn write_u128(&mut self, i: u128) {
        self.write(&i.to_le_bytes());
    }

    fn write_i128(&mut self, i: i128) {
        self.write(&i.to_le_bytes());
    }

    /// Platform-sized integers are widened to 64 bits so 32- and 64-bit
    /// hosts agree.
    fn write_usize(&mut self, i: usize) {
        self.write_u64(i as u64);
    }

    fn write_isize(&mut self, i: isize) {
        self.write_i64(i as i64);
    }

    /// Writes a length prefix for variable-length data.
    ///
    /// Emitted before collections and strings so that adjacent fields cannot
    /// be confused with each other.
    fn write_length_prefix(&mut self, len: usize) {
        self.write_usize(len);
    }

    /// Writes a string as a length prefix followed by its UTF-8 bytes.
    fn write_str(&mut self, s: &str) {
        self.write_length_prefix(s.len());
        self.write(s.as_bytes());
    }

    /// Computes a hash for a nested structure with a fresh sub-hasher.
    ///
    /// Used by order-insensitive collections: each element is hashed in a
    /// sub-hasher and the results are folded with [`Value::wrapping_add`].
    fn sub_hash(
        &self,
        f: &mut dyn FnMut(&mut dyn StableHasher<Hash = Self::Hash>),
    ) -> Self::Hash;
}

/// A type that can be hashed stably.
///
/// Implementations must hash all fields contributing to the type's identity
/// in a fixed order; the result must not depend on process, platform, or
/// allocation addresses. Derivable via `#[derive(StableHash)]`: structs hash
/// fields in declaration order, enums hash the variant index followed by the
/// variant's fields.
pub trait StableHash {
    /// Feeds this value into the provided hasher.
    fn stable_hash<H: StableHasher + ?Sized>(&self, state: &mut H);
}

static_assertions::assert_obj_safe!(StableHasher<Hash = u128>);
static_assertions::assert_obj_safe!(StableHasher<Hash = u64>);

/// Convenience entry point: the seeded 128-bit hash of a value.
///
/// This is the fingerprinting primitive the engine uses for node identifiers
/// and rule digest components.
#[must_use]
pub fn hash_128<T: StableHash + ?Sized>(value: &T, seed: u64) -> u128 {
    let mut hasher = Sip128Hasher::new();
    hasher.write_u64(seed);
    value.stable_hash(&mut hasher);
    StableHasher::finish(&hasher)
}

impl Value for u8 {
    fn wrapping_add(self, other: Self) -> Self {
        self.wrapping_add(other)
    }
}

impl Value for u16 {
    fn wrapping_add(self, other: Self) -> Self {
        self.wrapping_add(other)
    }
}

impl Value for u32 {
    fn wrapping_add(self, other: Self) -> Self {
        self.wrapping_add(other)
    }
}

impl Value for u64 {
    fn wrapping_add(self, other: Self) -> Self {
        self.wrapping_add(other)
    }
}

impl Value for u128 {
    fn wrapping_add(self, other: Self) -> Self {
        self.wrapping_add(other)
    }
}

impl Value for usize {
    fn wrapping_add(self, other: Self) -> Self {
        self.wrapping_add(other)
    }
}

macro_rules! impl_stable_hash_primitive {
    ($($ty:ty => $method:ident),* $(,)?) => {
        $(
            impl StableHash for $ty {
                fn stable_hash<H: StableHasher + ?Sized>(
                    &self,
                    state: &mut H,
                ) {
                    state.$method(*self);
                }
            }
        )*
    };
}

impl_stable_hash_primitive! {
    u8 => write_u8,
    i8 => write_i8,
    u16 => write_u16,
    i16 => write_i16,
    u32 => write_u32,
    i32 => write_i32,
    u64 => write_u64,
    i64 => write_i64,
    u128 => write_u128,
    i128 => write_i128,
    usize => write_usize,
    isize => write_isize,
}

impl StableHash for bool {
    fn stable_hash<H: StableHasher + ?Sized>(&self, state: &mut H) {
        state.write_u8(u8::from(*self));
    }
}

impl StableHash for char {
    fn stable_hash<H: StableHasher + ?Sized>(&self, state: &mut H) {
        state.write_u32(*self as u32);
    }
}

impl StableHash for str {
    fn stable_hash<H: StableHasher + ?Sized>(&self, state: &mut H) {
        state.write_str(self);
    }
}

impl StableHash for String {
    fn stable_hash<H: StableHasher + ?Sized>(&self, state: &mut H) {
        self.as_str().stable_hash(state);
    }
}

impl<T: StableHash> StableHash for [T] {
    fn stable_hash<H: StableHasher + ?Sized>(&self, state: &mut H) {
        state.write_length_prefix(self.len());
        for item in self {
            item.stable_hash(state);
        }
    }
}

impl<T: StableHash, const N: usize> StableHash for [T; N] {
    fn stable_hash<H: StableHasher + ?Sized>(&self, state: &mut H) {
        self.as_slice().stable_hash(state);
    }
}

impl<T: StableHash> StableHash for Vec<T> {
    fn stable_hash<H: StableHasher + ?Sized>(&self, state: &mut H) {
        self.as_slice().stable_hash(state);
    }
}

impl<T: StableHash + ?Sized> StableHash for &T {
    fn stable_hash<H: StableHasher + ?Sized>(&self, state: &mut H) {
        (**self).stable_hash(state);
    }
}

impl<T: StableHash + ?Sized> StableHash for &mut T {
    fn stable_hash<H: StableHasher + ?Sized>(&self, state: &mut H) {
        (**self).stable_hash(state);
    }
}

impl<T: StableHash + ?Sized> StableHash for Box<T> {
    fn stable_hash<H: StableHasher + ?Sized>(&self, state: &mut H) {
        (**self).stable_hash(state);
    }
}

impl<T: StableHash + ?Sized> StableHash for std::rc::Rc<T> {
    fn stable_hash<H: StableHasher + ?Sized>(&self, state: &mut H) {
        (**self).stable_hash(state);
    }
}

impl<T: StableHash + ?Sized> StableHash for std::sync::Arc<T> {
    fn stable_hash<H: StableHasher + ?Sized>(&self, state: &mut H) {
        (**self).stable_hash(state);
    }
}

impl<T: StableHash> StableHash for Option<T> {
    fn stable_hash<H: StableHasher + ?Sized>(&self, state: &mut H) {
        match self {
            None => state.write_u8(0),
            Some(value) => {
                state.write_u8(1);
                value.stable_hash(state);
            }
        }
    }
}

impl<T: StableHash, E: StableHash> StableHash for Result<T, E> {
    fn stable_hash<H: StableHasher + ?Sized>(&self, state: &mut H) {
        match self {
            Ok(value) => {
                state.write_u8(0);
                value.stable_hash(state);
            }
            Err(error) => {
                state.write_u8(1);
                error.stable_hash(state);
            }
        }
    }
}

impl<K: StableHash, V: StableHash> StableHash
    for std::collections::BTreeMap<K, V>
{
    fn stable_hash<H: StableHasher + ?Sized>(&self, state: &mut H) {
        state.write_length_prefix(self.len());
        for (key, value) in self {
            key.stable_hash(state);
            value.stable_hash(state);
        }
    }
}

impl<T: StableHash> StableHash for std::collections::BTreeSet<T> {
    fn stable_hash<H: StableHasher + ?Sized>(&self, state: &mut H) {
        state.write_length_prefix(self.len());
        for value in self {
            value.stable_hash(state);
        }
    }
}

impl<K: StableHash, V: StableHash, B> StableHash
    for std::collections::HashMap<K, V, B>
{
    fn stable_hash<H: StableHasher + ?Sized>(&self, state: &mut H) {
        self.len().stable_hash(state);
        let mut combined = H::Hash::default();

        for (key, value) in self {
            combined = combined.wrapping_add(state.sub_hash(&mut |sub| {
                key.stable_hash(sub);
                value.stable_hash(sub);
            }));
        }

        combined.stable_hash(state);
    }
}

impl<T: StableHash, B> StableHash for std::collections::HashSet<T, B> {
    fn stable_hash<H: StableHasher + ?Sized>(&self, state: &mut H) {
        self.len().stable_hash(state);
        let mut combined = H::Hash::default();

        for value in self {
            combined = combined.wrapping_add(state.sub_hash(&mut |sub| {
                value.stable_hash(sub);
            }));
        }

        combined.stable_hash(state);
    }
}

macro_rules! impl_stable_hash_tuple {
    () => {
        impl StableHash for () {
            fn stable_hash<H: StableHasher + ?Sized>(&self, _state: &mut H) {}
        }
    };
    ($($name:ident)+) => {
        impl<$($name: StableHash),+> StableHash for ($($name,)+) {
            #[allow(non_snake_case)]
            fn stable_hash<H: StableHasher + ?Sized>(&self, state: &mut H) {
                let ($($name,)+) = self;
                $($name.stable_hash(state);)+
            }
        }
    };
}

impl_stable_hash_tuple!();
impl_stable_hash_tuple!(T);
impl_stable_hash_tuple!(T U);
impl_stable_hash_tuple!(T U V);
impl_stable_hash_tuple!(T U V W);
impl_stable_hash_tuple!(T U V W X);
impl_stable_hash_tuple!(T U V W X Y);

impl StableHash for std::time::Duration {
    fn stable_hash<H: StableHasher + ?Sized>(&self, state: &mut H) {
        self.as_secs().stable_hash(state);
        self.subsec_nanos().stable_hash(state);
    }
}

impl StableHash for std::path::Path {
    fn stable_hash<H: StableHasher + ?Sized>(&self, state: &mut H) {
        self.as_os_str().stable_hash(state);
    }
}

impl StableHash for std::path::PathBuf {
    fn stable_hash<H: StableHasher + ?Sized>(&self, state: &mut H) {
        self.as_path().stable_hash(state);
    }
}

impl StableHash for std::ffi::OsStr {
    fn stable_hash<H: StableHasher + ?Sized>(&self, state: &mut H) {
        let bytes = self.as_encoded_bytes();
        state.write_length_prefix(bytes.len());
        state.write(bytes);
    }
}

impl StableHash for std::ffi::OsString {
    fn stable_hash<H: StableHasher + ?Sized>(&self, state: &mut H) {
        self.as_os_str().stable_hash(state);
    }
}

impl<T> StableHash for std::marker::PhantomData<T> {
    fn stable_hash<H: StableHasher + ?Sized>(&self, _state: &mut H) {}
}

impl<T: StableHash + Eq + Hash> StableHash for std::borrow::Cow<'_, T>
where
    T: Clone,
{
    fn stable_hash<H: StableHasher + ?Sized>(&self, state: &mut H) {
        (**self).stable_hash(state);
    }
}

impl StableHasher for siphasher::sip128::SipHasher {
    type Hash = u128;

    fn finish(&self) -> Self::Hash {
        self.finish128().into()
    }

    fn write(&mut self, bytes: &[u8]) {
        std::hash::Hasher::write(self, bytes);
    }

    fn sub_hash(
        &self,
        f: &mut dyn FnMut(&mut dyn StableHasher<Hash = Self::Hash>),
    ) -> Self::Hash {
        let mut sub_hasher = *self;
        f(&mut sub_hasher);
        sub_hasher.finish128().into()
    }
}

#[cfg(test)]
mod test;
