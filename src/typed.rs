// Convenience layer matching the shape of the historical `KvFile<K, V>` API:
// the caller's own key/value types are converted to and from the byte runs
// the core `Database` actually stores. The core never needs to know about
// `K` or `V` at all; this module is the only place that does.

use std::marker::PhantomData;
use std::path::Path;

use crate::database::{Database, DatabaseOptions};
use crate::error::Result;
use crate::DEFAULT_KEY_BYTES;

/// Converts a caller's logical key into the engine's fixed-width byte buffer,
/// zero-padding when the key's own representation is shorter than `N`.
pub trait ToKeyBytes<const N: usize> {
	fn to_key_bytes(&self) -> [u8; N];
}

macro_rules! impl_to_key_bytes_int {
	($($t:ty),*) => {
		$(
			impl<const N: usize> ToKeyBytes<N> for $t {
				fn to_key_bytes(&self) -> [u8; N] {
					let bytes = self.to_ne_bytes();
					let mut buf = [0u8; N];
					let n = bytes.len().min(N);
					buf[..n].copy_from_slice(&bytes[..n]);
					buf
				}
			}
		)*
	};
}
impl_to_key_bytes_int!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);

impl<const N: usize> ToKeyBytes<N> for [u8; N] {
	fn to_key_bytes(&self) -> [u8; N] {
		*self
	}
}

/// The voxel-chunk caller's original key shape: three packed 32-bit
/// coordinates. Truncated/zero-padded against `N` the same way any other key
/// is, so it still works for a narrower or wider compile-time key width.
impl<const N: usize> ToKeyBytes<N> for [i32; 3] {
	fn to_key_bytes(&self) -> [u8; N] {
		let mut buf = [0u8; N];
		let mut offset = 0usize;
		for component in self {
			let bytes = component.to_ne_bytes();
			if offset >= N {
				break;
			}
			let end = (offset + bytes.len()).min(N);
			buf[offset..end].copy_from_slice(&bytes[..end - offset]);
			offset += bytes.len();
		}
		buf
	}
}

/// Marker for types whose in-memory representation may be copied byte-for-byte
/// to and from the store, mirroring the original engine's reliance on memcpy
/// against the caller's opaque value type. Safety: implementors must have no
/// padding bytes that carry meaning, and every bit pattern of the right size
/// must be a valid value of the type.
pub unsafe trait Pod: Copy + 'static {}

macro_rules! impl_pod {
	($($t:ty),*) => {
		$(unsafe impl Pod for $t {})*
	};
}
impl_pod!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64);

unsafe impl<T: Pod, const K: usize> Pod for [T; K] {}

/// Converts a value to and from the raw byte run the engine stores.
pub trait ValueCodec: Sized {
	fn to_value_bytes(&self) -> Vec<u8>;
	fn from_value_bytes(bytes: Vec<u8>) -> Self;
}

impl ValueCodec for Vec<u8> {
	fn to_value_bytes(&self) -> Vec<u8> {
		self.clone()
	}
	fn from_value_bytes(bytes: Vec<u8>) -> Self {
		bytes
	}
}

impl<T: Pod> ValueCodec for T {
	fn to_value_bytes(&self) -> Vec<u8> {
		let ptr = self as *const T as *const u8;
		unsafe { std::slice::from_raw_parts(ptr, std::mem::size_of::<T>()).to_vec() }
	}
	fn from_value_bytes(bytes: Vec<u8>) -> Self {
		assert_eq!(bytes.len(), std::mem::size_of::<T>(), "value size does not match the destination type");
		unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const T) }
	}
}

/// Typed wrapper over [`Database`] for callers that would rather work in
/// terms of their own `K`/`V` types than raw byte slices.
pub struct TypedDatabase<K, V, const N: usize = DEFAULT_KEY_BYTES> {
	db: Database<N>,
	_marker: PhantomData<(K, V)>,
}

impl<K, V, const N: usize> TypedDatabase<K, V, N>
where
	K: ToKeyBytes<N>,
	V: ValueCodec,
{
	pub fn create(path: impl AsRef<Path>, initial_pairs: &[(K, V, u16)], options: &DatabaseOptions) -> Result<()> {
		let owned: Vec<([u8; N], Vec<u8>, u16)> =
			initial_pairs.iter().map(|(k, v, f)| (k.to_key_bytes(), v.to_value_bytes(), *f)).collect();
		let borrowed: Vec<([u8; N], &[u8], u16)> = owned.iter().map(|(k, v, f)| (*k, v.as_slice(), *f)).collect();
		Database::<N>::create(path, &borrowed, options)
	}

	pub fn open(path: impl AsRef<Path>) -> Result<Self> {
		Ok(TypedDatabase { db: Database::open(path)?, _marker: PhantomData })
	}

	pub fn open_with_options(path: impl AsRef<Path>, options: &DatabaseOptions) -> Result<Self> {
		Ok(TypedDatabase { db: Database::open_with_options(path, options)?, _marker: PhantomData })
	}

	pub fn close(&self) {
		self.db.close()
	}

	pub fn is_open(&self) -> bool {
		self.db.is_open()
	}

	pub fn size(&self) -> Result<usize> {
		self.db.size()
	}

	pub fn reserved(&self) -> Result<usize> {
		self.db.reserved()
	}

	pub fn deleted(&self) -> Result<usize> {
		self.db.deleted()
	}

	pub fn save(&self, key: &K, value: &V, flags: u16) -> Result<()> {
		self.db.save(&key.to_key_bytes(), &value.to_value_bytes(), flags)
	}

	pub fn load(&self, key: &K) -> Result<Option<V>> {
		Ok(self.db.load(&key.to_key_bytes())?.map(V::from_value_bytes))
	}

	pub fn erase(&self, key: &K) -> Result<()> {
		self.db.erase(&key.to_key_bytes())
	}

	pub fn k_flags(&self, key: &K) -> Result<u16> {
		self.db.k_flags(&key.to_key_bytes())
	}

	pub fn is_exist(&self, key: &K) -> Result<bool> {
		self.db.is_exist(&key.to_key_bytes())
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::test_util::TempDir;

	#[derive(Clone, Copy, Debug, PartialEq)]
	struct Voxel {
		density: f32,
		material: u32,
	}
	unsafe impl Pod for Voxel {}

	#[test]
	fn voxel_coordinate_keys_round_trip() {
		let dir = TempDir::new("typed-voxel-keys");
		let path = dir.file("db");
		TypedDatabase::<[i32; 3], Vec<u8>, 12>::create(&path, &[], &DatabaseOptions::default()).unwrap();
		let db = TypedDatabase::<[i32; 3], Vec<u8>, 12>::open(&path).unwrap();
		db.save(&[0, 1, 2], &b"chunk-a".to_vec(), 0).unwrap();
		db.save(&[0, -1, -1], &b"chunk-b".to_vec(), 100).unwrap();
		assert_eq!(db.load(&[0, 1, 2]).unwrap(), Some(b"chunk-a".to_vec()));
		assert_eq!(db.load(&[0, -1, -1]).unwrap(), Some(b"chunk-b".to_vec()));
		assert_eq!(db.k_flags(&[0, -1, -1]).unwrap(), 100);
		assert_eq!(db.size().unwrap(), 2);
	}

	#[test]
	fn bulk_insert_past_initial_table_grows_exactly_once() {
		let dir = TempDir::new("typed-bulk-insert-grow");
		let path = dir.file("db");
		let options = DatabaseOptions { reserved_table_size: 1000, reserved_value_size: 0 };
		TypedDatabase::<[i32; 3], Vec<u8>, 12>::create(&path, &[], &options).unwrap();
		let db = TypedDatabase::<[i32; 3], Vec<u8>, 12>::open_with_options(&path, &options).unwrap();

		db.save(&[0, 1, 2], &b"x".to_vec(), 0).unwrap();
		db.save(&[0, -1, -1], &b"y".to_vec(), 0).unwrap();

		// Offset well clear of the two keys above so every bulk key is fresh.
		for x in 1000..1999i32 {
			db.save(&[x, 0, 0], &b"v".to_vec(), 0).unwrap();
		}
		assert_eq!(db.size().unwrap(), 1001);
		assert_eq!(db.reserved().unwrap(), 999);
	}

	#[test]
	fn pod_value_byte_copy_round_trip() {
		let dir = TempDir::new("typed-pod-value");
		let path = dir.file("db");
		TypedDatabase::<u64, Voxel, 8>::create(&path, &[], &DatabaseOptions::default()).unwrap();
		let db = TypedDatabase::<u64, Voxel, 8>::open(&path).unwrap();
		let voxel = Voxel { density: 0.75, material: 3 };
		db.save(&42u64, &voxel, 0).unwrap();
		assert_eq!(db.load(&42u64).unwrap(), Some(voxel));
	}

	#[test]
	fn erase_and_reuse_through_typed_layer() {
		let dir = TempDir::new("typed-erase-reuse");
		let path = dir.file("db");
		TypedDatabase::<u64, Vec<u8>, 8>::create(&path, &[], &DatabaseOptions::default()).unwrap();
		let db = TypedDatabase::<u64, Vec<u8>, 8>::open(&path).unwrap();
		db.save(&1u64, &vec![0u8; 200], 0).unwrap();
		db.erase(&1u64).unwrap();
		assert_eq!(db.deleted().unwrap(), 1);
		db.save(&2u64, &vec![1u8; 50], 0).unwrap();
		assert_eq!(db.deleted().unwrap(), 0);
		assert!(!db.is_exist(&1u64).unwrap());
		assert!(db.is_exist(&2u64).unwrap());
	}

	#[test]
	fn reopen_round_trip_preserves_every_key() {
		let dir = TempDir::new("typed-reopen-round-trip");
		let path = dir.file("db");
		TypedDatabase::<u32, Vec<u8>, 4>::create(&path, &[], &DatabaseOptions::default()).unwrap();
		{
			let db = TypedDatabase::<u32, Vec<u8>, 4>::open(&path).unwrap();
			for i in 0..50u32 {
				db.save(&i, &format!("value-{}", i).into_bytes(), i as u16).unwrap();
			}
			db.close();
		}
		let db = TypedDatabase::<u32, Vec<u8>, 4>::open(&path).unwrap();
		assert_eq!(db.size().unwrap(), 50);
		for i in 0..50u32 {
			assert_eq!(db.load(&i).unwrap(), Some(format!("value-{}", i).into_bytes()));
			assert_eq!(db.k_flags(&i).unwrap(), i as u16);
		}
	}
}
