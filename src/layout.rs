// On-disk layout for the single-file key-value store.
//
// File header (offset 0, FILE_HEADER_SIZE bytes):
// [VERSION: 4][KEY_SIZE: 4][TIMESTAMP: 8][END_OF_HEADER: 4]
//
// Table header (TABLE_HEADER_SIZE bytes), one per table, tables linked by `next_table`:
// [RECORD_COUNT: 8][NEXT_TABLE: 8]
//
// Key entry (KeyEntry::<N>::SIZE bytes), `record_count` of these immediately follow a
// table header:
// [DATA_POS: 8][DATA_LENGTH: 8][INITIAL_DATA_LENGTH: 8][KEY: N][FLAGS: 2]
//
// All multi-byte fields are host-native-endian; see Non-goals in the crate docs.

use std::fs::File;
use std::io::Read;

use crate::error::Result;

/// Current on-disk format version.
pub const VERSION: u32 = 2;

/// `data_pos` value used by a live slot holding a zero-length value: it has no
/// payload region on disk, but must be distinguishable from "never written".
pub const EMPTY_VALUE_SENTINEL: u64 = 1;

pub const FILE_HEADER_SIZE: usize = 4 + 4 + 8 + 4;
pub const TABLE_HEADER_SIZE: usize = 8 + 8;

#[cfg(unix)]
pub fn read_at(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
	use std::os::unix::fs::FileExt;
	file.read_exact_at(buf, offset)?;
	Ok(())
}

#[cfg(unix)]
pub fn write_at(file: &File, buf: &[u8], offset: u64) -> Result<()> {
	use std::os::unix::fs::FileExt;
	file.write_all_at(buf, offset)?;
	Ok(())
}

#[cfg(windows)]
pub fn read_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> Result<()> {
	use std::os::windows::fs::FileExt;
	while !buf.is_empty() {
		let read = file.seek_read(buf, offset)?;
		if read == 0 {
			return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read").into());
		}
		buf = &mut buf[read..];
		offset += read as u64;
	}
	Ok(())
}

#[cfg(windows)]
pub fn write_at(file: &File, mut buf: &[u8], mut offset: u64) -> Result<()> {
	use std::os::windows::fs::FileExt;
	while !buf.is_empty() {
		let written = file.seek_write(buf, offset)?;
		buf = &buf[written..];
		offset += written as u64;
	}
	Ok(())
}

/// Fixed-size record at offset 0 in the file.
#[derive(Clone, Copy, Debug)]
pub struct FileHeader {
	pub version: u32,
	pub key_size: u32,
	pub timestamp: u64,
	pub end_of_header: u32,
}

impl FileHeader {
	pub fn new(key_size: u32) -> FileHeader {
		let timestamp = std::time::SystemTime::now()
			.duration_since(std::time::UNIX_EPOCH)
			.map(|d| d.as_secs())
			.unwrap_or(0);
		FileHeader { version: VERSION, key_size, timestamp, end_of_header: FILE_HEADER_SIZE as u32 }
	}

	pub fn to_bytes(&self) -> [u8; FILE_HEADER_SIZE] {
		let mut buf = [0u8; FILE_HEADER_SIZE];
		buf[0..4].copy_from_slice(&self.version.to_ne_bytes());
		buf[4..8].copy_from_slice(&self.key_size.to_ne_bytes());
		buf[8..16].copy_from_slice(&self.timestamp.to_ne_bytes());
		buf[16..20].copy_from_slice(&self.end_of_header.to_ne_bytes());
		buf
	}

	pub fn from_bytes(buf: &[u8; FILE_HEADER_SIZE]) -> FileHeader {
		FileHeader {
			version: u32::from_ne_bytes(buf[0..4].try_into().unwrap()),
			key_size: u32::from_ne_bytes(buf[4..8].try_into().unwrap()),
			timestamp: u64::from_ne_bytes(buf[8..16].try_into().unwrap()),
			end_of_header: u32::from_ne_bytes(buf[16..20].try_into().unwrap()),
		}
	}

	pub fn read(file: &mut File) -> Result<FileHeader> {
		let mut buf = [0u8; FILE_HEADER_SIZE];
		file.read_exact(&mut buf)?;
		Ok(FileHeader::from_bytes(&buf))
	}

	pub fn write_at_start(&self, file: &File) -> Result<()> {
		write_at(file, &self.to_bytes(), 0)
	}
}

/// Fixed-size record preceding a run of key entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableHeader {
	pub record_count: u64,
	pub next_table: u64,
}

impl TableHeader {
	pub fn to_bytes(&self) -> [u8; TABLE_HEADER_SIZE] {
		let mut buf = [0u8; TABLE_HEADER_SIZE];
		buf[0..8].copy_from_slice(&self.record_count.to_ne_bytes());
		buf[8..16].copy_from_slice(&self.next_table.to_ne_bytes());
		buf
	}

	pub fn from_bytes(buf: &[u8; TABLE_HEADER_SIZE]) -> TableHeader {
		TableHeader {
			record_count: u64::from_ne_bytes(buf[0..8].try_into().unwrap()),
			next_table: u64::from_ne_bytes(buf[8..16].try_into().unwrap()),
		}
	}

	pub fn read_at(file: &File, offset: u64) -> Result<TableHeader> {
		let mut buf = [0u8; TABLE_HEADER_SIZE];
		read_at(file, &mut buf, offset)?;
		Ok(TableHeader::from_bytes(&buf))
	}

	pub fn write_at(&self, file: &File, offset: u64) -> Result<()> {
		write_at(file, &self.to_bytes(), offset)
	}
}

/// Fixed-size record describing one key slot. `N` is the key width in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyEntry<const N: usize> {
	pub data_pos: u64,
	pub data_length: u64,
	pub initial_data_length: u64,
	pub key_bytes: [u8; N],
	pub flags: u16,
}

impl<const N: usize> KeyEntry<N> {
	pub const SIZE: usize = 8 + 8 + 8 + N + 2;

	pub fn empty() -> KeyEntry<N> {
		KeyEntry { data_pos: 0, data_length: 0, initial_data_length: 0, key_bytes: [0u8; N], flags: 0 }
	}

	pub fn to_bytes(&self) -> Vec<u8> {
		let mut buf = Vec::with_capacity(Self::SIZE);
		buf.extend_from_slice(&self.data_pos.to_ne_bytes());
		buf.extend_from_slice(&self.data_length.to_ne_bytes());
		buf.extend_from_slice(&self.initial_data_length.to_ne_bytes());
		buf.extend_from_slice(&self.key_bytes);
		buf.extend_from_slice(&self.flags.to_ne_bytes());
		buf
	}

	pub fn from_bytes(buf: &[u8]) -> KeyEntry<N> {
		debug_assert_eq!(buf.len(), Self::SIZE);
		let mut key_bytes = [0u8; N];
		key_bytes.copy_from_slice(&buf[24..24 + N]);
		KeyEntry {
			data_pos: u64::from_ne_bytes(buf[0..8].try_into().unwrap()),
			data_length: u64::from_ne_bytes(buf[8..16].try_into().unwrap()),
			initial_data_length: u64::from_ne_bytes(buf[16..24].try_into().unwrap()),
			key_bytes,
			flags: u16::from_ne_bytes(buf[24 + N..24 + N + 2].try_into().unwrap()),
		}
	}

	pub fn read_at(file: &File, offset: u64) -> Result<KeyEntry<N>> {
		let mut buf = vec![0u8; Self::SIZE];
		read_at(file, &mut buf, offset)?;
		Ok(KeyEntry::from_bytes(&buf))
	}

	pub fn write_at(&self, file: &File, offset: u64) -> Result<()> {
		write_at(file, &self.to_bytes(), offset)
	}

	/// True for a slot that has never held a value: both length fields zero and
	/// `data_pos` is not the empty-value sentinel.
	pub fn is_reserved(&self) -> bool {
		self.data_length == 0 && self.initial_data_length == 0 && self.data_pos != EMPTY_VALUE_SENTINEL
	}

	/// True for a slot that used to hold a real (non-empty) payload and was erased.
	pub fn is_tombstoned(&self) -> bool {
		self.data_length == 0 && self.initial_data_length > 0
	}

	/// True for a slot that currently maps its key to a value, empty or not.
	pub fn is_live(&self) -> bool {
		self.data_length > 0 || (self.initial_data_length == 0 && self.data_pos == EMPTY_VALUE_SENTINEL)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::test_util::TempDir;
	use std::fs::OpenOptions;

	#[test]
	fn file_header_round_trip() {
		let header = FileHeader::new(12);
		let bytes = header.to_bytes();
		let back = FileHeader::from_bytes(&bytes);
		assert_eq!(header.version, back.version);
		assert_eq!(header.key_size, back.key_size);
		assert_eq!(header.timestamp, back.timestamp);
		assert_eq!(header.end_of_header, back.end_of_header);
	}

	#[test]
	fn table_header_round_trip() {
		let header = TableHeader { record_count: 1000, next_table: 424242 };
		assert_eq!(header, TableHeader::from_bytes(&header.to_bytes()));
	}

	#[test]
	fn key_entry_round_trip() {
		let entry =
			KeyEntry::<12> { data_pos: 64, data_length: 30, initial_data_length: 30, key_bytes: [7u8; 12], flags: 9 };
		assert_eq!(entry, KeyEntry::<12>::from_bytes(&entry.to_bytes()));
	}

	#[test]
	fn key_entry_classification() {
		let reserved = KeyEntry::<4>::empty();
		assert!(reserved.is_reserved());
		assert!(!reserved.is_tombstoned());
		assert!(!reserved.is_live());

		let empty_live =
			KeyEntry::<4> { data_pos: EMPTY_VALUE_SENTINEL, data_length: 0, initial_data_length: 0, key_bytes: [0; 4], flags: 0 };
		assert!(empty_live.is_live());
		assert!(!empty_live.is_reserved());
		assert!(!empty_live.is_tombstoned());

		let live = KeyEntry::<4> { data_pos: 200, data_length: 5, initial_data_length: 8, key_bytes: [1; 4], flags: 0 };
		assert!(live.is_live());
		assert!(!live.is_reserved());
		assert!(!live.is_tombstoned());

		let tombstone = KeyEntry::<4> { data_pos: 200, data_length: 0, initial_data_length: 8, key_bytes: [1; 4], flags: 0 };
		assert!(tombstone.is_tombstoned());
		assert!(!tombstone.is_live());
		assert!(!tombstone.is_reserved());
	}

	#[test]
	fn positioned_io_round_trip() {
		let dir = TempDir::new("layout-positioned-io");
		let file = OpenOptions::new().create(true).read(true).write(true).open(dir.file("data")).unwrap();
		write_at(&file, b"hello", 0).unwrap();
		write_at(&file, b"world", 10).unwrap();
		let mut buf = [0u8; 5];
		read_at(&file, &mut buf, 0).unwrap();
		assert_eq!(&buf, b"hello");
		read_at(&file, &mut buf, 10).unwrap();
		assert_eq!(&buf, b"world");
	}
}
