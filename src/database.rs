use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::Path;

use parking_lot::Mutex;

use crate::catalogue::Catalogue;
use crate::display;
use crate::error::{Error, Result};
use crate::layout::{read_at, write_at, FileHeader, KeyEntry, TableHeader, EMPTY_VALUE_SENTINEL, TABLE_HEADER_SIZE, VERSION};
use crate::slot::{DeletedSlot, SlotDescriptor, TableDescriptor};
use crate::DEFAULT_KEY_BYTES;

pub const DEFAULT_RESERVED_TABLE_SIZE: u64 = 1000;
pub const DEFAULT_RESERVED_VALUE_SIZE: u64 = 0;

/// Runtime-tunable knobs for `create`/`open`. Neither is recorded in the file
/// header (byte-exact compatibility leaves no room for extra fields);
/// `reserved_table_size` is recovered on open from the first table's record
/// count, and `reserved_value_size` only biases future allocations, so it is
/// simply re-supplied by the caller each time it matters.
#[derive(Clone, Copy, Debug)]
pub struct DatabaseOptions {
	pub reserved_table_size: u64,
	pub reserved_value_size: u64,
}

impl Default for DatabaseOptions {
	fn default() -> DatabaseOptions {
		DatabaseOptions {
			reserved_table_size: DEFAULT_RESERVED_TABLE_SIZE,
			reserved_value_size: DEFAULT_RESERVED_VALUE_SIZE,
		}
	}
}

/// Snapshot of the three slot categories, for debugging/introspection only.
#[derive(Clone, Debug)]
pub struct DatabaseInfo<const N: usize> {
	pub active: Vec<[u8; N]>,
	pub reserved: Vec<u64>,
	pub deleted: Vec<u64>,
}

struct Inner<const N: usize> {
	file: File,
	file_len: u64,
	reserved_table_size: u64,
	reserved_value_size: u64,
	catalogue: Catalogue<N>,
}

/// An embeddable single-file key-value store with fixed-width keys.
///
/// `N` is the key width in bytes, a compile-time choice per the catalogue of
/// databases a host application maintains (the historical voxel-chunk build
/// used 12, hence [`DEFAULT_KEY_BYTES`]). All mutating and reading operations
/// serialise through a single [`parking_lot::Mutex`]; see the crate's design
/// notes for why a plain mutex rather than a reader-writer lock.
pub struct Database<const N: usize = DEFAULT_KEY_BYTES>(Mutex<Option<Inner<N>>>);

fn key_bytes<const N: usize>(key: &[u8]) -> Result<[u8; N]> {
	if key.len() > N {
		return Err(Error::KeyTooLarge { got: key.len(), max: N });
	}
	let mut buf = [0u8; N];
	buf[..key.len()].copy_from_slice(key);
	Ok(buf)
}

fn reservation_region(need: u64, reserved_value_size: u64) -> u64 {
	if reserved_value_size == 0 {
		return need;
	}
	let units = (need + reserved_value_size - 1) / reserved_value_size;
	(units + 1) * reserved_value_size
}

impl<const N: usize> Database<N> {
	/// Creates a fresh database file, writing `initial_pairs` as already-live
	/// slots and padding the rest of the first table with reserved slots.
	pub fn create(
		path: impl AsRef<Path>,
		initial_pairs: &[([u8; N], &[u8], u16)],
		options: &DatabaseOptions,
	) -> Result<()> {
		let file = OpenOptions::new().create(true).write(true).truncate(true).open(path.as_ref())?;

		let header = FileHeader::new(N as u32);
		header.write_at_start(&file)?;

		let record_count = std::cmp::max(initial_pairs.len() as u64, options.reserved_table_size);
		let table_header_pos = header.end_of_header as u64;
		TableHeader { record_count, next_table: 0 }.write_at(&file, table_header_pos)?;

		let entries_start = table_header_pos + TABLE_HEADER_SIZE as u64;
		let entry_size = KeyEntry::<N>::SIZE as u64;
		let value_region_start = entries_start + record_count * entry_size;

		let mut value_buf = Vec::new();
		let mut cumulative = 0u64;
		for (i, (key, value, flags)) in initial_pairs.iter().enumerate() {
			let entry_pos = entries_start + i as u64 * entry_size;
			let entry = if value.is_empty() {
				KeyEntry { data_pos: EMPTY_VALUE_SENTINEL, data_length: 0, initial_data_length: 0, key_bytes: *key, flags: *flags }
			} else {
				let len = value.len() as u64;
				let data_pos = value_region_start + cumulative;
				cumulative += len;
				value_buf.extend_from_slice(value);
				KeyEntry { data_pos, data_length: len, initial_data_length: len, key_bytes: *key, flags: *flags }
			};
			entry.write_at(&file, entry_pos)?;
		}
		for i in initial_pairs.len() as u64..record_count {
			let entry_pos = entries_start + i * entry_size;
			KeyEntry::<N>::empty().write_at(&file, entry_pos)?;
		}
		if !value_buf.is_empty() {
			write_at(&file, &value_buf, value_region_start)?;
		}
		log::info!(
			target: "slotdb",
			"created database at {} with {} initial pairs and {} reserved slots",
			path.as_ref().display(),
			initial_pairs.len(),
			record_count,
		);
		Ok(())
	}

	/// Opens an existing database file with default options.
	pub fn open(path: impl AsRef<Path>) -> Result<Database<N>> {
		Self::open_with_options(path, &DatabaseOptions::default())
	}

	/// Opens an existing database file, biasing future allocations with `options.reserved_value_size`.
	pub fn open_with_options(path: impl AsRef<Path>, options: &DatabaseOptions) -> Result<Database<N>> {
		let inner = Self::open_inner(path, options)?;
		Ok(Database(Mutex::new(Some(inner))))
	}

	/// Re-opens a closed (or never-opened) instance in place. Fails with
	/// [`Error::AlreadyOpen`] if this instance currently holds a file.
	pub fn reopen(&self, path: impl AsRef<Path>) -> Result<()> {
		self.reopen_with_options(path, &DatabaseOptions::default())
	}

	pub fn reopen_with_options(&self, path: impl AsRef<Path>, options: &DatabaseOptions) -> Result<()> {
		let mut guard = self.0.lock();
		if guard.is_some() {
			return Err(Error::AlreadyOpen);
		}
		*guard = Some(Self::open_inner(path, options)?);
		Ok(())
	}

	fn open_inner(path: impl AsRef<Path>, options: &DatabaseOptions) -> Result<Inner<N>> {
		let mut file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
		let header = FileHeader::read(&mut file)?;
		if header.version != VERSION {
			return Err(Error::InvalidFormat(format!("unsupported version {}", header.version)));
		}
		if header.key_size as usize != N {
			return Err(Error::InvalidFormat(format!(
				"key width mismatch: file was created with {} byte keys, database configured for {}",
				header.key_size, N
			)));
		}

		let mut catalogue = Catalogue::new();
		let mut visited = HashSet::new();
		let mut table_pos = header.end_of_header as u64;
		let mut reserved_table_size = options.reserved_table_size;
		let mut first_table = true;
		while table_pos != 0 {
			if !visited.insert(table_pos) {
				return Err(Error::InvalidFormat("cyclic table chain".into()));
			}
			let table_header = TableHeader::read_at(&file, table_pos)?;
			if first_table {
				reserved_table_size = table_header.record_count;
				first_table = false;
			}
			let entries_start = table_pos + TABLE_HEADER_SIZE as u64;
			let entry_size = KeyEntry::<N>::SIZE as u64;
			for i in 0..table_header.record_count {
				let entry_pos = entries_start + i * entry_size;
				let entry = KeyEntry::<N>::read_at(&file, entry_pos)?;
				let descriptor = SlotDescriptor { entry_pos, entry };
				if entry.is_live() {
					catalogue.live.insert(entry.key_bytes, descriptor);
				} else if entry.is_tombstoned() {
					catalogue.deleted.insert(DeletedSlot(descriptor));
				} else {
					catalogue.reserved.push_back(descriptor);
				}
			}
			catalogue.tables.push(TableDescriptor { header_pos: table_pos, header: table_header });
			table_pos = table_header.next_table;
		}

		let file_len = file.metadata()?.len();
		log::debug!(
			target: "slotdb",
			"opened database at {} with {} live, {} reserved, {} deleted across {} tables",
			path.as_ref().display(),
			catalogue.live.len(),
			catalogue.reserved.len(),
			catalogue.deleted.len(),
			catalogue.tables.len(),
		);
		Ok(Inner { file, file_len, reserved_table_size, reserved_value_size: options.reserved_value_size, catalogue })
	}

	/// Clears all in-memory state and drops the file handle. A no-op if this
	/// instance was never opened, or is already closed.
	pub fn close(&self) {
		let mut guard = self.0.lock();
		*guard = None;
	}

	pub fn is_open(&self) -> bool {
		self.0.lock().is_some()
	}

	pub fn size(&self) -> Result<usize> {
		self.with_inner(|inner| Ok(inner.catalogue.live.len()))
	}

	pub fn reserved(&self) -> Result<usize> {
		self.with_inner(|inner| Ok(inner.catalogue.reserved.len()))
	}

	pub fn deleted(&self) -> Result<usize> {
		self.with_inner(|inner| Ok(inner.catalogue.deleted.len()))
	}

	pub fn save(&self, key: &[u8], value: &[u8], flags: u16) -> Result<()> {
		let key = key_bytes::<N>(key)?;
		self.with_inner_mut(|inner| inner.put(key, value, flags))
	}

	pub fn load(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
		let key = key_bytes::<N>(key)?;
		self.with_inner(|inner| inner.load(&key))
	}

	pub fn erase(&self, key: &[u8]) -> Result<()> {
		let key = key_bytes::<N>(key)?;
		self.with_inner_mut(|inner| match inner.catalogue.live.get(&key).copied() {
			Some(descriptor) => inner.erase_pair(key, descriptor),
			None => Ok(()),
		})
	}

	pub fn k_flags(&self, key: &[u8]) -> Result<u16> {
		let key = key_bytes::<N>(key)?;
		self.with_inner(|inner| Ok(inner.catalogue.live.get(&key).map(|d| d.entry.flags).unwrap_or(0)))
	}

	pub fn is_exist(&self, key: &[u8]) -> Result<bool> {
		let key = key_bytes::<N>(key)?;
		self.with_inner(|inner| Ok(inner.catalogue.live.contains_key(&key)))
	}

	/// Enumerates live keys in unspecified order, under the lock.
	pub fn for_each_key(&self, mut visitor: impl FnMut(&[u8])) -> Result<()> {
		self.with_inner(|inner| {
			for key in inner.catalogue.live.keys() {
				visitor(&key[..]);
			}
			Ok(())
		})
	}

	pub fn info(&self) -> Result<DatabaseInfo<N>> {
		self.with_inner(|inner| {
			Ok(DatabaseInfo {
				active: inner.catalogue.live.keys().copied().collect(),
				reserved: inner.catalogue.reserved.iter().map(|d| d.entry_pos).collect(),
				deleted: inner.catalogue.deleted.iter().map(|d| d.0.entry_pos).collect(),
			})
		})
	}

	fn with_inner<T>(&self, f: impl FnOnce(&Inner<N>) -> Result<T>) -> Result<T> {
		let guard = self.0.lock();
		match guard.as_ref() {
			Some(inner) => f(inner),
			None => Err(Error::NotOpen),
		}
	}

	fn with_inner_mut<T>(&self, f: impl FnOnce(&mut Inner<N>) -> Result<T>) -> Result<T> {
		let mut guard = self.0.lock();
		match guard.as_mut() {
			Some(inner) => f(inner),
			None => Err(Error::NotOpen),
		}
	}
}

impl<const N: usize> Inner<N> {
	fn load(&self, key: &[u8; N]) -> Result<Option<Vec<u8>>> {
		let descriptor = match self.catalogue.live.get(key) {
			Some(d) => d,
			None => return Ok(None),
		};
		if descriptor.entry.data_length == 0 {
			return Ok(Some(Vec::new()));
		}
		let mut buf = vec![0u8; descriptor.entry.data_length as usize];
		read_at(&self.file, &mut buf, descriptor.entry.data_pos)?;
		Ok(Some(buf))
	}

	fn put(&mut self, key: [u8; N], value: &[u8], flags: u16) -> Result<()> {
		match self.catalogue.live.get(&key).copied() {
			Some(descriptor) => self.change(key, descriptor, value, flags),
			None => self.add_new(key, value, flags),
		}
	}

	fn change(&mut self, key: [u8; N], descriptor: SlotDescriptor<N>, value: &[u8], flags: u16) -> Result<()> {
		if value.is_empty() {
			return self.erase_pair(key, descriptor);
		}
		let need = value.len() as u64;
		if need <= descriptor.entry.initial_data_length {
			log::trace!(
				target: "slotdb",
				"rewriting slot {} in place ({} bytes): {}",
				descriptor.entry_pos,
				need,
				display::hex(&key),
			);
			write_at(&self.file, value, descriptor.entry.data_pos)?;
			let mut entry = descriptor.entry;
			entry.data_length = need;
			entry.flags = flags;
			entry.write_at(&self.file, descriptor.entry_pos)?;
			self.catalogue.live.insert(key, SlotDescriptor { entry_pos: descriptor.entry_pos, entry });
			Ok(())
		} else {
			log::debug!(
				target: "slotdb",
				"relocating slot {}: needs {} bytes, region is only {}: {}",
				descriptor.entry_pos,
				need,
				descriptor.entry.initial_data_length,
				display::hex(&key),
			);
			self.erase_pair(key, descriptor)?;
			self.add_new(key, value, flags)
		}
	}

	fn erase_pair(&mut self, key: [u8; N], descriptor: SlotDescriptor<N>) -> Result<()> {
		let mut entry = descriptor.entry;
		entry.data_length = 0;
		entry.flags = 0;
		self.catalogue.live.remove(&key);
		if entry.initial_data_length == 0 {
			// Held a zero-length value: no payload region was ever attached, so
			// there is nothing for the deleted set to retain. Treat it as
			// reserved again rather than leaking a phantom tombstone.
			entry.data_pos = 0;
			entry.write_at(&self.file, descriptor.entry_pos)?;
			self.catalogue.reserved.push_back(SlotDescriptor { entry_pos: descriptor.entry_pos, entry });
		} else {
			entry.write_at(&self.file, descriptor.entry_pos)?;
			self.catalogue.deleted.insert(DeletedSlot(SlotDescriptor { entry_pos: descriptor.entry_pos, entry }));
		}
		Ok(())
	}

	fn add_new(&mut self, key: [u8; N], value: &[u8], flags: u16) -> Result<()> {
		let need = value.len() as u64;

		if need == 0 {
			let descriptor = self.take_reserved_slot()?;
			let mut entry = descriptor.entry;
			entry.key_bytes = key;
			entry.flags = flags;
			entry.data_pos = EMPTY_VALUE_SENTINEL;
			entry.data_length = 0;
			entry.initial_data_length = 0;
			entry.write_at(&self.file, descriptor.entry_pos)?;
			self.catalogue.live.insert(key, SlotDescriptor { entry_pos: descriptor.entry_pos, entry });
			return Ok(());
		}

		if let Some(found) = self.catalogue.find_fitting_tombstone(need) {
			self.catalogue.deleted.remove(&found);
			let mut entry = found.0.entry;
			entry.key_bytes = key;
			entry.flags = flags;
			entry.data_length = need;
			write_at(&self.file, value, entry.data_pos)?;
			entry.write_at(&self.file, found.0.entry_pos)?;
			log::trace!(
				target: "slotdb",
				"reused tombstone at {} for {} bytes: {}",
				found.0.entry_pos,
				need,
				display::hex(&key),
			);
			self.catalogue.live.insert(key, SlotDescriptor { entry_pos: found.0.entry_pos, entry });
			return Ok(());
		}

		let descriptor = self.take_reserved_slot()?;
		let region = reservation_region(need, self.reserved_value_size);
		let data_pos = self.file_len;
		let mut payload = value.to_vec();
		if region > need {
			payload.resize(region as usize, 0);
		}
		write_at(&self.file, &payload, data_pos)?;
		self.file_len += region;

		let mut entry = descriptor.entry;
		entry.key_bytes = key;
		entry.flags = flags;
		entry.data_pos = data_pos;
		entry.data_length = need;
		entry.initial_data_length = region;
		entry.write_at(&self.file, descriptor.entry_pos)?;
		log::trace!(
			target: "slotdb",
			"inserted {} bytes at new slot {} (region {}): {}",
			need,
			descriptor.entry_pos,
			region,
			display::hex(&key),
		);
		self.catalogue.live.insert(key, SlotDescriptor { entry_pos: descriptor.entry_pos, entry });
		Ok(())
	}

	fn take_reserved_slot(&mut self) -> Result<SlotDescriptor<N>> {
		if let Some(descriptor) = self.catalogue.reserved.pop_front() {
			return Ok(descriptor);
		}
		self.grow_table()?;
		self.catalogue
			.reserved
			.pop_front()
			.ok_or_else(|| Error::InvalidFormat("table growth produced no reserved slots".into()))
	}

	fn grow_table(&mut self) -> Result<()> {
		let record_count = self.reserved_table_size;
		let header_pos = self.file_len;
		TableHeader { record_count, next_table: 0 }.write_at(&self.file, header_pos)?;

		let entries_start = header_pos + TABLE_HEADER_SIZE as u64;
		let entry_size = KeyEntry::<N>::SIZE as u64;
		for i in 0..record_count {
			let entry_pos = entries_start + i * entry_size;
			let entry = KeyEntry::<N>::empty();
			entry.write_at(&self.file, entry_pos)?;
			self.catalogue.reserved.push_back(SlotDescriptor { entry_pos, entry });
		}
		self.file_len = entries_start + record_count * entry_size;

		if let Some(last) = self.catalogue.tables.last_mut() {
			last.header.next_table = header_pos;
			last.header.write_at(&self.file, last.header_pos)?;
		}
		self.catalogue.tables.push(TableDescriptor { header_pos, header: TableHeader { record_count, next_table: 0 } });
		log::info!(target: "slotdb", "grew file with a new table of {} slots at offset {}", record_count, header_pos);
		Ok(())
	}
}
