//! Persistent ledger - durable next-id counter and the single pending record
//!
//! The ledger sits on a small byte-addressed [`Store`] (EEPROM-like: erased
//! bytes read as `0xFF`, writes are update-if-changed). Startup recovery
//! repairs erased or out-of-range values so the node always comes up either
//! clearly idle or clearly pending with a valid record.
//!
//! # Store layout
//!
//! All multi-byte integers are **little-endian**.
//!
//! ```text
//!  offset  size        field
//!  0       4           next id (last id handed out)
//!  4       1           pending flag (0 / 1, anything else reads as 0)
//!  5       4           pending id
//!  9       slot_len    pending payload (NUL-padded, truncated)
//!  9+slot  4           CRC-32 over pending id + payload slot
//! ```
//!
//! With the default 20-byte slot the payload occupies offsets 9-28 and the
//! checksum 29-32.
//!
//! # Write ordering
//!
//! Creating a record writes id, payload and checksum first and sets the flag
//! last. Clearing resets the flag first. A power cut between any two byte
//! writes therefore leaves either no flag, or a flag over a complete record.
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, warn};

use crate::contracts::{LedgerState, MessageId, Payload, PendingRecord};
use crate::errors::{AlertLinkError, Result};

/// Value of a never-written store byte
pub const ERASED_BYTE: u8 = 0xFF;

// Fixed byte offsets of the header fields.
const OFF_NEXT_ID: usize = 0;
const OFF_PENDING_FLAG: usize = 4;
const OFF_PENDING_ID: usize = 5;
const OFF_PAYLOAD: usize = 9;

const FLAG_IDLE: u8 = 0;
const FLAG_PENDING: u8 = 1;

/// Small addressable byte store
///
/// Implementations are expected to be constant-latency and effectively
/// infallible; errors exist so a file-backed store can report I/O failure.
pub trait Store {
    /// Total addressable bytes
    fn capacity(&self) -> usize;

    /// Fill `buf` from `offset`
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()>;

    /// Write `bytes` at `offset` unconditionally
    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()>;

    /// Write only the bytes that differ from what is stored
    fn update(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let mut current = vec![0u8; bytes.len()];
        self.read(offset, &mut current)?;
        for (i, (&old, &new)) in current.iter().zip(bytes).enumerate() {
            if old != new {
                self.write(offset + i, &[new])?;
            }
        }
        Ok(())
    }
}

fn check_bounds(offset: usize, len: usize, capacity: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(AlertLinkError::StoreOutOfBounds {
            offset,
            len,
            capacity,
        }),
    }
}

/// In-memory store, erased to `0xFF` like fresh EEPROM
#[derive(Debug, Clone)]
pub struct MemoryStore {
    bytes: Vec<u8>,
    byte_writes: u64,
}

impl MemoryStore {
    pub fn erased(capacity: usize) -> Self {
        Self::from_bytes(vec![ERASED_BYTE; capacity])
    }

    /// Wrap an existing image (e.g. a snapshot taken before a simulated restart)
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            byte_writes: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of individual bytes physically written so far
    pub fn byte_writes(&self) -> u64 {
        self.byte_writes
    }
}

impl Store for MemoryStore {
    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        check_bounds(offset, buf.len(), self.bytes.len())?;
        buf.copy_from_slice(&self.bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        check_bounds(offset, bytes.len(), self.bytes.len())?;
        self.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.byte_writes += bytes.len() as u64;
        Ok(())
    }
}

/// Fixed-size image file
///
/// Reads are served from an in-memory copy; every write goes straight to the
/// file and is synced before returning.
#[derive(Debug)]
pub struct FileStore {
    file: File,
    image: Vec<u8>,
}

impl FileStore {
    /// Open (or create) an image of exactly `capacity` bytes
    ///
    /// A missing or short file is extended with erased bytes; a longer file
    /// keeps its tail untouched but only the first `capacity` bytes are
    /// addressable.
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;

        let mut image = Vec::with_capacity(capacity);
        (&mut file).take(capacity as u64).read_to_end(&mut image)?;

        if image.len() < capacity {
            let existing = image.len();
            image.resize(capacity, ERASED_BYTE);
            file.seek(SeekFrom::Start(existing as u64))?;
            file.write_all(&image[existing..])?;
            file.sync_data()?;
            debug!(path = %path.as_ref().display(), existing, capacity, "extended store image");
        }

        Ok(Self { file, image })
    }
}

impl Store for FileStore {
    fn capacity(&self) -> usize {
        self.image.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        check_bounds(offset, buf.len(), self.image.len())?;
        buf.copy_from_slice(&self.image[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        check_bounds(offset, bytes.len(), self.image.len())?;
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.write_all(bytes)?;
        self.file.sync_data()?;
        self.image[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

/// Byte layout of the ledger inside a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerLayout {
    pub payload_slot_len: usize,
}

impl LedgerLayout {
    pub fn new(payload_slot_len: usize) -> Self {
        Self { payload_slot_len }
    }

    fn checksum_offset(&self) -> usize {
        OFF_PAYLOAD + self.payload_slot_len
    }

    /// Bytes of store the ledger occupies
    pub fn total_len(&self) -> usize {
        self.checksum_offset() + 4
    }
}

impl Default for LedgerLayout {
    fn default() -> Self {
        Self::new(crate::PAYLOAD_SLOT_LEN)
    }
}

/// What startup recovery had to repair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecoveryReport {
    /// Next-id field was erased (all ones) and reset to 0
    pub next_id_reset: bool,
    /// Pending flag held a value outside {0, 1} and was cleared
    pub pending_flag_reset: bool,
    /// Pending flag was set over a record that failed its checksum
    pub record_checksum_reset: bool,
    /// Next-id lagged behind the pending id and was raised to it
    pub next_id_raised: bool,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

/// Durable {next id, pending record} state over a [`Store`]
pub struct Ledger<S: Store> {
    store: S,
    layout: LedgerLayout,
    state: LedgerState,
}

impl<S: Store> Ledger<S> {
    /// Open the ledger, repairing corrupt or erased fields
    ///
    /// # Errors
    /// `StoreOutOfBounds` when the store is smaller than the layout, or any
    /// I/O error from the store while repairing.
    pub fn open(store: S, layout: LedgerLayout) -> Result<(Self, RecoveryReport)> {
        check_bounds(0, layout.total_len(), store.capacity())?;

        let mut ledger = Self {
            store,
            layout,
            state: LedgerState::default(),
        };
        let mut report = RecoveryReport::default();

        let mut next_id = ledger.read_u32(OFF_NEXT_ID)?;
        if next_id == u32::MAX {
            ledger.write_u32(OFF_NEXT_ID, 0)?;
            next_id = 0;
            report.next_id_reset = true;
        }

        let flag = ledger.read_byte(OFF_PENDING_FLAG)?;
        let pending = match flag {
            FLAG_IDLE => None,
            FLAG_PENDING => match ledger.read_record()? {
                Some(record) => Some(record),
                None => {
                    ledger.store.update(OFF_PENDING_FLAG, &[FLAG_IDLE])?;
                    report.record_checksum_reset = true;
                    None
                }
            },
            _ => {
                ledger.store.update(OFF_PENDING_FLAG, &[FLAG_IDLE])?;
                report.pending_flag_reset = true;
                None
            }
        };

        if let Some(record) = &pending {
            if record.id.0 > next_id {
                ledger.write_u32(OFF_NEXT_ID, record.id.0)?;
                next_id = record.id.0;
                report.next_id_raised = true;
            }
        }

        ledger.state = LedgerState {
            next_id: MessageId(next_id),
            pending,
        };

        if !report.is_clean() {
            warn!(?report, "ledger recovered from inconsistent store");
        }

        Ok((ledger, report))
    }

    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    pub fn layout(&self) -> LedgerLayout {
        self.layout
    }

    pub fn has_pending(&self) -> bool {
        self.state.pending_flag()
    }

    pub fn pending(&self) -> Option<&PendingRecord> {
        self.state.pending.as_ref()
    }

    /// Hand out the next message id and persist the counter
    pub fn allocate_id(&mut self) -> Result<MessageId> {
        let id = self.state.next_id.next();
        self.write_u32(OFF_NEXT_ID, id.0)?;
        self.state.next_id = id;
        Ok(id)
    }

    /// Persist a pending record; the flag is the last byte written
    ///
    /// The payload is truncated to the slot width.
    pub fn store_pending(&mut self, id: MessageId, payload: &Payload) -> Result<PendingRecord> {
        let slot = payload.to_slot(self.layout.payload_slot_len);

        self.write_u32(OFF_PENDING_ID, id.0)?;
        self.store.update(OFF_PAYLOAD, &slot)?;
        self.write_u32(self.layout.checksum_offset(), record_checksum(id, &slot))?;
        self.store.update(OFF_PENDING_FLAG, &[FLAG_PENDING])?;

        let record = PendingRecord {
            id,
            payload: Payload::from_slot(&slot),
        };
        self.state.pending = Some(record.clone());
        Ok(record)
    }

    /// Read the pending record back from the store
    ///
    /// Retransmissions use this rather than any in-memory copy so the bytes
    /// on the wire are exactly the bytes that survive a restart.
    pub fn load_pending(&self) -> Result<Option<PendingRecord>> {
        if self.read_byte(OFF_PENDING_FLAG)? != FLAG_PENDING {
            return Ok(None);
        }
        self.read_record()
    }

    /// Drop the pending record; the flag is the first byte cleared
    pub fn clear_pending(&mut self) -> Result<()> {
        self.store.update(OFF_PENDING_FLAG, &[FLAG_IDLE])?;
        self.state.pending = None;

        let slot = vec![0u8; self.layout.payload_slot_len];
        self.write_u32(OFF_PENDING_ID, 0)?;
        self.store.update(OFF_PAYLOAD, &slot)?;
        self.write_u32(
            self.layout.checksum_offset(),
            record_checksum(MessageId::NONE, &slot),
        )?;
        Ok(())
    }

    /// Give the underlying store back (e.g. to simulate a restart)
    pub fn into_store(self) -> S {
        self.store
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    #[cfg(test)]
    pub(crate) fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    fn read_record(&self) -> Result<Option<PendingRecord>> {
        let id = MessageId(self.read_u32(OFF_PENDING_ID)?);
        let mut slot = vec![0u8; self.layout.payload_slot_len];
        self.store.read(OFF_PAYLOAD, &mut slot)?;
        let stored_crc = self.read_u32(self.layout.checksum_offset())?;

        if id.is_none() || stored_crc != record_checksum(id, &slot) {
            return Ok(None);
        }

        Ok(Some(PendingRecord {
            id,
            payload: Payload::from_slot(&slot),
        }))
    }

    fn read_byte(&self, offset: usize) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.store.read(offset, &mut buf)?;
        Ok(buf[0])
    }

    fn read_u32(&self, offset: usize) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.store.read(offset, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn write_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        self.store.update(offset, &value.to_le_bytes())
    }
}

/// CRC-32 over the little-endian pending id followed by the payload slot
fn record_checksum(id: MessageId, slot: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&id.0.to_le_bytes());
    hasher.update(slot);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_ledger() -> Ledger<MemoryStore> {
        let layout = LedgerLayout::default();
        let (ledger, _) = Ledger::open(MemoryStore::erased(layout.total_len()), layout).unwrap();
        ledger
    }

    fn reopen(ledger: Ledger<MemoryStore>) -> (Ledger<MemoryStore>, RecoveryReport) {
        let layout = ledger.layout();
        let image = ledger.into_store().as_bytes().to_vec();
        Ledger::open(MemoryStore::from_bytes(image), layout).unwrap()
    }

    #[test]
    fn test_default_layout_offsets() {
        let layout = LedgerLayout::default();
        assert_eq!(layout.checksum_offset(), 29);
        assert_eq!(layout.total_len(), 33);
    }

    #[test]
    fn test_erased_store_recovers_to_idle_zero() {
        let layout = LedgerLayout::default();
        let (ledger, report) =
            Ledger::open(MemoryStore::erased(layout.total_len()), layout).unwrap();

        assert!(report.next_id_reset);
        assert!(report.pending_flag_reset);
        assert_eq!(ledger.state().next_id, MessageId(0));
        assert!(!ledger.has_pending());
        assert_eq!(&ledger.store().as_bytes()[0..5], &[0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_store_too_small_is_rejected() {
        let result = Ledger::open(MemoryStore::erased(10), LedgerLayout::default());
        assert!(matches!(result, Err(AlertLinkError::StoreOutOfBounds { .. })));
    }

    #[test]
    fn test_allocate_id_is_persisted_little_endian() {
        let mut ledger = fresh_ledger();
        assert_eq!(ledger.allocate_id().unwrap(), MessageId(1));
        assert_eq!(ledger.allocate_id().unwrap(), MessageId(2));
        assert_eq!(&ledger.store().as_bytes()[0..4], &[2, 0, 0, 0]);

        let (ledger, report) = reopen(ledger);
        assert!(report.is_clean());
        assert_eq!(ledger.state().next_id, MessageId(2));
    }

    #[test]
    fn test_pending_round_trip_across_restart() {
        let mut ledger = fresh_ledger();
        let id = ledger.allocate_id().unwrap();
        let payload = Payload::bounded("{\"msg_id\":1,\"alert\":\"ALERT_HIGH\",\"dist\":12.00}", 64);
        let record = ledger.store_pending(id, &payload).unwrap();

        assert_eq!(record.payload.as_str(), "{\"msg_id\":1,\"alert\":");
        assert_eq!(ledger.store().as_bytes()[4], 1);
        assert_eq!(&ledger.store().as_bytes()[5..9], &[1, 0, 0, 0]);

        let (ledger, report) = reopen(ledger);
        assert!(report.is_clean());
        assert_eq!(ledger.pending(), Some(&record));
        assert_eq!(ledger.load_pending().unwrap(), Some(record));
    }

    #[test]
    fn test_clear_pending_survives_restart() {
        let mut ledger = fresh_ledger();
        let id = ledger.allocate_id().unwrap();
        ledger.store_pending(id, &Payload::bounded("x", 20)).unwrap();
        ledger.clear_pending().unwrap();

        assert!(!ledger.has_pending());
        assert_eq!(ledger.load_pending().unwrap(), None);

        let (ledger, _) = reopen(ledger);
        assert!(!ledger.has_pending());
        assert_eq!(ledger.state().next_id, MessageId(1));
    }

    #[test]
    fn test_out_of_range_flag_resets_to_idle() {
        let mut ledger = fresh_ledger();
        let id = ledger.allocate_id().unwrap();
        ledger.store_pending(id, &Payload::bounded("x", 20)).unwrap();

        let mut image = ledger.into_store().as_bytes().to_vec();
        image[OFF_PENDING_FLAG] = 7;
        let (ledger, report) =
            Ledger::open(MemoryStore::from_bytes(image), LedgerLayout::default()).unwrap();

        assert!(report.pending_flag_reset);
        assert!(!ledger.has_pending());
        assert_eq!(ledger.store().as_bytes()[OFF_PENDING_FLAG], 0);
    }

    #[test]
    fn test_checksum_mismatch_drops_record() {
        let mut ledger = fresh_ledger();
        let id = ledger.allocate_id().unwrap();
        ledger.store_pending(id, &Payload::bounded("hello", 20)).unwrap();

        let mut image = ledger.into_store().as_bytes().to_vec();
        image[OFF_PAYLOAD] ^= 0x20;
        let (ledger, report) =
            Ledger::open(MemoryStore::from_bytes(image), LedgerLayout::default()).unwrap();

        assert!(report.record_checksum_reset);
        assert!(!ledger.has_pending());
    }

    #[test]
    fn test_next_id_raised_to_pending_id() {
        let mut ledger = fresh_ledger();
        for _ in 0..5 {
            ledger.allocate_id().unwrap();
        }
        ledger.store_pending(MessageId(5), &Payload::bounded("p", 20)).unwrap();

        let mut image = ledger.into_store().as_bytes().to_vec();
        image[OFF_NEXT_ID..OFF_NEXT_ID + 4].copy_from_slice(&2u32.to_le_bytes());
        let (mut ledger, report) =
            Ledger::open(MemoryStore::from_bytes(image), LedgerLayout::default()).unwrap();

        assert!(report.next_id_raised);
        assert_eq!(ledger.allocate_id().unwrap(), MessageId(6));
    }

    #[test]
    fn test_update_skips_unchanged_bytes() {
        let mut store = MemoryStore::erased(8);
        store.update(0, &[1, 2, 3, 4]).unwrap();
        assert_eq!(store.byte_writes(), 4);
        store.update(0, &[1, 2, 9, 4]).unwrap();
        assert_eq!(store.byte_writes(), 5);
        store.update(0, &[1, 2, 9, 4]).unwrap();
        assert_eq!(store.byte_writes(), 5);
    }

    #[test]
    fn test_memory_store_bounds() {
        let mut store = MemoryStore::erased(4);
        let mut buf = [0u8; 2];
        assert!(store.read(3, &mut buf).is_err());
        assert!(store.write(usize::MAX, &[1]).is_err());
    }

    #[test]
    fn test_file_store_persists_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.bin");
        let layout = LedgerLayout::default();

        {
            let store = FileStore::open(&path, layout.total_len()).unwrap();
            let (mut ledger, report) = Ledger::open(store, layout).unwrap();
            assert!(report.next_id_reset);
            let id = ledger.allocate_id().unwrap();
            ledger.store_pending(id, &Payload::bounded("persisted", 20)).unwrap();
        }

        let store = FileStore::open(&path, layout.total_len()).unwrap();
        let (ledger, report) = Ledger::open(store, layout).unwrap();
        assert!(report.is_clean());
        assert_eq!(ledger.pending().map(|r| r.payload.as_str()), Some("persisted"));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), layout.total_len() as u64);
    }
}
