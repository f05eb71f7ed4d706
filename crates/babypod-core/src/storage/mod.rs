//! Durable named-record medium shared by the record log and the state cache.

pub(crate) mod codec;
mod memory;

use log::warn;

pub use memory::MemoryStore;

/// Largest encoded record the engine writes.
pub const RECORD_BYTES: usize = 448;

/// Name of one record on the medium.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RecordKey {
    /// One buffered action, keyed by its sequence number.
    Queue(u32),
    /// Head and tail bookkeeping for the record log.
    QueueCursor,
    Cache(CacheSlot),
}

/// Independently persisted state cache fields.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CacheSlot {
    LastFeeding,
    LastRtcSync,
    RtcUtcOffset,
    ActiveTimer,
    /// When the server's message-of-the-day note was last consumed.
    LastMotdCheck,
}

impl CacheSlot {
    pub const ALL: [CacheSlot; 5] = [
        CacheSlot::LastFeeding,
        CacheSlot::LastRtcSync,
        CacheSlot::RtcUtcOffset,
        CacheSlot::ActiveTimer,
        CacheSlot::LastMotdCheck,
    ];
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StorageError {
    /// The medium has no room for another record.
    Full,
    /// The medium refused the operation (read-only, ejected, I/O failure).
    Unwritable,
    /// A record failed its integrity check.
    Corrupt,
    /// A record does not fit in [`RECORD_BYTES`].
    TooLarge,
}

/// Classifies a concrete medium error.
pub trait MediumError: core::fmt::Debug {
    fn storage_error(&self) -> StorageError;
}

impl MediumError for StorageError {
    fn storage_error(&self) -> StorageError {
        *self
    }
}

/// Byte-level record storage with an explicit commit point.
///
/// `write` and `remove` are staged; only `commit` makes them durable. A
/// power loss before `commit` returns leaves each staged record either
/// untouched, fully written, or torn. Torn records are caught by the
/// checksum every record carries.
pub trait DurableStore {
    type Error: MediumError;

    /// Copies a record into `out` and returns its length, or `None` if absent.
    fn read(&mut self, key: RecordKey, out: &mut [u8]) -> Result<Option<usize>, Self::Error>;
    fn write(&mut self, key: RecordKey, bytes: &[u8]) -> Result<(), Self::Error>;
    /// Removing an absent record succeeds.
    fn remove(&mut self, key: RecordKey) -> Result<(), Self::Error>;
    fn commit(&mut self) -> Result<(), Self::Error>;
    /// Lowest `RecordKey::Queue` sequence present on the medium.
    fn queue_floor(&mut self) -> Result<Option<u32>, Self::Error>;
}

pub(crate) fn classify<E: MediumError>(context: &str, err: E) -> StorageError {
    let kind = err.storage_error();
    warn!("storage: {} failed err={:?} kind={:?}", context, err, kind);
    kind
}
