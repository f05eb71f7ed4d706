//! RAM-backed [`DurableStore`] with power-loss and fault injection.

use heapless::Vec;

use super::{DurableStore, RECORD_BYTES, RecordKey, StorageError};

const STAGED_OPS: usize = 4;

#[derive(Clone, Debug)]
struct Slot {
    key: RecordKey,
    bytes: Vec<u8, RECORD_BYTES>,
}

#[derive(Clone, Debug)]
enum Staged {
    Write(Slot),
    Remove(RecordKey),
}

/// Volatile store holding at most `SLOTS` committed records.
#[derive(Clone, Debug)]
pub struct MemoryStore<const SLOTS: usize> {
    committed: Vec<Slot, SLOTS>,
    staged: Vec<Staged, STAGED_OPS>,
    read_only: bool,
    fail_next_commit: bool,
    commits: u32,
}

impl<const SLOTS: usize> Default for MemoryStore<SLOTS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SLOTS: usize> MemoryStore<SLOTS> {
    pub const fn new() -> Self {
        Self {
            committed: Vec::new(),
            staged: Vec::new(),
            read_only: false,
            fail_next_commit: false,
            commits: 0,
        }
    }

    /// Rejects every subsequent write, remove, and commit.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Makes the next commit fail and discard what it staged.
    pub fn fail_next_commit(&mut self) {
        self.fail_next_commit = true;
    }

    /// Drops staged changes, as if power was cut before `commit`.
    pub fn power_loss(&mut self) {
        self.staged.clear();
    }

    /// Applies staged changes, tearing the last staged write down to
    /// `keep` bytes, as if power was cut in the middle of `commit`.
    pub fn power_loss_during_commit(&mut self, keep: usize) {
        let last_write = self
            .staged
            .iter()
            .rposition(|op| matches!(op, Staged::Write(_)));
        if let Some(index) = last_write
            && let Staged::Write(slot) = &mut self.staged[index]
        {
            slot.bytes.truncate(keep);
        }
        let staged = core::mem::take(&mut self.staged);
        let mut next = self.committed.clone();
        for op in staged {
            let _ = apply(&mut next, op);
        }
        self.committed = next;
    }

    /// Flips one bit of a committed record.
    pub fn corrupt(&mut self, key: RecordKey) -> bool {
        match self.committed.iter_mut().find(|slot| slot.key == key) {
            Some(slot) if !slot.bytes.is_empty() => {
                let mid = slot.bytes.len() / 2;
                slot.bytes[mid] ^= 0x40;
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, key: RecordKey) -> bool {
        self.committed.iter().any(|slot| slot.key == key)
    }

    pub fn record_count(&self) -> usize {
        self.committed.len()
    }

    pub fn commit_count(&self) -> u32 {
        self.commits
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.read_only {
            Err(StorageError::Unwritable)
        } else {
            Ok(())
        }
    }

    fn stage(&mut self, op: Staged) -> Result<(), StorageError> {
        self.staged.push(op).map_err(|_| StorageError::Full)
    }
}

fn apply<const SLOTS: usize>(records: &mut Vec<Slot, SLOTS>, op: Staged) -> Result<(), StorageError> {
    match op {
        Staged::Write(slot) => {
            if let Some(existing) = records.iter_mut().find(|s| s.key == slot.key) {
                *existing = slot;
                Ok(())
            } else {
                records.push(slot).map_err(|_| StorageError::Full)
            }
        }
        Staged::Remove(key) => {
            records.retain(|s| s.key != key);
            Ok(())
        }
    }
}

impl<const SLOTS: usize> DurableStore for MemoryStore<SLOTS> {
    type Error = StorageError;

    fn read(&mut self, key: RecordKey, out: &mut [u8]) -> Result<Option<usize>, Self::Error> {
        let Some(slot) = self.committed.iter().find(|slot| slot.key == key) else {
            return Ok(None);
        };
        let dst = out
            .get_mut(..slot.bytes.len())
            .ok_or(StorageError::TooLarge)?;
        dst.copy_from_slice(&slot.bytes);
        Ok(Some(slot.bytes.len()))
    }

    fn write(&mut self, key: RecordKey, bytes: &[u8]) -> Result<(), Self::Error> {
        self.check_writable()?;
        let bytes = Vec::from_slice(bytes).map_err(|_| StorageError::TooLarge)?;
        self.stage(Staged::Write(Slot { key, bytes }))
    }

    fn remove(&mut self, key: RecordKey) -> Result<(), Self::Error> {
        self.check_writable()?;
        self.stage(Staged::Remove(key))
    }

    fn commit(&mut self) -> Result<(), Self::Error> {
        let staged = core::mem::take(&mut self.staged);
        self.check_writable()?;
        if core::mem::take(&mut self.fail_next_commit) {
            return Err(StorageError::Unwritable);
        }

        let mut next = self.committed.clone();
        for op in staged {
            apply(&mut next, op)?;
        }
        self.committed = next;
        self.commits = self.commits.wrapping_add(1);
        Ok(())
    }

    fn queue_floor(&mut self) -> Result<Option<u32>, Self::Error> {
        Ok(self
            .committed
            .iter()
            .filter_map(|slot| match slot.key {
                RecordKey::Queue(seq) => Some(seq),
                _ => None,
            })
            .min())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_writes_are_invisible_until_commit() {
        let mut store = MemoryStore::<4>::new();
        store.write(RecordKey::QueueCursor, b"abc").unwrap();

        let mut out = [0u8; 8];
        assert_eq!(store.read(RecordKey::QueueCursor, &mut out), Ok(None));

        store.commit().unwrap();
        assert_eq!(store.read(RecordKey::QueueCursor, &mut out), Ok(Some(3)));
        assert_eq!(&out[..3], b"abc");
    }

    #[test]
    fn power_loss_discards_staged_changes() {
        let mut store = MemoryStore::<4>::new();
        store.write(RecordKey::Queue(1), b"one").unwrap();
        store.power_loss();
        store.commit().unwrap();
        assert!(!store.contains(RecordKey::Queue(1)));
    }

    #[test]
    fn capacity_overflow_rolls_back_whole_commit() {
        let mut store = MemoryStore::<1>::new();
        store.write(RecordKey::Queue(1), b"one").unwrap();
        store.commit().unwrap();

        store.write(RecordKey::Queue(1), b"uno").unwrap();
        store.write(RecordKey::Queue(2), b"two").unwrap();
        assert_eq!(store.commit(), Err(StorageError::Full));

        let mut out = [0u8; 8];
        assert_eq!(store.read(RecordKey::Queue(1), &mut out), Ok(Some(3)));
        assert_eq!(&out[..3], b"one");
    }

    #[test]
    fn read_only_medium_rejects_writes() {
        let mut store = MemoryStore::<2>::new();
        store.set_read_only(true);
        assert_eq!(
            store.write(RecordKey::QueueCursor, b"x"),
            Err(StorageError::Unwritable)
        );
    }

    #[test]
    fn queue_floor_ignores_other_keys() {
        let mut store = MemoryStore::<4>::new();
        store.write(RecordKey::QueueCursor, b"c").unwrap();
        store.write(RecordKey::Queue(9), b"9").unwrap();
        store.write(RecordKey::Queue(7), b"7").unwrap();
        store.commit().unwrap();
        assert_eq!(store.queue_floor(), Ok(Some(7)));
    }
}
