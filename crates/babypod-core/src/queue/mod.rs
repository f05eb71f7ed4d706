//! Durable, strictly ordered log of actions captured while offline.
//!
//! Each record lives under its own [`RecordKey::Queue`] key. A small cursor
//! record tracks the live window `[head, tail)`, but it is only a hint:
//! [`RecordLog::open`] re-derives both ends by probing the medium, so a
//! power loss between a record commit and its cursor commit never loses or
//! resurrects an entry.

mod record;

use log::{debug, info, warn};

pub use record::{
    Action, ActionRequest, IdempotencyKey, PAYLOAD_BYTES, Payload, QueueRecord, Resource, Sequence,
};

use crate::{
    storage::{
        DurableStore, RECORD_BYTES, RecordKey, StorageError, classify,
        codec::{Reader, RecordBuf, Writer},
    },
    time::Timestamp,
};

const CURSOR_MAGIC: [u8; 4] = *b"BPC1";
const CURSOR_VERSION: u8 = 1;
const FIRST_SEQUENCE: Sequence = 1;

pub struct RecordLog<S: DurableStore> {
    store: S,
    head: Sequence,
    tail: Sequence,
    origin: u32,
}

impl<S: DurableStore> RecordLog<S> {
    /// Loads the log, discarding a torn in-flight append if one is found.
    pub fn open(mut store: S) -> Result<Self, StorageError> {
        let cursor = read_cursor(&mut store)?;
        let (mut head, mut tail) = match cursor {
            Some((head, tail)) => (head.min(tail), tail),
            None => {
                let floor = store
                    .queue_floor()
                    .map_err(|err| classify("queue floor", err))?
                    .unwrap_or(FIRST_SEQUENCE);
                (floor, floor)
            }
        };

        // Removals whose cursor update never landed.
        let mut buf: RecordBuf = [0; RECORD_BYTES];
        while head < tail && !present(&mut store, head, &mut buf)? {
            head += 1;
        }

        // Appends whose cursor update never landed. Only the last record can
        // be a torn append; a corrupt one with successors stays in the window.
        loop {
            match load(&mut store, tail, &mut buf) {
                Ok(Some(_)) => tail += 1,
                Ok(None) => break,
                Err(StorageError::Corrupt) if present(&mut store, tail + 1, &mut buf)? => {
                    warn!("queue: corrupt record kept in window seq={}", tail);
                    tail += 1;
                }
                Err(StorageError::Corrupt) => {
                    warn!("queue: dropping torn record seq={}", tail);
                    store
                        .remove(RecordKey::Queue(tail))
                        .and_then(|()| store.commit())
                        .map_err(|err| classify("queue torn cleanup", err))?;
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        let mut log = Self {
            store,
            head,
            tail,
            origin: 0,
        };
        if cursor != Some((head, tail)) {
            log.persist_cursor();
        }
        info!(
            "queue: opened head={} tail={} pending={}",
            log.head,
            log.tail,
            log.len()
        );
        Ok(log)
    }

    /// Stamps records appended from now on with `origin`.
    ///
    /// Sequences restart when the cursor and every record are lost, so a
    /// per-boot origin keeps idempotency keys distinct across such restarts.
    pub fn with_origin(mut self, origin: u32) -> Self {
        self.origin = origin;
        self
    }

    pub fn len(&self) -> usize {
        (self.tail - self.head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Durably appends an action and returns its sequence number.
    ///
    /// On error the log is unchanged and the caller must treat the action
    /// as not buffered.
    pub fn append(
        &mut self,
        request: &ActionRequest,
        captured_at: Timestamp,
    ) -> Result<Sequence, StorageError> {
        let record = QueueRecord {
            sequence: self.tail,
            origin: self.origin,
            resource: request.resource,
            action: request.action,
            payload: request.payload.clone(),
            captured_at,
        };
        let mut buf: RecordBuf = [0; RECORD_BYTES];
        let len = record.encode(&mut buf)?;

        self.store
            .write(RecordKey::Queue(record.sequence), &buf[..len])
            .map_err(|err| classify("queue append", err))?;
        self.store
            .commit()
            .map_err(|err| classify("queue append commit", err))?;

        self.tail += 1;
        self.persist_cursor();
        debug!(
            "queue: appended seq={} resource={:?} pending={}",
            record.sequence,
            record.resource,
            self.len()
        );
        Ok(record.sequence)
    }

    /// Oldest pending record, if any.
    pub fn front(&mut self) -> Result<Option<QueueRecord>, StorageError> {
        if self.is_empty() {
            return Ok(None);
        }
        let mut buf: RecordBuf = [0; RECORD_BYTES];
        match load(&mut self.store, self.head, &mut buf)? {
            Some(record) => Ok(Some(record)),
            None => {
                warn!("queue: record missing inside window seq={}", self.head);
                Err(StorageError::Corrupt)
            }
        }
    }

    /// Restartable in-order traversal from the oldest pending record.
    pub fn iter(&mut self) -> LogIter<'_, S> {
        LogIter {
            next: self.head,
            tail: self.tail,
            store: &mut self.store,
        }
    }

    /// Durably deletes the oldest record. Empty logs are left untouched.
    pub fn remove_front(&mut self) -> Result<(), StorageError> {
        if self.is_empty() {
            return Ok(());
        }
        self.store
            .remove(RecordKey::Queue(self.head))
            .map_err(|err| classify("queue remove", err))?;
        self.store
            .commit()
            .map_err(|err| classify("queue remove commit", err))?;

        debug!("queue: removed seq={}", self.head);
        self.head += 1;
        self.persist_cursor();
        Ok(())
    }

    pub fn into_store(self) -> S {
        self.store
    }

    // The cursor is a hint; a failed update is repaired by the next open.
    fn persist_cursor(&mut self) {
        let mut buf = [0u8; 24];
        let written = Writer::new(&mut buf, CURSOR_MAGIC, CURSOR_VERSION).and_then(|mut w| {
            w.u32(self.head)?;
            w.u32(self.tail)?;
            w.seal()
        });
        let result = match written {
            Ok(len) => self
                .store
                .write(RecordKey::QueueCursor, &buf[..len])
                .and_then(|()| self.store.commit())
                .map_err(|err| classify("queue cursor", err)),
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!(
                "queue: cursor not updated head={} tail={} err={:?}",
                self.head, self.tail, err
            );
        }
    }
}

pub struct LogIter<'a, S: DurableStore> {
    store: &'a mut S,
    next: Sequence,
    tail: Sequence,
}

impl<S: DurableStore> Iterator for LogIter<'_, S> {
    type Item = Result<QueueRecord, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.tail {
            return None;
        }
        let sequence = self.next;
        self.next += 1;
        let mut buf: RecordBuf = [0; RECORD_BYTES];
        Some(match load(&mut *self.store, sequence, &mut buf) {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(StorageError::Corrupt),
            Err(err) => Err(err),
        })
    }
}

fn read_cursor<S: DurableStore>(store: &mut S) -> Result<Option<(Sequence, Sequence)>, StorageError> {
    let mut buf = [0u8; 24];
    let Some(len) = store
        .read(RecordKey::QueueCursor, &mut buf)
        .map_err(|err| classify("queue cursor read", err))?
    else {
        return Ok(None);
    };
    let parsed = Reader::open(&buf[..len], CURSOR_MAGIC, CURSOR_VERSION).and_then(|mut r| {
        let head = r.u32()?;
        let tail = r.u32()?;
        r.finish()?;
        Ok((head, tail))
    });
    match parsed {
        Ok(cursor) => Ok(Some(cursor)),
        Err(_) => {
            warn!("queue: cursor corrupt, rebuilding from medium");
            Ok(None)
        }
    }
}

fn present<S: DurableStore>(
    store: &mut S,
    sequence: Sequence,
    buf: &mut RecordBuf,
) -> Result<bool, StorageError> {
    Ok(store
        .read(RecordKey::Queue(sequence), buf)
        .map_err(|err| classify("queue lookup", err))?
        .is_some())
}

fn load<S: DurableStore>(
    store: &mut S,
    sequence: Sequence,
    buf: &mut RecordBuf,
) -> Result<Option<QueueRecord>, StorageError> {
    let Some(len) = store
        .read(RecordKey::Queue(sequence), buf)
        .map_err(|err| classify("queue read", err))?
    else {
        return Ok(None);
    };
    let record = QueueRecord::decode(&buf[..len])?;
    if record.sequence != sequence {
        return Err(StorageError::Corrupt);
    }
    Ok(Some(record))
}
