//! Small persistent key-value cache read while offline.
//!
//! Every field is its own checksummed record, so one write never disturbs
//! another field and a torn write only loses the field being written.

#[cfg(test)]
mod tests;

use chrono::FixedOffset;
use log::{debug, warn};

use crate::{
    storage::{
        CacheSlot, DurableStore, RECORD_BYTES, RecordKey, StorageError, classify,
        codec::{Reader, RecordBuf, Writer},
    },
    time::{self, Timestamp},
    tracking::{FeedingMethod, FeedingSummary},
};

const CACHE_MAGIC: [u8; 4] = *b"BPS1";
const CACHE_VERSION: u8 = 1;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimerKind {
    Feeding,
    Pumping,
    TummyTime,
    Sleep,
}

impl TimerKind {
    const fn code(self) -> u8 {
        match self {
            Self::Feeding => 1,
            Self::Pumping => 2,
            Self::TummyTime => 3,
            Self::Sleep => 4,
        }
    }

    const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::Feeding,
            2 => Self::Pumping,
            3 => Self::TummyTime,
            4 => Self::Sleep,
            _ => return None,
        })
    }
}

/// In-progress timer that survives a reboot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ActiveTimer {
    pub kind: TimerKind,
    pub started_at: Timestamp,
    /// Matching Baby Buddy timer when one was started online.
    pub remote_id: Option<u32>,
}

pub struct StateCache<S: DurableStore> {
    store: S,
}

impl<S: DurableStore> StateCache<S> {
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    pub fn last_feeding(&mut self) -> Result<Option<FeedingSummary>, StorageError> {
        self.get(CacheSlot::LastFeeding, |r| {
            let method = FeedingMethod::from_code(r.u8()?).ok_or(StorageError::Corrupt)?;
            let ended_at = read_time(r)?;
            Ok(FeedingSummary { method, ended_at })
        })
    }

    pub fn set_last_feeding(&mut self, feeding: &FeedingSummary) -> Result<(), StorageError> {
        self.set(CacheSlot::LastFeeding, |w| {
            w.u8(feeding.method.code())?;
            write_time(w, &feeding.ended_at)
        })
    }

    pub fn last_rtc_sync(&mut self) -> Result<Option<Timestamp>, StorageError> {
        self.get(CacheSlot::LastRtcSync, read_time)
    }

    pub fn set_last_rtc_sync(&mut self, at: &Timestamp) -> Result<(), StorageError> {
        self.set(CacheSlot::LastRtcSync, |w| write_time(w, at))
    }

    /// Offset of the local time the RTC keeps.
    pub fn rtc_utc_offset(&mut self) -> Result<Option<FixedOffset>, StorageError> {
        self.get(CacheSlot::RtcUtcOffset, |r| {
            time::offset_from_minutes(r.i16()?).ok_or(StorageError::Corrupt)
        })
    }

    pub fn set_rtc_utc_offset(&mut self, offset: FixedOffset) -> Result<(), StorageError> {
        self.set(CacheSlot::RtcUtcOffset, |w| w.i16(time::offset_minutes(offset)))
    }

    pub fn active_timer(&mut self) -> Result<Option<ActiveTimer>, StorageError> {
        self.get(CacheSlot::ActiveTimer, |r| {
            let kind = TimerKind::from_code(r.u8()?).ok_or(StorageError::Corrupt)?;
            let started_at = read_time(r)?;
            let remote_id = match r.u8()? {
                0 => None,
                _ => Some(r.u32()?),
            };
            Ok(ActiveTimer {
                kind,
                started_at,
                remote_id,
            })
        })
    }

    pub fn set_active_timer(&mut self, timer: Option<&ActiveTimer>) -> Result<(), StorageError> {
        match timer {
            Some(timer) => self.set(CacheSlot::ActiveTimer, |w| {
                w.u8(timer.kind.code())?;
                write_time(w, &timer.started_at)?;
                match timer.remote_id {
                    Some(id) => {
                        w.u8(1)?;
                        w.u32(id)
                    }
                    None => w.u8(0),
                }
            }),
            None => self.clear(CacheSlot::ActiveTimer),
        }
    }

    pub fn last_motd_check(&mut self) -> Result<Option<Timestamp>, StorageError> {
        self.get(CacheSlot::LastMotdCheck, read_time)
    }

    pub fn set_last_motd_check(&mut self, at: &Timestamp) -> Result<(), StorageError> {
        self.set(CacheSlot::LastMotdCheck, |w| write_time(w, at))
    }

    /// Forgets every cached field.
    pub fn reset(&mut self) -> Result<(), StorageError> {
        for slot in CacheSlot::ALL {
            self.store
                .remove(RecordKey::Cache(slot))
                .map_err(|err| classify("cache reset", err))?;
        }
        self.store
            .commit()
            .map_err(|err| classify("cache reset commit", err))
    }

    pub fn into_store(self) -> S {
        self.store
    }

    fn get<T>(
        &mut self,
        slot: CacheSlot,
        parse: impl FnOnce(&mut Reader<'_>) -> Result<T, StorageError>,
    ) -> Result<Option<T>, StorageError> {
        let mut buf: RecordBuf = [0; RECORD_BYTES];
        let Some(len) = self
            .store
            .read(RecordKey::Cache(slot), &mut buf)
            .map_err(|err| classify("cache read", err))?
        else {
            return Ok(None);
        };

        let parsed = Reader::open(&buf[..len], CACHE_MAGIC, CACHE_VERSION).and_then(|mut r| {
            let value = parse(&mut r)?;
            r.finish()?;
            Ok(value)
        });
        match parsed {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!("cache: unreadable field {:?} treated as unknown err={:?}", slot, err);
                Ok(None)
            }
        }
    }

    fn set(
        &mut self,
        slot: CacheSlot,
        fill: impl FnOnce(&mut Writer<'_>) -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        let mut buf = [0u8; 32];
        let mut w = Writer::new(&mut buf, CACHE_MAGIC, CACHE_VERSION)?;
        fill(&mut w)?;
        let len = w.seal()?;
        self.store
            .write(RecordKey::Cache(slot), &buf[..len])
            .map_err(|err| classify("cache write", err))?;
        self.store
            .commit()
            .map_err(|err| classify("cache commit", err))?;
        debug!("cache: stored {:?}", slot);
        Ok(())
    }

    fn clear(&mut self, slot: CacheSlot) -> Result<(), StorageError> {
        self.store
            .remove(RecordKey::Cache(slot))
            .map_err(|err| classify("cache remove", err))?;
        self.store
            .commit()
            .map_err(|err| classify("cache commit", err))
    }
}

fn write_time(w: &mut Writer<'_>, at: &Timestamp) -> Result<(), StorageError> {
    w.i64(at.timestamp())?;
    w.i16(time::offset_minutes(*at.offset()))
}

fn read_time(r: &mut Reader<'_>) -> Result<Timestamp, StorageError> {
    let secs = r.i64()?;
    time::from_unix(secs, r.i16()?).ok_or(StorageError::Corrupt)
}
