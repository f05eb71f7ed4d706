//! Trusted local time backed by the battery RTC.
//!
//! The RTC keeps local wall time without an offset. The offset observed at
//! the last sync lives in the state cache, so a timestamp is only produced
//! once both are known and the RTC reading is plausible.

#[cfg(test)]
mod tests;

use chrono::{Datelike, NaiveDateTime, TimeZone};
use log::{info, warn};

use crate::{
    cache::StateCache,
    remote::{ConnectivityError, TimeSource},
    storage::{DurableStore, StorageError},
    time::Timestamp,
};

/// Battery-backed real-time clock chip.
pub trait HardwareClock {
    type Error: core::fmt::Debug;

    /// Local wall time, or `None` when the chip reports it lost track.
    fn read_time(&mut self) -> Result<Option<NaiveDateTime>, Self::Error>;
    fn write_time(&mut self, local: &NaiveDateTime) -> Result<(), Self::Error>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClockConfig {
    /// Earliest calendar year accepted from the RTC.
    pub year_min: i32,
    /// First calendar year rejected from the RTC.
    pub year_end: i32,
    pub stale_after_secs: u32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            year_min: 2024,
            year_end: 2040,
            stale_after_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClockError {
    /// The time source could not be reached.
    Fetch(ConnectivityError),
    /// The RTC is unreadable, reports lost time, or is outside the plausible range.
    Implausible,
    /// The RTC has never been set against a time source.
    NeverSynced,
    /// Offline with no trusted time; the next boot must go online to sync.
    UnsyncedWhileOffline,
    /// The RTC rejected a write.
    Hardware,
    Storage(StorageError),
    /// A sync was requested without connectivity.
    Offline,
}

impl From<StorageError> for ClockError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClockStatus {
    pub current_time: Option<NaiveDateTime>,
    pub is_plausible: bool,
    pub is_stale: bool,
    pub last_sync: Option<Timestamp>,
}

pub struct ClockAuthority<R: HardwareClock> {
    rtc: R,
    config: ClockConfig,
}

impl<R: HardwareClock> ClockAuthority<R> {
    pub const fn new(rtc: R, config: ClockConfig) -> Self {
        Self { rtc, config }
    }

    pub fn status<S: DurableStore>(&mut self, cache: &mut StateCache<S>) -> ClockStatus {
        let current_time = match self.rtc.read_time() {
            Ok(time) => time,
            Err(err) => {
                warn!("clock: rtc read failed err={:?}", err);
                None
            }
        };
        let is_plausible = current_time.is_some_and(|t| self.plausible_year(t.year()));
        let last_sync = cache.last_rtc_sync().unwrap_or_else(|err| {
            warn!("clock: last sync unreadable err={:?}", err);
            None
        });

        let is_stale = match (current_time, last_sync) {
            (Some(now), Some(synced)) if is_plausible => {
                let elapsed = now.signed_duration_since(synced.naive_local()).num_seconds();
                !(0..=i64::from(self.config.stale_after_secs)).contains(&elapsed)
            }
            _ => true,
        };

        ClockStatus {
            current_time,
            is_plausible,
            is_stale,
            last_sync,
        }
    }

    /// Current local time with the offset recorded at the last sync.
    pub fn now<S: DurableStore>(&mut self, cache: &mut StateCache<S>) -> Result<Timestamp, ClockError> {
        let local = match self.rtc.read_time() {
            Ok(Some(local)) => local,
            Ok(None) => return Err(ClockError::Implausible),
            Err(err) => {
                warn!("clock: rtc read failed err={:?}", err);
                return Err(ClockError::Implausible);
            }
        };
        if !self.plausible_year(local.year()) {
            return Err(ClockError::Implausible);
        }
        let offset = cache.rtc_utc_offset()?.ok_or(ClockError::NeverSynced)?;
        offset
            .from_local_datetime(&local)
            .single()
            .ok_or(ClockError::Implausible)
    }

    /// Whether the RTC should be set from the time source now.
    ///
    /// Offline, only an implausible clock qualifies; the caller cannot fix it
    /// until the next online session.
    pub fn needs_sync<S: DurableStore>(
        &mut self,
        cache: &mut StateCache<S>,
        is_online: bool,
        forced: bool,
    ) -> bool {
        let status = self.status(cache);
        if !is_online {
            return !status.is_plausible || status.last_sync.is_none();
        }
        forced || !status.is_plausible || status.is_stale
    }

    /// Sets the RTC from `source` and records the sync.
    ///
    /// A failed fetch leaves the RTC untouched.
    pub async fn sync<S: DurableStore, T: TimeSource>(
        &mut self,
        source: &mut T,
        cache: &mut StateCache<S>,
        timeout_ms: u32,
    ) -> Result<Timestamp, ClockError> {
        let fetched = source
            .fetch_authoritative_time(timeout_ms)
            .await
            .map_err(|err| {
                warn!("clock: time fetch failed err={:?}", err);
                ClockError::Fetch(err)
            })?;
        if !self.plausible_year(fetched.year()) {
            warn!("clock: time source returned implausible time");
            return Err(ClockError::Implausible);
        }

        // The offset only changes once the RTC holds the matching local time.
        self.rtc.write_time(&fetched.naive_local()).map_err(|err| {
            warn!("clock: rtc write failed err={:?}", err);
            ClockError::Hardware
        })?;
        cache.set_rtc_utc_offset(*fetched.offset())?;
        cache.set_last_rtc_sync(&fetched)?;

        info!(
            "clock: synced local={} offset_s={}",
            fetched.naive_local(),
            fetched.offset().local_minus_utc()
        );
        Ok(fetched)
    }

    pub fn into_inner(self) -> R {
        self.rtc
    }

    fn plausible_year(&self, year: i32) -> bool {
        (self.config.year_min..self.config.year_end).contains(&year)
    }
}
