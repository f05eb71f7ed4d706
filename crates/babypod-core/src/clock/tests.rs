use chrono::NaiveDate;
use embassy_futures::block_on;

use super::*;
use crate::{storage::MemoryStore, time::parse_timestamp};

#[derive(Default)]
struct FakeRtc {
    time: Option<NaiveDateTime>,
    reject_writes: bool,
    writes: u32,
}

impl HardwareClock for FakeRtc {
    type Error = &'static str;

    fn read_time(&mut self) -> Result<Option<NaiveDateTime>, Self::Error> {
        Ok(self.time)
    }

    fn write_time(&mut self, local: &NaiveDateTime) -> Result<(), Self::Error> {
        if self.reject_writes {
            return Err("nak");
        }
        self.time = Some(*local);
        self.writes += 1;
        Ok(())
    }
}

struct FixedSource(Result<Timestamp, ConnectivityError>);

impl TimeSource for FixedSource {
    async fn fetch_authoritative_time(
        &mut self,
        _timeout_ms: u32,
    ) -> Result<Timestamp, ConnectivityError> {
        self.0
    }
}

fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, mo, d)
        .unwrap()
        .and_hms_opt(h, mi, 0)
        .unwrap()
}

fn at(text: &str) -> Timestamp {
    parse_timestamp(text).unwrap()
}

fn clock_at(time: Option<NaiveDateTime>) -> ClockAuthority<FakeRtc> {
    ClockAuthority::new(
        FakeRtc {
            time,
            ..FakeRtc::default()
        },
        ClockConfig::default(),
    )
}

fn synced_cache(last_sync: &str) -> StateCache<MemoryStore<8>> {
    let mut cache = StateCache::new(MemoryStore::new());
    let last_sync = at(last_sync);
    cache.set_rtc_utc_offset(*last_sync.offset()).unwrap();
    cache.set_last_rtc_sync(&last_sync).unwrap();
    cache
}

#[test]
fn now_applies_cached_offset() {
    let mut cache = synced_cache("2024-05-01T06:00:00-04:00");
    let mut clock = clock_at(Some(local(2024, 5, 1, 9, 30)));
    assert_eq!(clock.now(&mut cache), Ok(at("2024-05-01T09:30:00-04:00")));
}

#[test]
fn implausible_years_are_rejected() {
    let mut cache = synced_cache("2024-05-01T06:00:00Z");
    for year in [2000, 2023, 2040] {
        let mut clock = clock_at(Some(local(year, 1, 1, 0, 0)));
        assert_eq!(clock.now(&mut cache), Err(ClockError::Implausible));
        assert!(!clock.status(&mut cache).is_plausible);
    }
    let mut clock = clock_at(Some(local(2039, 12, 31, 23, 59)));
    assert!(clock.now(&mut cache).is_ok());
}

#[test]
fn lost_time_is_implausible() {
    let mut cache = synced_cache("2024-05-01T06:00:00Z");
    let mut clock = clock_at(None);
    assert_eq!(clock.now(&mut cache), Err(ClockError::Implausible));
    let status = clock.status(&mut cache);
    assert_eq!(status.current_time, None);
    assert!(status.is_stale);
}

#[test]
fn unknown_offset_means_never_synced() {
    let mut cache = StateCache::new(MemoryStore::<8>::new());
    let mut clock = clock_at(Some(local(2024, 5, 1, 9, 0)));
    assert_eq!(clock.now(&mut cache), Err(ClockError::NeverSynced));
}

#[test]
fn staleness_follows_the_window() {
    let mut cache = synced_cache("2024-05-01T06:00:00Z");

    let mut fresh = clock_at(Some(local(2024, 5, 1, 18, 0)));
    assert!(!fresh.status(&mut cache).is_stale);

    let mut stale = clock_at(Some(local(2024, 5, 2, 6, 1)));
    assert!(stale.status(&mut cache).is_stale);

    let mut backwards = clock_at(Some(local(2024, 4, 30, 6, 0)));
    assert!(backwards.status(&mut cache).is_stale);
}

#[test]
fn never_synced_is_stale() {
    let mut cache = StateCache::new(MemoryStore::<8>::new());
    let mut clock = clock_at(Some(local(2024, 5, 1, 9, 0)));
    let status = clock.status(&mut cache);
    assert!(status.is_plausible);
    assert!(status.is_stale);
    assert_eq!(status.last_sync, None);
}

#[test]
fn needs_sync_rules() {
    let mut cache = synced_cache("2024-05-01T06:00:00Z");
    let mut fresh = clock_at(Some(local(2024, 5, 1, 7, 0)));
    assert!(!fresh.needs_sync(&mut cache, true, false));
    assert!(fresh.needs_sync(&mut cache, true, true));
    assert!(!fresh.needs_sync(&mut cache, false, true));

    let mut stale = clock_at(Some(local(2024, 5, 9, 7, 0)));
    assert!(stale.needs_sync(&mut cache, true, false));
    assert!(!stale.needs_sync(&mut cache, false, false));

    let mut broken = clock_at(Some(local(2000, 1, 1, 0, 0)));
    assert!(broken.needs_sync(&mut cache, false, false));
}

#[test]
fn sync_sets_rtc_offset_and_last_sync() {
    let mut cache = StateCache::new(MemoryStore::<8>::new());
    let mut clock = clock_at(Some(local(2000, 1, 1, 0, 0)));
    let fetched = at("2024-05-01T10:00:00-04:00");
    let mut source = FixedSource(Ok(fetched));

    assert_eq!(block_on(clock.sync(&mut source, &mut cache, 1_000)), Ok(fetched));
    assert_eq!(clock.now(&mut cache), Ok(fetched));
    assert_eq!(cache.last_rtc_sync(), Ok(Some(fetched)));

    let rtc = clock.into_inner();
    assert_eq!(rtc.time, Some(local(2024, 5, 1, 10, 0)));
    assert_eq!(rtc.writes, 1);
}

#[test]
fn failed_fetch_leaves_rtc_untouched() {
    let mut cache = synced_cache("2024-05-01T06:00:00Z");
    let mut clock = clock_at(Some(local(2024, 5, 3, 6, 0)));
    let mut source = FixedSource(Err(ConnectivityError::Timeout));

    assert_eq!(
        block_on(clock.sync(&mut source, &mut cache, 1_000)),
        Err(ClockError::Fetch(ConnectivityError::Timeout))
    );
    assert_eq!(cache.last_rtc_sync(), Ok(Some(at("2024-05-01T06:00:00Z"))));
    assert_eq!(clock.into_inner().writes, 0);
}

#[test]
fn rejected_rtc_write_does_not_record_sync() {
    let mut cache = StateCache::new(MemoryStore::<8>::new());
    let mut clock = ClockAuthority::new(
        FakeRtc {
            time: Some(local(2024, 1, 1, 0, 0)),
            reject_writes: true,
            writes: 0,
        },
        ClockConfig::default(),
    );
    let mut source = FixedSource(Ok(at("2024-05-01T10:00:00Z")));

    assert_eq!(
        block_on(clock.sync(&mut source, &mut cache, 1_000)),
        Err(ClockError::Hardware)
    );
    assert_eq!(cache.last_rtc_sync(), Ok(None));
}

#[test]
fn rejected_rtc_write_keeps_the_old_offset() {
    // Synced in winter; the fetch that fails to land is after the DST change.
    let mut cache = synced_cache("2024-03-09T06:00:00-05:00");
    let mut clock = ClockAuthority::new(
        FakeRtc {
            time: Some(local(2024, 3, 10, 9, 0)),
            reject_writes: true,
            writes: 0,
        },
        ClockConfig::default(),
    );
    let mut source = FixedSource(Ok(at("2024-03-10T10:00:00-04:00")));

    assert_eq!(
        block_on(clock.sync(&mut source, &mut cache, 1_000)),
        Err(ClockError::Hardware)
    );
    let winter = at("2024-03-09T06:00:00-05:00");
    assert_eq!(cache.rtc_utc_offset(), Ok(Some(*winter.offset())));
    assert_eq!(clock.now(&mut cache), Ok(at("2024-03-10T09:00:00-05:00")));
}
