use super::*;
use crate::{storage::MemoryStore, time::parse_timestamp};

type Store = MemoryStore<8>;

fn at(text: &str) -> Timestamp {
    parse_timestamp(text).unwrap()
}

#[test]
fn fresh_cache_reports_unknown_fields() {
    let mut cache = StateCache::new(Store::new());
    assert_eq!(cache.last_feeding(), Ok(None));
    assert_eq!(cache.last_rtc_sync(), Ok(None));
    assert_eq!(cache.rtc_utc_offset(), Ok(None));
    assert_eq!(cache.active_timer(), Ok(None));
    assert_eq!(cache.last_motd_check(), Ok(None));
}

#[test]
fn motd_check_is_independent_of_rtc_sync() {
    let mut cache = StateCache::new(Store::new());
    cache.set_last_rtc_sync(&at("2024-05-01T06:00:00-04:00")).unwrap();
    cache.set_last_motd_check(&at("2024-05-01T09:15:00-04:00")).unwrap();

    let mut cache = StateCache::new(cache.into_store());
    assert_eq!(
        cache.last_motd_check(),
        Ok(Some(at("2024-05-01T09:15:00-04:00")))
    );
    assert_eq!(
        cache.last_rtc_sync(),
        Ok(Some(at("2024-05-01T06:00:00-04:00")))
    );

    cache.reset().unwrap();
    assert_eq!(cache.last_motd_check(), Ok(None));
}

#[test]
fn fields_survive_reopen() {
    let feeding = FeedingSummary {
        method: FeedingMethod::BothBreasts,
        ended_at: at("2024-05-01T10:20:00-04:00"),
    };
    let mut cache = StateCache::new(Store::new());
    cache.set_last_feeding(&feeding).unwrap();
    cache.set_last_rtc_sync(&at("2024-05-01T06:00:00-04:00")).unwrap();
    cache
        .set_rtc_utc_offset(FixedOffset::west_opt(4 * 3600).unwrap())
        .unwrap();

    let mut cache = StateCache::new(cache.into_store());
    assert_eq!(cache.last_feeding(), Ok(Some(feeding)));
    assert_eq!(
        cache.last_rtc_sync(),
        Ok(Some(at("2024-05-01T06:00:00-04:00")))
    );
    assert_eq!(
        cache.rtc_utc_offset().unwrap().map(|o| o.local_minus_utc()),
        Some(-4 * 3600)
    );
}

#[test]
fn active_timer_is_cleared_by_none() {
    let mut cache = StateCache::new(Store::new());
    let timer = ActiveTimer {
        kind: TimerKind::TummyTime,
        started_at: at("2024-05-01T09:00:00Z"),
        remote_id: Some(31),
    };
    cache.set_active_timer(Some(&timer)).unwrap();
    assert_eq!(cache.active_timer(), Ok(Some(timer)));

    cache.set_active_timer(None).unwrap();
    assert_eq!(cache.active_timer(), Ok(None));
}

#[test]
fn torn_field_is_unknown_and_leaves_others_intact() {
    let mut cache = StateCache::new(Store::new());
    cache.set_last_rtc_sync(&at("2024-05-01T06:00:00Z")).unwrap();
    cache
        .set_last_feeding(&FeedingSummary {
            method: FeedingMethod::Bottle,
            ended_at: at("2024-05-01T07:00:00Z"),
        })
        .unwrap();

    let mut store = cache.into_store();
    assert!(store.corrupt(RecordKey::Cache(CacheSlot::LastFeeding)));

    let mut cache = StateCache::new(store);
    assert_eq!(cache.last_feeding(), Ok(None));
    assert_eq!(cache.last_rtc_sync(), Ok(Some(at("2024-05-01T06:00:00Z"))));
}

#[test]
fn failed_write_keeps_previous_value() {
    let mut cache = StateCache::new(Store::new());
    cache.set_last_rtc_sync(&at("2024-05-01T06:00:00Z")).unwrap();

    let mut store = cache.into_store();
    store.fail_next_commit();
    let mut cache = StateCache::new(store);
    assert_eq!(
        cache.set_last_rtc_sync(&at("2024-05-02T06:00:00Z")),
        Err(StorageError::Unwritable)
    );
    assert_eq!(cache.last_rtc_sync(), Ok(Some(at("2024-05-01T06:00:00Z"))));
}

#[test]
fn reset_forgets_everything() {
    let mut cache = StateCache::new(Store::new());
    cache.set_last_rtc_sync(&at("2024-05-01T06:00:00Z")).unwrap();
    cache
        .set_rtc_utc_offset(FixedOffset::east_opt(0).unwrap())
        .unwrap();
    cache.reset().unwrap();
    assert_eq!(cache.last_rtc_sync(), Ok(None));
    assert_eq!(cache.rtc_utc_offset(), Ok(None));
    assert_eq!(cache.into_store().record_count(), 0);
}
