//! Single owner of the log, cache, clock and mode, driven by the flow layer.
//!
//! Every mutation of the record log and state cache goes through one
//! [`SyncCoordinator`], which is itself driven by one task, so the log and
//! cache never see concurrent writers.

mod error;
mod replay;

use log::{info, warn};

pub use error::{HardwareInitError, SyncError};
pub use replay::{ReplayFailure, ReplayProgress, ReplayReport};

use crate::{
    cache::{ActiveTimer, StateCache, TimerKind},
    clock::{ClockAuthority, ClockConfig, ClockError, HardwareClock},
    mode::{BootCondition, ModeController, ModeEvent, ModeState},
    queue::{Action, ActionRequest, RecordLog, Resource, Sequence},
    remote::{ApiCall, ConnectivityError, Network, RemoteApi, ResponseSummary, TimeSource},
    settings::{PowerControl, Preferences, PreferencesHandle, PreferencesStore},
    storage::DurableStore,
    time::Timestamp,
    tracking::FeedingSummary,
};

/// Runtime tunables.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SyncConfig {
    pub call_timeout_ms: u32,
    pub connect_timeout_ms: u32,
    pub clock: ClockConfig,
    /// Period of the opportunistic `maybe_sync_clock` check.
    pub resync_interval_secs: u32,
    /// Random per boot. Stamped on queued records so their idempotency keys
    /// stay unique even if sequence numbers restart.
    pub boot_nonce: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 10_000,
            connect_timeout_ms: 20_000,
            clock: ClockConfig::default(),
            resync_interval_secs: 60 * 60,
            boot_nonce: 0,
        }
    }
}

/// Devices offline mode depends on, as detected at boot.
pub struct OfflineHardware<LS, CS, R> {
    pub log_store: LS,
    pub cache_store: CS,
    pub rtc: R,
}

struct OfflineParts<LS: DurableStore, CS: DurableStore, R: HardwareClock> {
    log: RecordLog<LS>,
    cache: StateCache<CS>,
    clock: ClockAuthority<R>,
}

impl<LS: DurableStore, CS: DurableStore, R: HardwareClock> OfflineParts<LS, CS, R> {
    fn open(
        hardware: OfflineHardware<LS, CS, R>,
        config: &SyncConfig,
    ) -> Result<Self, HardwareInitError> {
        let log = RecordLog::open(hardware.log_store)
            .map_err(HardwareInitError::Storage)?
            .with_origin(config.boot_nonce);
        Ok(Self {
            log,
            cache: StateCache::new(hardware.cache_store),
            clock: ClockAuthority::new(hardware.rtc, config.clock),
        })
    }
}

/// Outcome of `perform`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Performed {
    Sent(ResponseSummary),
    Queued { sequence: Sequence, pending: usize },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CachedField {
    LastFeeding,
    LastRtcSync,
    ActiveTimer,
    LastMotdCheck,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CachedValue {
    LastFeeding(Option<FeedingSummary>),
    LastRtcSync(Option<Timestamp>),
    ActiveTimer(Option<ActiveTimer>),
    LastMotdCheck(Option<Timestamp>),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClockSyncOutcome {
    NotNeeded,
    Synced(Timestamp),
    /// No RTC this session.
    NoClock,
}

/// A finished timer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TimerSpan {
    pub kind: TimerKind,
    pub start: Timestamp,
    pub end: Timestamp,
    pub remote_id: Option<u32>,
}

/// What happened during [`SyncCoordinator::boot`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BootReport {
    pub mode: ModeState,
    pub pending: usize,
    pub hardware_error: Option<HardwareInitError>,
    pub connect_error: Option<ConnectivityError>,
    /// Set when buffered actions were replayed during boot.
    pub replay: Option<Result<ReplayReport, ReplayFailure>>,
    pub clock: Result<ClockSyncOutcome, ClockError>,
}

pub struct SyncCoordinator<B, LS, CS, R, P>
where
    LS: DurableStore,
    CS: DurableStore,
    R: HardwareClock,
    P: PreferencesStore,
{
    backend: B,
    offline: Option<OfflineParts<LS, CS, R>>,
    mode: ModeController,
    prefs: PreferencesHandle<P>,
    config: SyncConfig,
}

impl<B, LS, CS, R, P> SyncCoordinator<B, LS, CS, R, P>
where
    B: RemoteApi + TimeSource + Network,
    LS: DurableStore,
    CS: DurableStore,
    R: HardwareClock,
    P: PreferencesStore,
{
    /// Picks the initial mode and runs the boot-time replay and clock checks.
    pub async fn boot(
        mut backend: B,
        hardware: Result<OfflineHardware<LS, CS, R>, HardwareInitError>,
        prefs_store: P,
        config: SyncConfig,
    ) -> (Self, BootReport) {
        let mut prefs = PreferencesHandle::load(prefs_store);
        let offline = hardware.and_then(|hw| OfflineParts::open(hw, &config));
        let mut hardware_error = None;
        let mut connect_error = None;

        let condition = match &offline {
            Err(err) => {
                warn!("sync: offline support unavailable err={:?}", err);
                hardware_error = Some(*err);
                let _ = prefs.update(|p| p.offline = false);
                if let Err(err) = backend.connect(config.connect_timeout_ms).await {
                    connect_error = Some(err);
                }
                BootCondition::HardwareMissing
            }
            Ok(_) if prefs.get().offline => BootCondition::OfflinePreferred,
            Ok(parts) => match backend.connect(config.connect_timeout_ms).await {
                Ok(()) if parts.log.is_empty() => BootCondition::Connected,
                Ok(()) => BootCondition::PendingReplay,
                Err(err) => {
                    connect_error = Some(err);
                    BootCondition::ConnectFailed
                }
            },
        };

        let mut this = Self {
            backend,
            offline: offline.ok(),
            mode: ModeController::boot(condition),
            prefs,
            config,
        };

        if condition == BootCondition::ConnectFailed {
            let _ = this.prefs.update(|p| p.offline = true);
        }
        let replay = if condition == BootCondition::PendingReplay {
            Some(this.begin_replay(|_| {}).await)
        } else {
            None
        };

        let forced = this.prefs.get().force_rtc_update;
        let clock = this.maybe_sync_clock(forced).await;
        if this.mode.state() == ModeState::Online {
            this.refresh_last_feeding().await;
        }

        let report = BootReport {
            mode: this.mode.state(),
            pending: this.pending_count(),
            hardware_error,
            connect_error,
            replay,
            clock,
        };
        info!(
            "sync: boot mode={:?} pending={} clock={:?}",
            report.mode, report.pending, report.clock
        );
        (this, report)
    }

    pub fn current_mode(&self) -> ModeState {
        self.mode.state()
    }

    pub fn pending_count(&self) -> usize {
        self.offline.as_ref().map_or(0, |parts| parts.log.len())
    }

    pub fn offline_supported(&self) -> bool {
        self.mode.offline_supported()
    }

    pub fn resync_on_next_boot(&self) -> bool {
        self.mode.resync_on_next_boot()
    }

    pub fn preferences(&self) -> Preferences {
        self.prefs.get()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn set_piezo(&mut self, enabled: bool) {
        let _ = self.prefs.update(|p| p.piezo = enabled);
    }

    pub fn set_power_control(&mut self, control: PowerControl) {
        let _ = self.prefs.update(|p| p.power_control = control);
    }

    /// Sends the action now or buffers it, depending on the mode.
    ///
    /// Online failures are returned as-is; nothing is queued for retry.
    pub async fn perform(&mut self, request: &ActionRequest) -> Result<Performed, SyncError> {
        match self.mode.state() {
            ModeState::Online | ModeState::Unavailable => {
                let response = self
                    .backend
                    .call(ApiCall {
                        resource: request.resource,
                        action: request.action,
                        payload: &request.payload,
                        idempotency_key: None,
                        timeout_ms: self.config.call_timeout_ms,
                    })
                    .await?;
                if let Some(parts) = self.offline.as_mut() {
                    let now = parts.clock.now(&mut parts.cache).ok();
                    note_feeding(
                        &mut parts.cache,
                        request.resource,
                        request.action,
                        &request.payload,
                        now,
                    );
                }
                Ok(Performed::Sent(response))
            }
            ModeState::Offline => {
                let parts = self
                    .offline
                    .as_mut()
                    .ok_or(SyncError::NotReady(ModeState::Offline))?;
                let captured_at = parts.clock.now(&mut parts.cache)?;
                let sequence = parts.log.append(request, captured_at)?;
                note_feeding(
                    &mut parts.cache,
                    request.resource,
                    request.action,
                    &request.payload,
                    Some(captured_at),
                );
                info!(
                    "sync: queued seq={} resource={:?} pending={}",
                    sequence,
                    request.resource,
                    parts.log.len()
                );
                Ok(Performed::Queued {
                    sequence,
                    pending: parts.log.len(),
                })
            }
            ModeState::Replaying => Err(SyncError::NotReady(ModeState::Replaying)),
        }
    }

    /// Reads a cached field; meant for offline screens.
    pub fn query_cached(&mut self, field: CachedField) -> Result<CachedValue, SyncError> {
        let parts = self.parts()?;
        Ok(match field {
            CachedField::LastFeeding => CachedValue::LastFeeding(parts.cache.last_feeding()?),
            CachedField::LastRtcSync => CachedValue::LastRtcSync(parts.cache.last_rtc_sync()?),
            CachedField::ActiveTimer => CachedValue::ActiveTimer(parts.cache.active_timer()?),
            CachedField::LastMotdCheck => {
                CachedValue::LastMotdCheck(parts.cache.last_motd_check()?)
            }
        })
    }

    /// User asked to go offline.
    pub fn go_offline(&mut self) -> Result<(), SyncError> {
        if self.offline.is_none() {
            return Err(SyncError::NotReady(self.mode.state()));
        }
        self.mode.transition(ModeEvent::OfflineRequested)?;
        let _ = self.prefs.update(|p| p.offline = true);
        self.backend.disconnect();
        Ok(())
    }

    /// Syncs the RTC when the clock authority asks for it.
    ///
    /// Offline, an untrusted clock cannot be fixed; it is reported and the
    /// next boot is steered online.
    pub async fn maybe_sync_clock(&mut self, forced: bool) -> Result<ClockSyncOutcome, ClockError> {
        let Some(parts) = self.offline.as_mut() else {
            return Ok(ClockSyncOutcome::NoClock);
        };
        let online = self.mode.state() == ModeState::Online;
        if !parts.clock.needs_sync(&mut parts.cache, online, forced) {
            return Ok(ClockSyncOutcome::NotNeeded);
        }

        if !online {
            warn!("sync: clock untrusted while offline, going online next boot");
            self.mode.request_resync_on_next_boot();
            let _ = self.prefs.update(|p| {
                p.offline = false;
                p.force_rtc_update = true;
            });
            return Err(ClockError::UnsyncedWhileOffline);
        }

        match parts
            .clock
            .sync(&mut self.backend, &mut parts.cache, self.config.call_timeout_ms)
            .await
        {
            Ok(at) => {
                let _ = self.prefs.update(|p| p.force_rtc_update = false);
                Ok(ClockSyncOutcome::Synced(at))
            }
            Err(err) => {
                let _ = self.prefs.update(|p| p.force_rtc_update = true);
                Err(err)
            }
        }
    }

    pub fn now(&mut self) -> Result<Timestamp, SyncError> {
        let parts = self.parts()?;
        Ok(parts.clock.now(&mut parts.cache)?)
    }

    /// Starts a locally measured timer, replacing any running one.
    pub fn start_timer(
        &mut self,
        kind: TimerKind,
        remote_id: Option<u32>,
    ) -> Result<ActiveTimer, SyncError> {
        let parts = self.parts()?;
        let timer = ActiveTimer {
            kind,
            started_at: parts.clock.now(&mut parts.cache)?,
            remote_id,
        };
        parts.cache.set_active_timer(Some(&timer))?;
        info!("sync: timer started kind={:?}", kind);
        Ok(timer)
    }

    pub fn active_timer(&mut self) -> Result<Option<ActiveTimer>, SyncError> {
        Ok(self.parts()?.cache.active_timer()?)
    }

    /// Stops the running timer and returns its span.
    pub fn finish_timer(&mut self) -> Result<Option<TimerSpan>, SyncError> {
        let parts = self.parts()?;
        let Some(timer) = parts.cache.active_timer()? else {
            return Ok(None);
        };
        let end = parts.clock.now(&mut parts.cache)?;
        parts.cache.set_active_timer(None)?;
        Ok(Some(TimerSpan {
            kind: timer.kind,
            start: timer.started_at,
            end,
            remote_id: timer.remote_id,
        }))
    }

    pub fn abort_timer(&mut self) -> Result<Option<ActiveTimer>, SyncError> {
        let parts = self.parts()?;
        let timer = parts.cache.active_timer()?;
        parts.cache.set_active_timer(None)?;
        if let Some(timer) = &timer {
            info!("sync: timer aborted kind={:?}", timer.kind);
        }
        Ok(timer)
    }

    /// Whether the message-of-the-day note should be fetched again.
    ///
    /// Only online sessions with a clock check; a never-checked or
    /// backwards-running clock counts as due.
    pub fn motd_check_due(&mut self, interval_secs: u32) -> Result<bool, SyncError> {
        if self.mode.state() != ModeState::Online {
            return Ok(false);
        }
        let parts = self.parts()?;
        let now = parts.clock.now(&mut parts.cache)?;
        Ok(match parts.cache.last_motd_check()? {
            Some(last) => {
                let elapsed = now.signed_duration_since(last).num_seconds();
                !(0..i64::from(interval_secs)).contains(&elapsed)
            }
            None => true,
        })
    }

    /// Records that the message of the day was just fetched.
    pub fn record_motd_check(&mut self) -> Result<Timestamp, SyncError> {
        let parts = self.parts()?;
        let now = parts.clock.now(&mut parts.cache)?;
        parts.cache.set_last_motd_check(&now)?;
        Ok(now)
    }

    /// Clears every cached field. The record log is left alone.
    pub fn debug_reset_cache(&mut self) -> Result<(), SyncError> {
        warn!("sync: resetting state cache");
        Ok(self.parts()?.cache.reset()?)
    }

    fn parts(&mut self) -> Result<&mut OfflineParts<LS, CS, R>, SyncError> {
        let state = self.mode.state();
        self.offline.as_mut().ok_or(SyncError::NotReady(state))
    }

    async fn refresh_last_feeding(&mut self) {
        let Some(parts) = self.offline.as_mut() else {
            return;
        };
        match self.backend.last_feeding(self.config.call_timeout_ms).await {
            Ok(Some(feeding)) => {
                if let Err(err) = parts.cache.set_last_feeding(&feeding) {
                    warn!("sync: last feeding not cached err={:?}", err);
                }
            }
            Ok(None) => {}
            Err(err) => warn!("sync: last feeding refresh failed err={:?}", err),
        }
    }
}

/// Refreshes the cached last feeding after a feeding was written.
fn note_feeding<S: DurableStore>(
    cache: &mut StateCache<S>,
    resource: Resource,
    action: Action,
    payload: &[u8],
    fallback: Option<Timestamp>,
) {
    if resource != Resource::Feeding || action != Action::Create {
        return;
    }
    if let Some(summary) = FeedingSummary::from_payload(payload, fallback)
        && let Err(err) = cache.set_last_feeding(&summary)
    {
        warn!("sync: last feeding not cached err={:?}", err);
    }
}
