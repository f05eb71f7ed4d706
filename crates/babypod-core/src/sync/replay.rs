use log::{info, warn};

use super::{OfflineParts, SyncCoordinator, SyncError, note_feeding};
use crate::{
    clock::HardwareClock,
    mode::ModeEvent,
    queue::Sequence,
    remote::{ApiCall, Network, RemoteApi, TimeSource},
    settings::PreferencesStore,
    storage::DurableStore,
};

/// Reported before each record is sent.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReplayProgress {
    /// Zero-based position within this replay.
    pub index: usize,
    pub total: usize,
    pub sequence: Sequence,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReplayReport {
    pub replayed: usize,
}

/// Replay stopped at the first failing record; it and everything after it
/// are still queued.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReplayFailure {
    pub error: SyncError,
    pub replayed: usize,
    pub remaining: usize,
}

impl<B, LS, CS, R, P> SyncCoordinator<B, LS, CS, R, P>
where
    B: RemoteApi + TimeSource + Network,
    LS: DurableStore,
    CS: DurableStore,
    R: HardwareClock,
    P: PreferencesStore,
{
    /// Goes back online by draining the record log front to back.
    ///
    /// Delivery is at-least-once: a power loss between the server accepting
    /// a record and its removal resends it, tagged with the same
    /// idempotency key.
    pub async fn begin_replay(
        &mut self,
        mut progress: impl FnMut(ReplayProgress),
    ) -> Result<ReplayReport, ReplayFailure> {
        let state = self.mode.state();
        let Some(parts) = self.offline.as_mut() else {
            return Err(ReplayFailure {
                error: SyncError::NotReady(state),
                replayed: 0,
                remaining: 0,
            });
        };
        if let Err(err) = self.mode.transition(ModeEvent::OnlineRequested) {
            return Err(ReplayFailure {
                error: err.into(),
                replayed: 0,
                remaining: parts.log.len(),
            });
        }

        info!("sync: replay start pending={}", parts.log.len());
        let connected = if self.backend.is_connected() {
            Ok(())
        } else {
            self.backend.connect(self.config.connect_timeout_ms).await
        };
        let outcome = match connected {
            Ok(()) => {
                drain(
                    &mut self.backend,
                    parts,
                    self.config.call_timeout_ms,
                    &mut progress,
                )
                .await
            }
            // An empty log is trivially drained.
            Err(err) if parts.log.is_empty() => {
                warn!("sync: link not up, nothing to replay err={:?}", err);
                Ok(0)
            }
            Err(err) => Err((SyncError::from(err), 0)),
        };

        match outcome {
            Ok(replayed) => {
                let _ = self.mode.transition(ModeEvent::ReplayDrained);
                let _ = self.prefs.update(|p| p.offline = false);
                info!("sync: replay drained replayed={}", replayed);
                Ok(ReplayReport { replayed })
            }
            Err((error, replayed)) => {
                let remaining = parts.log.len();
                let _ = self.mode.transition(ModeEvent::ReplayFailed);
                let _ = self.prefs.update(|p| p.offline = true);
                self.backend.disconnect();
                warn!(
                    "sync: replay stopped err={:?} replayed={} remaining={}",
                    error, replayed, remaining
                );
                Err(ReplayFailure {
                    error,
                    replayed,
                    remaining,
                })
            }
        }
    }
}

async fn drain<A, LS, CS, R>(
    api: &mut A,
    parts: &mut OfflineParts<LS, CS, R>,
    timeout_ms: u32,
    progress: &mut impl FnMut(ReplayProgress),
) -> Result<usize, (SyncError, usize)>
where
    A: RemoteApi,
    LS: DurableStore,
    CS: DurableStore,
    R: HardwareClock,
{
    let total = parts.log.len();
    let mut replayed = 0usize;
    loop {
        let record = match parts.log.front() {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(replayed),
            Err(err) => return Err((SyncError::from(err), replayed)),
        };
        progress(ReplayProgress {
            index: replayed,
            total,
            sequence: record.sequence,
        });

        let call = ApiCall {
            resource: record.resource,
            action: record.action,
            payload: &record.payload,
            idempotency_key: Some(record.idempotency_key()),
            timeout_ms,
        };
        if let Err(err) = api.call(call).await {
            warn!("sync: replay rejected seq={} err={:?}", record.sequence, err);
            return Err((SyncError::from(err), replayed));
        }
        parts
            .log
            .remove_front()
            .map_err(|err| (SyncError::from(err), replayed))?;
        replayed += 1;

        note_feeding(
            &mut parts.cache,
            record.resource,
            record.action,
            &record.payload,
            Some(record.captured_at),
        );
    }
}
