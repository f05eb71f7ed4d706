//! Online/offline/replaying state machine.

use log::info;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ModeState {
    Online,
    Offline,
    /// Draining the record log; new mutating actions are refused.
    Replaying,
    /// No offline hardware; behaves like Online and cannot go offline.
    Unavailable,
}

/// What boot found before any mode was chosen.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BootCondition {
    HardwareMissing,
    OfflinePreferred,
    /// Buffered actions exist and the link is up; replay runs before
    /// anything is sent directly.
    PendingReplay,
    ConnectFailed,
    Connected,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ModeEvent {
    /// User chose to go offline.
    OfflineRequested,
    /// User chose to go online; replay starts.
    OnlineRequested,
    ReplayDrained,
    ReplayFailed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ModeError {
    InvalidTransition { from: ModeState, event: ModeEvent },
}

#[derive(Debug)]
pub struct ModeController {
    state: ModeState,
    resync_on_next_boot: bool,
}

impl ModeController {
    pub fn boot(condition: BootCondition) -> Self {
        let state = match condition {
            BootCondition::HardwareMissing => ModeState::Unavailable,
            BootCondition::OfflinePreferred
            | BootCondition::PendingReplay
            | BootCondition::ConnectFailed => ModeState::Offline,
            BootCondition::Connected => ModeState::Online,
        };
        info!("mode: boot condition={:?} state={:?}", condition, state);
        Self {
            state,
            resync_on_next_boot: false,
        }
    }

    pub const fn state(&self) -> ModeState {
        self.state
    }

    /// Whether the UI should offer an offline toggle at all.
    pub const fn offline_supported(&self) -> bool {
        !matches!(self.state, ModeState::Unavailable)
    }

    pub fn transition(&mut self, event: ModeEvent) -> Result<ModeState, ModeError> {
        let next = match (self.state, event) {
            (ModeState::Online, ModeEvent::OfflineRequested) => ModeState::Offline,
            (ModeState::Offline, ModeEvent::OnlineRequested) => ModeState::Replaying,
            (ModeState::Replaying, ModeEvent::ReplayDrained) => ModeState::Online,
            (ModeState::Replaying, ModeEvent::ReplayFailed) => ModeState::Offline,
            (from, event) => return Err(ModeError::InvalidTransition { from, event }),
        };
        info!("mode: {:?} -> {:?} on {:?}", self.state, next, event);
        self.state = next;
        Ok(next)
    }

    /// The clock could not be trusted offline; the next boot goes online.
    pub fn request_resync_on_next_boot(&mut self) {
        self.resync_on_next_boot = true;
    }

    pub const fn resync_on_next_boot(&self) -> bool {
        self.resync_on_next_boot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_conditions_pick_initial_state() {
        let cases = [
            (BootCondition::HardwareMissing, ModeState::Unavailable),
            (BootCondition::OfflinePreferred, ModeState::Offline),
            (BootCondition::PendingReplay, ModeState::Offline),
            (BootCondition::ConnectFailed, ModeState::Offline),
            (BootCondition::Connected, ModeState::Online),
        ];
        for (condition, state) in cases {
            assert_eq!(ModeController::boot(condition).state(), state);
        }
    }

    #[test]
    fn full_offline_round_trip() {
        let mut mode = ModeController::boot(BootCondition::Connected);
        assert_eq!(mode.transition(ModeEvent::OfflineRequested), Ok(ModeState::Offline));
        assert_eq!(mode.transition(ModeEvent::OnlineRequested), Ok(ModeState::Replaying));
        assert_eq!(mode.transition(ModeEvent::ReplayFailed), Ok(ModeState::Offline));
        assert_eq!(mode.transition(ModeEvent::OnlineRequested), Ok(ModeState::Replaying));
        assert_eq!(mode.transition(ModeEvent::ReplayDrained), Ok(ModeState::Online));
    }

    #[test]
    fn unavailable_never_goes_offline() {
        let mut mode = ModeController::boot(BootCondition::HardwareMissing);
        assert!(!mode.offline_supported());
        assert_eq!(
            mode.transition(ModeEvent::OfflineRequested),
            Err(ModeError::InvalidTransition {
                from: ModeState::Unavailable,
                event: ModeEvent::OfflineRequested,
            })
        );
        assert_eq!(mode.state(), ModeState::Unavailable);
    }

    #[test]
    fn online_cannot_skip_replay() {
        let mut mode = ModeController::boot(BootCondition::Connected);
        assert!(mode.transition(ModeEvent::OnlineRequested).is_err());
        assert!(mode.transition(ModeEvent::ReplayDrained).is_err());
        assert_eq!(mode.state(), ModeState::Online);
    }

    #[test]
    fn resync_flag_is_sticky() {
        let mut mode = ModeController::boot(BootCondition::OfflinePreferred);
        assert!(!mode.resync_on_next_boot());
        mode.request_resync_on_next_boot();
        assert!(mode.resync_on_next_boot());
    }
}
