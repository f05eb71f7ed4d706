//! Wi-Fi state shared between the radio task and the Baby Buddy client.

pub mod http;

use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

pub use http::{ApiConfig, BabyBuddyClient, HttpState, TimeConfig};

/// High-level connectivity state for logs and the status line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ConnectivityState {
    Disconnected = 0,
    Connecting = 1,
    LinkUpNoIp = 2,
    Connected = 3,
    /// Link and address are up but the last API call failed at the network level.
    ApiDegraded = 4,
}

impl ConnectivityState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::LinkUpNoIp,
            3 => Self::Connected,
            4 => Self::ApiDegraded,
            _ => Self::Disconnected,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WifiConfig {
    pub ssid: &'static str,
    pub password: &'static str,
}

impl WifiConfig {
    pub const fn new(ssid: &'static str, password: &'static str) -> Self {
        Self { ssid, password }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConnectivitySnapshot {
    pub state: ConnectivityState,
    /// The engine wants the radio up.
    pub link_requested: bool,
    pub link_up: bool,
    pub has_ipv4: bool,
    pub api_ok: bool,
    pub revision: u32,
}

impl ConnectivitySnapshot {
    pub const fn usable(self) -> bool {
        self.link_up && self.has_ipv4
    }
}

/// Lock-free shared connectivity status.
///
/// The client flips `link_requested`; the radio task owns everything else.
#[derive(Debug)]
pub struct ConnectivityHandle {
    state: AtomicU8,
    link_requested: AtomicBool,
    link_up: AtomicBool,
    has_ipv4: AtomicBool,
    api_ok: AtomicBool,
    revision: AtomicU32,
}

impl ConnectivityHandle {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectivityState::Disconnected as u8),
            link_requested: AtomicBool::new(false),
            link_up: AtomicBool::new(false),
            has_ipv4: AtomicBool::new(false),
            api_ok: AtomicBool::new(false),
            revision: AtomicU32::new(0),
        }
    }

    pub fn snapshot(&self) -> ConnectivitySnapshot {
        ConnectivitySnapshot {
            state: ConnectivityState::from_raw(self.state.load(Ordering::Acquire)),
            link_requested: self.link_requested.load(Ordering::Acquire),
            link_up: self.link_up.load(Ordering::Acquire),
            has_ipv4: self.has_ipv4.load(Ordering::Acquire),
            api_ok: self.api_ok.load(Ordering::Acquire),
            revision: self.revision.load(Ordering::Acquire),
        }
    }

    pub fn request_link(&self, wanted: bool) {
        if self.store_bool(&self.link_requested, wanted) {
            self.bump_revision();
        }
    }

    pub fn link_requested(&self) -> bool {
        self.link_requested.load(Ordering::Acquire)
    }

    pub fn mark_connecting(&self) {
        if self.store_state(ConnectivityState::Connecting) {
            self.bump_revision();
        }
    }

    pub fn mark_disconnected(&self) {
        let mut changed = false;
        changed |= self.store_bool(&self.link_up, false);
        changed |= self.store_bool(&self.has_ipv4, false);
        changed |= self.store_bool(&self.api_ok, false);
        changed |= self.store_state(ConnectivityState::Disconnected);
        if changed {
            self.bump_revision();
        }
    }

    pub fn update_link_ip(&self, link_up: bool, has_ipv4: bool) {
        let mut changed = false;
        changed |= self.store_bool(&self.link_up, link_up);
        changed |= self.store_bool(&self.has_ipv4, has_ipv4);
        if !(link_up && has_ipv4) {
            changed |= self.store_bool(&self.api_ok, false);
        }
        let api_ok = self.api_ok.load(Ordering::Acquire);
        changed |= self.store_state(Self::state_for(link_up, has_ipv4, api_ok));
        if changed {
            self.bump_revision();
        }
    }

    pub fn update_api(&self, api_ok: bool) {
        let mut changed = self.store_bool(&self.api_ok, api_ok);
        let link_up = self.link_up.load(Ordering::Acquire);
        let has_ipv4 = self.has_ipv4.load(Ordering::Acquire);
        changed |= self.store_state(Self::state_for(link_up, has_ipv4, api_ok));
        if changed {
            self.bump_revision();
        }
    }

    fn state_for(link_up: bool, has_ipv4: bool, api_ok: bool) -> ConnectivityState {
        if !link_up {
            ConnectivityState::Disconnected
        } else if !has_ipv4 {
            ConnectivityState::LinkUpNoIp
        } else if api_ok {
            ConnectivityState::Connected
        } else {
            ConnectivityState::ApiDegraded
        }
    }

    fn store_state(&self, next: ConnectivityState) -> bool {
        self.state.swap(next as u8, Ordering::AcqRel) != next as u8
    }

    fn store_bool(&self, cell: &AtomicBool, next: bool) -> bool {
        cell.swap(next, Ordering::AcqRel) != next
    }

    fn bump_revision(&self) {
        self.revision.fetch_add(1, Ordering::AcqRel);
    }
}

impl Default for ConnectivityHandle {
    fn default() -> Self {
        Self::new()
    }
}
