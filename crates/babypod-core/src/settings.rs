//! Persisted device preferences.

use log::warn;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PowerControl {
    /// A physical switch cuts power.
    HardSwitch,
    /// The encoder button requests a soft power-off.
    SoftPower,
}

/// Preferences that survive reboot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Preferences {
    /// Start the next boot offline and buffer actions locally.
    pub offline: bool,
    /// Sync the RTC on the next online boot regardless of staleness.
    pub force_rtc_update: bool,
    pub piezo: bool,
    pub power_control: PowerControl,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            offline: false,
            force_rtc_update: false,
            piezo: true,
            power_control: PowerControl::HardSwitch,
        }
    }
}

/// Abstract preferences persistence backend.
pub trait PreferencesStore {
    type Error: core::fmt::Debug;

    fn load(&mut self) -> Result<Option<Preferences>, Self::Error>;
    fn save(&mut self, prefs: &Preferences) -> Result<(), Self::Error>;
}

/// Write-through cache over a [`PreferencesStore`].
pub struct PreferencesHandle<P: PreferencesStore> {
    store: P,
    current: Preferences,
}

impl<P: PreferencesStore> PreferencesHandle<P> {
    /// Loads stored preferences; unreadable stores fall back to defaults.
    pub fn load(mut store: P) -> Self {
        let current = match store.load() {
            Ok(Some(prefs)) => prefs,
            Ok(None) => Preferences::default(),
            Err(err) => {
                warn!("prefs: load failed, using defaults err={:?}", err);
                Preferences::default()
            }
        };
        Self { store, current }
    }

    pub fn get(&self) -> Preferences {
        self.current
    }

    /// Applies `edit` and saves if anything changed.
    ///
    /// Save failures are logged; the in-memory value still changes so the
    /// running session behaves as requested.
    pub fn update(&mut self, edit: impl FnOnce(&mut Preferences)) -> Result<(), P::Error> {
        let mut next = self.current;
        edit(&mut next);
        if next == self.current {
            return Ok(());
        }
        self.current = next;
        self.store.save(&next).inspect_err(|err| {
            warn!("prefs: save failed err={:?}", err);
        })
    }

    pub fn store(&self) -> &P {
        &self.store
    }
}

/// Volatile [`PreferencesStore`] for hosts without flash.
#[derive(Clone, Debug, Default)]
pub struct MemoryPreferences {
    saved: Option<Preferences>,
    pub saves: u32,
    pub fail_saves: bool,
}

impl MemoryPreferences {
    pub const fn with(prefs: Preferences) -> Self {
        Self {
            saved: Some(prefs),
            saves: 0,
            fail_saves: false,
        }
    }

    pub fn saved(&self) -> Option<Preferences> {
        self.saved
    }
}

impl PreferencesStore for MemoryPreferences {
    type Error = ();

    fn load(&mut self) -> Result<Option<Preferences>, Self::Error> {
        Ok(self.saved)
    }

    fn save(&mut self, prefs: &Preferences) -> Result<(), Self::Error> {
        if self.fail_saves {
            return Err(());
        }
        self.saved = Some(*prefs);
        self.saves += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_update_does_not_write() {
        let mut prefs = PreferencesHandle::load(MemoryPreferences::default());
        prefs.update(|p| p.piezo = true).unwrap();
        assert_eq!(prefs.store().saves, 0);

        prefs.update(|p| p.offline = true).unwrap();
        assert_eq!(prefs.store().saves, 1);
        assert_eq!(prefs.store().saved().map(|p| p.offline), Some(true));
    }

    #[test]
    fn failed_save_still_applies_in_memory() {
        let mut store = MemoryPreferences::default();
        store.fail_saves = true;
        let mut prefs = PreferencesHandle::load(store);
        assert_eq!(prefs.update(|p| p.force_rtc_update = true), Err(()));
        assert!(prefs.get().force_rtc_update);
    }
}
