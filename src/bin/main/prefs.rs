use babypod_core::settings::{MemoryPreferences, Preferences, PreferencesStore};
use babypod_hal_esp32s3::storage::flash_prefs::{FlashPrefsError, FlashPrefsStore};
use log::warn;

/// Flash-backed preferences, or RAM-only ones when no partition is usable.
pub enum BoardPrefs {
    Flash(FlashPrefsStore),
    Volatile(MemoryPreferences),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BoardPrefsError {
    Flash(FlashPrefsError),
    Volatile,
}

impl BoardPrefs {
    pub fn open() -> Self {
        match FlashPrefsStore::new() {
            Ok(store) => Self::Flash(store),
            Err(err) => {
                warn!("prefs: flash unavailable, not persisting err={:?}", err);
                Self::Volatile(MemoryPreferences::default())
            }
        }
    }
}

impl PreferencesStore for BoardPrefs {
    type Error = BoardPrefsError;

    fn load(&mut self) -> Result<Option<Preferences>, Self::Error> {
        match self {
            Self::Flash(store) => store.load().map_err(BoardPrefsError::Flash),
            Self::Volatile(store) => store.load().map_err(|()| BoardPrefsError::Volatile),
        }
    }

    fn save(&mut self, prefs: &Preferences) -> Result<(), Self::Error> {
        match self {
            Self::Flash(store) => store.save(prefs).map_err(BoardPrefsError::Flash),
            Self::Volatile(store) => store.save(prefs).map_err(|()| BoardPrefsError::Volatile),
        }
    }
}
