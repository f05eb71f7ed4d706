pub mod flash_prefs;
pub mod sd_records;
