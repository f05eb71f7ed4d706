use babypod_core::settings::{PowerControl, Preferences, PreferencesStore};
use embedded_storage::{ReadStorage, Storage};
use esp_bootloader_esp_idf::partitions::{
    DataPartitionSubType, PARTITION_TABLE_MAX_LEN, PartitionType, read_partition_table,
};
use esp_rom_sys::rom::spiflash::{
    ESP_ROM_SPIFLASH_RESULT_OK, esp_rom_spiflash_erase_sector, esp_rom_spiflash_read,
    esp_rom_spiflash_unlock, esp_rom_spiflash_write,
};
use log::info;

const FLASH_SECTOR_SIZE: u32 = 4096;
const DEFAULT_FLASH_CAPACITY_BYTES: usize = 16 * 1024 * 1024;

const PREFS_MAGIC: u32 = 0x3150_5042; // "BPP1"
const PREFS_VERSION: u8 = 1;
const PREFS_RECORD_LEN: usize = 16;
const PREFS_CHECKSUM_AT: usize = PREFS_RECORD_LEN - 4;

const FLAG_OFFLINE: u8 = 0x01;
const FLAG_FORCE_RTC_UPDATE: u8 = 0x02;
const FLAG_PIEZO: u8 = 0x04;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FlashPrefsError {
    PartitionTable,
    PrefsPartitionMissing,
    PartitionTooSmall,
    FlashOpFailed(i32),
    Corrupted,
    Unsupported,
}

#[derive(Debug)]
struct RawFlash;

impl RawFlash {
    fn new() -> Result<Self, FlashPrefsError> {
        let rc = unsafe { esp_rom_spiflash_unlock() };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashPrefsError::FlashOpFailed(rc));
        }
        Ok(Self)
    }

    fn erase_sector(&mut self, sector_addr: u32) -> Result<(), FlashPrefsError> {
        if !sector_addr.is_multiple_of(FLASH_SECTOR_SIZE) {
            return Err(FlashPrefsError::Unsupported);
        }

        let rc = unsafe { esp_rom_spiflash_erase_sector(sector_addr / FLASH_SECTOR_SIZE) };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashPrefsError::FlashOpFailed(rc));
        }
        Ok(())
    }

    fn read_word(&mut self, addr: u32) -> Result<u32, FlashPrefsError> {
        if !addr.is_multiple_of(4) {
            return Err(FlashPrefsError::Unsupported);
        }

        let mut word = 0u32;
        let rc = unsafe { esp_rom_spiflash_read(addr, &mut word as *mut u32 as *const u32, 4) };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashPrefsError::FlashOpFailed(rc));
        }
        Ok(word)
    }

    fn write_word(&mut self, addr: u32, word: u32) -> Result<(), FlashPrefsError> {
        if !addr.is_multiple_of(4) {
            return Err(FlashPrefsError::Unsupported);
        }

        let rc = unsafe { esp_rom_spiflash_write(addr, &word as *const u32, 4) };
        if rc != ESP_ROM_SPIFLASH_RESULT_OK {
            return Err(FlashPrefsError::FlashOpFailed(rc));
        }
        Ok(())
    }

    /// Unaligned read assembled from word reads.
    fn read_bytes(&mut self, addr: u32, out: &mut [u8]) -> Result<(), FlashPrefsError> {
        let start = addr & !0b11;
        let end = (addr + out.len() as u32 + 3) & !0b11;

        for word_addr in (start..end).step_by(4) {
            let bytes = self.read_word(word_addr)?.to_le_bytes();
            for (i, byte) in bytes.iter().enumerate() {
                let pos = (word_addr + i as u32).wrapping_sub(addr) as usize;
                if let Some(slot) = out.get_mut(pos) {
                    *slot = *byte;
                }
            }
        }
        Ok(())
    }

    /// Writes into an erased, word-aligned region; bytes past `data` stay 0xFF.
    fn write_erased_bytes(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashPrefsError> {
        if !addr.is_multiple_of(4) {
            return Err(FlashPrefsError::Unsupported);
        }

        for (i, chunk) in data.chunks(4).enumerate() {
            let mut bytes = [0xFFu8; 4];
            bytes[..chunk.len()].copy_from_slice(chunk);
            self.write_word(addr + 4 * i as u32, u32::from_le_bytes(bytes))?;
        }
        Ok(())
    }
}

impl ReadStorage for RawFlash {
    type Error = FlashPrefsError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.read_bytes(offset, bytes)
    }

    fn capacity(&self) -> usize {
        DEFAULT_FLASH_CAPACITY_BYTES
    }
}

impl Storage for RawFlash {
    fn write(&mut self, _offset: u32, _bytes: &[u8]) -> Result<(), Self::Error> {
        Err(FlashPrefsError::Unsupported)
    }
}

/// Preferences in the last sector of the first writable data partition.
#[derive(Debug)]
pub struct FlashPrefsStore {
    flash: RawFlash,
    sector_addr: u32,
}

impl FlashPrefsStore {
    pub fn new() -> Result<Self, FlashPrefsError> {
        let mut flash = RawFlash::new()?;

        let mut table_buf = [0u8; PARTITION_TABLE_MAX_LEN];
        let table = read_partition_table(&mut flash, &mut table_buf)
            .map_err(|_| FlashPrefsError::PartitionTable)?;

        let mut data_undefined: Option<(u32, u32)> = None;
        let mut fallback_nvs: Option<(u32, u32)> = None;

        for entry in table.iter() {
            if entry.is_read_only() || entry.len() < FLASH_SECTOR_SIZE {
                continue;
            }

            match entry.partition_type() {
                PartitionType::Data(DataPartitionSubType::Undefined) => {
                    data_undefined = Some((entry.offset(), entry.len()));
                    break;
                }
                PartitionType::Data(DataPartitionSubType::Nvs) if fallback_nvs.is_none() => {
                    fallback_nvs = Some((entry.offset(), entry.len()));
                }
                _ => {}
            }
        }

        let (offset, len) = data_undefined
            .or(fallback_nvs)
            .ok_or(FlashPrefsError::PrefsPartitionMissing)?;

        if len < FLASH_SECTOR_SIZE {
            return Err(FlashPrefsError::PartitionTooSmall);
        }

        let sector_addr = offset + len - FLASH_SECTOR_SIZE;
        info!("prefs: flash sector addr={:#x}", sector_addr);
        Ok(Self { flash, sector_addr })
    }
}

impl PreferencesStore for FlashPrefsStore {
    type Error = FlashPrefsError;

    fn load(&mut self) -> Result<Option<Preferences>, Self::Error> {
        let mut buf = [0u8; PREFS_RECORD_LEN];
        self.flash.read_bytes(self.sector_addr, &mut buf)?;
        decode(&buf)
    }

    fn save(&mut self, prefs: &Preferences) -> Result<(), Self::Error> {
        let buf = encode(prefs);
        self.flash.erase_sector(self.sector_addr)?;
        self.flash.write_erased_bytes(self.sector_addr, &buf)
    }
}

fn encode(prefs: &Preferences) -> [u8; PREFS_RECORD_LEN] {
    let mut buf = [0u8; PREFS_RECORD_LEN];
    buf[0..4].copy_from_slice(&PREFS_MAGIC.to_le_bytes());
    buf[4] = PREFS_VERSION;
    let mut flags = 0u8;
    if prefs.offline {
        flags |= FLAG_OFFLINE;
    }
    if prefs.force_rtc_update {
        flags |= FLAG_FORCE_RTC_UPDATE;
    }
    if prefs.piezo {
        flags |= FLAG_PIEZO;
    }
    buf[5] = flags;
    buf[6] = match prefs.power_control {
        PowerControl::HardSwitch => 0,
        PowerControl::SoftPower => 1,
    };
    let checksum = checksum32(&buf[..PREFS_CHECKSUM_AT]);
    buf[PREFS_CHECKSUM_AT..].copy_from_slice(&checksum.to_le_bytes());
    buf
}

/// Erased flash and unknown magic or version read as absent.
fn decode(buf: &[u8; PREFS_RECORD_LEN]) -> Result<Option<Preferences>, FlashPrefsError> {
    if buf.iter().all(|b| *b == 0xFF) {
        return Ok(None);
    }

    let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if magic != PREFS_MAGIC || buf[4] != PREFS_VERSION {
        return Ok(None);
    }

    let expected = u32::from_le_bytes([
        buf[PREFS_CHECKSUM_AT],
        buf[PREFS_CHECKSUM_AT + 1],
        buf[PREFS_CHECKSUM_AT + 2],
        buf[PREFS_CHECKSUM_AT + 3],
    ]);
    if checksum32(&buf[..PREFS_CHECKSUM_AT]) != expected {
        return Err(FlashPrefsError::Corrupted);
    }

    let flags = buf[5];
    let power_control = match buf[6] {
        0 => PowerControl::HardSwitch,
        1 => PowerControl::SoftPower,
        _ => return Err(FlashPrefsError::Corrupted),
    };

    Ok(Some(Preferences {
        offline: flags & FLAG_OFFLINE != 0,
        force_rtc_update: flags & FLAG_FORCE_RTC_UPDATE != 0,
        piezo: flags & FLAG_PIEZO != 0,
        power_control,
    }))
}

fn checksum32(bytes: &[u8]) -> u32 {
    let mut hash = 0x811C9DC5u32;
    for b in bytes {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}
