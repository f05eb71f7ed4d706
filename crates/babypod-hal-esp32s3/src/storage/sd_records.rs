//! SD card [`DurableStore`]: one 8.3 file per record under `/BABYPOD`.
//!
//! Writes and removals are staged in RAM and applied by `commit` in one
//! volume session. Each file is truncated, rewritten and closed; a torn
//! rewrite is caught by the checksum every record carries.

use core::{cell::RefCell, fmt::Write as _};

use babypod_core::storage::{
    CacheSlot, DurableStore, MediumError, RECORD_BYTES, RecordKey, StorageError,
};
use embedded_hal::{
    delay::DelayNs,
    digital::OutputPin,
    spi::{Error as SpiErrorTrait, ErrorKind, ErrorType, Operation, SpiBus, SpiDevice},
};
use embedded_sdmmc::{
    BlockDevice, Directory, Mode, SdCard, SdCardError, ShortFileName, TimeSource, Timestamp,
    VolumeIdx, VolumeManager,
};
use heapless::{String, Vec};
use log::{info, warn};

const RECORD_DIR: &str = "BABYPOD";
const STAGED_OPS: usize = 4;
/// `Q` plus seven hex digits fills an 8.3 base name.
const MAX_QUEUE_SEQUENCE: u32 = 0x0FFF_FFFF;

type FileName = String<12>;
type FsError = embedded_sdmmc::Error<SdCardError>;

/// FAT timestamps are not used by the record format.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedTimeSource;

impl TimeSource for FixedTimeSource {
    fn get_timestamp(&self) -> Timestamp {
        // 2024-01-01 00:00:00
        Timestamp {
            year_since_1970: 54,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

#[derive(Debug)]
pub enum SdStoreError<BusErr, CsErr>
where
    BusErr: core::fmt::Debug,
    CsErr: core::fmt::Debug,
{
    ChipSelect(CsErr),
    Spi(BusErr),
    Card(SdCardError),
    Filesystem(FsError),
    /// Another store handle is mid-operation on the card.
    Busy,
    /// More than the staging capacity between commits.
    StagingFull,
    TooLarge,
    /// Sequence too large for an 8.3 queue file name.
    NameOutOfRange,
}

impl<BusErr, CsErr> MediumError for SdStoreError<BusErr, CsErr>
where
    BusErr: core::fmt::Debug,
    CsErr: core::fmt::Debug,
{
    fn storage_error(&self) -> StorageError {
        match self {
            Self::Filesystem(embedded_sdmmc::Error::NotEnoughSpace)
            | Self::Filesystem(embedded_sdmmc::Error::DiskFull)
            | Self::StagingFull
            | Self::NameOutOfRange => StorageError::Full,
            Self::TooLarge => StorageError::TooLarge,
            _ => StorageError::Unwritable,
        }
    }
}

#[derive(Debug)]
enum ExclusiveSpiError<BusErr, CsErr>
where
    BusErr: core::fmt::Debug,
    CsErr: core::fmt::Debug,
{
    Bus(BusErr),
    Cs(CsErr),
    DelayNotSupported,
}

impl<BusErr, CsErr> SpiErrorTrait for ExclusiveSpiError<BusErr, CsErr>
where
    BusErr: core::fmt::Debug,
    CsErr: core::fmt::Debug,
{
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// `SpiDevice` over a bus the card has to itself.
struct ExclusiveSpiDevice<'a, BUS, CS> {
    bus: &'a mut BUS,
    cs: &'a mut CS,
}

impl<BUS, CS> ErrorType for ExclusiveSpiDevice<'_, BUS, CS>
where
    BUS: SpiBus<u8>,
    CS: OutputPin,
    BUS::Error: core::fmt::Debug,
    CS::Error: core::fmt::Debug,
{
    type Error = ExclusiveSpiError<BUS::Error, CS::Error>;
}

impl<BUS, CS> SpiDevice<u8> for ExclusiveSpiDevice<'_, BUS, CS>
where
    BUS: SpiBus<u8>,
    CS: OutputPin,
    BUS::Error: core::fmt::Debug,
    CS::Error: core::fmt::Debug,
{
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Self::Error> {
        self.cs.set_low().map_err(ExclusiveSpiError::Cs)?;

        let op_result = (|| {
            for operation in operations {
                match operation {
                    Operation::Read(buf) => self.bus.read(buf).map_err(ExclusiveSpiError::Bus)?,
                    Operation::Write(buf) => self.bus.write(buf).map_err(ExclusiveSpiError::Bus)?,
                    Operation::Transfer(read, write) => self
                        .bus
                        .transfer(read, write)
                        .map_err(ExclusiveSpiError::Bus)?,
                    Operation::TransferInPlace(buf) => self
                        .bus
                        .transfer_in_place(buf)
                        .map_err(ExclusiveSpiError::Bus)?,
                    Operation::DelayNs(_) => return Err(ExclusiveSpiError::DelayNotSupported),
                }
            }
            self.bus.flush().map_err(ExclusiveSpiError::Bus)
        })();

        let cs_result = self.cs.set_high().map_err(ExclusiveSpiError::Cs);
        op_result.and(cs_result)
    }
}

struct DelayRef<'a, D>(&'a mut D);

impl<D: DelayNs> DelayNs for DelayRef<'_, D> {
    fn delay_ns(&mut self, ns: u32) {
        self.0.delay_ns(ns);
    }
}

/// The SD card and its SPI wiring, shared by every [`SdRecordStore`].
pub struct SdCardBus<BUS, CS, DELAY> {
    bus: BUS,
    cs: CS,
    delay: DELAY,
}

impl<BUS, CS, DELAY> SdCardBus<BUS, CS, DELAY>
where
    BUS: SpiBus<u8>,
    CS: OutputPin,
    DELAY: DelayNs,
    BUS::Error: core::fmt::Debug,
    CS::Error: core::fmt::Debug,
{
    pub const fn new(bus: BUS, cs: CS, delay: DELAY) -> Self {
        Self { bus, cs, delay }
    }

    /// Checks a card answers and the record directory exists.
    pub fn probe(&mut self) -> Result<u64, SdStoreError<BUS::Error, CS::Error>> {
        self.preclock()?;
        let card = SdCard::new(
            ExclusiveSpiDevice {
                bus: &mut self.bus,
                cs: &mut self.cs,
            },
            DelayRef(&mut self.delay),
        );
        let card_size_bytes = card.num_bytes().map_err(SdStoreError::Card)?;
        with_record_dir(card, |_| Ok(())).map_err(SdStoreError::Filesystem)?;
        info!("sd: record dir ready card_bytes={}", card_size_bytes);
        Ok(card_size_bytes)
    }

    pub fn release(self) -> (BUS, CS, DELAY) {
        (self.bus, self.cs, self.delay)
    }

    fn session<R>(
        &mut self,
        op: impl FnOnce(&mut dyn RecordFiles) -> Result<R, FsError>,
    ) -> Result<R, SdStoreError<BUS::Error, CS::Error>> {
        self.preclock()?;
        let card = SdCard::new(
            ExclusiveSpiDevice {
                bus: &mut self.bus,
                cs: &mut self.cs,
            },
            DelayRef(&mut self.delay),
        );
        with_record_dir(card, op).map_err(SdStoreError::Filesystem)
    }

    // SD SPI init requires >=74 clock cycles with CS deasserted.
    fn preclock(&mut self) -> Result<(), SdStoreError<BUS::Error, CS::Error>> {
        self.cs.set_high().map_err(SdStoreError::ChipSelect)?;
        self.bus.write(&[0xFF; 10]).map_err(SdStoreError::Spi)
    }
}

fn with_record_dir<D, R>(
    device: D,
    op: impl FnOnce(&mut dyn RecordFiles) -> Result<R, FsError>,
) -> Result<R, FsError>
where
    D: BlockDevice<Error = SdCardError>,
{
    let mut volume_mgr = VolumeManager::new(device, FixedTimeSource);
    let mut volume = volume_mgr.open_volume(VolumeIdx(0))?;
    let mut root = volume.open_root_dir()?;
    let mut dir = match root.open_dir(RECORD_DIR) {
        Ok(dir) => dir,
        Err(embedded_sdmmc::Error::NotFound) => {
            info!("sd: creating record dir");
            root.make_dir_in_dir(RECORD_DIR)?;
            root.open_dir(RECORD_DIR)?
        }
        Err(err) => return Err(err),
    };

    let result = op(&mut dir);
    let closed = dir
        .close()
        .and_then(|_| root.close())
        .and_then(|_| volume.close());
    let value = result?;
    closed?;
    Ok(value)
}

/// File operations inside the record directory.
trait RecordFiles {
    /// `Some(None)` when the file exceeds `out`.
    fn read_file(&mut self, name: &str, out: &mut [u8]) -> Result<Option<Option<usize>>, FsError>;
    fn write_file(&mut self, name: &str, bytes: &[u8]) -> Result<(), FsError>;
    /// Deleting an absent file succeeds.
    fn delete_file(&mut self, name: &str) -> Result<(), FsError>;
    fn lowest_queue_file(&mut self) -> Result<Option<u32>, FsError>;
}

impl<D, T, const MAX_DIRS: usize, const MAX_FILES: usize, const MAX_VOLUMES: usize> RecordFiles
    for Directory<'_, D, T, MAX_DIRS, MAX_FILES, MAX_VOLUMES>
where
    D: BlockDevice<Error = SdCardError>,
    T: TimeSource,
{
    fn read_file(&mut self, name: &str, out: &mut [u8]) -> Result<Option<Option<usize>>, FsError> {
        let mut file = match self.open_file_in_dir(name, Mode::ReadOnly) {
            Ok(file) => file,
            Err(embedded_sdmmc::Error::NotFound) => return Ok(None),
            Err(err) => return Err(err),
        };
        let len = file.length() as usize;
        if len > out.len() {
            file.close()?;
            return Ok(Some(None));
        }
        let mut filled = 0usize;
        while filled < len && !file.is_eof() {
            let n = file.read(&mut out[filled..len])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        file.close()?;
        Ok(Some(Some(filled)))
    }

    fn write_file(&mut self, name: &str, bytes: &[u8]) -> Result<(), FsError> {
        let mut file = self.open_file_in_dir(name, Mode::ReadWriteCreateOrTruncate)?;
        file.write(bytes)?;
        file.close()
    }

    fn delete_file(&mut self, name: &str) -> Result<(), FsError> {
        match self.delete_file_in_dir(name) {
            Ok(()) | Err(embedded_sdmmc::Error::NotFound) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn lowest_queue_file(&mut self) -> Result<Option<u32>, FsError> {
        let mut floor: Option<u32> = None;
        self.iterate_dir(|entry| {
            if entry.attributes.is_directory() || entry.attributes.is_volume() {
                return;
            }
            if let Some(sequence) = parse_queue_name(&entry.name) {
                floor = Some(floor.map_or(sequence, |low| low.min(sequence)));
            }
        })?;
        Ok(floor)
    }
}

#[derive(Debug)]
enum Staged {
    Write {
        name: FileName,
        bytes: Vec<u8, RECORD_BYTES>,
    },
    Remove(FileName),
}

/// One logical record store on the shared card.
///
/// The record log and the state cache each hold one; their file names never
/// overlap.
pub struct SdRecordStore<'a, BUS, CS, DELAY> {
    card: &'a RefCell<SdCardBus<BUS, CS, DELAY>>,
    staged: Vec<Staged, STAGED_OPS>,
}

impl<'a, BUS, CS, DELAY> SdRecordStore<'a, BUS, CS, DELAY> {
    pub const fn new(card: &'a RefCell<SdCardBus<BUS, CS, DELAY>>) -> Self {
        Self {
            card,
            staged: Vec::new(),
        }
    }
}

impl<BUS, CS, DELAY> DurableStore for SdRecordStore<'_, BUS, CS, DELAY>
where
    BUS: SpiBus<u8>,
    CS: OutputPin,
    DELAY: DelayNs,
    BUS::Error: core::fmt::Debug,
    CS::Error: core::fmt::Debug,
{
    type Error = SdStoreError<BUS::Error, CS::Error>;

    fn read(&mut self, key: RecordKey, out: &mut [u8]) -> Result<Option<usize>, Self::Error> {
        let name = file_name(key)?;
        let mut card = self.card.try_borrow_mut().map_err(|_| SdStoreError::Busy)?;
        match card.session(|dir| dir.read_file(name.as_str(), out))? {
            None => Ok(None),
            Some(Some(len)) => Ok(Some(len)),
            Some(None) => Err(SdStoreError::TooLarge),
        }
    }

    fn write(&mut self, key: RecordKey, bytes: &[u8]) -> Result<(), Self::Error> {
        let name = file_name(key)?;
        let bytes = Vec::from_slice(bytes).map_err(|_| SdStoreError::TooLarge)?;
        self.staged
            .push(Staged::Write { name, bytes })
            .map_err(|_| SdStoreError::StagingFull)
    }

    fn remove(&mut self, key: RecordKey) -> Result<(), Self::Error> {
        let name = file_name(key)?;
        self.staged
            .push(Staged::Remove(name))
            .map_err(|_| SdStoreError::StagingFull)
    }

    fn commit(&mut self) -> Result<(), Self::Error> {
        let staged = core::mem::take(&mut self.staged);
        if staged.is_empty() {
            return Ok(());
        }
        let mut card = self.card.try_borrow_mut().map_err(|_| SdStoreError::Busy)?;
        card.session(|dir| {
            for op in staged.iter() {
                match op {
                    Staged::Write { name, bytes } => dir.write_file(name.as_str(), bytes)?,
                    Staged::Remove(name) => dir.delete_file(name.as_str())?,
                }
            }
            Ok(())
        })
        .inspect_err(|err| warn!("sd: commit failed ops={} err={:?}", staged.len(), err))
    }

    fn queue_floor(&mut self) -> Result<Option<u32>, Self::Error> {
        let mut card = self.card.try_borrow_mut().map_err(|_| SdStoreError::Busy)?;
        card.session(|dir| dir.lowest_queue_file())
    }
}

fn file_name<BusErr, CsErr>(key: RecordKey) -> Result<FileName, SdStoreError<BusErr, CsErr>>
where
    BusErr: core::fmt::Debug,
    CsErr: core::fmt::Debug,
{
    let mut name = FileName::new();
    let fixed = match key {
        RecordKey::Queue(sequence) => {
            if sequence > MAX_QUEUE_SEQUENCE {
                return Err(SdStoreError::NameOutOfRange);
            }
            write!(name, "Q{:07X}.REC", sequence).map_err(|_| SdStoreError::NameOutOfRange)?;
            return Ok(name);
        }
        RecordKey::QueueCursor => "QCURSOR.REC",
        RecordKey::Cache(CacheSlot::LastFeeding) => "FEEDING.STA",
        RecordKey::Cache(CacheSlot::LastRtcSync) => "RTCSYNC.STA",
        RecordKey::Cache(CacheSlot::RtcUtcOffset) => "RTCOFFS.STA",
        RecordKey::Cache(CacheSlot::ActiveTimer) => "TIMER.STA",
        RecordKey::Cache(CacheSlot::LastMotdCheck) => "MOTDCHK.STA",
    };
    name.push_str(fixed)
        .map_err(|_| SdStoreError::NameOutOfRange)?;
    Ok(name)
}

fn parse_queue_name(name: &ShortFileName) -> Option<u32> {
    if name.extension() != b"REC" {
        return None;
    }
    let digits = name.base_name().strip_prefix(b"Q")?;
    if digits.len() != 7 {
        return None;
    }
    let digits = core::str::from_utf8(digits).ok()?;
    u32::from_str_radix(digits, 16).ok()
}
