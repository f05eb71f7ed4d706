//! PCF8523 as the engine's [`HardwareClock`].

use babypod_core::clock::HardwareClock;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use embedded_hal::i2c::I2c;
use log::{info, warn};
use pcf8523::{DateTime, Error, Pcf8523};

pub struct BoardRtc<I2C> {
    chip: Pcf8523<I2C>,
}

impl<I2C: I2c> BoardRtc<I2C> {
    /// Probes the chip and enables battery switch-over so time survives
    /// power-off. A missing chip hands the bus back.
    pub fn probe(i2c: I2C) -> Result<Self, (I2C, Error<I2C::Error>)> {
        let mut chip = Pcf8523::new(i2c);
        if let Err(err) = chip.probe() {
            warn!("rtc: probe failed err={:?}", err);
            return Err((chip.release(), err));
        }
        if let Err(err) = chip.enable_battery_switchover() {
            warn!("rtc: switch-over enable failed err={:?}", err);
        }
        if let Ok(true) = chip.battery_low() {
            warn!("rtc: backup battery low");
        }
        info!("rtc: ready");
        Ok(Self { chip })
    }

    pub fn release(self) -> I2C {
        self.chip.release()
    }
}

impl<I2C: I2c> HardwareClock for BoardRtc<I2C> {
    type Error = Error<I2C::Error>;

    fn read_time(&mut self) -> Result<Option<NaiveDateTime>, Self::Error> {
        let reading = match self.chip.read() {
            Ok(reading) => reading,
            // Unset registers after a cold start can hold non-BCD garbage.
            Err(Error::InvalidData) => return Ok(None),
            Err(err) => return Err(err),
        };
        if reading.oscillator_stopped {
            return Ok(None);
        }
        Ok(to_naive(&reading.time))
    }

    fn write_time(&mut self, local: &NaiveDateTime) -> Result<(), Self::Error> {
        self.chip.set(&from_naive(local).ok_or(Error::InvalidInput)?)
    }
}

fn to_naive(time: &DateTime) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(i32::from(time.year), u32::from(time.month), u32::from(time.day))?
        .and_hms_opt(
            u32::from(time.hour),
            u32::from(time.minute),
            u32::from(time.second),
        )
}

fn from_naive(local: &NaiveDateTime) -> Option<DateTime> {
    Some(DateTime {
        year: u16::try_from(local.year()).ok()?,
        month: local.month() as u8,
        day: local.day() as u8,
        weekday: local.weekday().num_days_from_sunday() as u8,
        hour: local.hour() as u8,
        minute: local.minute() as u8,
        second: local.second() as u8,
    })
}
