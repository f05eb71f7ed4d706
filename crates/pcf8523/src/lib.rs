#![cfg_attr(not(test), no_std)]

//! PCF8523 battery-backed real-time clock driver primitives.

pub mod registers;

pub use registers::DateTime;

use embedded_hal::i2c::I2c;

/// Driver errors.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Error<I2cErr> {
    /// I2C transaction failed.
    I2c(I2cErr),
    /// Registers held values that are not a valid calendar time.
    InvalidData,
    /// Input parameters are outside supported bounds.
    InvalidInput,
}

/// One time read.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Reading {
    pub time: DateTime,
    /// Set when the oscillator stopped since the time was last written; the
    /// time is then not trustworthy.
    pub oscillator_stopped: bool,
}

/// PCF8523 driver.
#[derive(Debug)]
pub struct Pcf8523<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> Pcf8523<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self {
            i2c,
            address: registers::ADDRESS,
        }
    }

    /// Releases the owned bus.
    pub fn release(self) -> I2C {
        self.i2c
    }

    /// Confirms a device acknowledges at the chip address.
    pub fn probe(&mut self) -> Result<(), Error<I2C::Error>> {
        self.read_register(registers::CONTROL_1).map(|_| ())
    }

    pub fn read(&mut self) -> Result<Reading, Error<I2C::Error>> {
        let mut regs = [0u8; 7];
        self.i2c
            .write_read(self.address, &[registers::SECONDS], &mut regs)
            .map_err(Error::I2c)?;
        let (time, oscillator_stopped) =
            registers::decode_time(&regs).ok_or(Error::InvalidData)?;
        Ok(Reading {
            time,
            oscillator_stopped,
        })
    }

    /// Writes the time, clears the oscillator-stop flag and restarts the clock.
    pub fn set(&mut self, time: &DateTime) -> Result<(), Error<I2C::Error>> {
        let regs = registers::encode_time(time).ok_or(Error::InvalidInput)?;
        let mut frame = [0u8; 8];
        frame[0] = registers::SECONDS;
        frame[1..].copy_from_slice(&regs);
        self.i2c.write(self.address, &frame).map_err(Error::I2c)?;

        let control_1 = self.read_register(registers::CONTROL_1)?;
        if control_1 & registers::STOP != 0 {
            self.write_register(registers::CONTROL_1, control_1 & !registers::STOP)?;
        }
        Ok(())
    }

    /// Whether backup power switch-over is configured.
    pub fn battery_switchover_enabled(&mut self) -> Result<bool, Error<I2C::Error>> {
        let control_3 = self.read_register(registers::CONTROL_3)?;
        Ok(control_3 & registers::PM_MASK != registers::PM_DISABLED)
    }

    /// Enables standard battery switch-over so time survives main power loss.
    pub fn enable_battery_switchover(&mut self) -> Result<(), Error<I2C::Error>> {
        let control_3 = self.read_register(registers::CONTROL_3)?;
        let next = (control_3 & !registers::PM_MASK) | registers::PM_SWITCHOVER_STANDARD;
        if next != control_3 {
            self.write_register(registers::CONTROL_3, next)?;
        }
        Ok(())
    }

    /// Backup battery is low.
    pub fn battery_low(&mut self) -> Result<bool, Error<I2C::Error>> {
        let control_3 = self.read_register(registers::CONTROL_3)?;
        Ok(control_3 & registers::BLF != 0)
    }

    fn read_register(&mut self, register: u8) -> Result<u8, Error<I2C::Error>> {
        let mut value = [0u8; 1];
        self.i2c
            .write_read(self.address, &[register], &mut value)
            .map_err(Error::I2c)?;
        Ok(value[0])
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), Error<I2C::Error>> {
        self.i2c
            .write(self.address, &[register, value])
            .map_err(Error::I2c)
    }
}

#[cfg(test)]
mod tests {
    use embedded_hal::i2c::{ErrorKind, ErrorType, Operation};

    use super::*;

    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    struct Nak;

    impl embedded_hal::i2c::Error for Nak {
        fn kind(&self) -> ErrorKind {
            ErrorKind::NoAcknowledge(embedded_hal::i2c::NoAcknowledgeSource::Address)
        }
    }

    /// Register file behind a register-pointer I2C protocol.
    struct FakeBus {
        regs: [u8; 0x14],
        present: bool,
    }

    impl FakeBus {
        fn new() -> Self {
            let mut regs = [0u8; 0x14];
            regs[registers::CONTROL_3 as usize] = registers::PM_DISABLED;
            regs[registers::SECONDS as usize] = registers::OS_FLAG;
            regs[0x06] = 0x01;
            regs[0x08] = 0x01;
            Self {
                regs,
                present: true,
            }
        }
    }

    impl ErrorType for FakeBus {
        type Error = Nak;
    }

    impl I2c for FakeBus {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            if !self.present || address != registers::ADDRESS {
                return Err(Nak);
            }
            let mut pointer = 0usize;
            for op in operations {
                match op {
                    Operation::Write(bytes) => {
                        if let Some((first, rest)) = bytes.split_first() {
                            pointer = usize::from(*first);
                            for byte in rest {
                                self.regs[pointer] = *byte;
                                pointer += 1;
                            }
                        }
                    }
                    Operation::Read(buf) => {
                        for byte in buf.iter_mut() {
                            *byte = self.regs[pointer];
                            pointer += 1;
                        }
                    }
                }
            }
            Ok(())
        }
    }

    fn sample() -> DateTime {
        DateTime {
            year: 2024,
            month: 5,
            day: 1,
            weekday: 3,
            hour: 10,
            minute: 15,
            second: 42,
        }
    }

    #[test]
    fn fresh_chip_reports_stopped_oscillator() {
        let mut rtc = Pcf8523::new(FakeBus::new());
        assert!(rtc.read().unwrap().oscillator_stopped);
    }

    #[test]
    fn set_then_read_returns_trusted_time() {
        let mut rtc = Pcf8523::new(FakeBus::new());
        rtc.set(&sample()).unwrap();
        let reading = rtc.read().unwrap();
        assert_eq!(reading.time, sample());
        assert!(!reading.oscillator_stopped);
    }

    #[test]
    fn set_restarts_a_stopped_clock() {
        let mut bus = FakeBus::new();
        bus.regs[registers::CONTROL_1 as usize] = registers::STOP | 0x01;
        let mut rtc = Pcf8523::new(bus);
        rtc.set(&sample()).unwrap();
        assert_eq!(rtc.release().regs[registers::CONTROL_1 as usize], 0x01);
    }

    #[test]
    fn switchover_is_enabled_once() {
        let mut rtc = Pcf8523::new(FakeBus::new());
        assert!(!rtc.battery_switchover_enabled().unwrap());
        rtc.enable_battery_switchover().unwrap();
        assert!(rtc.battery_switchover_enabled().unwrap());
        assert_eq!(rtc.release().regs[registers::CONTROL_3 as usize], 0x00);
    }

    #[test]
    fn garbage_registers_are_invalid_data() {
        let mut bus = FakeBus::new();
        bus.regs[0x08] = 0x1F;
        let mut rtc = Pcf8523::new(bus);
        assert_eq!(rtc.read(), Err(Error::InvalidData));
    }

    #[test]
    fn missing_chip_is_reported() {
        let mut bus = FakeBus::new();
        bus.present = false;
        let mut rtc = Pcf8523::new(bus);
        assert_eq!(rtc.probe(), Err(Error::I2c(Nak)));
    }
}
