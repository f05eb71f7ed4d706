//! Register map and BCD helpers for the PCF8523.

/// Fixed 7-bit I2C address.
pub const ADDRESS: u8 = 0x68;

pub const CONTROL_1: u8 = 0x00;
pub const CONTROL_2: u8 = 0x01;
pub const CONTROL_3: u8 = 0x02;
/// First of seven time registers (seconds..years).
pub const SECONDS: u8 = 0x03;

/// Oscillator-stop flag in the seconds register.
pub const OS_FLAG: u8 = 0x80;
/// Oscillator stop bit in Control_1.
pub const STOP: u8 = 0x20;
/// Power management bits in Control_3.
pub const PM_MASK: u8 = 0xE0;
/// Power-on default: switch-over and low-battery detection disabled.
pub const PM_DISABLED: u8 = 0xE0;
/// Standard battery switch-over with low-battery detection.
pub const PM_SWITCHOVER_STANDARD: u8 = 0x00;
/// Battery-low flag in Control_3.
pub const BLF: u8 = 0x04;

/// Calendar fields as held by the chip (years 2000-2099).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    /// 0 = Sunday.
    pub weekday: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl DateTime {
    fn is_valid(&self) -> bool {
        (2000..=2099).contains(&self.year)
            && (1..=12).contains(&self.month)
            && (1..=31).contains(&self.day)
            && self.weekday <= 6
            && self.hour <= 23
            && self.minute <= 59
            && self.second <= 59
    }
}

#[inline]
pub const fn to_bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

/// Returns `None` for nibbles above 9.
#[inline]
pub const fn from_bcd(value: u8) -> Option<u8> {
    let tens = value >> 4;
    let ones = value & 0x0F;
    if tens > 9 || ones > 9 {
        return None;
    }
    Some(tens * 10 + ones)
}

/// Decodes registers 0x03..=0x09 into time and the oscillator-stop flag.
pub fn decode_time(regs: &[u8; 7]) -> Option<(DateTime, bool)> {
    let time = DateTime {
        second: from_bcd(regs[0] & 0x7F)?,
        minute: from_bcd(regs[1] & 0x7F)?,
        hour: from_bcd(regs[2] & 0x3F)?,
        day: from_bcd(regs[3] & 0x3F)?,
        weekday: regs[4] & 0x07,
        month: from_bcd(regs[5] & 0x1F)?,
        year: 2000 + u16::from(from_bcd(regs[6])?),
    };
    time.is_valid().then_some((time, regs[0] & OS_FLAG != 0))
}

/// Encodes a time for registers 0x03..=0x09 with the oscillator-stop flag cleared.
pub fn encode_time(time: &DateTime) -> Option<[u8; 7]> {
    if !time.is_valid() {
        return None;
    }
    Some([
        to_bcd(time.second),
        to_bcd(time.minute),
        to_bcd(time.hour),
        to_bcd(time.day),
        time.weekday,
        to_bcd(time.month),
        to_bcd((time.year - 2000) as u8),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bcd_round_trip_edges() {
        assert_eq!(to_bcd(59), 0x59);
        assert_eq!(from_bcd(0x59), Some(59));
        assert_eq!(from_bcd(0x5A), None);
    }

    #[test]
    fn oscillator_stop_flag_is_reported() {
        let regs = [0x80 | 0x30, 0x15, 0x09, 0x01, 0x03, 0x05, 0x24];
        let (time, stopped) = decode_time(&regs).unwrap();
        assert!(stopped);
        assert_eq!(time.second, 30);
        assert_eq!(time.year, 2024);
        assert_eq!(time.month, 5);
    }

    #[test]
    fn encode_rejects_out_of_range_fields() {
        let mut time = DateTime {
            year: 2024,
            month: 13,
            day: 1,
            weekday: 0,
            hour: 0,
            minute: 0,
            second: 0,
        };
        assert_eq!(encode_time(&time), None);
        time.month = 12;
        assert_eq!(encode_time(&time).unwrap()[5], 0x12);
    }
}
