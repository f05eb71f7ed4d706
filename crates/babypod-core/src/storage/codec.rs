//! Fixed-layout little-endian record framing.
//!
//! Every record is `magic(4) | version(1) | body | fnv1a32(4)` where the
//! checksum covers everything before it.

use super::{RECORD_BYTES, StorageError};

pub(crate) type RecordBuf = [u8; RECORD_BYTES];

pub(crate) fn checksum32(bytes: &[u8]) -> u32 {
    let mut hash = 0x811C_9DC5u32;
    for byte in bytes {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}

pub(crate) struct Writer<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> Writer<'a> {
    pub(crate) fn new(buf: &'a mut [u8], magic: [u8; 4], version: u8) -> Result<Self, StorageError> {
        let mut writer = Self { buf, len: 0 };
        writer.bytes(&magic)?;
        writer.u8(version)?;
        Ok(writer)
    }

    pub(crate) fn bytes(&mut self, data: &[u8]) -> Result<(), StorageError> {
        let end = self.len + data.len();
        let slot = self
            .buf
            .get_mut(self.len..end)
            .ok_or(StorageError::TooLarge)?;
        slot.copy_from_slice(data);
        self.len = end;
        Ok(())
    }

    pub(crate) fn u8(&mut self, value: u8) -> Result<(), StorageError> {
        self.bytes(&[value])
    }

    pub(crate) fn u16(&mut self, value: u16) -> Result<(), StorageError> {
        self.bytes(&value.to_le_bytes())
    }

    pub(crate) fn i16(&mut self, value: i16) -> Result<(), StorageError> {
        self.bytes(&value.to_le_bytes())
    }

    pub(crate) fn u32(&mut self, value: u32) -> Result<(), StorageError> {
        self.bytes(&value.to_le_bytes())
    }

    pub(crate) fn i64(&mut self, value: i64) -> Result<(), StorageError> {
        self.bytes(&value.to_le_bytes())
    }

    /// Appends the checksum and returns the sealed record length.
    pub(crate) fn seal(mut self) -> Result<usize, StorageError> {
        let sum = checksum32(&self.buf[..self.len]);
        self.u32(sum)?;
        Ok(self.len)
    }
}

pub(crate) struct Reader<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Verifies framing and returns a reader positioned after the version.
    pub(crate) fn open(record: &'a [u8], magic: [u8; 4], version: u8) -> Result<Self, StorageError> {
        if record.len() < 9 {
            return Err(StorageError::Corrupt);
        }
        let (framed, sum) = record.split_at(record.len() - 4);
        let stored = u32::from_le_bytes([sum[0], sum[1], sum[2], sum[3]]);
        if checksum32(framed) != stored || framed[..4] != magic || framed[4] != version {
            return Err(StorageError::Corrupt);
        }
        Ok(Self {
            body: framed,
            pos: 5,
        })
    }

    pub(crate) fn bytes(&mut self, len: usize) -> Result<&'a [u8], StorageError> {
        let end = self.pos + len;
        let out = self.body.get(self.pos..end).ok_or(StorageError::Corrupt)?;
        self.pos = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], StorageError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, StorageError> {
        Ok(self.array::<1>()?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, StorageError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub(crate) fn i16(&mut self) -> Result<i16, StorageError> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, StorageError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub(crate) fn i64(&mut self) -> Result<i64, StorageError> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    /// Fails unless every body byte was consumed.
    pub(crate) fn finish(self) -> Result<(), StorageError> {
        if self.pos == self.body.len() {
            Ok(())
        } else {
            Err(StorageError::Corrupt)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: [u8; 4] = *b"TST1";

    #[test]
    fn checksum_matches_fnv1a_reference() {
        assert_eq!(checksum32(b""), 0x811C_9DC5);
        assert_eq!(checksum32(b"a"), 0xE40C_292C);
    }

    #[test]
    fn flipped_bit_is_detected() {
        let mut buf = [0u8; 32];
        let mut writer = Writer::new(&mut buf, MAGIC, 1).unwrap();
        writer.u32(0xDEAD_BEEF).unwrap();
        let len = writer.seal().unwrap();
        assert!(Reader::open(&buf[..len], MAGIC, 1).is_ok());

        buf[6] ^= 0x01;
        assert_eq!(
            Reader::open(&buf[..len], MAGIC, 1).err(),
            Some(StorageError::Corrupt)
        );
    }

    #[test]
    fn truncated_record_is_corrupt() {
        let mut buf = [0u8; 32];
        let mut writer = Writer::new(&mut buf, MAGIC, 1).unwrap();
        writer.i64(-5).unwrap();
        let len = writer.seal().unwrap();
        assert!(Reader::open(&buf[..len - 3], MAGIC, 1).is_err());
    }

    #[test]
    fn overflowing_writer_reports_too_large() {
        let mut buf = [0u8; 8];
        let mut writer = Writer::new(&mut buf, MAGIC, 1).unwrap();
        assert_eq!(writer.u32(1), Err(StorageError::TooLarge));
    }
}
