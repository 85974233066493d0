use crate::error::Error;

/// Append a compact-size length prefix (1, 3, 5 or 9 bytes).
pub fn put_compact_size(out: &mut Vec<u8>, value: u64) {
    if value < 0xfd {
        out.push(value as u8);
    } else if value <= u16::MAX as u64 {
        out.push(0xfd);
        out.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value <= u32::MAX as u64 {
        out.push(0xfe);
        out.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        out.push(0xff);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

pub fn put_var_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    put_compact_size(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

/// Little-endian cursor over a message payload.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.remaining() < n {
            return Err(Error::Decode(format!(
                "need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16, Error> {
        let mut buf = [0u8; 2];
        buf.copy_from_slice(self.take(2)?);
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32_le(&mut self) -> Result<u32, Error> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_u64_le(&mut self) -> Result<u64, Error> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_hash(&mut self) -> Result<[u8; 32], Error> {
        let mut buf = [0u8; 32];
        buf.copy_from_slice(self.take(32)?);
        Ok(buf)
    }

    pub fn read_compact_size(&mut self) -> Result<u64, Error> {
        match self.read_u8()? {
            0xfd => Ok(self.read_u16_le()? as u64),
            0xfe => Ok(self.read_u32_le()? as u64),
            0xff => self.read_u64_le(),
            n => Ok(n as u64),
        }
    }

    pub fn read_var_bytes(&mut self) -> Result<&'a [u8], Error> {
        let len = self.read_compact_size()?;
        let len = usize::try_from(len)
            .map_err(|_| Error::Decode(format!("length {} overflows usize", len)))?;
        self.take(len)
    }

    /// Error if unread bytes remain.
    pub fn finish(&self) -> Result<(), Error> {
        if self.remaining() != 0 {
            return Err(Error::Decode(format!(
                "{} trailing bytes",
                self.remaining()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_size_boundaries() {
        for (value, len) in [
            (0u64, 1usize),
            (0xfc, 1),
            (0xfd, 3),
            (u16::MAX as u64, 3),
            (u16::MAX as u64 + 1, 5),
            (u32::MAX as u64, 5),
            (u32::MAX as u64 + 1, 9),
        ] {
            let mut out = Vec::new();
            put_compact_size(&mut out, value);
            assert_eq!(out.len(), len, "value {}", value);
            assert_eq!(Reader::new(&out).read_compact_size().unwrap(), value);
        }
    }

    #[test]
    fn test_var_bytes() {
        let mut out = Vec::new();
        put_var_bytes(&mut out, b"/mvf-node/");
        let mut r = Reader::new(&out);
        assert_eq!(r.read_var_bytes().unwrap(), b"/mvf-node/");
        assert!(r.finish().is_ok());
    }

    #[test]
    fn test_short_read_is_error() {
        let mut r = Reader::new(&[1, 2, 3]);
        assert!(r.read_u32_le().is_err());
    }

    #[test]
    fn test_trailing_bytes_detected() {
        let data = [0u8; 9];
        let mut r = Reader::new(&data);
        r.read_u64_le().unwrap();
        assert!(r.finish().is_err());
    }
}
