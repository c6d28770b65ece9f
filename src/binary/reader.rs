use super::error::{DecodeError, Result};
use nom::{
    IResult,
    bytes::complete::{tag, take},
    number::complete::{le_f32, le_f64, le_u8, le_u16, le_u32},
};
use nom_leb128::{leb128_i32, leb128_i64, leb128_u32, leb128_u64};

/// Sequential reader over an immutable byte buffer.
///
/// Each primitive runs a `nom` parser against the unread input and advances
/// the cursor by however many bytes the parser consumed. Offsets reported by
/// [`ByteReader::tell`] and in errors are absolute: a reader carved out of a
/// parent with [`ByteReader::sub_reader`] keeps counting from the parent's
/// position.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    offset: usize,
    base: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_base(data, 0)
    }

    pub fn with_base(data: &'a [u8], base: usize) -> Self {
        Self {
            data,
            offset: 0,
            base,
        }
    }

    pub fn tell(&self) -> usize {
        self.base + self.offset
    }

    pub fn eos(&self) -> bool {
        self.offset >= self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.offset..]
    }

    fn end_of_stream(&self, needed: usize) -> DecodeError {
        DecodeError::UnexpectedEndOfStream {
            offset: self.tell(),
            needed: needed.saturating_sub(self.remaining()).max(1),
        }
    }

    /// Runs `parser` on the unread input. `needed` is the number of bytes the
    /// parser asks for and is only used to describe a short read.
    fn run<T>(
        &mut self,
        needed: usize,
        parser: impl FnOnce(&'a [u8]) -> IResult<&'a [u8], T>,
    ) -> Result<T> {
        let input = self.rest();
        match parser(input) {
            Ok((rest, value)) => {
                self.offset += input.len() - rest.len();
                Ok(value)
            }
            Err(nom::Err::Incomplete(_)) => Err(self.end_of_stream(needed)),
            Err(nom::Err::Error(e) | nom::Err::Failure(e)) => match e.code {
                nom::error::ErrorKind::Eof => Err(self.end_of_stream(needed)),
                _ => Err(DecodeError::MalformedLeb128 {
                    offset: self.tell(),
                }),
            },
        }
    }

    pub fn peek(&self, count: usize) -> Result<&'a [u8]> {
        self.rest()
            .get(..count)
            .ok_or_else(|| self.end_of_stream(count))
    }

    pub fn read(&mut self, count: usize) -> Result<&'a [u8]> {
        self.run(count, take(count))
    }

    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = self.rest();
        self.offset = self.data.len();
        rest
    }

    /// Reads up to and including the first occurrence of `byte`.
    ///
    /// Only sound for byte ranges where `byte` cannot occur inside an
    /// operand or a nested construct, i.e. constant expressions ending in `end`.
    pub fn read_until(&mut self, byte: u8) -> Result<&'a [u8]> {
        match self.rest().iter().position(|&b| b == byte) {
            Some(pos) => self.read(pos + 1),
            None => Err(DecodeError::UnexpectedEndOfStream {
                offset: self.base + self.data.len(),
                needed: 1,
            }),
        }
    }

    /// Splits off the next `count` bytes into their own reader.
    pub fn sub_reader(&mut self, count: usize) -> Result<ByteReader<'a>> {
        let base = self.tell();
        let data = self.read(count)?;
        Ok(ByteReader::with_base(data, base))
    }

    pub fn u8(&mut self) -> Result<u8> {
        self.run(1, le_u8)
    }

    pub fn u16(&mut self) -> Result<u16> {
        self.run(2, le_u16)
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.run(4, le_u32)
    }

    pub fn f32(&mut self) -> Result<f32> {
        self.run(4, le_f32)
    }

    pub fn f64(&mut self) -> Result<f64> {
        self.run(8, le_f64)
    }

    pub fn uleb(&mut self) -> Result<u32> {
        self.leb(32, false, leb128_u32)
    }

    pub fn uleb64(&mut self) -> Result<u64> {
        self.leb(64, false, leb128_u64)
    }

    pub fn sleb32(&mut self) -> Result<i32> {
        self.leb(32, true, leb128_i32)
    }

    pub fn sleb64(&mut self) -> Result<i64> {
        self.leb(64, true, leb128_i64)
    }

    /// `leb128_*` drop the high bits of a maximal-length encoding, so the
    /// last byte is checked here: bits past `bits` must be zero for unsigned
    /// values and copies of the sign bit for signed ones.
    fn leb<T>(
        &mut self,
        bits: u32,
        signed: bool,
        parser: impl FnOnce(&'a [u8]) -> IResult<&'a [u8], T>,
    ) -> Result<T> {
        let start = self.offset;
        let value = self.run(1, parser)?;

        let max_len = bits.div_ceil(7) as usize;
        let consumed = &self.data[start..self.offset];
        let last = match consumed {
            [.., last] if consumed.len() == max_len => *last,
            _ => return Ok(value),
        };
        let payload_bits = bits - 7 * (max_len as u32 - 1);
        let fits = if signed {
            let mask = 0x7F & !((1u8 << (payload_bits - 1)) - 1);
            last & mask == 0 || last & mask == mask
        } else {
            last & !((1u8 << payload_bits) - 1) == 0
        };
        if !fits {
            self.offset = start;
            return Err(DecodeError::MalformedLeb128 {
                offset: self.tell(),
            });
        }
        Ok(value)
    }

    pub fn ensure(&mut self, expected: &[u8]) -> Result<()> {
        let offset = self.tell();
        let input = self.rest();
        match tag::<_, _, nom::error::Error<&[u8]>>(expected)(input) {
            Ok((rest, _)) => {
                self.offset += input.len() - rest.len();
                Ok(())
            }
            Err(_) => Err(DecodeError::MalformedHeader {
                offset,
                expected: expected.to_vec(),
                found: input[..expected.len().min(input.len())].to_vec(),
            }),
        }
    }

    /// Length-prefixed UTF-8 string.
    pub fn name(&mut self) -> Result<String> {
        let size = self.uleb()? as usize;
        let offset = self.tell();
        let bytes = self.read(size)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8 { offset })
    }
}

#[cfg(test)]
mod tests {
    use super::ByteReader;
    use crate::binary::error::DecodeError;
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    #[test]
    fn read_fixed_width() -> Result<()> {
        let mut r = ByteReader::new(&[
            0x01, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0x00, 0x00, 0x80, 0x3F, 0, 0, 0, 0, 0, 0,
            0xF0, 0xBF,
        ]);
        assert_eq!(r.u8()?, 0x01);
        assert_eq!(r.u16()?, 0x1234);
        assert_eq!(r.u32()?, 0x12345678);
        assert_eq!(r.f32()?, 1.0);
        assert_eq!(r.f64()?, -1.0);
        assert!(r.eos());
        assert_eq!(r.tell(), 19);
        Ok(())
    }

    #[test]
    fn read_uleb() -> Result<()> {
        let tests: Vec<(&[u8], u32)> = vec![
            (&[0x00], 0),
            (&[0x7F], 127),
            (&[0x80, 0x01], 128),
            (&[0xE5, 0x8E, 0x26], 624485),
            (&[0xFF, 0xFF, 0xFF, 0xFF, 0x0F], u32::MAX),
        ];
        for (bytes, expected) in tests {
            let mut r = ByteReader::new(bytes);
            assert_eq!(r.uleb()?, expected);
            assert_eq!(r.tell(), bytes.len());
        }
        Ok(())
    }

    #[test]
    fn read_sleb_sign_extends() -> Result<()> {
        let tests: Vec<(&[u8], i64)> = vec![
            (&[0x00], 0),
            (&[0x7E], -2),
            (&[0x3F], 63),
            (&[0x40], -64),
            (&[0xC0, 0xBB, 0x78], -123456),
            (&[0x80, 0x7F], -128),
        ];
        for (bytes, expected) in tests {
            assert_eq!(ByteReader::new(bytes).sleb64()?, expected);
            assert_eq!(ByteReader::new(bytes).sleb32()? as i64, expected);
        }
        Ok(())
    }

    #[test]
    fn overlong_uleb_is_rejected() {
        let mut r = ByteReader::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F]);
        assert!(matches!(
            r.uleb(),
            Err(DecodeError::MalformedLeb128 { offset: 0 })
        ));
    }

    fn encode_unsigned(mut value: u64) -> Vec<u8> {
        let mut bytes = vec![];
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                bytes.push(byte);
                return bytes;
            }
            bytes.push(byte | 0x80);
        }
    }

    fn encode_signed(mut value: i64) -> Vec<u8> {
        let mut bytes = vec![];
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
            if done {
                bytes.push(byte);
                return bytes;
            }
            bytes.push(byte | 0x80);
        }
    }

    #[test]
    fn leb_boundaries_round_trip() -> Result<()> {
        let unsigned = [
            0,
            1,
            127,
            128,
            16383,
            16384,
            u32::MAX as u64 - 1,
            u32::MAX as u64,
            u32::MAX as u64 + 1,
            u64::MAX - 1,
            u64::MAX,
        ];
        for value in unsigned {
            let bytes = encode_unsigned(value);
            let mut r = ByteReader::new(&bytes);
            assert_eq!(r.uleb64()?, value);
            assert!(r.eos());
            if let Ok(narrow) = u32::try_from(value) {
                assert_eq!(ByteReader::new(&bytes).uleb()?, narrow);
            }
        }

        let signed = [
            i64::MIN,
            i64::MIN + 1,
            i32::MIN as i64 - 1,
            i32::MIN as i64,
            i32::MIN as i64 + 1,
            -65,
            -64,
            -1,
            0,
            1,
            63,
            64,
            i32::MAX as i64 - 1,
            i32::MAX as i64,
            i32::MAX as i64 + 1,
            i64::MAX - 1,
            i64::MAX,
        ];
        for value in signed {
            let bytes = encode_signed(value);
            let mut r = ByteReader::new(&bytes);
            assert_eq!(r.sleb64()?, value);
            assert!(r.eos());
            if let Ok(narrow) = i32::try_from(value) {
                assert_eq!(ByteReader::new(&bytes).sleb32()?, narrow);
            }
        }
        Ok(())
    }

    #[test]
    fn overflowing_leb_is_rejected() {
        let malformed = DecodeError::MalformedLeb128 { offset: 0 };
        // 2^32
        assert_eq!(
            ByteReader::new(&[0x80, 0x80, 0x80, 0x80, 0x10]).uleb(),
            Err(malformed.clone())
        );
        // 2^31
        assert_eq!(
            ByteReader::new(&[0x80, 0x80, 0x80, 0x80, 0x08]).sleb32(),
            Err(malformed.clone())
        );
        // -2^31 - 1
        assert_eq!(
            ByteReader::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0x77]).sleb32(),
            Err(malformed.clone())
        );
        // 2^64
        assert_eq!(
            ByteReader::new(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x02]).uleb64(),
            Err(malformed.clone())
        );
        // 2^63
        assert_eq!(
            ByteReader::new(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x01]).sleb64(),
            Err(malformed)
        );

        // the same encodings are in range for the wider readers
        assert_eq!(
            ByteReader::new(&[0x80, 0x80, 0x80, 0x80, 0x10]).uleb64(),
            Ok(1 << 32)
        );
        assert_eq!(
            ByteReader::new(&[0x80, 0x80, 0x80, 0x80, 0x08]).sleb64(),
            Ok(1 << 31)
        );

        let mut r = ByteReader::with_base(&[0x80, 0x80, 0x80, 0x80, 0x10], 0x20);
        assert_eq!(r.uleb(), Err(DecodeError::MalformedLeb128 { offset: 0x20 }));
        assert_eq!(r.tell(), 0x20);
    }

    #[test]
    fn truncated_reads_fault() {
        let mut r = ByteReader::new(&[0x01, 0x02]);
        assert_eq!(
            r.u32(),
            Err(DecodeError::UnexpectedEndOfStream {
                offset: 0,
                needed: 2
            })
        );
        assert!(matches!(
            r.read(3),
            Err(DecodeError::UnexpectedEndOfStream { .. })
        ));
        assert!(matches!(
            ByteReader::new(&[0x80, 0x80]).uleb(),
            Err(DecodeError::UnexpectedEndOfStream { .. })
        ));
        assert!(matches!(
            r.peek(5),
            Err(DecodeError::UnexpectedEndOfStream { .. })
        ));
    }

    #[test]
    fn read_until_includes_terminator() -> Result<()> {
        let mut r = ByteReader::new(&[0x41, 0x7E, 0x0B, 0x99]);
        assert_eq!(r.read_until(0x0B)?, &[0x41, 0x7E, 0x0B]);
        assert_eq!(r.tell(), 3);
        assert!(matches!(
            r.read_until(0x0B),
            Err(DecodeError::UnexpectedEndOfStream { offset: 4, .. })
        ));
        Ok(())
    }

    #[test]
    fn sub_reader_reports_absolute_offsets() -> Result<()> {
        let mut r = ByteReader::new(&[0xAA, 0xBB, 0x02, 0x61, 0x62, 0xCC]);
        r.read(2)?;
        let mut sub = r.sub_reader(3)?;
        assert_eq!(sub.tell(), 2);
        assert_eq!(sub.name()?, "ab");
        assert!(sub.eos());
        assert_eq!(sub.tell(), 5);
        assert_eq!(r.tell(), 5);
        assert_eq!(r.read_rest(), &[0xCC]);
        Ok(())
    }

    #[test]
    fn ensure_reports_mismatch() {
        let mut r = ByteReader::new(b"\0wat");
        assert_eq!(
            r.ensure(b"\0asm"),
            Err(DecodeError::MalformedHeader {
                offset: 0,
                expected: b"\0asm".to_vec(),
                found: b"\0wat".to_vec(),
            })
        );
    }

    #[test]
    fn invalid_utf8_name() {
        let mut r = ByteReader::new(&[0x02, 0xC3, 0x28]);
        assert_eq!(r.name(), Err(DecodeError::InvalidUtf8 { offset: 1 }));
    }
}
