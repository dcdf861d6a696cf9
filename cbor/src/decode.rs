use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unexpected end of CBOR data")]
    UnexpectedEof,

    /// Sentinel returned when an item read lands on the 0xFF stop code of an
    /// indefinite-length array.
    #[error("Indefinite-length break code")]
    Break,

    #[error("Expected {expected}, found major type {actual}")]
    IncorrectType { expected: &'static str, actual: u8 },

    #[error("Invalid additional information {0} in initial byte")]
    InvalidAdditionalInfo(u8),

    #[error("Expected definite-length item")]
    IndefiniteLength,

    #[error("Length {0} exceeds the addressable range")]
    LengthOverflow(u64),

    #[error("Expected array of length {expected}, got {actual}")]
    WrongArrayLength { expected: u64, actual: u64 },

    #[error("Expected indefinite-length array header")]
    ExpectedIndefiniteArray,

    #[error("Expected break code")]
    ExpectedBreak,

    #[error("Invalid UTF-8 in text string")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Types that know how to read themselves from a [`Decoder`].
pub trait FromCbor: Sized {
    type Error: From<Error>;

    fn from_cbor(decoder: &mut Decoder) -> Result<Self, Self::Error>;
}

/// A cursor over a CBOR-encoded byte slice.
pub struct Decoder<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn position(&self) -> usize {
        self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.offset >= self.data.len()
    }

    /// Peeks at the next initial byte without consuming it.
    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.offset).copied()
    }

    fn read_u8(&mut self) -> Result<u8, Error> {
        let b = *self.data.get(self.offset).ok_or(Error::UnexpectedEof)?;
        self.offset += 1;
        Ok(b)
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8], Error> {
        let end = self.offset.checked_add(len).ok_or(Error::UnexpectedEof)?;
        if end > self.data.len() {
            return Err(Error::UnexpectedEof);
        }
        let s = &self.data[self.offset..end];
        self.offset = end;
        Ok(s)
    }

    /// Reads an initial byte of the given major type plus its argument.
    ///
    /// Landing on the break code consumes it and yields [`Error::Break`], so
    /// a caller iterating an indefinite-length array can stop cleanly.
    fn read_head(&mut self, major: u8, expected: &'static str) -> Result<u64, Error> {
        if self.peek() == Some(super::encode::BREAK) {
            self.offset += 1;
            return Err(Error::Break);
        }

        let initial = self.read_u8()?;
        if initial >> 5 != major {
            return Err(Error::IncorrectType {
                expected,
                actual: initial >> 5,
            });
        }

        match initial & 0x1F {
            n @ 0..=23 => Ok(n as u64),
            24 => Ok(self.read_u8()? as u64),
            25 => Ok(u16::from_be_bytes(self.read_slice(2)?.try_into().unwrap()) as u64),
            26 => Ok(u32::from_be_bytes(self.read_slice(4)?.try_into().unwrap()) as u64),
            27 => Ok(u64::from_be_bytes(self.read_slice(8)?.try_into().unwrap())),
            31 => Err(Error::IndefiniteLength),
            n => Err(Error::InvalidAdditionalInfo(n)),
        }
    }

    pub fn read_uint(&mut self) -> Result<u64, Error> {
        self.read_head(0, "unsigned integer")
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, Error> {
        let len = self.read_head(2, "byte string")?;
        let len = usize::try_from(len).map_err(|_| Error::LengthOverflow(len))?;
        Ok(self.read_slice(len)?.to_vec())
    }

    pub fn read_text(&mut self) -> Result<String, Error> {
        let len = self.read_head(3, "text string")?;
        let len = usize::try_from(len).map_err(|_| Error::LengthOverflow(len))?;
        String::from_utf8(self.read_slice(len)?.to_vec()).map_err(Into::into)
    }

    pub fn read_bool(&mut self) -> Result<bool, Error> {
        if self.peek() == Some(super::encode::BREAK) {
            self.offset += 1;
            return Err(Error::Break);
        }
        match self.read_u8()? {
            0xF4 => Ok(false),
            0xF5 => Ok(true),
            b => Err(Error::IncorrectType {
                expected: "boolean",
                actual: b >> 5,
            }),
        }
    }

    pub fn read_array_header(&mut self) -> Result<u64, Error> {
        self.read_head(4, "array")
    }

    pub fn expect_array_header(&mut self, expected: u64) -> Result<(), Error> {
        let actual = self.read_array_header()?;
        if actual != expected {
            Err(Error::WrongArrayLength { expected, actual })
        } else {
            Ok(())
        }
    }

    pub fn expect_indefinite_array_header(&mut self) -> Result<(), Error> {
        if self.read_u8()? != super::encode::INDEFINITE_ARRAY {
            Err(Error::ExpectedIndefiniteArray)
        } else {
            Ok(())
        }
    }

    pub fn read_break(&mut self) -> Result<(), Error> {
        if self.read_u8()? != super::encode::BREAK {
            Err(Error::ExpectedBreak)
        } else {
            Ok(())
        }
    }

    pub fn read<T>(&mut self) -> Result<T, T::Error>
    where
        T: FromCbor,
    {
        T::from_cbor(self)
    }
}

impl FromCbor for u64 {
    type Error = Error;

    fn from_cbor(decoder: &mut Decoder) -> Result<Self, Self::Error> {
        decoder.read_uint()
    }
}

impl FromCbor for Vec<u8> {
    type Error = Error;

    fn from_cbor(decoder: &mut Decoder) -> Result<Self, Self::Error> {
        decoder.read_bytes()
    }
}

impl FromCbor for String {
    type Error = Error;

    fn from_cbor(decoder: &mut Decoder) -> Result<Self, Self::Error> {
        decoder.read_text()
    }
}

/// Decodes a single value from the front of `data`.
pub fn parse<T>(data: &[u8]) -> Result<T, T::Error>
where
    T: FromCbor,
{
    T::from_cbor(&mut Decoder::new(data))
}
