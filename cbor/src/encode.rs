/// Types that know how to write themselves to an [`Encoder`].
pub trait ToCbor {
    fn to_cbor(&self, encoder: &mut Encoder);
}

const MAJOR_UINT: u8 = 0;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;
const MAJOR_ARRAY: u8 = 4;

/// Initial byte of an indefinite-length array.
pub const INDEFINITE_ARRAY: u8 = (MAJOR_ARRAY << 5) | 31;

/// The "break" stop code terminating an indefinite-length item.
pub const BREAK: u8 = 0xFF;

#[derive(Default)]
pub struct Encoder {
    data: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn emit_uint_minor(&mut self, major: u8, val: u64) {
        if val < 24 {
            self.data.push((major << 5) | (val as u8));
        } else if val <= u8::MAX as u64 {
            self.data.push((major << 5) | 24u8);
            self.data.push(val as u8);
        } else if val <= u16::MAX as u64 {
            self.data.push((major << 5) | 25u8);
            self.data.extend(&(val as u16).to_be_bytes());
        } else if val <= u32::MAX as u64 {
            self.data.push((major << 5) | 26u8);
            self.data.extend(&(val as u32).to_be_bytes());
        } else {
            self.data.push((major << 5) | 27u8);
            self.data.extend(&val.to_be_bytes());
        }
    }

    pub fn emit_uint(&mut self, val: u64) {
        self.emit_uint_minor(MAJOR_UINT, val);
    }

    pub fn emit_bytes(&mut self, data: &[u8]) {
        self.emit_uint_minor(MAJOR_BYTES, data.len() as u64);
        self.data.extend_from_slice(data);
    }

    pub fn emit_text(&mut self, text: &str) {
        self.emit_uint_minor(MAJOR_TEXT, text.len() as u64);
        self.data.extend_from_slice(text.as_bytes());
    }

    pub fn emit_array_header(&mut self, len: u64) {
        self.emit_uint_minor(MAJOR_ARRAY, len);
    }

    pub fn emit_indefinite_array_header(&mut self) {
        self.data.push(INDEFINITE_ARRAY);
    }

    pub fn emit_break(&mut self) {
        self.data.push(BREAK);
    }

    pub fn emit_bool(&mut self, val: bool) {
        self.data.push((7 << 5) | if val { 21 } else { 20 });
    }

    /// Appends pre-encoded CBOR verbatim.
    pub fn emit_raw(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    pub fn emit<T>(&mut self, value: &T)
    where
        T: ToCbor + ?Sized,
    {
        value.to_cbor(self)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl ToCbor for u64 {
    fn to_cbor(&self, encoder: &mut Encoder) {
        encoder.emit_uint(*self)
    }
}

impl ToCbor for u32 {
    fn to_cbor(&self, encoder: &mut Encoder) {
        encoder.emit_uint(*self as u64)
    }
}

impl ToCbor for u16 {
    fn to_cbor(&self, encoder: &mut Encoder) {
        encoder.emit_uint(*self as u64)
    }
}

impl ToCbor for u8 {
    fn to_cbor(&self, encoder: &mut Encoder) {
        encoder.emit_uint(*self as u64)
    }
}

impl ToCbor for usize {
    fn to_cbor(&self, encoder: &mut Encoder) {
        encoder.emit_uint(*self as u64)
    }
}

impl ToCbor for [u8] {
    fn to_cbor(&self, encoder: &mut Encoder) {
        encoder.emit_bytes(self)
    }
}

impl ToCbor for Vec<u8> {
    fn to_cbor(&self, encoder: &mut Encoder) {
        encoder.emit_bytes(self)
    }
}

impl ToCbor for bool {
    fn to_cbor(&self, encoder: &mut Encoder) {
        encoder.emit_bool(*self)
    }
}

impl ToCbor for str {
    fn to_cbor(&self, encoder: &mut Encoder) {
        encoder.emit_text(self)
    }
}

impl ToCbor for String {
    fn to_cbor(&self, encoder: &mut Encoder) {
        encoder.emit_text(self)
    }
}

/// Encodes a single value into a fresh buffer.
pub fn emit<T>(value: &T) -> Vec<u8>
where
    T: ToCbor + ?Sized,
{
    let mut e = Encoder::default();
    e.emit(value);
    e.into_vec()
}
