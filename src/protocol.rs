//! SunSpec register codec.
//!
//! Pure conversions between raw 16-bit holding register words and typed
//! values. Nothing in here performs I/O or keeps state, with the exception of
//! [`Accumulator`] which tracks the last accepted energy counter sample.
//!
//! Every layout has a SunSpec "not implemented" sentinel. Decoding a sentinel
//! yields [`Decoded::NotApplicable`], never a zero.

use std::fmt;

/// Maximum number of registers in one Read Holding Registers (0x03) request.
pub const MAX_READ_REGISTERS: u16 = 125;
/// Maximum number of registers in one Write Multiple Registers (0x10) request.
pub const MAX_WRITE_REGISTERS: u16 = 123;

pub const NOT_IMPLEMENTED_I16: u16 = 0x8000;
pub const NOT_IMPLEMENTED_U16: u16 = 0xFFFF;
pub const NOT_IMPLEMENTED_ACC: u64 = 0;
pub const NOT_IMPLEMENTED_I32: u32 = 0x8000_0000;
pub const NOT_IMPLEMENTED_U32: u32 = 0xFFFF_FFFF;
pub const NOT_IMPLEMENTED_U64: u64 = 0xFFFF_FFFF_FFFF_FFFF;
pub const NOT_IMPLEMENTED_F32: u32 = 0x7FC0_0000;
pub const NOT_IMPLEMENTED_SCALE_FACTOR: u16 = 0x8000;

/// Errors of the register codec.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Scale factor {0} out of range [-10, 10]")]
    ScaleFactorOutOfRange(i16),
    #[error("Value {value} cannot be represented as {layout}")]
    ValueOutOfRange { value: f64, layout: Layout },
    #[error("Value is not a finite number")]
    NotFinite,
    #[error("Expected {expected} registers, got {actual}")]
    WordCount { expected: usize, actual: usize },
    #[error("Text of {len} bytes does not fit into {words} registers")]
    TextTooLong { len: usize, words: u16 },
    #[error("Text contains non-ASCII characters")]
    InvalidText,
    #[error("A {value} value cannot be encoded as {layout}")]
    KindMismatch { value: &'static str, layout: Layout },
    #[error("SunSpec marker 'SunS' not found")]
    MissingSunSpecMarker,
    #[error("Unexpected SunSpec model {actual} with length {length}, expected {expected}")]
    UnexpectedModel {
        expected: &'static str,
        actual: u16,
        length: u16,
    },
    #[error("{name} value {value} out of range [{min}, {max}]")]
    CommandOutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("Accumulator value must be non-zero")]
    AccumulatorNotPositive,
    #[error("Accumulator value {value} is lower than the previous value {last}")]
    AccumulatorDecreased { value: f64, last: f64 },
}

/// Order of the 16-bit words of a multi-register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordOrder {
    /// Most significant word first, as in the SunSpec model blocks.
    BigEndian,
    /// Least significant word first, as in the SolarEdge 0xE000+ and 0xF000+
    /// extension registers.
    LittleEndian,
}

/// Register layout of a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    U16,
    I16,
    Acc16,
    Enum16,
    Bitfield16,
    U32(WordOrder),
    I32(WordOrder),
    Acc32(WordOrder),
    Bitfield32(WordOrder),
    U64(WordOrder),
    Float32(WordOrder),
    /// Fixed length ASCII text, two bytes per register.
    Ascii(u16),
}

impl Layout {
    /// Number of registers occupied by the layout.
    pub const fn words(&self) -> usize {
        match self {
            Layout::U16 | Layout::I16 | Layout::Acc16 | Layout::Enum16 | Layout::Bitfield16 => 1,
            Layout::U32(_)
            | Layout::I32(_)
            | Layout::Acc32(_)
            | Layout::Bitfield32(_)
            | Layout::Float32(_) => 2,
            Layout::U64(_) => 4,
            Layout::Ascii(words) => *words as usize,
        }
    }

    /// Inclusive range of integers representable by the layout, excluding the
    /// not-implemented sentinel. `None` for float and text layouts.
    fn integer_range(&self) -> Option<(f64, f64)> {
        match self {
            Layout::U16 | Layout::Enum16 | Layout::Bitfield16 => Some((0.0, 65534.0)),
            Layout::I16 => Some((-32767.0, 32767.0)),
            Layout::Acc16 => Some((1.0, 65535.0)),
            Layout::U32(_) | Layout::Bitfield32(_) => Some((0.0, 4_294_967_294.0)),
            Layout::I32(_) => Some((-2_147_483_647.0, 2_147_483_647.0)),
            Layout::Acc32(_) => Some((1.0, 4_294_967_295.0)),
            // f64 cannot hold every u64, the upper bound is the last exact one.
            Layout::U64(_) => Some((0.0, 9_007_199_254_740_992.0)),
            Layout::Float32(_) | Layout::Ascii(_) => None,
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::U16 => write!(f, "uint16"),
            Layout::I16 => write!(f, "int16"),
            Layout::Acc16 => write!(f, "acc16"),
            Layout::Enum16 => write!(f, "enum16"),
            Layout::Bitfield16 => write!(f, "bitfield16"),
            Layout::U32(_) => write!(f, "uint32"),
            Layout::I32(_) => write!(f, "int32"),
            Layout::Acc32(_) => write!(f, "acc32"),
            Layout::Bitfield32(_) => write!(f, "bitfield32"),
            Layout::U64(_) => write!(f, "uint64"),
            Layout::Float32(_) => write!(f, "float32"),
            Layout::Ascii(words) => write!(f, "string({})", *words as usize * 2),
        }
    }
}

/// A decoded register value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unsigned(u64),
    Signed(i64),
    Float(f32),
    Text(String),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Unsigned(_) => "unsigned",
            Value::Signed(_) => "signed",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
        }
    }

    /// Numeric view of the value, `None` for text.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Unsigned(v) => Some(*v as f64),
            Value::Signed(v) => Some(*v as f64),
            Value::Float(v) => Some(*v as f64),
            Value::Text(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unsigned(v) => write!(f, "{v}"),
            Value::Signed(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
        }
    }
}

/// Result of decoding a register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded<T> {
    Value(T),
    /// The device reported the SunSpec not-implemented sentinel.
    NotApplicable,
}

impl<T> Default for Decoded<T> {
    fn default() -> Self {
        Decoded::NotApplicable
    }
}

impl<T> Decoded<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Decoded::Value(v) => Some(v),
            Decoded::NotApplicable => None,
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Decoded::Value(v) => Some(v),
            Decoded::NotApplicable => None,
        }
    }

    pub fn is_not_applicable(&self) -> bool {
        matches!(self, Decoded::NotApplicable)
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Decoded<U> {
        match self {
            Decoded::Value(v) => Decoded::Value(f(v)),
            Decoded::NotApplicable => Decoded::NotApplicable,
        }
    }

    pub fn as_ref(&self) -> Decoded<&T> {
        match self {
            Decoded::Value(v) => Decoded::Value(v),
            Decoded::NotApplicable => Decoded::NotApplicable,
        }
    }
}

impl<T: fmt::Display> fmt::Display for Decoded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decoded::Value(v) => v.fmt(f),
            Decoded::NotApplicable => write!(f, "n/a"),
        }
    }
}

/// A SunSpec scale factor, a power of ten exponent in the range [-10, 10].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleFactor(i8);

impl ScaleFactor {
    pub const MIN: i16 = -10;
    pub const MAX: i16 = 10;

    /// Decodes a scale factor register.
    ///
    /// The not-implemented sentinel `0x8000` decodes to `NotApplicable`, any
    /// other value outside [-10, 10] is a protocol violation.
    pub fn decode(word: u16) -> Result<Decoded<Self>, Error> {
        if word == NOT_IMPLEMENTED_SCALE_FACTOR {
            return Ok(Decoded::NotApplicable);
        }
        Self::try_from(word as i16).map(Decoded::Value)
    }

    pub fn encode(&self) -> u16 {
        self.0 as i16 as u16
    }

    /// Computes `magnitude * 10^exponent`.
    pub fn apply(&self, magnitude: f64) -> f64 {
        if self.0 >= 0 {
            magnitude * 10f64.powi(self.0 as i32)
        } else {
            // Dividing keeps results such as 2400 * 10^-1 exact.
            magnitude / 10f64.powi(-(self.0 as i32))
        }
    }

    /// Computes `value / 10^exponent`, the raw magnitude for a physical value.
    pub fn unapply(&self, value: f64) -> f64 {
        if self.0 >= 0 {
            value / 10f64.powi(self.0 as i32)
        } else {
            value * 10f64.powi(-(self.0 as i32))
        }
    }
}

impl TryFrom<i16> for ScaleFactor {
    type Error = Error;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value as i8))
        } else {
            Err(Error::ScaleFactorOutOfRange(value))
        }
    }
}

impl std::ops::Deref for ScaleFactor {
    type Target = i8;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for ScaleFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn check_words(words: &[u16], layout: Layout) -> Result<(), Error> {
    if words.len() == layout.words() {
        Ok(())
    } else {
        Err(Error::WordCount {
            expected: layout.words(),
            actual: words.len(),
        })
    }
}

fn join_u32(words: &[u16], order: WordOrder) -> u32 {
    match order {
        WordOrder::BigEndian => (words[0] as u32) << 16 | words[1] as u32,
        WordOrder::LittleEndian => (words[1] as u32) << 16 | words[0] as u32,
    }
}

fn split_u32(value: u32, order: WordOrder) -> Vec<u16> {
    let (high, low) = ((value >> 16) as u16, value as u16);
    match order {
        WordOrder::BigEndian => vec![high, low],
        WordOrder::LittleEndian => vec![low, high],
    }
}

fn join_u64(words: &[u16], order: WordOrder) -> u64 {
    let fold = |acc: u64, word: &u16| acc << 16 | *word as u64;
    match order {
        WordOrder::BigEndian => words.iter().fold(0, fold),
        WordOrder::LittleEndian => words.iter().rev().fold(0, fold),
    }
}

fn split_u64(value: u64, order: WordOrder) -> Vec<u16> {
    let mut words: Vec<u16> = (0..4).rev().map(|i| (value >> (i * 16)) as u16).collect();
    if order == WordOrder::LittleEndian {
        words.reverse();
    }
    words
}

/// Decodes ASCII text packed two bytes per register.
///
/// NUL and non-ASCII bytes are dropped, trailing whitespace is trimmed.
/// A string consisting only of NUL bytes is the not-implemented sentinel.
pub fn decode_string(words: &[u16]) -> Decoded<String> {
    if words.iter().all(|w| *w == 0) {
        return Decoded::NotApplicable;
    }
    let text: String = words
        .iter()
        .flat_map(|w| [(w >> 8) as u8, *w as u8])
        .filter(|b| *b != 0 && b.is_ascii())
        .map(char::from)
        .collect();
    Decoded::Value(text.trim_end().to_string())
}

/// Encodes ASCII text into `words` registers, right padded with NUL.
pub fn encode_string(text: &str, words: u16) -> Result<Vec<u16>, Error> {
    if !text.is_ascii() {
        return Err(Error::InvalidText);
    }
    let bytes = text.as_bytes();
    if bytes.len() > words as usize * 2 {
        return Err(Error::TextTooLong {
            len: bytes.len(),
            words,
        });
    }
    let mut padded = bytes.to_vec();
    padded.resize(words as usize * 2, 0);
    Ok(padded
        .chunks(2)
        .map(|pair| (pair[0] as u16) << 8 | pair[1] as u16)
        .collect())
}

/// Decodes the registers of one value.
pub fn decode(words: &[u16], layout: Layout) -> Result<Decoded<Value>, Error> {
    check_words(words, layout)?;
    let decoded = match layout {
        Layout::U16 | Layout::Enum16 | Layout::Bitfield16 => match words[0] {
            NOT_IMPLEMENTED_U16 => Decoded::NotApplicable,
            w => Decoded::Value(Value::Unsigned(w as u64)),
        },
        Layout::Acc16 => match words[0] as u64 {
            NOT_IMPLEMENTED_ACC => Decoded::NotApplicable,
            w => Decoded::Value(Value::Unsigned(w)),
        },
        Layout::I16 => match words[0] {
            NOT_IMPLEMENTED_I16 => Decoded::NotApplicable,
            w => Decoded::Value(Value::Signed(w as i16 as i64)),
        },
        Layout::U32(order) | Layout::Bitfield32(order) => match join_u32(words, order) {
            NOT_IMPLEMENTED_U32 => Decoded::NotApplicable,
            v => Decoded::Value(Value::Unsigned(v as u64)),
        },
        Layout::Acc32(order) => match join_u32(words, order) as u64 {
            NOT_IMPLEMENTED_ACC => Decoded::NotApplicable,
            v => Decoded::Value(Value::Unsigned(v)),
        },
        Layout::I32(order) => match join_u32(words, order) {
            NOT_IMPLEMENTED_I32 => Decoded::NotApplicable,
            v => Decoded::Value(Value::Signed(v as i32 as i64)),
        },
        Layout::U64(order) => match join_u64(words, order) {
            NOT_IMPLEMENTED_U64 => Decoded::NotApplicable,
            v => Decoded::Value(Value::Unsigned(v)),
        },
        Layout::Float32(order) => {
            let bits = join_u32(words, order);
            let value = f32::from_bits(bits);
            if bits == NOT_IMPLEMENTED_F32 || value.is_nan() {
                Decoded::NotApplicable
            } else {
                Decoded::Value(Value::Float(value))
            }
        }
        Layout::Ascii(_) => decode_string(words).map(Value::Text),
    };
    Ok(decoded)
}

/// Encodes a value for a register write.
pub fn encode(value: &Value, layout: Layout) -> Result<Vec<u16>, Error> {
    match (value, layout) {
        (Value::Text(text), Layout::Ascii(words)) => encode_string(text, words),
        (Value::Text(_), _) | (_, Layout::Ascii(_)) => Err(Error::KindMismatch {
            value: value.kind(),
            layout,
        }),
        (Value::Float(v), Layout::Float32(order)) => {
            if !v.is_finite() {
                return Err(Error::NotFinite);
            }
            Ok(split_u32(v.to_bits(), order))
        }
        (Value::Unsigned(v), Layout::U64(order)) => {
            if *v == NOT_IMPLEMENTED_U64 {
                return Err(Error::ValueOutOfRange {
                    value: *v as f64,
                    layout,
                });
            }
            Ok(split_u64(*v, order))
        }
        (value, layout) => {
            let number = value.as_f64().ok_or(Error::KindMismatch {
                value: value.kind(),
                layout,
            })?;
            encode_number(number, layout)
        }
    }
}

/// Encodes a number, rounding to the nearest raw integer for integer layouts.
///
/// Fails rather than truncates if the rounded value does not fit the layout.
pub fn encode_number(value: f64, layout: Layout) -> Result<Vec<u16>, Error> {
    if !value.is_finite() {
        return Err(Error::NotFinite);
    }
    if let Layout::Float32(order) = layout {
        if value.abs() > f32::MAX as f64 {
            return Err(Error::ValueOutOfRange { value, layout });
        }
        return Ok(split_u32((value as f32).to_bits(), order));
    }
    let (min, max) = layout.integer_range().ok_or(Error::KindMismatch {
        value: "number",
        layout,
    })?;
    let rounded = value.round();
    if !(min..=max).contains(&rounded) {
        return Err(Error::ValueOutOfRange { value, layout });
    }
    let words = match layout {
        Layout::U16 | Layout::Enum16 | Layout::Bitfield16 | Layout::Acc16 => {
            vec![rounded as u16]
        }
        Layout::I16 => vec![rounded as i16 as u16],
        Layout::U32(order) | Layout::Bitfield32(order) | Layout::Acc32(order) => {
            split_u32(rounded as u32, order)
        }
        Layout::I32(order) => split_u32(rounded as i32 as u32, order),
        Layout::U64(order) => split_u64(rounded as u64, order),
        Layout::Float32(_) | Layout::Ascii(_) => {
            return Err(Error::KindMismatch {
                value: "number",
                layout,
            })
        }
    };
    Ok(words)
}

/// Decodes a magnitude register together with its scale factor register.
///
/// The result is `NotApplicable` whenever the magnitude is the sentinel,
/// regardless of the scale factor. A not-implemented scale factor also makes
/// the value `NotApplicable`.
pub fn decode_scaled(words: &[u16], layout: Layout, scale_factor: u16) -> Result<Decoded<f64>, Error> {
    let magnitude = match decode(words, layout)? {
        Decoded::Value(value) => value,
        Decoded::NotApplicable => return Ok(Decoded::NotApplicable),
    };
    let magnitude = magnitude.as_f64().ok_or(Error::KindMismatch {
        value: "text",
        layout,
    })?;
    Ok(match ScaleFactor::decode(scale_factor)? {
        Decoded::Value(sf) => Decoded::Value(sf.apply(magnitude)),
        Decoded::NotApplicable => Decoded::NotApplicable,
    })
}

/// Encodes a physical value into the raw magnitude for the given scale factor.
pub fn encode_scaled(value: f64, layout: Layout, scale_factor: ScaleFactor) -> Result<Vec<u16>, Error> {
    if !value.is_finite() {
        return Err(Error::NotFinite);
    }
    encode_number(scale_factor.unapply(value), layout)
}

/// Formats the IEEE-754 bit pattern of a float, e.g. `0x3f800000` for `1.0`.
pub fn float_to_hex(value: f32) -> String {
    format!("{:#x}", value.to_bits())
}

/// Tracks a monotonically increasing energy counter.
///
/// Counters must be non-zero and must never decrease. Counter rollover is not
/// handled; at realistic production rates it takes decades.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    last: Option<f64>,
}

impl Accumulator {
    pub fn last(&self) -> Option<f64> {
        self.last
    }

    /// Accepts `value` if it is positive and not lower than the last sample.
    pub fn update(&mut self, value: f64) -> Result<f64, Error> {
        if value <= 0.0 {
            return Err(Error::AccumulatorNotPositive);
        }
        let last = self.last.unwrap_or(0.0);
        if value < last {
            return Err(Error::AccumulatorDecreased { value, last });
        }
        self.last = Some(value);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const BE: WordOrder = WordOrder::BigEndian;
    const LE: WordOrder = WordOrder::LittleEndian;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn scale_factor_range() {
        for sf in ScaleFactor::MIN..=ScaleFactor::MAX {
            let word = sf as u16;
            for magnitude in [0u16, 1, 7, 2400, 5000, 32767] {
                let decoded = decode_scaled(&[magnitude], Layout::U16, word).unwrap();
                let expected = magnitude as f64 * 10f64.powi(sf as i32);
                assert!(
                    close(*decoded.value().unwrap(), expected),
                    "{magnitude} * 10^{sf}"
                );
            }
        }
        for sf in [-11i16, 11, 100, -32767] {
            assert_matches!(
                decode_scaled(&[1], Layout::U16, sf as u16),
                Err(Error::ScaleFactorOutOfRange(v)) if v == sf
            );
            assert_matches!(ScaleFactor::try_from(sf), Err(Error::ScaleFactorOutOfRange(..)));
        }
    }

    #[test]
    fn scaled_values() {
        assert_eq!(decode_scaled(&[2400], Layout::U16, (-1i16) as u16), Ok(Decoded::Value(240.0)));
        assert_eq!(decode_scaled(&[5000], Layout::I16, (-2i16) as u16), Ok(Decoded::Value(50.0)));
        assert_eq!(decode_scaled(&[0xFFFE], Layout::I16, 0), Ok(Decoded::Value(-2.0)));
        assert_eq!(
            decode_scaled(&[0, 10000], Layout::Acc32(BE), 0),
            Ok(Decoded::Value(10000.0))
        );
        // a missing scale factor makes the value unusable
        assert_eq!(
            decode_scaled(&[100], Layout::U16, NOT_IMPLEMENTED_SCALE_FACTOR),
            Ok(Decoded::NotApplicable)
        );
    }

    #[test]
    fn sentinels_are_not_applicable() {
        assert_eq!(decode(&[0x8000], Layout::I16), Ok(Decoded::NotApplicable));
        assert_eq!(decode(&[0xFFFF], Layout::U16), Ok(Decoded::NotApplicable));
        assert_eq!(decode(&[0xFFFF], Layout::Enum16), Ok(Decoded::NotApplicable));
        assert_eq!(decode(&[0, 0], Layout::Acc32(BE)), Ok(Decoded::NotApplicable));
        assert_eq!(decode(&[0x8000, 0], Layout::I32(BE)), Ok(Decoded::NotApplicable));
        assert_eq!(decode(&[0xFFFF; 2], Layout::U32(LE)), Ok(Decoded::NotApplicable));
        assert_eq!(decode(&[0xFFFF; 4], Layout::U64(LE)), Ok(Decoded::NotApplicable));
        assert_eq!(decode(&[0x7FC0, 0], Layout::Float32(BE)), Ok(Decoded::NotApplicable));
        assert_eq!(decode(&[0, 0x7FC0], Layout::Float32(LE)), Ok(Decoded::NotApplicable));
        assert_eq!(decode(&[0; 4], Layout::Ascii(4)), Ok(Decoded::NotApplicable));

        // even with a valid scale factor
        for sf in [0u16, 1, (-3i16) as u16] {
            assert_eq!(decode_scaled(&[0x8000], Layout::I16, sf), Ok(Decoded::NotApplicable));
            assert_eq!(decode_scaled(&[0xFFFF], Layout::U16, sf), Ok(Decoded::NotApplicable));
        }

        // zero is a real value for plain integers
        assert_eq!(decode(&[0], Layout::I16), Ok(Decoded::Value(Value::Signed(0))));
        assert_eq!(decode(&[0], Layout::U16), Ok(Decoded::Value(Value::Unsigned(0))));
    }

    #[test]
    fn word_order() {
        assert_eq!(
            decode(&[0x0001, 0x0002], Layout::U32(BE)),
            Ok(Decoded::Value(Value::Unsigned(0x0001_0002)))
        );
        assert_eq!(
            decode(&[0x0001, 0x0002], Layout::U32(LE)),
            Ok(Decoded::Value(Value::Unsigned(0x0002_0001)))
        );
        assert_eq!(
            decode(&[1, 2, 3, 4], Layout::U64(BE)),
            Ok(Decoded::Value(Value::Unsigned(0x0001_0002_0003_0004)))
        );
        assert_eq!(
            decode(&[1, 2, 3, 4], Layout::U64(LE)),
            Ok(Decoded::Value(Value::Unsigned(0x0004_0003_0002_0001)))
        );
        assert_eq!(
            decode(&[0x4220, 0x0000], Layout::Float32(BE)),
            Ok(Decoded::Value(Value::Float(40.0)))
        );
        assert_eq!(
            decode(&[0x0000, 0x4220], Layout::Float32(LE)),
            Ok(Decoded::Value(Value::Float(40.0)))
        );
    }

    #[test]
    fn round_trip() {
        let cases = [
            (Value::Unsigned(4711), Layout::U16),
            (Value::Signed(-1234), Layout::I16),
            (Value::Unsigned(70_000), Layout::U32(BE)),
            (Value::Unsigned(70_000), Layout::Acc32(LE)),
            (Value::Signed(-70_000), Layout::I32(BE)),
            (Value::Unsigned(1 << 40), Layout::U64(LE)),
            (Value::Float(0.95), Layout::Float32(LE)),
            (Value::Float(-3.5), Layout::Float32(BE)),
            (Value::Text("SolarEdge".into()), Layout::Ascii(16)),
        ];
        for (value, layout) in cases {
            let words = encode(&value, layout).unwrap();
            assert_eq!(words.len(), layout.words());
            assert_eq!(decode(&words, layout), Ok(Decoded::Value(value)));
        }

        let sf = ScaleFactor::try_from(-2).unwrap();
        let words = encode_scaled(49.87, Layout::U16, sf).unwrap();
        assert_eq!(words, vec![4987]);
        assert_eq!(decode_scaled(&words, Layout::U16, sf.encode()), Ok(Decoded::Value(49.87)));
    }

    #[test]
    fn encode_rounds_and_rejects() {
        assert_eq!(encode_number(41.5, Layout::U16), Ok(vec![42]));
        assert_eq!(encode_number(41.4, Layout::U16), Ok(vec![41]));
        assert_eq!(encode_number(-1.6, Layout::I16), Ok(vec![(-2i16) as u16]));
        assert_matches!(encode_number(65535.0, Layout::U16), Err(Error::ValueOutOfRange { .. }));
        assert_matches!(encode_number(-0.6, Layout::U16), Err(Error::ValueOutOfRange { .. }));
        assert_matches!(encode_number(-32768.0, Layout::I16), Err(Error::ValueOutOfRange { .. }));
        assert_matches!(encode_number(f64::NAN, Layout::U16), Err(Error::NotFinite));
        assert_matches!(encode_number(1e39, Layout::Float32(BE)), Err(Error::ValueOutOfRange { .. }));
        assert_matches!(encode_number(1.0, Layout::Ascii(2)), Err(Error::KindMismatch { .. }));
        assert_matches!(
            encode_scaled(700.0, Layout::I16, ScaleFactor::try_from(-2).unwrap()),
            Err(Error::ValueOutOfRange { .. })
        );
        assert_eq!(encode_number(80.0, Layout::U16), Ok(vec![0x0050]));
        assert_eq!(encode_number(3600.0, Layout::U32(LE)), Ok(vec![0x0E10, 0x0000]));
    }

    #[test]
    fn strings() {
        assert_eq!(
            decode_string(&[0x536F, 0x6C61, 0x7245, 0x6467, 0x6500]),
            Decoded::Value("SolarEdge".to_string())
        );
        assert_eq!(decode_string(&[0x5465, 0x7374, 0x2020, 0x0000]), Decoded::Value("Test".to_string()));
        assert_eq!(decode_string(&[0x4869]), Decoded::Value("Hi".to_string()));
        assert_eq!(decode_string(&[0x5465, 0x7374, 0xFFFF, 0x4F4B]), Decoded::Value("TestOK".to_string()));
        assert_eq!(decode_string(&[]), Decoded::NotApplicable);
        assert_eq!(encode_string("SE10K", 3), Ok(vec![0x5345, 0x3130, 0x4B00]));
        assert_matches!(encode_string("SE10K-RWS", 3), Err(Error::TextTooLong { len: 9, words: 3 }));
        assert_matches!(encode_string("Grüße", 8), Err(Error::InvalidText));
    }

    #[test]
    fn word_count_is_checked() {
        assert_matches!(
            decode(&[1], Layout::U32(BE)),
            Err(Error::WordCount { expected: 2, actual: 1 })
        );
        assert_matches!(decode(&[1, 2], Layout::U16), Err(Error::WordCount { .. }));
    }

    #[test]
    fn float_hex() {
        assert_eq!(float_to_hex(0.0), "0x0");
        assert_eq!(float_to_hex(1.0), "0x3f800000");
        assert_eq!(float_to_hex(-1.0), "0xbf800000");
        assert_eq!(float_to_hex(100.0), "0x42c80000");
        assert_eq!(float_to_hex(0.5), "0x3f000000");
    }

    #[test]
    fn accumulator() {
        let mut acc = Accumulator::default();
        assert_eq!(acc.update(100.0), Ok(100.0));
        assert_eq!(acc.update(150.0), Ok(150.0));
        assert_eq!(acc.update(150.0), Ok(150.0));
        assert_matches!(acc.update(100.0), Err(Error::AccumulatorDecreased { .. }));
        assert_matches!(acc.update(0.0), Err(Error::AccumulatorNotPositive));
        assert_matches!(acc.update(-50.0), Err(Error::AccumulatorNotPositive));
        assert_eq!(acc.last(), Some(150.0));
        assert_eq!(acc.update(1_000_000.0), Ok(1_000_000.0));
    }
}
