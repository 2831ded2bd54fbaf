//! Value codec
//!
//! Byte-level representation of every value that travels through the
//! callback registry. Integers are fixed width in platform byte order,
//! strings and arrays carry a `u32` length prefix, records are encoded field
//! by field in declaration order.
//!
//! Decoding is all-or-nothing: a value is only returned once every field has
//! been read and the input has been consumed completely.

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};

use crate::types::{AppInfo, BridgeError, Event, Key, Result};

/// A value with a wire representation
pub trait Wire: Sized {
    /// Append the encoded value to `out`
    fn encode(&self, out: &mut Vec<u8>) -> Result<()>;

    /// Read one value from the front of `input`, advancing it
    fn decode(input: &mut &[u8]) -> Result<Self>;
}

/// Encode a value into a fresh buffer
pub fn encode<T: Wire>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    value.encode(&mut out)?;
    Ok(out)
}

/// Decode a value that must span the whole buffer
pub fn decode<T: Wire>(bytes: &[u8]) -> Result<T> {
    let mut input = bytes;
    let value = T::decode(&mut input)?;
    if !input.is_empty() {
        return Err(BridgeError::Decode(format!(
            "{} trailing bytes after value",
            input.len()
        )));
    }
    Ok(value)
}

/// Write a length or element count. Counts that do not fit in `u32` are
/// rejected, never truncated.
pub fn put_count(out: &mut Vec<u8>, count: usize) -> Result<()> {
    let count = u32::try_from(count)
        .map_err(|_| BridgeError::Encode(format!("count {} does not fit in u32", count)))?;
    count.encode(out)
}

/// Read a length or element count
pub fn take_count(input: &mut &[u8]) -> Result<usize> {
    let count = u32::decode(input)?;
    usize::try_from(count)
        .map_err(|_| BridgeError::Decode(format!("count {} does not fit in usize", count)))
}

/// Write text bytes exactly as received, without validating them
///
/// Used for strings coming out of native memory; validation happens when the
/// payload is decoded into a `String`.
pub fn put_text_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    put_count(out, bytes.len())?;
    out.extend_from_slice(bytes);
    Ok(())
}

fn take_bytes<'a>(input: &mut &'a [u8], len: usize) -> Result<&'a [u8]> {
    if input.len() < len {
        return Err(BridgeError::Decode(format!(
            "truncated input: need {} bytes, {} left",
            len,
            input.len()
        )));
    }
    let (head, tail) = input.split_at(len);
    *input = tail;
    Ok(head)
}

fn truncated(err: std::io::Error) -> BridgeError {
    BridgeError::Decode(format!("truncated input: {}", err))
}

fn write_failed(err: std::io::Error) -> BridgeError {
    BridgeError::Encode(err.to_string())
}

impl Wire for () {
    fn encode(&self, _out: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }

    fn decode(_input: &mut &[u8]) -> Result<Self> {
        Ok(())
    }
}

impl Wire for u8 {
    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        out.write_u8(*self).map_err(write_failed)
    }

    fn decode(input: &mut &[u8]) -> Result<Self> {
        input.read_u8().map_err(truncated)
    }
}

impl Wire for bool {
    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        u8::from(*self).encode(out)
    }

    fn decode(input: &mut &[u8]) -> Result<Self> {
        match u8::decode(input)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(BridgeError::Decode(format!("invalid bool byte {}", other))),
        }
    }
}

macro_rules! wire_int {
    ($ty:ty, $write:ident, $read:ident) => {
        impl Wire for $ty {
            fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
                out.$write::<NativeEndian>(*self).map_err(write_failed)
            }

            fn decode(input: &mut &[u8]) -> Result<Self> {
                input.$read::<NativeEndian>().map_err(truncated)
            }
        }
    };
}

wire_int!(i32, write_i32, read_i32);
wire_int!(u32, write_u32, read_u32);
wire_int!(i64, write_i64, read_i64);
wire_int!(u64, write_u64, read_u64);

impl Wire for String {
    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        put_text_bytes(out, self.as_bytes())
    }

    fn decode(input: &mut &[u8]) -> Result<Self> {
        let len = take_count(input)?;
        let bytes = take_bytes(input, len)?;
        let text = std::str::from_utf8(bytes)
            .map_err(|e| BridgeError::Decode(format!("invalid UTF-8 in string: {}", e)))?;
        Ok(text.to_owned())
    }
}

impl<const N: usize> Wire for Key<N> {
    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(self.as_bytes());
        Ok(())
    }

    fn decode(input: &mut &[u8]) -> Result<Self> {
        let bytes = take_bytes(input, N)?;
        Key::from_slice(bytes)
    }
}

impl<T: Wire> Wire for Vec<T> {
    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        put_count(out, self.len())?;
        for item in self {
            item.encode(out)?;
        }
        Ok(())
    }

    fn decode(input: &mut &[u8]) -> Result<Self> {
        let count = take_count(input)?;
        // A corrupt count must not turn into a huge allocation
        let mut items = Vec::with_capacity(count.min(input.len()));
        for _ in 0..count {
            items.push(T::decode(input)?);
        }
        Ok(items)
    }
}

impl<A: Wire, B: Wire> Wire for (A, B) {
    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        self.0.encode(out)?;
        self.1.encode(out)
    }

    fn decode(input: &mut &[u8]) -> Result<Self> {
        let a = A::decode(input)?;
        let b = B::decode(input)?;
        Ok((a, b))
    }
}

impl<A: Wire, B: Wire, C: Wire> Wire for (A, B, C) {
    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        self.0.encode(out)?;
        self.1.encode(out)?;
        self.2.encode(out)
    }

    fn decode(input: &mut &[u8]) -> Result<Self> {
        let a = A::decode(input)?;
        let b = B::decode(input)?;
        let c = C::decode(input)?;
        Ok((a, b, c))
    }
}

impl Wire for AppInfo {
    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        self.id.encode(out)?;
        self.name.encode(out)?;
        self.key.encode(out)
    }

    fn decode(input: &mut &[u8]) -> Result<Self> {
        let id = i32::decode(input)?;
        let name = String::decode(input)?;
        let key = Key::decode(input)?;
        Ok(AppInfo { id, name, key })
    }
}

pub(crate) const EVENT_CONNECTED: u8 = 0;
pub(crate) const EVENT_DISCONNECTED: u8 = 1;

impl Wire for Event {
    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Event::Connected(app) => {
                EVENT_CONNECTED.encode(out)?;
                app.encode(out)
            }
            Event::Disconnected => EVENT_DISCONNECTED.encode(out),
        }
    }

    fn decode(input: &mut &[u8]) -> Result<Self> {
        match u8::decode(input)? {
            EVENT_CONNECTED => Ok(Event::Connected(AppInfo::decode(input)?)),
            EVENT_DISCONNECTED => Ok(Event::Disconnected),
            tag => Err(BridgeError::Decode(format!("unknown event tag {}", tag))),
        }
    }
}
