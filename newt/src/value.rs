use core::fmt;

use crate::error::Error;

/// The declared type of a Resource.
///
/// Execute resources carry no type at all
/// (see [`Res::exec`](crate::dm::Res::exec)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResType {
  /// Opaque bytes
  Bytes,
  /// UTF-8 text
  Str,
  /// Signed 64-bit integer
  Int,
  /// IEEE 754 double
  Double,
  /// Boolean
  Bool,
  /// Object Link (`OID:IID` pair)
  Objlnk,
  /// Unsigned 64-bit integer
  Uint,
  /// Unix time, seconds
  Time,
  /// Bytes produced on demand by an [`ExternalSource`]
  ExtBytes,
  /// UTF-8 text produced on demand by an [`ExternalSource`]
  ExtStr,
}

impl ResType {
  /// Is this one of the numeric types thresholds (`gt`/`lt`/`st`) apply to?
  pub fn numeric(&self) -> bool {
    matches!(self, ResType::Int | ResType::Uint | ResType::Double | ResType::Time)
  }
}

/// An Object Link value: a reference to an Object Instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Objlnk {
  /// Referenced Object id
  pub oid: u16,
  /// Referenced Object Instance id
  pub iid: u16,
}

/// One chunk of a byte-stream value.
///
/// Large values arrive across multiple `write_entry` calls sharing a
/// path; each call
/// carries the chunk's `offset` into the full value and the expected
/// `full_length_hint`. The value is complete when
/// `offset + data.len() == full_length_hint`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BytesChunk<'a> {
  /// This chunk's bytes
  pub data: &'a [u8],
  /// Offset of `data` within the whole value
  pub offset: usize,
  /// Total length of the whole value
  pub full_length_hint: usize,
}

impl<'a> BytesChunk<'a> {
  /// A value delivered whole, in a single chunk.
  pub fn whole(data: &'a [u8]) -> Self {
    BytesChunk { data,
                 offset: 0,
                 full_length_hint: data.len() }
  }
}

/// One chunk of a UTF-8 string value. See [`BytesChunk`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrChunk<'a> {
  /// This chunk's text
  pub data: &'a str,
  /// Byte offset of `data` within the whole value
  pub offset: usize,
  /// Total byte length of the whole value
  pub full_length_hint: usize,
}

impl<'a> StrChunk<'a> {
  /// A value delivered whole, in a single chunk.
  pub fn whole(data: &'a str) -> Self {
    StrChunk { data,
               offset: 0,
               full_length_hint: data.len() }
  }
}

/// Producer of an external (out-of-RAM) value, read on demand.
pub trait ExternalSource {
  /// Copy up to `dst.len()` bytes starting at `offset` into `dst`,
  /// returning how many were copied. `Ok(0)` signals the end of the value.
  fn read(&self, offset: usize, dst: &mut [u8]) -> Result<usize, Error>;
}

/// A borrowed handle to an [`ExternalSource`].
#[derive(Clone, Copy)]
pub struct External<'a> {
  /// The producer callback object
  pub source: &'a dyn ExternalSource,
}

impl fmt::Debug for External<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("External").finish_non_exhaustive()
  }
}

impl PartialEq for External<'_> {
  fn eq(&self, other: &Self) -> bool {
    core::ptr::eq(self.source, other.source)
  }
}

/// A Resource (Instance) value.
///
/// ```
/// use newt::value::{ResType, Value};
///
/// let v = Value::from("well-lit");
/// assert_eq!(v.res_type(), ResType::Str);
/// assert_eq!(v.as_str().unwrap(), "well-lit");
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'a> {
  /// Opaque bytes, possibly one chunk of many
  Bytes(BytesChunk<'a>),
  /// UTF-8 text, possibly one chunk of many
  Str(StrChunk<'a>),
  /// Signed integer
  Int(i64),
  /// Double
  Double(f64),
  /// Boolean
  Bool(bool),
  /// Object Link
  Objlnk(Objlnk),
  /// Unsigned integer
  Uint(u64),
  /// Unix time, seconds
  Time(i64),
  /// Externally produced bytes
  ExtBytes(External<'a>),
  /// Externally produced text
  ExtStr(External<'a>),
}

impl<'a> From<&'a str> for Value<'a> {
  fn from(s: &'a str) -> Self {
    Value::Str(StrChunk::whole(s))
  }
}

impl<'a> From<&'a [u8]> for Value<'a> {
  fn from(b: &'a [u8]) -> Self {
    Value::Bytes(BytesChunk::whole(b))
  }
}

impl<'a> Value<'a> {
  /// The [`ResType`] this value inhabits.
  pub fn res_type(&self) -> ResType {
    use Value::*;
    match self {
      | Bytes(_) => ResType::Bytes,
      | Str(_) => ResType::Str,
      | Int(_) => ResType::Int,
      | Double(_) => ResType::Double,
      | Bool(_) => ResType::Bool,
      | Objlnk(_) => ResType::Objlnk,
      | Uint(_) => ResType::Uint,
      | Time(_) => ResType::Time,
      | ExtBytes(_) => ResType::ExtBytes,
      | ExtStr(_) => ResType::ExtStr,
    }
  }

  /// Does this value satisfy a resource declared as `ty`?
  ///
  /// Exact match, with the legal widenings `Str` ↔ `ExtStr` and
  /// `Bytes` ↔ `ExtBytes`.
  pub fn matches(&self, ty: ResType) -> bool {
    let got = self.res_type();
    got == ty
    || matches!((got, ty),
                (ResType::Str, ResType::ExtStr)
                | (ResType::ExtStr, ResType::Str)
                | (ResType::Bytes, ResType::ExtBytes)
                | (ResType::ExtBytes, ResType::Bytes))
  }

  /// The signed integer inside, else [`Error::BadRequest`].
  pub fn as_i64(&self) -> Result<i64, Error> {
    match self {
      | Value::Int(n) => Ok(*n),
      | _ => Err(Error::BadRequest),
    }
  }

  /// The unsigned integer inside, else [`Error::BadRequest`].
  pub fn as_u64(&self) -> Result<u64, Error> {
    match self {
      | Value::Uint(n) => Ok(*n),
      | _ => Err(Error::BadRequest),
    }
  }

  /// The double inside, else [`Error::BadRequest`].
  pub fn as_f64(&self) -> Result<f64, Error> {
    match self {
      | Value::Double(n) => Ok(*n),
      | _ => Err(Error::BadRequest),
    }
  }

  /// The boolean inside, else [`Error::BadRequest`].
  pub fn as_bool(&self) -> Result<bool, Error> {
    match self {
      | Value::Bool(b) => Ok(*b),
      | _ => Err(Error::BadRequest),
    }
  }

  /// The Object Link inside, else [`Error::BadRequest`].
  pub fn as_objlnk(&self) -> Result<Objlnk, Error> {
    match self {
      | Value::Objlnk(l) => Ok(*l),
      | _ => Err(Error::BadRequest),
    }
  }

  /// The Unix timestamp inside, else [`Error::BadRequest`].
  pub fn as_time(&self) -> Result<i64, Error> {
    match self {
      | Value::Time(t) => Ok(*t),
      | _ => Err(Error::BadRequest),
    }
  }

  /// The text chunk inside, else [`Error::BadRequest`].
  ///
  /// Only meaningful for whole (single-chunk) values.
  pub fn as_str(&self) -> Result<&'a str, Error> {
    match self {
      | Value::Str(c) => Ok(c.data),
      | _ => Err(Error::BadRequest),
    }
  }

  /// The byte chunk inside, else [`Error::BadRequest`].
  pub fn as_bytes(&self) -> Result<&'a [u8], Error> {
    match self {
      | Value::Bytes(c) => Ok(c.data),
      | _ => Err(Error::BadRequest),
    }
  }
}

/// Copy one [`BytesChunk`] of an incoming value into `buffer` at the
/// chunk's offset.
///
/// Returns `Some(full_length)` when this was the final chunk, `None` when
/// more chunks are expected and [`Error::Internal`] when the chunk does
/// not fit in `buffer`.
///
/// ```
/// use newt::value::{write_bytes_chunked, BytesChunk, Value};
///
/// let mut buf = [0u8; 8];
/// let first = Value::Bytes(BytesChunk { data: &[1, 2],
///                                       offset: 0,
///                                       full_length_hint: 4 });
/// let last = Value::Bytes(BytesChunk { data: &[3, 4],
///                                      offset: 2,
///                                      full_length_hint: 4 });
///
/// assert_eq!(write_bytes_chunked(&first, &mut buf), Ok(None));
/// assert_eq!(write_bytes_chunked(&last, &mut buf), Ok(Some(4)));
/// assert_eq!(&buf[..4], &[1, 2, 3, 4]);
/// ```
pub fn write_bytes_chunked(value: &Value<'_>,
                           buffer: &mut [u8])
                           -> Result<Option<usize>, Error> {
  let chunk = match value {
    | Value::Bytes(c) => *c,
    | _ => return Err(Error::BadRequest),
  };
  copy_chunk(chunk.data, chunk.offset, chunk.full_length_hint, buffer)
}

/// [`write_bytes_chunked`] for [`StrChunk`] values.
///
/// On the final chunk, `buffer[..full_length]` holds the complete UTF-8
/// string.
pub fn write_string_chunked(value: &Value<'_>,
                            buffer: &mut [u8])
                            -> Result<Option<usize>, Error> {
  let chunk = match value {
    | Value::Str(c) => *c,
    | _ => return Err(Error::BadRequest),
  };
  copy_chunk(chunk.data.as_bytes(), chunk.offset, chunk.full_length_hint, buffer)
}

fn copy_chunk(data: &[u8],
              offset: usize,
              full: usize,
              buffer: &mut [u8])
              -> Result<Option<usize>, Error> {
  let end = offset + data.len();
  if end > buffer.len() {
    return Err(Error::Internal);
  }
  buffer[offset..end].copy_from_slice(data);
  if end == full {
    Ok(Some(full))
  } else {
    Ok(None)
  }
}
