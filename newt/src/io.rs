use toad_msg::ContentFormat;

use crate::error::Error;
use crate::path::Path;
use crate::value::Value;

/// `application/senml+cbor`, the composite payload format.
pub const SENML_CBOR: ContentFormat = ContentFormat::Other(112);

/// `application/vnd.oma.lwm2m+cbor`, the default single-path format.
pub const LWM2M_CBOR: ContentFormat = ContentFormat::Other(11544);

/// `application/cbor`.
pub const CBOR: ContentFormat = ContentFormat::Other(60);

/// `application/vnd.oma.lwm2m+tlv`.
pub const TLV: ContentFormat = ContentFormat::Other(11542);

/// CBOR header for an empty map, emitted when a path has no readable
/// content in a single-path payload.
pub(crate) const EMPTY_MAP: u8 = 0xA0;

/// CBOR header for an empty array, the composite flavor of [`EMPTY_MAP`].
pub(crate) const EMPTY_ARRAY: u8 = 0x80;

/// A `{path, value}` pair exchanged between the engine and a payload
/// (de)serializer.
///
/// The record's type is carried by the value itself
/// (see [`Value::res_type`]).
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
  /// Resource or Resource Instance path
  pub path: Path,
  /// The value read from, or to be written into, the data model
  pub value: Value<'a>,
}

/// Signal that the current output window is full and the rest of the
/// payload must go into the next block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overflow;

/// The narrow seam between this crate and payload serialization.
///
/// Implementations encode the engine's record stream into concrete wire
/// formats (SenML-CBOR, LwM2M-CBOR, ...). The engine only negotiates the
/// format, feeds records in data model order and watches for
/// [`Overflow`] to split the payload across blocks.
pub trait Serializer {
  /// Can this implementation produce `format`?
  fn supports(&self, format: ContentFormat) -> bool;

  /// Start a payload in `format`, writing any prologue into `out` and
  /// returning the number of bytes written.
  ///
  /// `composite` selects the multi-path framing; `total` is the number
  /// of records the whole payload will carry.
  fn begin(&mut self,
           format: ContentFormat,
           composite: bool,
           total: usize,
           out: &mut [u8])
           -> Result<usize, Overflow>;

  /// Encode one record into `out`, returning the number of bytes
  /// written.
  fn record(&mut self, record: &Record<'_>, out: &mut [u8]) -> Result<usize, Overflow>;

  /// Write any epilogue into `out`, returning the number of bytes
  /// written.
  fn end(&mut self, out: &mut [u8]) -> Result<usize, Overflow>;
}

/// Pick the payload format for a notification.
///
/// `accept` (from the observation) wins when the serializer supports it;
/// an unsupported `accept` is [`Error::UnsupportedFormat`]. Without an
/// `accept`, single-path payloads default to [`LWM2M_CBOR`] and
/// composite payloads to [`SENML_CBOR`].
pub(crate) fn negotiate(serializer: &dyn Serializer,
                        accept: Option<ContentFormat>,
                        composite: bool)
                        -> Result<ContentFormat, Error> {
  match accept {
    | Some(format) if serializer.supports(format) => Ok(format),
    | Some(_) => Err(Error::UnsupportedFormat),
    | None => {
      let format = if composite { SENML_CBOR } else { LWM2M_CBOR };
      if serializer.supports(format) {
        Ok(format)
      } else {
        Err(Error::UnsupportedFormat)
      }
    },
  }
}
