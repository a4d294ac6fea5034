use toad_msg::Code;

/// Canonical CoAP response codes returned by this layer.
pub mod code {
  use toad_msg::Code;

  /// 2.04 Changed
  #[allow(clippy::zero_prefixed_literal)]
  pub const CHANGED: Code = Code::new(2, 04);
  /// 2.05 Content
  #[allow(clippy::zero_prefixed_literal)]
  pub const CONTENT: Code = Code::new(2, 05);
  /// 2.31 Continue
  pub const CONTINUE: Code = Code::new(2, 31);
  /// 4.00 Bad Request
  #[allow(clippy::zero_prefixed_literal)]
  pub const BAD_REQUEST: Code = Code::new(4, 00);
  /// 4.04 Not Found
  #[allow(clippy::zero_prefixed_literal)]
  pub const NOT_FOUND: Code = Code::new(4, 04);
  /// 4.05 Method Not Allowed
  #[allow(clippy::zero_prefixed_literal)]
  pub const METHOD_NOT_ALLOWED: Code = Code::new(4, 05);
  /// 4.15 Unsupported Content-Format
  pub const UNSUPPORTED_CONTENT_FORMAT: Code = Code::new(4, 15);
  /// 5.00 Internal Server Error
  #[allow(clippy::zero_prefixed_literal)]
  pub const INTERNAL_SERVER_ERROR: Code = Code::new(5, 00);
}

/// Everything that can go wrong inside the engine.
///
/// Two families share this enum:
/// - protocol errors, mapped 1:1 to a CoAP response code by [`Error::code`]
/// - engine-misuse errors ([`Memory`](Error::Memory),
///   [`Logic`](Error::Logic), [`InputArg`](Error::InputArg)) that are only
///   ever surfaced to the host runtime and all map to 5.00
///
/// The first error raised within an operation is latched; every later
/// engine entry point short-circuits with it until
/// [`operation_end`](crate::dm::DataModel::operation_end) runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
  /// Malformed input: bad path shape, type mismatch, invalid bootstrap
  /// target.
  BadRequest,
  /// The addressed entity does not exist.
  NotFound,
  /// The operation is not permitted on the target.
  MethodNotAllowed,
  /// The requested content format is not supported by the serializer.
  UnsupportedFormat,
  /// A user handler reported a generic failure.
  Internal,
  /// A fixed capacity cap was reached.
  Memory,
  /// Out-of-sequence engine API usage (e.g. `add_obj` mid-operation).
  Logic,
  /// Invalid registration data (structural validator failure).
  InputArg,
  /// The operation exists in the protocol but not in this build.
  NotImplemented,
}

impl Error {
  /// The CoAP response code this error maps to.
  ///
  /// ```
  /// use newt::error::{code, Error};
  ///
  /// assert_eq!(Error::NotFound.code(), code::NOT_FOUND);
  /// assert_eq!(Error::Memory.code(), code::INTERNAL_SERVER_ERROR);
  /// ```
  pub fn code(&self) -> Code {
    use Error::*;
    match self {
      | BadRequest => code::BAD_REQUEST,
      | NotFound => code::NOT_FOUND,
      | MethodNotAllowed => code::METHOD_NOT_ALLOWED,
      | UnsupportedFormat => code::UNSUPPORTED_CONTENT_FORMAT,
      | Internal | Memory | Logic | InputArg | NotImplemented => {
        code::INTERNAL_SERVER_ERROR
      },
    }
  }
}
