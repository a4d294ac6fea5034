use toad_msg::{ContentFormat, Token};

use crate::observe::Attributes;
use crate::path::Path;

/// A protocol operation, as classified by the CoAP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
  /// Register with an LwM2M server
  Register,
  /// Registration update
  Update,
  /// Read
  Read,
  /// Read-Composite
  ReadComposite,
  /// Discover (or Bootstrap-Discover when the request is bootstrap)
  Discover,
  /// Write (replace semantics)
  WriteReplace,
  /// Write (partial-update semantics)
  WritePartialUpdate,
  /// Write-Composite
  WriteComposite,
  /// Write-Attributes
  WriteAttributes,
  /// Execute
  Execute,
  /// Create
  Create,
  /// Delete (or Bootstrap-Delete when the request is bootstrap)
  Delete,
  /// Observe (Observe option = 0)
  Observe,
  /// Cancel an observation (Observe option = 1)
  CancelObserve,
  /// Observe-Composite
  ObserveComposite,
  /// Cancel an Observe-Composite
  CancelObserveComposite,
}

/// Which block-wise transfer option a message carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
  /// Block1 (request payload)
  Block1,
  /// Block2 (response payload)
  Block2,
}

/// Parsed block-wise transfer option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
  /// Block1 or Block2
  pub kind: BlockKind,
  /// Block number
  pub number: u32,
  /// More blocks to come?
  pub more: bool,
  /// Negotiated block size in bytes
  pub size: u16,
}

/// One logical server request, decoded by the CoAP layer.
///
/// Block-wise transfer is transparent to the engine: several CoAP
/// messages may have carried this request, but the engine sees it once.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
  /// What the server asked for
  pub operation: Operation,
  /// Target path
  pub uri: Path,
  /// Request token, echoed in notifications
  pub token: Token,
  /// Content-Format of `payload`, if any
  pub content_format: Option<ContentFormat>,
  /// Accept option, if any
  pub accept: Option<ContentFormat>,
  /// Block option, if any
  pub block: Option<Block>,
  /// Raw request payload
  pub payload: &'a [u8],
  /// Notification attributes parsed from the URI query
  pub attr: Option<Attributes>,
}

impl<'a> Request<'a> {
  /// A bare request with the given operation and path.
  ///
  /// ```
  /// use newt::{Operation, Path, Request};
  ///
  /// let req = Request::new(Operation::Read, Path::object(3));
  /// assert!(req.attr.is_none());
  /// ```
  pub fn new(operation: Operation, uri: Path) -> Self {
    Request { operation,
              uri,
              token: Token(Default::default()),
              content_format: None,
              accept: None,
              block: None,
              payload: &[],
              attr: None }
  }
}
