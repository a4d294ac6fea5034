use core::fmt;

use newt::dm::{Handlers, Obj, Res, ResOp};
use newt::value::{ResType, StrChunk, Value};
use newt::{Error, Path};
use toad_string::String;

use crate::security::write_str_chunked;

/// Object id of the Firmware Update object.
pub const OID_FW_UPDATE: u16 = 5;

/// Package (push delivery)
pub const RID_PACKAGE: u16 = 0;
/// Package URI (pull delivery)
pub const RID_PACKAGE_URI: u16 = 1;
/// Update
pub const RID_UPDATE: u16 = 2;
/// State
pub const RID_STATE: u16 = 3;
/// Update Result
pub const RID_UPDATE_RESULT: u16 = 5;
/// PkgName
pub const RID_PKG_NAME: u16 = 6;
/// PkgVersion
pub const RID_PKG_VERSION: u16 = 7;
/// Firmware Update Protocol Support
pub const RID_PROTOCOL_SUPPORT: u16 = 8;
/// Firmware Update Delivery Method
pub const RID_DELIVERY_METHOD: u16 = 9;

const URI_CAP: usize = 128;

/// Resource 3 values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FwState {
  /// No firmware package present
  #[default]
  Idle = 0,
  /// Package or Package URI transfer in progress
  Downloading = 1,
  /// Package complete and verified enough to try
  Downloaded = 2,
  /// Update execute running
  Updating = 3,
}

/// Resource 5 values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FwResult {
  /// Initial (no update attempted since the last reset)
  #[default]
  Initial = 0,
  /// Firmware updated successfully
  Success = 1,
  /// Not enough flash for the new package
  NotEnoughSpace = 2,
  /// Out of RAM during download
  OutOfMemory = 3,
  /// Connection lost during download
  ConnectionLost = 4,
  /// Package integrity check failure
  IntegrityFailure = 5,
  /// Unsupported package type
  UnsupportedPackageType = 6,
  /// Invalid Package URI
  InvalidUri = 7,
  /// Firmware update failed
  Failed = 8,
  /// Unsupported protocol in the Package URI
  UnsupportedProtocol = 9,
}

/// Hook around a state-machine step; a failure aborts the server's
/// request.
pub type FwHook<U> = fn(&mut U) -> Result<(), Error>;

/// Hook receiving one Package chunk and its byte offset into the whole
/// image.
pub type FwChunkHook<U> = fn(&mut U, &[u8], usize) -> Result<(), Error>;

/// Hook receiving the complete Package URI.
pub type FwUriHook<U> = fn(&mut U, &str) -> Result<(), Error>;

/// Hook that only observes a transition; cannot fail.
pub type FwNotifyHook<U> = fn(&mut U);

/// Host integration hooks for the firmware transfer and the updater,
/// shaped like the engine's [`Handlers`] table: every entry an
/// optional plain `fn` pointer over the host context `U`.
///
/// A host that only polls
/// [`update_requested`](FwUpdateObject::update_requested) and
/// [`package_written`](FwUpdateObject::package_written) may leave the
/// table empty.
pub struct FwHooks<U> {
  /// The first Package chunk is about to be written; open the sink
  pub package_write_start: Option<FwHook<U>>,
  /// One Package chunk arrived: `(data, offset)` into the whole image
  pub package_write_chunk: Option<FwChunkHook<U>>,
  /// The final Package chunk was written; close and verify the sink
  pub package_write_finish: Option<FwHook<U>>,
  /// A complete, scheme-checked Package URI was written; start the
  /// pull download
  pub uri_write: Option<FwUriHook<U>>,
  /// Update was executed on a downloaded package; run the installer
  pub update: Option<FwHook<U>>,
  /// The object returned to Idle; drop any stored package state
  pub reset: Option<FwNotifyHook<U>>,
  /// The server abandoned a download still in flight
  pub cancel: Option<FwNotifyHook<U>>,
}

impl<U> Default for FwHooks<U> {
  fn default() -> Self {
    FwHooks { package_write_start: None,
              package_write_chunk: None,
              package_write_finish: None,
              uri_write: None,
              update: None,
              reset: None,
              cancel: None }
  }
}

impl<U> Copy for FwHooks<U> {}
impl<U> Clone for FwHooks<U> {
  fn clone(&self) -> Self {
    *self
  }
}

impl<U> fmt::Debug for FwHooks<U> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FwHooks").finish_non_exhaustive()
  }
}

/// The Firmware Update object adapter.
///
/// Carries the LwM2M-visible state machine and hands the actual byte
/// sink and updater to the host through [`FwHooks`]. Push delivery
/// streams Package chunks through the hooks, pull delivery surfaces
/// the written URI, and the host reports completion back through
/// [`download_finished`](Self::download_finished) /
/// [`update_finished`](Self::update_finished).
pub struct FwUpdateObject<U> {
  state: FwState,
  result: FwResult,
  /// Resource 1, written by the server for pull delivery
  pub package_uri: String<URI_CAP>,
  /// Bytes accepted through resource 0 so far
  pub package_written: usize,
  /// Set by an Execute on resource 2; host clears it via
  /// [`update_finished`](Self::update_finished)
  pub update_requested: bool,
  /// Resource 6
  pub pkg_name: Option<&'static str>,
  /// Resource 7
  pub pkg_version: Option<&'static str>,
  hooks: FwHooks<U>,
}

impl<U> Default for FwUpdateObject<U> {
  fn default() -> Self {
    FwUpdateObject { state: Default::default(),
                     result: Default::default(),
                     package_uri: Default::default(),
                     package_written: 0,
                     update_requested: false,
                     pkg_name: None,
                     pkg_version: None,
                     hooks: Default::default() }
  }
}

impl<U> Copy for FwUpdateObject<U> {}
impl<U> Clone for FwUpdateObject<U> {
  fn clone(&self) -> Self {
    *self
  }
}

impl<U> fmt::Debug for FwUpdateObject<U> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FwUpdateObject")
     .field("state", &self.state)
     .field("result", &self.result)
     .field("package_written", &self.package_written)
     .finish_non_exhaustive()
  }
}

/// Locates the [`FwUpdateObject`] inside the host context.
pub trait HasFwUpdate: Sized {
  /// The adapter instance.
  fn fw_update(&mut self) -> &mut FwUpdateObject<Self>;
}

impl<U> FwUpdateObject<U> {
  /// An idle Firmware Update object with no hooks attached.
  pub fn new() -> Self {
    Default::default()
  }

  /// Attach the host integration hooks.
  pub fn hooks(mut self, hooks: FwHooks<U>) -> Self {
    self.hooks = hooks;
    self
  }

  /// Resource 3.
  pub fn state(&self) -> FwState {
    self.state
  }

  /// Resource 5.
  pub fn result(&self) -> FwResult {
    self.result
  }

  /// Host signal: the pull download finished. `Success` arms the
  /// Downloaded state, anything else resets to Idle with the result
  /// recorded.
  pub fn download_finished(&mut self, result: FwResult) {
    match result {
      | FwResult::Success | FwResult::Initial => {
        self.state = FwState::Downloaded;
        self.result = FwResult::Initial;
      },
      | other => {
        self.state = FwState::Idle;
        self.result = other;
      },
    }
  }

  /// Host signal: the update attempt finished.
  pub fn update_finished(&mut self, result: FwResult) {
    self.update_requested = false;
    self.state = match result {
      | FwResult::Success => FwState::Idle,
      | _ => FwState::Downloaded,
    };
    self.result = result;
  }

  fn reset_state(&mut self) {
    self.state = FwState::Idle;
    self.result = FwResult::Initial;
    self.package_uri = Default::default();
    self.package_written = 0;
  }
}

impl<U: HasFwUpdate> FwUpdateObject<U> {
  /// The object descriptor to hand to
  /// [`DataModel::add_obj`](newt::dm::DataModel::add_obj).
  pub fn object(&self) -> Obj<U> {
    let obj = Obj::new(OID_FW_UPDATE).max_instances(1)
                                     .resources(&layout())
                                     .handlers(handlers::<U>())
                                     .instance(0);
    #[cfg(feature = "lwm2m12")]
    let obj = obj.version("1.2");
    obj
  }
}

fn layout() -> [Res; 9] {
  [Res::new(RID_PACKAGE, ResOp::W, ResType::Bytes),
   Res::new(RID_PACKAGE_URI, ResOp::RW, ResType::Str),
   Res::exec(RID_UPDATE),
   Res::new(RID_STATE, ResOp::R, ResType::Int),
   Res::new(RID_UPDATE_RESULT, ResOp::R, ResType::Int),
   Res::new(RID_PKG_NAME, ResOp::R, ResType::Str),
   Res::new(RID_PKG_VERSION, ResOp::R, ResType::Str),
   Res::multi(RID_PROTOCOL_SUPPORT, ResOp::RM, ResType::Int, 2).with_insts(&[0, 1]),
   Res::new(RID_DELIVERY_METHOD, ResOp::R, ResType::Int)]
}

fn handlers<U: HasFwUpdate>() -> Handlers<U> {
  Handlers { res_read: Some(res_read::<U>),
             res_write: Some(res_write::<U>),
             res_execute: Some(res_execute::<U>),
             ..Default::default() }
}

fn res_read<'a, U: HasFwUpdate>(u: &'a mut U, p: &Path) -> Result<Value<'a>, Error> {
  let fw = u.fw_update();
  match (p.rid(), p.riid()) {
    | (Some(RID_PACKAGE_URI), _) => {
      Ok(Value::Str(StrChunk::whole(fw.package_uri.as_str())))
    },
    | (Some(RID_STATE), _) => Ok(Value::Int(fw.state as i64)),
    | (Some(RID_UPDATE_RESULT), _) => Ok(Value::Int(fw.result as i64)),
    | (Some(RID_PKG_NAME), _) => {
      Ok(Value::Str(StrChunk::whole(fw.pkg_name.unwrap_or(""))))
    },
    | (Some(RID_PKG_VERSION), _) => {
      Ok(Value::Str(StrChunk::whole(fw.pkg_version.unwrap_or(""))))
    },
    // protocol support: 0 = coap, 1 = coaps
    | (Some(RID_PROTOCOL_SUPPORT), Some(riid)) => Ok(Value::Int(riid as i64)),
    // pull and push are both supported
    | (Some(RID_DELIVERY_METHOD), _) => Ok(Value::Int(2)),
    | _ => Err(Error::NotFound),
  }
}

fn res_write<U: HasFwUpdate>(u: &mut U, p: &Path, v: &Value<'_>) -> Result<(), Error> {
  match p.rid() {
    | Some(RID_PACKAGE) => write_package(u, v),
    | Some(RID_PACKAGE_URI) => write_package_uri(u, v),
    | _ => Err(Error::NotFound),
  }
}

fn write_package<U: HasFwUpdate>(u: &mut U, v: &Value<'_>) -> Result<(), Error> {
  let chunk = match v {
    | Value::Bytes(c) => *c,
    | _ => return Err(Error::BadRequest),
  };
  let hooks = u.fw_update().hooks;
  let state = u.fw_update().state;
  if state == FwState::Updating {
    return Err(Error::MethodNotAllowed);
  }
  // a zero-length package write is the reset idiom
  if chunk.data.is_empty() && chunk.full_length_hint == 0 {
    return abort(u, &hooks);
  }
  if state == FwState::Downloaded {
    return Err(Error::MethodNotAllowed);
  }

  if chunk.offset == 0 {
    if let Some(start) = hooks.package_write_start {
      start(u)?;
    }
  }
  if let Some(write) = hooks.package_write_chunk {
    write(u, chunk.data, chunk.offset)?;
  }

  let fw = u.fw_update();
  fw.state = FwState::Downloading;
  fw.package_written = chunk.offset + chunk.data.len();
  let complete = fw.package_written == chunk.full_length_hint;
  if complete {
    if let Some(finish) = hooks.package_write_finish {
      finish(u)?;
    }
    let fw = u.fw_update();
    fw.state = FwState::Downloaded;
    fw.result = FwResult::Initial;
  }
  Ok(())
}

fn write_package_uri<U: HasFwUpdate>(u: &mut U, v: &Value<'_>) -> Result<(), Error> {
  let chunk = match v {
    | Value::Str(c) => *c,
    | _ => return Err(Error::BadRequest),
  };
  let hooks = u.fw_update().hooks;
  let state = u.fw_update().state;
  if state == FwState::Updating {
    return Err(Error::MethodNotAllowed);
  }
  if chunk.data.is_empty() && chunk.full_length_hint == 0 {
    return abort(u, &hooks);
  }
  if state != FwState::Idle {
    return Err(Error::MethodNotAllowed);
  }

  let fw = u.fw_update();
  write_str_chunked(&mut fw.package_uri, v)?;
  if fw.package_uri.as_str().len() != chunk.full_length_hint {
    return Ok(());
  }
  if crate::security::Scheme::of(fw.package_uri.as_str()).is_none() {
    fw.result = FwResult::InvalidUri;
    return Err(Error::BadRequest);
  }
  let uri = fw.package_uri;
  if let Some(uri_write) = hooks.uri_write {
    uri_write(u, uri.as_str())?;
  }
  let fw = u.fw_update();
  fw.state = FwState::Downloading;
  fw.result = FwResult::Initial;
  Ok(())
}

/// Empty write to Package or Package URI: cancel whatever transfer is
/// still in flight and return to Idle/Initial.
fn abort<U: HasFwUpdate>(u: &mut U, hooks: &FwHooks<U>) -> Result<(), Error> {
  if u.fw_update().state == FwState::Downloading {
    if let Some(cancel) = hooks.cancel {
      cancel(u);
    }
  }
  if let Some(reset) = hooks.reset {
    reset(u);
  }
  u.fw_update().reset_state();
  Ok(())
}

fn res_execute<U: HasFwUpdate>(u: &mut U, p: &Path, _arg: &[u8]) -> Result<(), Error> {
  match p.rid() {
    | Some(RID_UPDATE) => {
      if u.fw_update().state != FwState::Downloaded {
        log::error!("update requires a downloaded package");
        return Err(Error::MethodNotAllowed);
      }
      let hooks = u.fw_update().hooks;
      if let Some(update) = hooks.update {
        update(u)?;
      }
      let fw = u.fw_update();
      fw.state = FwState::Updating;
      fw.update_requested = true;
      Ok(())
    },
    | _ => Err(Error::NotFound),
  }
}
