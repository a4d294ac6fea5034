use newt::config::INVALID_ID;
use newt::dm::{Handlers, Obj, Res, ResOp, OID_SECURITY};
use newt::path::Level;
use newt::value::{BytesChunk, Objlnk, ResType, StrChunk, Value};
use newt::{Error, Path};
use tinyvec::ArrayVec;
use toad_string::String;

/// LwM2M Server URI
pub const RID_SERVER_URI: u16 = 0;
/// Bootstrap-Server flag
pub const RID_BOOTSTRAP_SERVER: u16 = 1;
/// Security Mode
pub const RID_SECURITY_MODE: u16 = 2;
/// Public Key or Identity
pub const RID_PUBLIC_KEY_OR_IDENTITY: u16 = 3;
/// Server Public Key
pub const RID_SERVER_PUBLIC_KEY: u16 = 4;
/// Secret Key
pub const RID_SECRET_KEY: u16 = 5;
/// Short Server ID
pub const RID_SSID: u16 = 10;
/// Client Hold Off Time
pub const RID_CLIENT_HOLD_OFF_TIME: u16 = 11;
/// OSCORE Security Mode object link
pub const RID_OSCORE: u16 = 17;

/// Instance slots in the Security object: one bootstrap account plus
/// one regular server.
pub const MAX_INSTANCES: usize = 2;

/// SSID value reserved for the bootstrap server.
pub const SSID_BOOTSTRAP: u16 = 65535;

const URI_CAP: usize = 128;
const KEY_CAP: usize = 128;

/// URI scheme accepted in a LwM2M Server URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
  /// `coap://`, unsecured UDP
  Coap,
  /// `coaps://`, DTLS
  Coaps,
  /// `coap+tcp://`
  CoapTcp,
  /// `coaps+tcp://`, TLS
  CoapsTcp,
}

impl Scheme {
  /// Parse the scheme prefix of a Server URI.
  ///
  /// ```
  /// use newt_obj::security::Scheme;
  ///
  /// assert_eq!(Scheme::of("coaps://server:5684"), Some(Scheme::Coaps));
  /// assert_eq!(Scheme::of("http://nope"), None);
  /// ```
  pub fn of(uri: &str) -> Option<Scheme> {
    if uri.starts_with("coap://") {
      Some(Scheme::Coap)
    } else if uri.starts_with("coaps://") {
      Some(Scheme::Coaps)
    } else if uri.starts_with("coap+tcp://") {
      Some(Scheme::CoapTcp)
    } else if uri.starts_with("coaps+tcp://") {
      Some(Scheme::CoapsTcp)
    } else {
      None
    }
  }

  /// The port implied when the URI does not name one.
  pub fn default_port(&self, bootstrap: bool) -> u16 {
    match (self, bootstrap) {
      | (Scheme::Coap | Scheme::CoapTcp, false) => 5683,
      | (Scheme::Coaps | Scheme::CoapsTcp, false) => 5684,
      | (Scheme::Coap | Scheme::CoapTcp, true) => 5693,
      | (Scheme::Coaps | Scheme::CoapsTcp, true) => 5694,
    }
  }
}

/// One Security object instance.
#[derive(Debug, Clone, Copy)]
pub struct SecurityInstance {
  /// Instance id
  pub iid: u16,
  /// LwM2M Server URI (resource 0)
  pub server_uri: String<URI_CAP>,
  /// Bootstrap-Server flag (resource 1)
  pub bootstrap_server: bool,
  /// Security Mode 0..=4 (resource 2)
  pub security_mode: i64,
  /// Public Key or Identity (resource 3)
  pub public_key_or_identity: ArrayVec<[u8; KEY_CAP]>,
  /// Server Public Key (resource 4)
  pub server_public_key: ArrayVec<[u8; KEY_CAP]>,
  /// Secret Key (resource 5)
  pub secret_key: ArrayVec<[u8; KEY_CAP]>,
  /// Short Server ID (resource 10)
  pub ssid: u16,
  /// Client Hold Off Time, seconds (resource 11)
  pub client_hold_off_time: i64,
  /// Linked OSCORE instance (resource 17)
  pub oscore: Option<Objlnk>,
}

impl Default for SecurityInstance {
  fn default() -> Self {
    SecurityInstance { iid: INVALID_ID,
                       server_uri: Default::default(),
                       bootstrap_server: false,
                       security_mode: 0,
                       public_key_or_identity: Default::default(),
                       server_public_key: Default::default(),
                       secret_key: Default::default(),
                       ssid: 0,
                       client_hold_off_time: 0,
                       oscore: None }
  }
}

impl SecurityInstance {
  /// A fresh instance with the given id.
  pub fn new(iid: u16) -> Self {
    SecurityInstance { iid,
                       ..Default::default() }
  }

  fn check(&self) -> Result<(), Error> {
    if Scheme::of(self.server_uri.as_str()).is_none() {
      log::error!("invalid server uri scheme");
      return Err(Error::BadRequest);
    }
    if !(0..=4).contains(&self.security_mode) {
      log::error!("invalid security mode");
      return Err(Error::BadRequest);
    }
    if !self.bootstrap_server && (self.ssid == 0 || self.ssid >= SSID_BOOTSTRAP) {
      log::error!("invalid ssid");
      return Err(Error::BadRequest);
    }
    Ok(())
  }
}

/// The Security object adapter.
///
/// Holds up to [`MAX_INSTANCES`] accounts; bootstrap writes populate it
/// during provisioning, and the engine's Bootstrap-Delete preserves the
/// account whose resource 1 is `true`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityObject {
  insts: ArrayVec<[SecurityInstance; MAX_INSTANCES]>,
  shadow: Option<ArrayVec<[SecurityInstance; MAX_INSTANCES]>>,
}

/// Locates the [`SecurityObject`] inside the host context.
pub trait HasSecurity {
  /// The adapter instance.
  fn security(&mut self) -> &mut SecurityObject;
}

impl SecurityObject {
  /// An empty Security object.
  pub fn new() -> Self {
    Default::default()
  }

  /// Seed an account before the object is registered.
  pub fn add_instance(&mut self, inst: SecurityInstance) -> Result<(), Error> {
    if self.find(inst.iid).is_some() {
      return Err(Error::Logic);
    }
    if self.insts.len() == MAX_INSTANCES {
      return Err(Error::Memory);
    }
    let at = self.insts
                 .iter()
                 .position(|i| i.iid > inst.iid)
                 .unwrap_or(self.insts.len());
    self.insts.insert(at, inst);
    Ok(())
  }

  /// Live accounts, ascending by IID.
  pub fn instances(&self) -> &[SecurityInstance] {
    self.insts.as_slice()
  }

  /// The account with id `iid`, if present.
  pub fn instance(&self, iid: u16) -> Option<&SecurityInstance> {
    self.insts.iter().find(|i| i.iid == iid)
  }

  /// The object descriptor to hand to
  /// [`DataModel::add_obj`](newt::dm::DataModel::add_obj).
  pub fn object<U: HasSecurity>(&self) -> Obj<U> {
    let mut obj = Obj::new(OID_SECURITY).max_instances(MAX_INSTANCES as u16)
                                        .resources(&layout())
                                        .handlers(handlers::<U>());
    for inst in self.insts.iter() {
      obj = obj.instance(inst.iid);
    }
    obj
  }

  fn find(&mut self, iid: u16) -> Option<usize> {
    self.insts.iter().position(|i| i.iid == iid)
  }
}

fn layout() -> [Res; 9] {
  [Res::new(RID_SERVER_URI, ResOp::RW, ResType::Str),
   Res::new(RID_BOOTSTRAP_SERVER, ResOp::RW, ResType::Bool),
   Res::new(RID_SECURITY_MODE, ResOp::RW, ResType::Int),
   Res::new(RID_PUBLIC_KEY_OR_IDENTITY, ResOp::RW, ResType::Bytes),
   Res::new(RID_SERVER_PUBLIC_KEY, ResOp::RW, ResType::Bytes),
   Res::new(RID_SECRET_KEY, ResOp::RW, ResType::Bytes),
   Res::new(RID_SSID, ResOp::RW, ResType::Int),
   Res::new(RID_CLIENT_HOLD_OFF_TIME, ResOp::RW, ResType::Int),
   Res::new(RID_OSCORE, ResOp::RW, ResType::Objlnk)]
}

fn handlers<U: HasSecurity>() -> Handlers<U> {
  Handlers { inst_create: Some(inst_create::<U>),
             inst_delete: Some(inst_delete::<U>),
             inst_reset: Some(inst_reset::<U>),
             res_read: Some(res_read::<U>),
             res_write: Some(res_write::<U>),
             transaction_begin: Some(transaction_begin::<U>),
             transaction_validate: Some(transaction_validate::<U>),
             transaction_end: Some(transaction_end::<U>),
             ..Default::default() }
}

fn inst_create<U: HasSecurity>(u: &mut U, _oid: u16, iid: u16) -> Result<(), Error> {
  u.security().add_instance(SecurityInstance::new(iid))
}

fn inst_delete<U: HasSecurity>(u: &mut U, _oid: u16, iid: u16) -> Result<(), Error> {
  let sec = u.security();
  match sec.find(iid) {
    | Some(at) => {
      sec.insts.remove(at);
      Ok(())
    },
    | None => Err(Error::NotFound),
  }
}

fn inst_reset<U: HasSecurity>(u: &mut U, _oid: u16, iid: u16) -> Result<(), Error> {
  let sec = u.security();
  match sec.find(iid) {
    | Some(at) => {
      sec.insts[at] = SecurityInstance::new(iid);
      Ok(())
    },
    | None => Err(Error::NotFound),
  }
}

fn res_read<'a, U: HasSecurity>(u: &'a mut U, p: &Path) -> Result<Value<'a>, Error> {
  let sec = u.security();
  let iid = p.iid().unwrap_or(INVALID_ID);
  let inst = sec.instance(iid).ok_or(Error::NotFound)?;
  match p.rid() {
    | Some(RID_SERVER_URI) => Ok(Value::Str(StrChunk::whole(inst.server_uri.as_str()))),
    | Some(RID_BOOTSTRAP_SERVER) => Ok(Value::Bool(inst.bootstrap_server)),
    | Some(RID_SECURITY_MODE) => Ok(Value::Int(inst.security_mode)),
    | Some(RID_PUBLIC_KEY_OR_IDENTITY) => {
      Ok(Value::Bytes(BytesChunk::whole(&inst.public_key_or_identity)))
    },
    | Some(RID_SERVER_PUBLIC_KEY) => {
      Ok(Value::Bytes(BytesChunk::whole(&inst.server_public_key)))
    },
    | Some(RID_SECRET_KEY) => Ok(Value::Bytes(BytesChunk::whole(&inst.secret_key))),
    | Some(RID_SSID) => Ok(Value::Int(inst.ssid as i64)),
    | Some(RID_CLIENT_HOLD_OFF_TIME) => Ok(Value::Int(inst.client_hold_off_time)),
    | Some(RID_OSCORE) => {
      Ok(Value::Objlnk(inst.oscore.unwrap_or(Objlnk { oid: INVALID_ID,
                                                      iid: INVALID_ID })))
    },
    | _ => Err(Error::NotFound),
  }
}

fn res_write<U: HasSecurity>(u: &mut U, p: &Path, v: &Value<'_>) -> Result<(), Error> {
  if !p.has(Level::Resource) {
    return Err(Error::BadRequest);
  }
  let sec = u.security();
  let iid = p.iid().unwrap_or(INVALID_ID);
  let at = sec.find(iid).ok_or(Error::NotFound)?;
  let inst = &mut sec.insts[at];
  match p.rid() {
    | Some(RID_SERVER_URI) => write_str_chunked(&mut inst.server_uri, v),
    | Some(RID_BOOTSTRAP_SERVER) => {
      inst.bootstrap_server = v.as_bool()?;
      Ok(())
    },
    | Some(RID_SECURITY_MODE) => {
      inst.security_mode = v.as_i64()?;
      Ok(())
    },
    | Some(RID_PUBLIC_KEY_OR_IDENTITY) => {
      write_bytes_chunked(&mut inst.public_key_or_identity, v)
    },
    | Some(RID_SERVER_PUBLIC_KEY) => write_bytes_chunked(&mut inst.server_public_key, v),
    | Some(RID_SECRET_KEY) => write_bytes_chunked(&mut inst.secret_key, v),
    | Some(RID_SSID) => {
      let ssid = v.as_i64()?;
      if !(1..=SSID_BOOTSTRAP as i64).contains(&ssid) {
        return Err(Error::BadRequest);
      }
      inst.ssid = ssid as u16;
      Ok(())
    },
    | Some(RID_CLIENT_HOLD_OFF_TIME) => {
      inst.client_hold_off_time = v.as_i64()?;
      Ok(())
    },
    | Some(RID_OSCORE) => {
      inst.oscore = Some(v.as_objlnk()?);
      Ok(())
    },
    | _ => Err(Error::NotFound),
  }
}

fn transaction_begin<U: HasSecurity>(u: &mut U, _oid: u16) -> Result<(), Error> {
  let sec = u.security();
  sec.shadow = Some(sec.insts);
  Ok(())
}

fn transaction_validate<U: HasSecurity>(u: &mut U, _oid: u16) -> Result<(), Error> {
  let sec = u.security();
  for (idx, inst) in sec.insts.iter().enumerate() {
    inst.check()?;
    for other in sec.insts.iter().skip(idx + 1) {
      if !inst.bootstrap_server && !other.bootstrap_server && inst.ssid == other.ssid {
        log::error!("duplicate ssid {}", inst.ssid);
        return Err(Error::BadRequest);
      }
    }
  }
  Ok(())
}

fn transaction_end<U: HasSecurity>(u: &mut U, _oid: u16, result: Result<(), Error>) {
  let sec = u.security();
  if result.is_err() {
    if let Some(saved) = sec.shadow {
      sec.insts = saved;
    }
  }
  sec.shadow = None;
}

pub(crate) fn write_str_chunked<const N: usize>(dst: &mut String<N>,
                                                v: &Value<'_>)
                                                -> Result<(), Error> {
  use core::fmt::Write;

  let chunk = match v {
    | Value::Str(c) => *c,
    | _ => return Err(Error::BadRequest),
  };
  if chunk.offset == 0 {
    *dst = Default::default();
  }
  if chunk.offset + chunk.data.len() > N {
    return Err(Error::Memory);
  }
  dst.as_writable()
     .write_str(chunk.data)
     .map_err(|_| Error::Memory)
}

pub(crate) fn write_bytes_chunked<const N: usize>(dst: &mut ArrayVec<[u8; N]>,
                                                  v: &Value<'_>)
                                                  -> Result<(), Error> {
  let chunk = match v {
    | Value::Bytes(c) => *c,
    | _ => return Err(Error::BadRequest),
  };
  if chunk.offset == 0 {
    dst.clear();
  }
  if chunk.offset + chunk.data.len() > N {
    return Err(Error::Memory);
  }
  dst.extend_from_slice(chunk.data);
  Ok(())
}
