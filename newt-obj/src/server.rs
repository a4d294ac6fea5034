use newt::config::INVALID_ID;
use newt::dm::{Handlers, Obj, Res, ResOp, OID_SERVER};
use newt::observe::ServerState;
use newt::value::{ResType, StrChunk, Value};
use newt::{Error, Path};
use tinyvec::ArrayVec;
use toad_string::String;

use crate::security::write_str_chunked;

/// Short Server ID
pub const RID_SSID: u16 = 0;
/// Lifetime, seconds
pub const RID_LIFETIME: u16 = 1;
/// Default Minimum Period (`pmin` fallback)
pub const RID_DEFAULT_MIN_PERIOD: u16 = 2;
/// Default Maximum Period (`pmax` fallback)
pub const RID_DEFAULT_MAX_PERIOD: u16 = 3;
/// Disable
pub const RID_DISABLE: u16 = 4;
/// Disable Timeout, seconds
pub const RID_DISABLE_TIMEOUT: u16 = 5;
/// Notification Storing When Disabled or Offline
pub const RID_NOTIFICATION_STORING: u16 = 6;
/// Binding
pub const RID_BINDING: u16 = 7;
/// Registration Update Trigger
pub const RID_REGISTRATION_UPDATE_TRIGGER: u16 = 8;
/// Bootstrap-Request Trigger
pub const RID_BOOTSTRAP_REQUEST_TRIGGER: u16 = 9;
/// Bootstrap on Registration Failure
pub const RID_BOOTSTRAP_ON_REGISTRATION_FAILURE: u16 = 16;
/// Mute Send
pub const RID_MUTE_SEND: u16 = 23;

/// Characters a Binding string may contain, each at most once.
pub const BINDINGS: &str = "UMHTSN";

/// Disable Timeout when the server never wrote one.
pub const DISABLE_TIMEOUT_DEFAULT: u32 = 86_400;

const BINDING_CAP: usize = 8;

/// The one Server object instance.
#[derive(Debug, Clone, Copy)]
pub struct ServerInstance {
  /// Instance id
  pub iid: u16,
  /// Short Server ID (resource 0)
  pub ssid: u16,
  /// Registration lifetime, seconds (resource 1)
  pub lifetime: u32,
  /// Default `pmin` (resource 2), 0 = unset
  pub default_min_period: u32,
  /// Default `pmax` (resource 3), 0 = unset
  pub default_max_period: u32,
  /// Disable Timeout (resource 5)
  pub disable_timeout: u32,
  /// Notification Storing (resource 6)
  pub notification_storing: bool,
  /// Binding (resource 7)
  pub binding: String<BINDING_CAP>,
  /// Bootstrap on Registration Failure (resource 16)
  pub bootstrap_on_registration_failure: bool,
  /// Mute Send (resource 23)
  pub mute_send: bool,
}

impl Default for ServerInstance {
  fn default() -> Self {
    ServerInstance { iid: INVALID_ID,
                     ssid: 0,
                     lifetime: 0,
                     default_min_period: 0,
                     default_max_period: 0,
                     disable_timeout: DISABLE_TIMEOUT_DEFAULT,
                     notification_storing: false,
                     binding: String::from("U"),
                     bootstrap_on_registration_failure: true,
                     mute_send: false }
  }
}

impl ServerInstance {
  /// A fresh instance with the given id and defaults everywhere else.
  pub fn new(iid: u16) -> Self {
    ServerInstance { iid,
                     ..Default::default() }
  }

  fn check(&self) -> Result<(), Error> {
    if self.ssid == 0 || self.ssid == INVALID_ID {
      log::error!("invalid ssid");
      return Err(Error::BadRequest);
    }
    if self.default_max_period != 0 && self.default_max_period < self.default_min_period {
      log::error!("default pmax below default pmin");
      return Err(Error::BadRequest);
    }
    if !binding_valid(self.binding.as_str()) {
      log::error!("invalid binding");
      return Err(Error::BadRequest);
    }
    Ok(())
  }
}

fn binding_valid(binding: &str) -> bool {
  if binding.is_empty() {
    return false;
  }
  for (idx, c) in binding.char_indices() {
    if !BINDINGS.contains(c) || binding[..idx].contains(c) {
      return false;
    }
  }
  true
}

/// Request surfaced to the host runtime by an Execute on a Server
/// resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerEvent {
  /// Resource 4: stop talking to this server for `timeout` seconds
  Disable {
    /// Seconds until the server is re-enabled
    timeout: u32,
  },
  /// Resource 8: send a registration update
  #[default]
  RegistrationUpdateTrigger,
  /// Resource 9: re-run bootstrap
  BootstrapRequestTrigger,
}

/// The Server object adapter (single instance).
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerObject {
  inst: Option<ServerInstance>,
  shadow: Option<Option<ServerInstance>>,
  events: ArrayVec<[ServerEvent; 4]>,
}

/// Locates the [`ServerObject`] inside the host context.
pub trait HasServer {
  /// The adapter instance.
  fn server(&mut self) -> &mut ServerObject;
}

impl ServerObject {
  /// An empty Server object.
  pub fn new() -> Self {
    Default::default()
  }

  /// Seed the instance before the object is registered.
  pub fn set_instance(&mut self, inst: ServerInstance) -> Result<(), Error> {
    if self.inst.is_some() {
      return Err(Error::Logic);
    }
    inst.check()?;
    self.inst = Some(inst);
    Ok(())
  }

  /// The live instance, if any.
  pub fn instance(&self) -> Option<&ServerInstance> {
    self.inst.as_ref()
  }

  /// Drain the Execute-driven events for the host runtime.
  pub fn take_events(&mut self) -> ArrayVec<[ServerEvent; 4]> {
    core::mem::take(&mut self.events)
  }

  /// The per-server observation state
  /// ([`Observations`](newt::observe::Observations) wants this with
  /// every request).
  pub fn observe_state(&self) -> ServerState {
    match &self.inst {
      | Some(inst) => ServerState { ssid: inst.ssid,
                                    default_min_period: nonzero(inst.default_min_period),
                                    default_max_period: nonzero(inst.default_max_period) },
      | None => Default::default(),
    }
  }

  /// The object descriptor to hand to
  /// [`DataModel::add_obj`](newt::dm::DataModel::add_obj).
  pub fn object<U: HasServer>(&self) -> Obj<U> {
    let mut obj = Obj::new(OID_SERVER).max_instances(1)
                                      .resources(&layout())
                                      .handlers(handlers::<U>());
    #[cfg(feature = "lwm2m12")]
    {
      obj = obj.version("1.2");
    }
    if let Some(inst) = &self.inst {
      obj = obj.instance(inst.iid);
    }
    obj
  }

  fn get(&mut self, iid: u16) -> Result<&mut ServerInstance, Error> {
    match &mut self.inst {
      | Some(inst) if inst.iid == iid => Ok(inst),
      | _ => Err(Error::NotFound),
    }
  }
}

fn nonzero(v: u32) -> Option<u32> {
  if v == 0 {
    None
  } else {
    Some(v)
  }
}

fn layout() -> [Res; 12] {
  [Res::new(RID_SSID, ResOp::R, ResType::Int),
   Res::new(RID_LIFETIME, ResOp::RW, ResType::Int),
   Res::new(RID_DEFAULT_MIN_PERIOD, ResOp::RW, ResType::Int),
   Res::new(RID_DEFAULT_MAX_PERIOD, ResOp::RW, ResType::Int),
   Res::exec(RID_DISABLE),
   Res::new(RID_DISABLE_TIMEOUT, ResOp::RW, ResType::Int),
   Res::new(RID_NOTIFICATION_STORING, ResOp::RW, ResType::Bool),
   Res::new(RID_BINDING, ResOp::RW, ResType::Str),
   Res::exec(RID_REGISTRATION_UPDATE_TRIGGER),
   Res::exec(RID_BOOTSTRAP_REQUEST_TRIGGER),
   Res::new(RID_BOOTSTRAP_ON_REGISTRATION_FAILURE, ResOp::R, ResType::Bool),
   Res::new(RID_MUTE_SEND, ResOp::RW, ResType::Bool)]
}

fn handlers<U: HasServer>() -> Handlers<U> {
  Handlers { inst_create: Some(inst_create::<U>),
             inst_delete: Some(inst_delete::<U>),
             inst_reset: Some(inst_reset::<U>),
             res_read: Some(res_read::<U>),
             res_write: Some(res_write::<U>),
             res_execute: Some(res_execute::<U>),
             transaction_begin: Some(transaction_begin::<U>),
             transaction_validate: Some(transaction_validate::<U>),
             transaction_end: Some(transaction_end::<U>),
             ..Default::default() }
}

fn inst_create<U: HasServer>(u: &mut U, _oid: u16, iid: u16) -> Result<(), Error> {
  let server = u.server();
  if server.inst.is_some() {
    return Err(Error::Memory);
  }
  server.inst = Some(ServerInstance::new(iid));
  Ok(())
}

fn inst_delete<U: HasServer>(u: &mut U, _oid: u16, iid: u16) -> Result<(), Error> {
  let server = u.server();
  server.get(iid)?;
  server.inst = None;
  Ok(())
}

fn inst_reset<U: HasServer>(u: &mut U, _oid: u16, iid: u16) -> Result<(), Error> {
  *u.server().get(iid)? = ServerInstance::new(iid);
  Ok(())
}

fn res_read<'a, U: HasServer>(u: &'a mut U, p: &Path) -> Result<Value<'a>, Error> {
  let server = u.server();
  let inst = server.get(p.iid().unwrap_or(INVALID_ID))?;
  match p.rid() {
    | Some(RID_SSID) => Ok(Value::Int(inst.ssid as i64)),
    | Some(RID_LIFETIME) => Ok(Value::Int(inst.lifetime as i64)),
    | Some(RID_DEFAULT_MIN_PERIOD) => Ok(Value::Int(inst.default_min_period as i64)),
    | Some(RID_DEFAULT_MAX_PERIOD) => Ok(Value::Int(inst.default_max_period as i64)),
    | Some(RID_DISABLE_TIMEOUT) => Ok(Value::Int(inst.disable_timeout as i64)),
    | Some(RID_NOTIFICATION_STORING) => Ok(Value::Bool(inst.notification_storing)),
    | Some(RID_BINDING) => Ok(Value::Str(StrChunk::whole(inst.binding.as_str()))),
    | Some(RID_BOOTSTRAP_ON_REGISTRATION_FAILURE) => {
      Ok(Value::Bool(inst.bootstrap_on_registration_failure))
    },
    | Some(RID_MUTE_SEND) => Ok(Value::Bool(inst.mute_send)),
    | _ => Err(Error::NotFound),
  }
}

fn res_write<U: HasServer>(u: &mut U, p: &Path, v: &Value<'_>) -> Result<(), Error> {
  let server = u.server();
  let inst = server.get(p.iid().unwrap_or(INVALID_ID))?;
  match p.rid() {
    | Some(RID_SSID) => {
      let ssid = v.as_i64()?;
      if ssid <= 0 || ssid >= INVALID_ID as i64 {
        return Err(Error::BadRequest);
      }
      inst.ssid = ssid as u16;
      Ok(())
    },
    | Some(RID_LIFETIME) => {
      inst.lifetime = as_u32(v)?;
      Ok(())
    },
    | Some(RID_DEFAULT_MIN_PERIOD) => {
      inst.default_min_period = as_u32(v)?;
      Ok(())
    },
    | Some(RID_DEFAULT_MAX_PERIOD) => {
      inst.default_max_period = as_u32(v)?;
      Ok(())
    },
    | Some(RID_DISABLE_TIMEOUT) => {
      inst.disable_timeout = as_u32(v)?;
      Ok(())
    },
    | Some(RID_NOTIFICATION_STORING) => {
      inst.notification_storing = v.as_bool()?;
      Ok(())
    },
    | Some(RID_BINDING) => write_str_chunked(&mut inst.binding, v),
    | Some(RID_BOOTSTRAP_ON_REGISTRATION_FAILURE) => {
      inst.bootstrap_on_registration_failure = v.as_bool()?;
      Ok(())
    },
    | Some(RID_MUTE_SEND) => {
      inst.mute_send = v.as_bool()?;
      Ok(())
    },
    | _ => Err(Error::NotFound),
  }
}

fn as_u32(v: &Value<'_>) -> Result<u32, Error> {
  let n = v.as_i64()?;
  if !(0..=u32::MAX as i64).contains(&n) {
    return Err(Error::BadRequest);
  }
  Ok(n as u32)
}

fn res_execute<U: HasServer>(u: &mut U, p: &Path, _arg: &[u8]) -> Result<(), Error> {
  let server = u.server();
  let event = match p.rid() {
    | Some(RID_DISABLE) => {
      let timeout = server.get(p.iid().unwrap_or(INVALID_ID))?.disable_timeout;
      ServerEvent::Disable { timeout }
    },
    | Some(RID_REGISTRATION_UPDATE_TRIGGER) => ServerEvent::RegistrationUpdateTrigger,
    | Some(RID_BOOTSTRAP_REQUEST_TRIGGER) => ServerEvent::BootstrapRequestTrigger,
    | _ => return Err(Error::NotFound),
  };
  if server.events.try_push(event).is_some() {
    log::warn!("server event queue full");
  }
  Ok(())
}

fn transaction_begin<U: HasServer>(u: &mut U, _oid: u16) -> Result<(), Error> {
  let server = u.server();
  server.shadow = Some(server.inst);
  Ok(())
}

fn transaction_validate<U: HasServer>(u: &mut U, _oid: u16) -> Result<(), Error> {
  match &u.server().inst {
    | Some(inst) => inst.check(),
    | None => Ok(()),
  }
}

fn transaction_end<U: HasServer>(u: &mut U, _oid: u16, result: Result<(), Error>) {
  let server = u.server();
  if result.is_err() {
    if let Some(saved) = server.shadow {
      server.inst = saved;
    }
  }
  server.shadow = None;
}
