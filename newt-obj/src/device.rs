use newt::dm::{Handlers, Obj, Res, ResOp, OID_DEVICE};
use newt::value::{ResType, StrChunk, Value};
use newt::{Error, Path};

/// Manufacturer
pub const RID_MANUFACTURER: u16 = 0;
/// Model Number
pub const RID_MODEL_NUMBER: u16 = 1;
/// Serial Number
pub const RID_SERIAL_NUMBER: u16 = 2;
/// Firmware Version
pub const RID_FIRMWARE_VERSION: u16 = 3;
/// Reboot
pub const RID_REBOOT: u16 = 4;
/// Error Code
pub const RID_ERROR_CODE: u16 = 11;
/// Supported Binding and Modes
pub const RID_BINDING_MODES: u16 = 16;

/// The Device object adapter: static identification strings, the
/// mandatory Error Code resource and a Reboot flag the host polls.
///
/// The single instance always has IID 0 and survives Bootstrap-Delete.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceObject {
  /// Resource 0
  pub manufacturer: Option<&'static str>,
  /// Resource 1
  pub model_number: Option<&'static str>,
  /// Resource 2
  pub serial_number: Option<&'static str>,
  /// Resource 3
  pub firmware_version: Option<&'static str>,
  /// Resource 11, instance 0
  pub error_code: i64,
  /// Set by an Execute on resource 4; the host resets it after acting
  pub reboot_requested: bool,
}

/// Locates the [`DeviceObject`] inside the host context.
pub trait HasDevice {
  /// The adapter instance.
  fn device(&mut self) -> &mut DeviceObject;
}

impl DeviceObject {
  /// A Device object with the two mandatory identification strings.
  pub fn new(manufacturer: &'static str, model_number: &'static str) -> Self {
    DeviceObject { manufacturer: Some(manufacturer),
                   model_number: Some(model_number),
                   ..Default::default() }
  }

  /// The object descriptor to hand to
  /// [`DataModel::add_obj`](newt::dm::DataModel::add_obj).
  pub fn object<U: HasDevice>(&self) -> Obj<U> {
    Obj::new(OID_DEVICE).resources(&layout())
                        .handlers(handlers::<U>())
                        .max_instances(1)
                        .instance(0)
  }
}

fn layout() -> [Res; 7] {
  [Res::new(RID_MANUFACTURER, ResOp::R, ResType::Str),
   Res::new(RID_MODEL_NUMBER, ResOp::R, ResType::Str),
   Res::new(RID_SERIAL_NUMBER, ResOp::R, ResType::Str),
   Res::new(RID_FIRMWARE_VERSION, ResOp::R, ResType::Str),
   Res::exec(RID_REBOOT),
   Res::multi(RID_ERROR_CODE, ResOp::RM, ResType::Int, 1).with_insts(&[0]),
   Res::new(RID_BINDING_MODES, ResOp::R, ResType::Str)]
}

fn handlers<U: HasDevice>() -> Handlers<U> {
  Handlers { res_read: Some(res_read::<U>),
             res_execute: Some(res_execute::<U>),
             ..Default::default() }
}

fn res_read<'a, U: HasDevice>(u: &'a mut U, p: &Path) -> Result<Value<'a>, Error> {
  let device = u.device();
  let text = |s: Option<&'static str>| Ok(Value::Str(StrChunk::whole(s.unwrap_or(""))));
  match p.rid() {
    | Some(RID_MANUFACTURER) => text(device.manufacturer),
    | Some(RID_MODEL_NUMBER) => text(device.model_number),
    | Some(RID_SERIAL_NUMBER) => text(device.serial_number),
    | Some(RID_FIRMWARE_VERSION) => text(device.firmware_version),
    | Some(RID_ERROR_CODE) => Ok(Value::Int(device.error_code)),
    | Some(RID_BINDING_MODES) => Ok(Value::Str(StrChunk::whole("U"))),
    | _ => Err(Error::NotFound),
  }
}

fn res_execute<U: HasDevice>(u: &mut U, p: &Path, _arg: &[u8]) -> Result<(), Error> {
  match p.rid() {
    | Some(RID_REBOOT) => {
      u.device().reboot_requested = true;
      Ok(())
    },
    | _ => Err(Error::NotFound),
  }
}
