use super::{DataModel, Entry, OpCtx, RegCtx, OID_OSCORE, OID_SECURITY};
use crate::error::Error;
use crate::path::{Level, Path};
use crate::req::Operation;

/// One line of a Register (or Update) payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterRecord {
  /// Object or Object Instance path
  pub path: Path,
  /// Object version, only on Object records that declare one
  pub version: Option<&'static str>,
}

impl<U> DataModel<U> {
  pub(crate) fn begin_register(&mut self) -> Result<(), Error> {
    let mut count = 0;
    for obj in self.objs.iter() {
      if obj.oid != OID_SECURITY && obj.oid != OID_OSCORE {
        count += 1 + obj.inst_count();
      }
    }
    self.op.op_count = count;
    self.op.ctx = OpCtx::Reg(Default::default());
    Ok(())
  }

  /// Pull the next Register record: each visible Object followed by its
  /// instances. Security and OSCORE never appear.
  pub fn get_register_record(&mut self) -> Result<Entry<RegisterRecord>, Error> {
    self.op_guard(&[Operation::Register, Operation::Update])?;
    if self.op.op_count == 0 {
      return Err(Error::Logic);
    }
    let mut ctx = match self.op.ctx {
      | OpCtx::Reg(c) => c,
      | _ => return Err(Error::Logic),
    };

    let record = if ctx.level == Level::Object {
      self.register_object_record(&mut ctx)
    } else {
      self.register_instance_record(&mut ctx)
    };

    self.op.ctx = OpCtx::Reg(ctx);
    self.op.op_count -= 1;
    if self.op.op_count > 0 {
      Ok(Entry::Next(record))
    } else {
      Ok(Entry::Last(record))
    }
  }

  fn register_object_record(&self, ctx: &mut RegCtx) -> RegisterRecord {
    while self.objs[ctx.obj_idx].oid == OID_SECURITY
          || self.objs[ctx.obj_idx].oid == OID_OSCORE
    {
      ctx.obj_idx += 1;
    }
    let obj = &self.objs[ctx.obj_idx];
    let record = RegisterRecord { path: Path::object(obj.oid),
                                  version: obj.version };
    if obj.inst_count() == 0 {
      ctx.obj_idx += 1;
    } else {
      ctx.level = Level::Instance;
      ctx.inst_idx = 0;
    }
    record
  }

  fn register_instance_record(&self, ctx: &mut RegCtx) -> RegisterRecord {
    let obj = &self.objs[ctx.obj_idx];
    let record = RegisterRecord { path: Path::instance(obj.oid,
                                                       obj.insts[ctx.inst_idx].iid),
                                  version: None };
    ctx.inst_idx += 1;
    if ctx.inst_idx == obj.inst_count() {
      ctx.level = Level::Object;
      ctx.obj_idx += 1;
    }
    record
  }
}
