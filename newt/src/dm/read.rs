use super::{Cursor,
            DataModel,
            Entry,
            Inst,
            Obj,
            OpCtx,
            ReadCtx,
            Res,
            OID_ACCESS_CONTROL,
            OID_SERVER};
use crate::error::Error;
use crate::io::Record;
use crate::path::{Level, Path};
use crate::req::Operation;

/// Outcome of feeding the next path into a Read-Composite operation.
#[cfg(feature = "composite")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextPath {
  /// The path has readable records; pull them with `get_read_entry`.
  Ready,
  /// Nothing readable under the path; do not call `get_read_entry`.
  NoRecords,
}

pub(crate) fn readable_from_res(res: &Res) -> usize {
  if !res.op.readable() {
    return 0;
  }
  if !res.op.multi() {
    return 1;
  }
  res.inst_count()
}

pub(crate) fn readable_from_inst(inst: &Inst) -> usize {
  inst.resources.iter().map(readable_from_res).sum()
}

pub(crate) fn readable_from_obj<U>(obj: &Obj<U>) -> usize {
  obj.insts.iter().map(readable_from_inst).sum()
}

fn res_can_be_read(res: &Res) -> bool {
  res.op.readable() && !(res.op.multi() && res.inst_count() == 0)
}

fn inst_can_be_read(inst: &Inst) -> bool {
  inst.resources.iter().any(res_can_be_read)
}

fn obj_can_be_read<U>(obj: &Obj<U>) -> bool {
  obj.insts.iter().any(inst_can_be_read)
}

impl<U> DataModel<U> {
  pub(crate) fn begin_read(&mut self, path: Option<Path>) -> Result<(), Error> {
    let path = match path {
      | Some(p) if p.has(Level::Object) => p,
      | _ => {
        log::error!("read needs an object path");
        return Err(Error::BadRequest);
      },
    };
    if self.op.bootstrap {
      if path.oid() != Some(OID_SERVER) && path.oid() != Some(OID_ACCESS_CONTROL) {
        log::error!("bootstrap server can't access this object");
        return Err(Error::MethodNotAllowed);
      }
      if path.has(Level::Resource) {
        log::error!("bootstrap read can't target resource");
        return Err(Error::MethodNotAllowed);
      }
    }

    self.op.cursor = self.locate(&path)?;
    let (level, total) = self.readable_count_and_level()?;
    self.op.op_count = total;
    self.op.ctx = OpCtx::Read(ReadCtx { base_level: level,
                                        total,
                                        ..Default::default() });
    Ok(())
  }

  /// Count the readable records under the located entity and decide the
  /// level iteration starts from.
  fn readable_count_and_level(&self) -> Result<(Level, usize), Error> {
    let cursor = &self.op.cursor;
    if cursor.riid.is_some() {
      let readable = self.res_at(cursor).op.readable();
      if !readable {
        log::error!("resource is not readable");
        return Err(Error::MethodNotAllowed);
      }
      return Ok((Level::ResourceInstance, 1));
    }
    if cursor.res.is_some() {
      let res = self.res_at(cursor);
      if !res.op.readable() {
        log::error!("resource is not readable");
        return Err(Error::MethodNotAllowed);
      }
      return Ok((Level::Resource, readable_from_res(res)));
    }
    if let Some(inst_idx) = cursor.inst {
      let inst = &self.objs[cursor.obj].insts[inst_idx];
      return Ok((Level::Instance, readable_from_inst(inst)));
    }
    Ok((Level::Object, readable_from_obj(&self.objs[cursor.obj])))
  }

  /// Number of readable Resources / Resource Instances the in-progress
  /// Read will yield. `0` means: call `operation_end` immediately.
  pub fn get_readable_res_count(&self) -> Result<usize, Error> {
    self.op_guard(&[Operation::Read])?;
    match self.op.ctx {
      | OpCtx::Read(ctx) => Ok(ctx.total),
      | _ => Err(Error::Logic),
    }
  }

  /// Pull the next `{path, value}` record of a Read or Read-Composite
  /// operation.
  ///
  /// Must not be called when the readable count is zero.
  pub fn get_read_entry<'a>(&mut self, user: &'a mut U) -> Result<Entry<Record<'a>>, Error> {
    self.op_guard(&[Operation::Read, Operation::ReadComposite])?;
    if self.op.op_count == 0 {
      return Err(Error::Logic);
    }
    let mut ctx = match self.op.ctx {
      | OpCtx::Read(c) => c,
      | _ => return Err(Error::Logic),
    };
    let mut cursor = self.op.cursor;

    match ctx.base_level {
      | Level::Object | Level::Instance => {
        self.advance_to_readable(&mut ctx, &mut cursor);
      },
      | Level::Resource => {
        let res = self.res_at(&cursor);
        if res.op.multi() {
          cursor.riid = Some(res.riids[ctx.res_inst_idx]);
          ctx.res_inst_idx += 1;
        }
      },
      // single record, cursor already points at it
      | Level::ResourceInstance => (),
    }

    self.op.cursor = cursor;
    self.op.ctx = OpCtx::Read(ctx);

    let path = self.cursor_path(&cursor);
    let value = {
      let r = self.call_res_read(user, &cursor, &path);
      self.latch(r)?
    };

    self.op.op_count -= 1;

    #[cfg(feature = "composite")]
    if self.op.operation == Operation::ReadComposite
       && self.op.op_count == 0
       && ctx.composite_obj_idx != 0
       && ctx.composite_obj_idx < self.objs.len()
    {
      self.composite_next_path(&Path::root())?;
    }

    let record = Record { path, value };
    if self.op.op_count > 0 {
      Ok(Entry::Next(record))
    } else {
      Ok(Entry::Last(record))
    }
  }

  /// Walk the instance/resource indices forward to the next readable
  /// resource (instance). Only called while records remain.
  fn advance_to_readable(&self, ctx: &mut ReadCtx, cursor: &mut Cursor) {
    loop {
      let inst_idx = if ctx.base_level == Level::Object {
        ctx.inst_idx
      } else {
        cursor.inst.unwrap_or_default()
      };
      let inst = &self.objs[cursor.obj].insts[inst_idx];
      let res_count = inst.resources.len();
      if res_count == 0 {
        ctx.inst_idx += 1;
        continue;
      }
      let res = &inst.resources[ctx.res_idx];

      if res.op.readable() && res.op.multi() && res.inst_count() > 0 {
        let res_idx = ctx.res_idx;
        let riid = res.riids[ctx.res_inst_idx];
        ctx.res_inst_idx += 1;
        if ctx.res_inst_idx == res.inst_count() {
          ctx.res_inst_idx = 0;
          bump_res(ctx, res_count);
        }
        cursor.inst = Some(inst_idx);
        cursor.res = Some(res_idx);
        cursor.riid = Some(riid);
        return;
      }

      if res.op.readable() && !res.op.multi() {
        let res_idx = ctx.res_idx;
        bump_res(ctx, res_count);
        cursor.inst = Some(inst_idx);
        cursor.res = Some(res_idx);
        cursor.riid = None;
        return;
      }

      // unreadable, or multi-instance with no instances
      bump_res(ctx, res_count);
    }
  }

  /// Does `path` contain anything Read (and therefore Observe) can
  /// reach?
  pub(crate) fn path_has_readable_resources(&self, path: &Path) -> Result<(), Error> {
    if !path.has(Level::Object) {
      if self.objs.iter().any(obj_can_be_read) {
        return Ok(());
      }
      return Err(Error::MethodNotAllowed);
    }
    let cursor = self.locate(path)?;
    let readable = if path.has(Level::Resource) {
      res_can_be_read(self.res_at(&cursor))
    } else if let Some(inst_idx) = cursor.inst {
      inst_can_be_read(&self.objs[cursor.obj].insts[inst_idx])
    } else {
      obj_can_be_read(&self.objs[cursor.obj])
    };
    if readable {
      Ok(())
    } else {
      Err(Error::MethodNotAllowed)
    }
  }

  #[cfg(feature = "composite")]
  pub(crate) fn begin_read_composite(&mut self) -> Result<(), Error> {
    self.op.ctx = OpCtx::Read(Default::default());
    Ok(())
  }

  /// Feed the next path of a Read-Composite operation. The root path
  /// expands to every registered Object in turn.
  #[cfg(feature = "composite")]
  pub fn composite_next_path(&mut self, path: &Path) -> Result<NextPath, Error> {
    self.op_guard(&[Operation::ReadComposite])?;
    if self.op.op_count != 0 {
      return Err(Error::Logic);
    }
    let mut ctx = match self.op.ctx {
      | OpCtx::Read(c) => c,
      | _ => return Err(Error::Logic),
    };

    let root_path = !path.has(Level::Object);
    let mut target = *path;
    loop {
      if root_path {
        if ctx.composite_obj_idx >= self.objs.len() {
          self.op.ctx = OpCtx::Read(ctx);
          return Ok(NextPath::NoRecords);
        }
        target = Path::object(self.objs[ctx.composite_obj_idx].oid);
        ctx.composite_obj_idx += 1;
      }

      let r = self.locate(&target);
      self.op.cursor = self.latch(r)?;
      let r = self.readable_count_and_level();
      let (level, total) = self.latch(r)?;
      ctx.base_level = level;
      ctx.total = total;
      self.op.op_count = total;

      if total > 0 {
        break;
      }
      if !root_path || ctx.composite_obj_idx >= self.objs.len() {
        self.op.ctx = OpCtx::Read(ctx);
        return Ok(NextPath::NoRecords);
      }
    }

    ctx.path = target;
    ctx.inst_idx = 0;
    ctx.res_idx = 0;
    ctx.res_inst_idx = 0;
    self.op.ctx = OpCtx::Read(ctx);
    Ok(NextPath::Ready)
  }

  /// Number of readable records `path` would contribute to the
  /// in-progress Read-Composite operation.
  #[cfg(feature = "composite")]
  pub fn get_composite_readable_res_count(&mut self, path: &Path) -> Result<usize, Error> {
    self.op_guard(&[Operation::ReadComposite])?;
    if !path.has(Level::Object) {
      return Ok(self.objs.iter().map(readable_from_obj).sum());
    }
    let r = self.locate(path);
    let cursor = self.latch(r)?;
    if cursor.riid.is_some() {
      return Ok(if self.res_at(&cursor).op.readable() { 1 } else { 0 });
    }
    if cursor.res.is_some() {
      return Ok(readable_from_res(self.res_at(&cursor)));
    }
    if let Some(inst_idx) = cursor.inst {
      return Ok(readable_from_inst(&self.objs[cursor.obj].insts[inst_idx]));
    }
    Ok(readable_from_obj(&self.objs[cursor.obj]))
  }
}

fn bump_res(ctx: &mut ReadCtx, res_count: usize) {
  ctx.res_idx += 1;
  if ctx.res_idx == res_count {
    ctx.res_idx = 0;
    ctx.inst_idx += 1;
  }
}
