use super::{ChangeKind, DataModel, Inst, OpCtx, WriteCtx};
use crate::config::INVALID_ID;
use crate::error::Error;
use crate::path::{Level, Path};
use crate::req::Operation;

fn find_free_iid<U>(dm: &DataModel<U>, obj_idx: usize) -> u16 {
  let insts = &dm.objs[obj_idx].insts;
  for idx in 0..u16::MAX {
    if idx as usize >= insts.len() || insts[idx as usize].iid != idx {
      return idx;
    }
  }
  // the instance table can never hold 65535 entries
  u16::MAX - 1
}

impl<U> DataModel<U> {
  pub(crate) fn begin_create(&mut self,
                             user: &mut U,
                             path: Option<Path>)
                             -> Result<(), Error> {
    let path = match path {
      | Some(p) if p.is(Level::Object) => p,
      | _ => {
        log::error!("create needs an object path");
        return Err(Error::BadRequest);
      },
    };
    self.op.transactional = true;
    self.op.ctx = OpCtx::Write(WriteCtx { path,
                                          ..Default::default() });

    let obj_idx = self.obj_transaction_begin(user, path.oid().unwrap_or_default())?;
    self.op.cursor = self.locate_in_obj(obj_idx, &path)?;

    let obj = &self.objs[obj_idx];
    if obj.inst_count() >= obj.max_inst_count as usize {
      log::error!("maximum number of instances reached");
      return Err(Error::MethodNotAllowed);
    }
    Ok(())
  }

  /// Create the new Object Instance of a Create operation (or of a
  /// bootstrap Write targeting a non-existent instance).
  ///
  /// Pass [`INVALID_ID`] to let the engine pick the lowest free IID.
  /// Must be called before any [`write_entry`](Self::write_entry), at
  /// most once per operation. Returns the IID actually used.
  pub fn create_object_instance(&mut self, user: &mut U, iid: u16) -> Result<u16, Error> {
    let r = self.create_instance_inner(user, iid);
    self.latch(r)
  }

  fn create_instance_inner(&mut self, user: &mut U, iid: u16) -> Result<u16, Error> {
    if !self.op.in_progress {
      return Err(Error::Logic);
    }
    let bootstrap_write = self.op.operation == Operation::WriteReplace && self.op.bootstrap;
    if self.op.operation != Operation::Create && !bootstrap_write {
      return Err(Error::Logic);
    }
    self.op.result?;
    let mut ctx = match self.op.ctx {
      | OpCtx::Write(c) if !c.instance_created => c,
      | _ => return Err(Error::Logic),
    };

    let obj_idx = self.op.cursor.obj;
    let obj = &self.objs[obj_idx];
    if obj.inst_count() >= obj.max_inst_count as usize {
      log::error!("maximum number of instances reached");
      return Err(Error::MethodNotAllowed);
    }

    let iid = if iid == INVALID_ID {
      let free = find_free_iid(self, obj_idx);
      log::debug!("creating instance with auto-generated iid: {}", free);
      free
    } else {
      if self.objs[obj_idx].inst_idx(iid).is_some() {
        log::error!("instance already exists");
        return Err(Error::MethodNotAllowed);
      }
      iid
    };

    let oid = self.objs[obj_idx].oid;
    let create = match self.objs[obj_idx].handlers.inst_create {
      | Some(f) => f,
      | None => {
        log::error!("inst_create handler not defined");
        return Err(Error::MethodNotAllowed);
      },
    };
    create(user, oid, iid).map_err(|e| {
                            log::error!("inst_create failed");
                            e
                          })?;

    let layout = self.objs[obj_idx].layout;
    self.objs[obj_idx].push_inst(Inst { iid,
                                        resources: layout });
    let inst_idx = self.objs[obj_idx].inst_idx(iid).unwrap_or_default();
    self.op.cursor.inst = Some(inst_idx);
    log::debug!("created instance with iid: {}", iid);

    ctx.path = Path::instance(oid, iid);
    ctx.instance_created = true;
    self.op.ctx = OpCtx::Write(ctx);

    self.op_event(Path::instance(oid, iid), ChangeKind::Added);
    Ok(iid)
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::dm::{Res, ResOp};
  use crate::io::Record;
  use crate::test::{fixture, obj_with, TestUser};
  use crate::value::{ResType, Value};

  fn create(dm: &mut DataModel<TestUser>,
            user: &mut TestUser,
            iid: u16)
            -> Result<u16, Error> {
    let begun = dm.operation_begin(user, Operation::Create, false, Some(Path::object(8)), 1);
    let got = begun.and_then(|()| dm.create_object_instance(user, iid));
    let end = dm.operation_end(user);
    end.and(got)
  }

  fn setup() -> (DataModel<TestUser>, TestUser) {
    let (mut dm, user) = fixture::basic();
    dm.add_obj(obj_with(8, &[Res::new(0, ResOp::RW, ResType::Int)], &[1, 3]).max_instances(5))
      .unwrap();
    dm.take_events();
    (dm, user)
  }

  #[test]
  fn auto_iid_picks_lowest_free() {
    let (mut dm, mut user) = setup();
    assert_eq!(create(&mut dm, &mut user, INVALID_ID), Ok(0));
    assert_eq!(create(&mut dm, &mut user, INVALID_ID), Ok(2));
    assert_eq!(create(&mut dm, &mut user, INVALID_ID), Ok(4));
    // object is full now: max_inst_count = 5
    assert_eq!(create(&mut dm, &mut user, INVALID_ID),
               Err(Error::MethodNotAllowed));
  }

  #[test]
  fn explicit_iid_collision_is_rejected() {
    let (mut dm, mut user) = setup();
    assert_eq!(create(&mut dm, &mut user, 3), Err(Error::MethodNotAllowed));
    assert_eq!(create(&mut dm, &mut user, 2), Ok(2));
    assert_eq!(dm.obj(8).unwrap().instances().len(), 3);
  }

  #[test]
  fn create_then_write_flows_into_new_instance() {
    let (mut dm, mut user) = setup();
    dm.operation_begin(&mut user, Operation::Create, false, Some(Path::object(8)), 1)
      .unwrap();
    let iid = dm.create_object_instance(&mut user, INVALID_ID).unwrap();
    dm.write_entry(&mut user,
                   &Record { path: Path::resource(8, iid, 0),
                             value: Value::Int(99) })
      .unwrap();
    dm.operation_end(&mut user).unwrap();
    assert_eq!(user.ints[&(8, iid, 0, u16::MAX)], 99);

    let events = dm.take_events();
    assert_eq!(events[0].kind, ChangeKind::Added);
    assert_eq!(events[0].path, Path::instance(8, iid));
  }

  #[test]
  fn write_before_create_is_a_logic_error() {
    let (mut dm, mut user) = setup();
    dm.operation_begin(&mut user, Operation::Create, false, Some(Path::object(8)), 1)
      .unwrap();
    assert_eq!(dm.write_entry(&mut user,
                              &Record { path: Path::resource(8, 0, 0),
                                        value: Value::Int(1) }),
               Err(Error::Logic));
    dm.operation_end(&mut user).ok();
  }

  #[test]
  fn create_delete_restores_instance_count() {
    let (mut dm, mut user) = setup();
    let iid = create(&mut dm, &mut user, INVALID_ID).unwrap();
    assert_eq!(dm.obj(8).unwrap().instances().len(), 3);

    dm.operation_begin(&mut user, Operation::Delete, false, Some(Path::instance(8, iid)), 1)
      .unwrap();
    dm.operation_end(&mut user).unwrap();
    assert_eq!(dm.obj(8).unwrap().instances().len(), 2);
  }

  #[test]
  fn failing_inst_create_handler_propagates() {
    let (mut dm, mut user) = setup();
    user.fail_create = Some(Error::Internal);
    assert_eq!(create(&mut dm, &mut user, INVALID_ID), Err(Error::Internal));
    assert_eq!(dm.obj(8).unwrap().instances().len(), 2);
  }
}
