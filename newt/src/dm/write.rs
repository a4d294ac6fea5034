use super::{ChangeKind, DataModel, OpCtx, WriteCtx};
use crate::error::Error;
use crate::io::Record;
use crate::path::{Level, Path};
use crate::req::Operation;

impl<U> DataModel<U> {
  pub(crate) fn begin_write(&mut self,
                            user: &mut U,
                            path: Option<Path>)
                            -> Result<(), Error> {
    let path = match path {
      | Some(p) if p.has(Level::Instance) => p,
      | _ => {
        log::error!("write needs an instance or resource path");
        return Err(Error::BadRequest);
      },
    };
    self.op.transactional = true;
    self.op.ctx = OpCtx::Write(WriteCtx { path,
                                          ..Default::default() });

    if self.op.operation == Operation::WriteReplace {
      self.begin_write_replace(user, path)
    } else {
      let obj_idx = self.obj_transaction_begin(user, path.oid().unwrap_or_default())?;
      self.op.cursor = self.locate_in_obj(obj_idx, &path)?;
      Ok(())
    }
  }

  fn begin_write_replace(&mut self, user: &mut U, path: Path) -> Result<(), Error> {
    let obj_idx = self.obj_transaction_begin(user, path.oid().unwrap_or_default())?;
    match self.locate_in_obj(obj_idx, &path) {
      | Ok(cursor) => self.op.cursor = cursor,
      | Err(Error::NotFound) => {
        // a bootstrap server may write to an instance that does not
        // exist yet; create it first
        if !self.op.bootstrap {
          return Err(Error::NotFound);
        }
        self.op.cursor.obj = obj_idx;
        self.create_object_instance(user, path.iid().unwrap_or_default())?;
        self.op.cursor = self.locate_in_obj(obj_idx, &path)?;
      },
      | Err(e) => return Err(e),
    }

    if path.is(Level::Instance) {
      let oid = self.objs[obj_idx].oid;
      let iid = path.iid().unwrap_or_default();
      let reset = match self.objs[obj_idx].handlers.inst_reset {
        | Some(f) => f,
        | None => {
          log::error!("inst_reset handler not defined");
          return Err(Error::MethodNotAllowed);
        },
      };
      reset(user, oid, iid).map_err(|e| {
                             log::error!("inst_reset failed");
                             e
                           })?;
      log::debug!("reset instance /{}/{}", oid, iid);
    } else if path.is(Level::Resource) && self.res_at(&self.op.cursor).op.multi() {
      // replace on a multi-instance resource wipes all its instances
      let count = self.res_at(&self.op.cursor).inst_count();
      for _ in 0..count {
        self.op.cursor.riid = Some(self.res_at(&self.op.cursor).riids[0]);
        self.delete_res_instance(user)?;
      }
      self.op.cursor.riid = None;
    }
    Ok(())
  }

  /// Apply one `{path, value}` record of a Write or Create operation.
  ///
  /// The record's path must lie inside the operation's base path and
  /// name a writable Resource (or Resource Instance on multi-instance
  /// resources). Unknown Resource Instances are created on the fly.
  pub fn write_entry(&mut self, user: &mut U, record: &Record<'_>) -> Result<(), Error> {
    self.op_guard(&[Operation::Create,
                    Operation::WriteReplace,
                    Operation::WritePartialUpdate])?;
    let ctx = match self.op.ctx {
      | OpCtx::Write(c) => c,
      | _ => return Err(Error::Logic),
    };
    if self.op.operation == Operation::Create && !ctx.instance_created {
      return Err(Error::Logic);
    }

    let r = self.write_record(user, &ctx, record);
    self.latch(r)
  }

  fn write_record(&mut self,
                  user: &mut U,
                  ctx: &WriteCtx,
                  record: &Record<'_>)
                  -> Result<(), Error> {
    if !record.path.has(Level::Resource) {
      log::error!("invalid path");
      return Err(Error::BadRequest);
    }
    if record.path.outside_base(&ctx.path) {
      log::error!("write record outside of request path");
      return Err(Error::BadRequest);
    }

    // the resource instance may legitimately not exist yet
    let res_path = Path::resource(record.path.oid().unwrap_or_default(),
                                  record.path.iid().unwrap_or_default(),
                                  record.path.rid().unwrap_or_default());
    self.op.cursor = self.locate_in_obj(self.op.cursor.obj, &res_path)?;

    let res = self.res_at(&self.op.cursor);
    if !res.op.writable(self.op.bootstrap) {
      log::error!("resource is not writable");
      return Err(Error::BadRequest);
    }
    if !res.ty.map_or(false, |ty| record.value.matches(ty)) {
      log::error!("invalid record type");
      return Err(Error::BadRequest);
    }
    if res.op.multi() != record.path.has(Level::ResourceInstance) {
      log::error!("writing to invalid path");
      return Err(Error::MethodNotAllowed);
    }

    if res.op.multi() {
      self.create_res_instance_if_missing(user, record)?;
    }

    let write = match self.objs[self.op.cursor.obj].handlers.res_write {
      | Some(f) => f,
      | None => {
        log::error!("write handler not defined");
        return Err(Error::MethodNotAllowed);
      },
    };
    write(user, &record.path, &record.value)?;

    self.op_event(record.path, ChangeKind::ValueChanged);
    Ok(())
  }

  fn create_res_instance_if_missing(&mut self,
                                    user: &mut U,
                                    record: &Record<'_>)
                                    -> Result<(), Error> {
    let riid = record.path.riid().unwrap_or_default();
    self.op.cursor.riid = Some(riid);

    let res = self.res_at(&self.op.cursor);
    if res.has_inst(riid) {
      return Ok(());
    }
    if res.inst_count() >= res.max_inst_count as usize {
      log::error!("no space for new resource instance");
      return Err(Error::Memory);
    }

    let create = match self.objs[self.op.cursor.obj].handlers.res_inst_create {
      | Some(f) => f,
      | None => {
        log::error!("res_inst_create handler not defined");
        return Err(Error::MethodNotAllowed);
      },
    };
    create(user, &record.path).map_err(|e| {
                                log::error!("res_inst_create failed");
                                e
                              })?;
    let cursor = self.op.cursor;
    self.res_at_mut(&cursor).insert_inst(riid)?;
    log::debug!("created riid={}", riid);

    self.op_event(record.path, ChangeKind::Added);
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::test::fixture;
  use crate::value::Value;

  #[test]
  fn partial_update_writes_through() {
    let (mut dm, mut user) = fixture::basic();
    dm.operation_begin(&mut user,
                       Operation::WritePartialUpdate,
                       false,
                       Some(Path::instance(3, 1)),
                       1)
      .unwrap();
    dm.write_entry(&mut user,
                   &Record { path: Path::resource(3, 1, 2),
                             value: Value::Int(11) })
      .unwrap();
    dm.operation_end(&mut user).unwrap();

    assert_eq!(user.ints[&(3, 1, 2, u16::MAX)], 11);
    assert!(user.calls.contains(&std::format!("tx_begin:3")));
    assert!(user.calls.contains(&std::format!("tx_validate:3")));
    assert!(user.calls.contains(&std::format!("tx_end:3:ok")));
  }

  #[test]
  fn replace_on_instance_resets_first() {
    let (mut dm, mut user) = fixture::basic();
    dm.operation_begin(&mut user,
                       Operation::WriteReplace,
                       false,
                       Some(Path::instance(3, 1)),
                       1)
      .unwrap();
    dm.write_entry(&mut user,
                   &Record { path: Path::resource(3, 1, 2),
                             value: Value::Int(5) })
      .unwrap();
    dm.operation_end(&mut user).unwrap();

    assert_eq!(user.calls[1], "inst_reset:/3/1");
  }

  #[test]
  fn replace_on_multi_instance_resource_wipes_old_instances() {
    let (mut dm, mut user) = fixture::basic();
    dm.operation_begin(&mut user,
                       Operation::WriteReplace,
                       false,
                       Some(Path::resource(3, 1, 4)),
                       1)
      .unwrap();
    dm.write_entry(&mut user,
                   &Record { path: Path::resource_instance(3, 1, 4, 2),
                             value: Value::Int(20) })
      .unwrap();
    dm.operation_end(&mut user).unwrap();

    assert!(user.calls.contains(&std::format!("res_inst_delete:/3/1/4/0")));
    assert!(user.calls.contains(&std::format!("res_inst_delete:/3/1/4/3")));
    assert!(user.calls.contains(&std::format!("res_inst_create:/3/1/4/2")));
    assert_eq!(dm.obj(3).unwrap().inst(1).unwrap().res(4).unwrap().insts(),
               &[2]);

    // read back: exactly one resource instance with the new value
    dm.operation_begin(&mut user, Operation::Read, false, Some(Path::resource(3, 1, 4)), 1)
      .unwrap();
    let entry = dm.get_read_entry(&mut user).unwrap();
    assert!(entry.is_last());
    assert_eq!(entry.record().path, Path::resource_instance(3, 1, 4, 2));
    assert_eq!(entry.record().value.as_i64().unwrap(), 20);
    dm.operation_end(&mut user).unwrap();
  }

  #[test]
  fn write_outside_base_is_rejected() {
    let (mut dm, mut user) = fixture::basic();
    dm.operation_begin(&mut user,
                       Operation::WritePartialUpdate,
                       false,
                       Some(Path::instance(3, 1)),
                       1)
      .unwrap();
    assert_eq!(dm.write_entry(&mut user,
                              &Record { path: Path::resource(3, 2, 1),
                                        value: Value::Int(1) }),
               Err(Error::BadRequest));
    assert_eq!(dm.operation_end(&mut user), Err(Error::BadRequest));
  }

  #[test]
  fn write_type_mismatch_is_rejected() {
    let (mut dm, mut user) = fixture::basic();
    dm.operation_begin(&mut user,
                       Operation::WritePartialUpdate,
                       false,
                       Some(Path::instance(3, 1)),
                       1)
      .unwrap();
    assert_eq!(dm.write_entry(&mut user,
                              &Record { path: Path::resource(3, 1, 2),
                                        value: Value::Bool(true) }),
               Err(Error::BadRequest));
    dm.operation_end(&mut user).ok();
  }

  #[test]
  fn write_to_unwritable_resource_requires_bootstrap() {
    let (mut dm, mut user) = fixture::basic();
    dm.operation_begin(&mut user,
                       Operation::WritePartialUpdate,
                       false,
                       Some(Path::resource(3, 1, 1)),
                       1)
      .unwrap();
    assert_eq!(dm.write_entry(&mut user,
                              &Record { path: Path::resource(3, 1, 1),
                                        value: Value::Int(1) }),
               Err(Error::BadRequest));
    dm.operation_end(&mut user).ok();

    dm.operation_begin(&mut user,
                       Operation::WriteReplace,
                       true,
                       Some(Path::resource(3, 1, 1)),
                       u16::MAX)
      .unwrap();
    dm.write_entry(&mut user,
                   &Record { path: Path::resource(3, 1, 1),
                             value: Value::Int(1) })
      .unwrap();
    dm.operation_end(&mut user).unwrap();
  }

  #[test]
  fn multi_instance_cap_yields_memory() {
    let (mut dm, mut user) = fixture::basic();
    dm.operation_begin(&mut user,
                       Operation::WritePartialUpdate,
                       false,
                       Some(Path::resource(3, 1, 4)),
                       1)
      .unwrap();
    for riid in [1, 2] {
      dm.write_entry(&mut user,
                     &Record { path: Path::resource_instance(3, 1, 4, riid),
                               value: Value::Int(0) })
        .unwrap();
    }
    // max_inst_count = 4, riids {0, 1, 2, 3} now live
    assert_eq!(dm.write_entry(&mut user,
                              &Record { path: Path::resource_instance(3, 1, 4, 9),
                                        value: Value::Int(0) }),
               Err(Error::Memory));
    dm.operation_end(&mut user).ok();
  }

  #[test]
  fn bootstrap_replace_creates_missing_instance() {
    let (mut dm, mut user) = fixture::basic();
    dm.operation_begin(&mut user,
                       Operation::WriteReplace,
                       true,
                       Some(Path::instance(3, 5)),
                       u16::MAX)
      .unwrap();
    dm.write_entry(&mut user,
                   &Record { path: Path::resource(3, 5, 2),
                             value: Value::Int(1) })
      .unwrap();
    dm.operation_end(&mut user).unwrap();

    assert!(user.calls.contains(&std::format!("inst_create:/3/5")));
    assert!(dm.obj(3).unwrap().inst(5).is_some());
    // bootstrap mutations emit no change events
    assert!(dm.take_events().is_empty());
  }

  #[test]
  fn write_emits_value_changed_event() {
    let (mut dm, mut user) = fixture::basic();
    dm.operation_begin(&mut user,
                       Operation::WritePartialUpdate,
                       false,
                       Some(Path::instance(3, 1)),
                       7)
      .unwrap();
    dm.write_entry(&mut user,
                   &Record { path: Path::resource(3, 1, 2),
                             value: Value::Int(3) })
      .unwrap();
    dm.operation_end(&mut user).unwrap();

    let events = dm.take_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].path, Path::resource(3, 1, 2));
    assert_eq!(events[0].kind, ChangeKind::ValueChanged);
    assert_eq!(events[0].ssid, 7);
  }

  #[test]
  fn failed_transaction_rolls_back_with_error() {
    let (mut dm, mut user) = fixture::basic();
    user.fail_validate = Some((3, Error::Internal));
    dm.operation_begin(&mut user,
                       Operation::WritePartialUpdate,
                       false,
                       Some(Path::instance(3, 1)),
                       1)
      .unwrap();
    dm.write_entry(&mut user,
                   &Record { path: Path::resource(3, 1, 2),
                             value: Value::Int(3) })
      .unwrap();
    assert_eq!(dm.operation_end(&mut user), Err(Error::Internal));
    assert!(user.calls.contains(&std::format!("tx_end:3:err")));
  }

  #[test]
  fn chunked_string_write_spans_entries() {
    use crate::dm::{Obj, Res, ResOp};
    use crate::test::handlers;
    use crate::value::{ResType, StrChunk};

    let (mut dm, mut user) = fixture::basic();
    dm.add_obj(Obj::new(9).resources(&[Res::new(0, ResOp::RW, ResType::Str)])
                          .handlers(handlers())
                          .instance(0))
      .unwrap();

    dm.operation_begin(&mut user,
                       Operation::WritePartialUpdate,
                       false,
                       Some(Path::resource(9, 0, 0)),
                       1)
      .unwrap();
    dm.write_entry(&mut user,
                   &Record { path: Path::resource(9, 0, 0),
                             value: Value::Str(StrChunk { data: "lwm",
                                                          offset: 0,
                                                          full_length_hint: 5 }) })
      .unwrap();
    dm.write_entry(&mut user,
                   &Record { path: Path::resource(9, 0, 0),
                             value: Value::Str(StrChunk { data: "2m",
                                                          offset: 3,
                                                          full_length_hint: 5 }) })
      .unwrap();
    dm.operation_end(&mut user).unwrap();

    assert_eq!(user.strs[&(9, 0, 0, u16::MAX)], "lwm2m");
  }
}
