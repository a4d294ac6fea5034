use super::{ChangeKind,
            DataModel,
            OID_DEVICE,
            OID_OSCORE,
            OID_SECURITY,
            SECURITY_RID_BOOTSTRAP,
            SECURITY_RID_OSCORE};
use crate::error::Error;
use crate::path::{Level, Path};

impl<U> DataModel<U> {
  pub(crate) fn begin_delete(&mut self,
                             user: &mut U,
                             path: Option<Path>)
                             -> Result<(), Error> {
    self.op.transactional = true;

    if self.op.bootstrap {
      let path = path.unwrap_or_else(Path::root);
      return self.bootstrap_delete(user, &path);
    }

    #[cfg(feature = "lwm2m12")]
    let shape_ok = path.map_or(false, |p| {
                     p.is(Level::Instance) || p.is(Level::ResourceInstance)
                   });
    #[cfg(not(feature = "lwm2m12"))]
    let shape_ok = path.map_or(false, |p| p.is(Level::Instance));
    let path = match path {
      | Some(p) if shape_ok => p,
      | _ => {
        log::error!("delete needs an instance path");
        return Err(Error::BadRequest);
      },
    };

    let obj_idx = self.obj_transaction_begin(user, path.oid().unwrap_or_default())?;
    self.op.cursor = self.locate_in_obj(obj_idx, &path)?;

    if path.is(Level::Instance) {
      self.delete_instance(user)
    } else {
      self.delete_res_instance(user)
    }
  }

  pub(crate) fn delete_instance(&mut self, user: &mut U) -> Result<(), Error> {
    let obj_idx = self.op.cursor.obj;
    let inst_idx = self.op.cursor.inst.unwrap_or_default();
    let oid = self.objs[obj_idx].oid;
    let iid = self.objs[obj_idx].insts[inst_idx].iid;

    let delete = match self.objs[obj_idx].handlers.inst_delete {
      | Some(f) => f,
      | None => {
        log::error!("inst_delete handler not defined");
        return Err(Error::MethodNotAllowed);
      },
    };
    delete(user, oid, iid).map_err(|e| {
                            log::error!("inst_delete failed");
                            e
                          })?;
    self.objs[obj_idx].insts.remove(inst_idx);
    log::debug!("instance {} deleted", iid);

    self.op_event(Path::instance(oid, iid), ChangeKind::Deleted);
    Ok(())
  }

  pub(crate) fn delete_res_instance(&mut self, user: &mut U) -> Result<(), Error> {
    let cursor = self.op.cursor;
    let path = self.cursor_path(&cursor);
    let riid = cursor.riid.unwrap_or_default();

    let delete = match self.objs[cursor.obj].handlers.res_inst_delete {
      | Some(f) => f,
      | None => {
        log::error!("res_inst_delete handler not defined");
        return Err(Error::MethodNotAllowed);
      },
    };
    delete(user, &path).map_err(|e| {
                         log::error!("res_inst_delete failed");
                         e
                       })?;
    self.res_at_mut(&cursor).remove_inst(riid);
    log::debug!("deleted riid={}", riid);

    self.op_event(path, ChangeKind::Deleted);
    Ok(())
  }

  /// After a failed bootstrap attempt, drop every non-bootstrap
  /// Security and Server account by running an object-level
  /// Bootstrap-Delete on each; outcomes are ignored because the
  /// bootstrap session is already lost.
  pub fn bootstrap_cleanup(&mut self, user: &mut U) {
    for oid in [OID_SECURITY, super::OID_SERVER] {
      self.operation_begin(user,
                          crate::req::Operation::Delete,
                          true,
                          Some(Path::object(oid)),
                          crate::config::INVALID_ID)
          .ok();
      self.operation_end(user).ok();
    }
  }

  /// Bootstrap-Delete: root, Object or Object Instance target. Skips
  /// the Device object, Bootstrap-Server Security instances and the
  /// OSCORE instances they link to.
  fn bootstrap_delete(&mut self, user: &mut U, base: &Path) -> Result<(), Error> {
    if base.has(Level::Resource) {
      log::error!("bootstrap delete can't target resource");
      return Err(Error::BadRequest);
    }
    let all_objects = !base.has(Level::Object);
    let all_instances = !base.has(Level::Instance);

    if !all_objects && base.oid() == Some(OID_DEVICE) {
      log::error!("device object instance cannot be deleted");
      return Err(Error::BadRequest);
    }

    for obj_idx in 0..self.objs.len() {
      let oid = self.objs[obj_idx].oid;
      if oid == OID_DEVICE {
        continue;
      }
      if !all_objects && base.oid() != Some(oid) {
        continue;
      }
      self.transaction_begin_at(user, obj_idx)?;
      self.op.cursor.obj = obj_idx;

      let inst_count = self.objs[obj_idx].inst_count();
      let mut inst_idx = 0;
      for _ in 0..inst_count {
        self.op.cursor.inst = Some(inst_idx);
        let iid = self.objs[obj_idx].insts[inst_idx].iid;
        if !all_instances && base.iid() != Some(iid) {
          inst_idx += 1;
          continue;
        }
        if self.is_bootstrap_instance(user) {
          if !all_objects && !all_instances {
            log::error!("bootstrap-server instance can't be deleted");
            return Err(Error::BadRequest);
          }
          // leave the survivor behind and look at the next slot
          inst_idx += 1;
          continue;
        }
        self.delete_instance(user)?;
        if !all_objects && !all_instances {
          return Ok(());
        }
      }
    }
    Ok(())
  }

  /// Is the instance under the cursor one that survives a bootstrap
  /// wipe: a Bootstrap-Server Security instance, or an OSCORE instance
  /// such a Security instance links to via its resource 17?
  fn is_bootstrap_instance(&self, user: &mut U) -> bool {
    let obj_idx = self.op.cursor.obj;
    let oid = self.objs[obj_idx].oid;
    let iid = self.objs[obj_idx].insts[self.op.cursor.inst.unwrap_or_default()].iid;

    if oid == OID_SECURITY {
      return self.res_read(user, &Path::resource(OID_SECURITY, iid, SECURITY_RID_BOOTSTRAP))
                 .and_then(|v| v.as_bool())
                 .unwrap_or(false);
    }
    if oid == OID_OSCORE {
      return self.is_oscore_bootstrap_instance(user, iid);
    }
    false
  }

  fn is_oscore_bootstrap_instance(&self, user: &mut U, oscore_iid: u16) -> bool {
    let sec_idx = match self.find_obj(OID_SECURITY) {
      | Some(idx) => idx,
      | None => return false,
    };
    for inst_idx in 0..self.objs[sec_idx].inst_count() {
      let siid = self.objs[sec_idx].insts[inst_idx].iid;
      let is_bootstrap =
        self.res_read(&mut *user,
                      &Path::resource(OID_SECURITY, siid, SECURITY_RID_BOOTSTRAP))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
      if !is_bootstrap {
        continue;
      }
      let linked =
        self.res_read(&mut *user,
                      &Path::resource(OID_SECURITY, siid, SECURITY_RID_OSCORE))
            .and_then(|v| v.as_objlnk())
            .map_or(false, |l| l.iid == oscore_iid);
      if linked {
        return true;
      }
    }
    false
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::dm::{Res, ResOp};
  use crate::req::Operation;
  use crate::test::{fixture, obj_with, TestUser};
  use crate::value::ResType;

  #[test]
  fn delete_instance_removes_index_entry() {
    let (mut dm, mut user) = fixture::basic();
    dm.operation_begin(&mut user, Operation::Delete, false, Some(Path::instance(3, 1)), 1)
      .unwrap();
    dm.operation_end(&mut user).unwrap();

    assert!(dm.obj(3).unwrap().inst(1).is_none());
    assert!(user.calls.contains(&std::format!("inst_delete:/3/1")));
    let events = dm.take_events();
    assert_eq!(events[0].kind, ChangeKind::Deleted);
    assert_eq!(events[0].path, Path::instance(3, 1));
  }

  #[cfg(feature = "lwm2m12")]
  #[test]
  fn delete_resource_instance() {
    let (mut dm, mut user) = fixture::basic();
    dm.operation_begin(&mut user,
                       Operation::Delete,
                       false,
                       Some(Path::resource_instance(3, 1, 4, 3)),
                       1)
      .unwrap();
    dm.operation_end(&mut user).unwrap();
    assert_eq!(dm.obj(3).unwrap().inst(1).unwrap().res(4).unwrap().insts(),
               &[0]);
  }

  #[test]
  fn delete_of_missing_instance_is_not_found() {
    let (mut dm, mut user) = fixture::basic();
    assert_eq!(dm.operation_begin(&mut user,
                                  Operation::Delete,
                                  false,
                                  Some(Path::instance(3, 9)),
                                  1),
               Err(Error::NotFound));
    assert_eq!(dm.operation_end(&mut user), Err(Error::NotFound));
  }

  /// Security: iid 0 regular, iid 1 bootstrap; Server: iid 0; Device:
  /// iid 0; OSCORE: iid 0 linked from the bootstrap Security instance.
  fn bootstrap_fixture() -> (DataModel<TestUser>, TestUser) {
    let mut dm = DataModel::new();
    let mut user = TestUser::default();
    let sec_res = [Res::new(0, ResOp::RW, ResType::Str),
                   Res::new(SECURITY_RID_BOOTSTRAP, ResOp::RW, ResType::Bool),
                   Res::new(10, ResOp::RW, ResType::Int),
                   Res::new(SECURITY_RID_OSCORE, ResOp::RW, ResType::Objlnk)];
    dm.add_obj(obj_with(OID_SECURITY, &sec_res, &[0, 1])).unwrap();
    dm.add_obj(obj_with(1, &[Res::new(0, ResOp::R, ResType::Int)], &[0]))
      .unwrap();
    dm.add_obj(obj_with(OID_DEVICE, &[Res::new(0, ResOp::R, ResType::Str)], &[0]))
      .unwrap();
    dm.add_obj(obj_with(OID_OSCORE, &[Res::new(0, ResOp::RW, ResType::Str)], &[0]))
      .unwrap();
    dm.take_events();

    user.bools.insert((0, 0, SECURITY_RID_BOOTSTRAP, u16::MAX), false);
    user.bools.insert((0, 1, SECURITY_RID_BOOTSTRAP, u16::MAX), true);
    user.objlnks.insert((0, 1, SECURITY_RID_OSCORE, u16::MAX),
                        crate::value::Objlnk { oid: OID_OSCORE,
                                               iid: 0 });
    (dm, user)
  }

  #[test]
  fn bootstrap_delete_on_root_preserves_bootstrap_account() {
    let (mut dm, mut user) = bootstrap_fixture();
    dm.operation_begin(&mut user, Operation::Delete, true, Some(Path::root()), u16::MAX)
      .unwrap();
    dm.operation_end(&mut user).unwrap();

    let sec: std::vec::Vec<u16> =
      dm.obj(0).unwrap().instances().iter().map(|i| i.iid()).collect();
    assert_eq!(sec, std::vec![1]);
    assert!(dm.obj(1).unwrap().instances().is_empty());
    assert_eq!(dm.obj(3).unwrap().instances().len(), 1);
    assert_eq!(dm.obj(21).unwrap().instances().len(), 1);
    // bootstrap deletes emit no events
    assert!(dm.take_events().is_empty());
  }

  #[test]
  fn bootstrap_delete_device_is_rejected() {
    let (mut dm, mut user) = bootstrap_fixture();
    assert_eq!(dm.operation_begin(&mut user,
                                  Operation::Delete,
                                  true,
                                  Some(Path::object(3)),
                                  u16::MAX),
               Err(Error::BadRequest));
    dm.operation_end(&mut user).ok();
    assert_eq!(dm.obj(3).unwrap().instances().len(), 1);
  }

  #[test]
  fn bootstrap_delete_targeted_bootstrap_instance_is_rejected() {
    let (mut dm, mut user) = bootstrap_fixture();
    assert_eq!(dm.operation_begin(&mut user,
                                  Operation::Delete,
                                  true,
                                  Some(Path::instance(0, 1)),
                                  u16::MAX),
               Err(Error::BadRequest));
    dm.operation_end(&mut user).ok();

    assert_eq!(dm.operation_begin(&mut user,
                                  Operation::Delete,
                                  true,
                                  Some(Path::instance(21, 0)),
                                  u16::MAX),
               Err(Error::BadRequest));
    dm.operation_end(&mut user).ok();
  }

  #[test]
  fn targeted_bootstrap_delete_past_a_bootstrap_instance() {
    let (mut dm, mut user) = bootstrap_fixture();
    // a second regular account, ordered after the bootstrap one
    dm.operation_begin(&mut user,
                       Operation::WriteReplace,
                       true,
                       Some(Path::instance(0, 2)),
                       u16::MAX)
      .unwrap();
    dm.operation_end(&mut user).unwrap();
    user.bools.insert((0, 2, SECURITY_RID_BOOTSTRAP, u16::MAX), false);

    dm.operation_begin(&mut user, Operation::Delete, true, Some(Path::instance(0, 2)), u16::MAX)
      .unwrap();
    dm.operation_end(&mut user).unwrap();
    let sec: std::vec::Vec<u16> =
      dm.obj(0).unwrap().instances().iter().map(|i| i.iid()).collect();
    assert_eq!(sec, std::vec![0, 1]);
  }

  #[test]
  fn bootstrap_cleanup_wipes_security_and_server() {
    let (mut dm, mut user) = bootstrap_fixture();
    dm.bootstrap_cleanup(&mut user);
    assert_eq!(dm.obj(0).unwrap().instances().len(), 1);
    assert!(dm.obj(1).unwrap().instances().is_empty());
    // only /0 and /1 are in scope for the cleanup
    assert_eq!(dm.obj(21).unwrap().instances().len(), 1);
  }

  #[test]
  fn bootstrap_delete_object_level() {
    let (mut dm, mut user) = bootstrap_fixture();
    dm.operation_begin(&mut user, Operation::Delete, true, Some(Path::object(0)), u16::MAX)
      .unwrap();
    dm.operation_end(&mut user).unwrap();
    let sec: std::vec::Vec<u16> =
      dm.obj(0).unwrap().instances().iter().map(|i| i.iid()).collect();
    assert_eq!(sec, std::vec![1]);
    // other objects untouched
    assert_eq!(dm.obj(1).unwrap().instances().len(), 1);
  }
}
