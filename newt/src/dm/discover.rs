use super::{BootDiscCtx,
            DataModel,
            DiscCtx,
            Entry,
            OpCtx,
            OID_OSCORE,
            OID_SECURITY,
            OID_SERVER,
            SECURITY_RID_BOOTSTRAP,
            SECURITY_RID_OSCORE,
            SECURITY_RID_SERVER_URI,
            SECURITY_RID_SSID,
            SERVER_RID_SSID};
use crate::error::Error;
use crate::path::{Level, Path};
use crate::req::Operation;
use crate::value::Value;

/// One line of a Discover payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoverRecord {
  /// Object, Object Instance, Resource or Resource Instance path
  pub path: Path,
  /// Object version, only on the Object record
  pub version: Option<&'static str>,
  /// Number of Resource Instances, only on multi-instance Resource
  /// records (may be 0)
  pub dim: Option<u16>,
}

/// One line of a Bootstrap-Discover payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapDiscoverRecord<'a> {
  /// Object or Object Instance path
  pub path: Path,
  /// Object version, only on Object records
  pub version: Option<&'static str>,
  /// Short Server ID, on Security/Server/OSCORE instance records
  pub ssid: Option<u16>,
  /// LwM2M Server URI, on non-bootstrap Security instance records
  pub uri: Option<&'a str>,
}

impl<U> DataModel<U> {
  pub(crate) fn begin_discover(&mut self, path: Option<Path>) -> Result<(), Error> {
    let path = match path {
      | Some(p) if p.has(Level::Object) && !p.has(Level::ResourceInstance) => p,
      | _ => {
        log::error!("discover needs an object, instance or resource path");
        return Err(Error::BadRequest);
      },
    };
    let all_instances = !path.has(Level::Instance);
    let all_resources = all_instances || !path.has(Level::Resource);

    let obj_idx = match self.find_obj(path.oid().unwrap_or_default()) {
      | Some(idx) => idx,
      | None => {
        log::error!("object not found");
        return Err(Error::NotFound);
      },
    };
    self.op.cursor.obj = obj_idx;

    let mut ctx = DiscCtx { level: if all_instances {
                              Level::Object
                            } else if all_resources {
                              Level::Instance
                            } else {
                              Level::Resource
                            },
                            ..Default::default() };
    let mut count = 0;
    if all_instances {
      count += 1;
    }

    let obj = &self.objs[obj_idx];
    let mut found = all_instances;
    for (inst_idx, inst) in obj.insts.iter().enumerate() {
      if !all_instances && path.iid() != Some(inst.iid) {
        continue;
      }
      if !all_instances {
        ctx.inst_idx = inst_idx;
        found = true;
      }
      if all_resources {
        count += 1;
      }
      let mut res_found = all_resources;
      for (res_idx, res) in inst.resources.iter().enumerate() {
        if !all_resources && path.rid() != Some(res.rid) {
          continue;
        }
        if !all_resources {
          ctx.res_idx = res_idx;
          res_found = true;
        }
        count += 1;
        if res.op.multi() {
          count += res.inst_count();
        }
      }
      if !res_found {
        log::error!("resource not found");
        return Err(Error::NotFound);
      }
    }
    if !found {
      log::warn!("instance not found");
      return Err(Error::NotFound);
    }

    self.op.op_count = count;
    self.op.ctx = OpCtx::Disc(ctx);
    Ok(())
  }

  /// Pull the next Discover record.
  pub fn get_discover_record(&mut self) -> Result<Entry<DiscoverRecord>, Error> {
    self.op_guard(&[Operation::Discover])?;
    if self.op.bootstrap || self.op.op_count == 0 {
      return Err(Error::Logic);
    }
    let mut ctx = match self.op.ctx {
      | OpCtx::Disc(c) => c,
      | _ => return Err(Error::Logic),
    };

    let record = match ctx.level {
      | Level::Object => {
        let obj = &self.objs[self.op.cursor.obj];
        ctx.level = Level::Instance;
        DiscoverRecord { path: Path::object(obj.oid),
                         version: obj.version,
                         dim: None }
      },
      | Level::Instance => self.discover_inst_record(&mut ctx),
      | Level::Resource => self.discover_res_record(&mut ctx),
      | Level::ResourceInstance => self.discover_res_inst_record(&mut ctx),
    };

    self.op.ctx = OpCtx::Disc(ctx);
    self.op.op_count -= 1;
    if self.op.op_count > 0 {
      Ok(Entry::Next(record))
    } else {
      Ok(Entry::Last(record))
    }
  }

  fn discover_inst_record(&self, ctx: &mut DiscCtx) -> DiscoverRecord {
    let obj = &self.objs[self.op.cursor.obj];
    let inst = &obj.insts[ctx.inst_idx];
    if inst.resources.is_empty() {
      ctx.inst_idx += 1;
    } else {
      ctx.level = Level::Resource;
    }
    DiscoverRecord { path: Path::instance(obj.oid, inst.iid),
                     version: None,
                     dim: None }
  }

  fn discover_res_record(&self, ctx: &mut DiscCtx) -> DiscoverRecord {
    let obj = &self.objs[self.op.cursor.obj];
    let inst = &obj.insts[ctx.inst_idx];
    let res = &inst.resources[ctx.res_idx];
    let path = Path::resource(obj.oid, inst.iid, res.rid);

    let mut dim = None;
    if res.op.multi() {
      let count = res.inst_count();
      dim = Some(count as u16);
      if count > 0 {
        ctx.level = Level::ResourceInstance;
      }
    }
    if dim.map_or(true, |d| d == 0) {
      bump_res(ctx, inst.resources.len());
    }
    DiscoverRecord { path,
                     version: None,
                     dim }
  }

  fn discover_res_inst_record(&self, ctx: &mut DiscCtx) -> DiscoverRecord {
    let obj = &self.objs[self.op.cursor.obj];
    let inst = &obj.insts[ctx.inst_idx];
    let res = &inst.resources[ctx.res_idx];
    let riid = res.riids[ctx.res_inst_idx];
    let path = Path::resource_instance(obj.oid, inst.iid, res.rid, riid);

    ctx.res_inst_idx += 1;
    if ctx.res_inst_idx == res.inst_count() {
      ctx.res_inst_idx = 0;
      ctx.level = Level::Resource;
      bump_res(ctx, inst.resources.len());
    }
    DiscoverRecord { path,
                     version: None,
                     dim: None }
  }

  pub(crate) fn begin_bootstrap_discover(&mut self, path: Option<Path>) -> Result<(), Error> {
    let path = path.unwrap_or_else(Path::root);
    if path.has(Level::Instance) {
      log::error!("bootstrap discover can't target object instance");
      return Err(Error::InputArg);
    }
    let mut ctx = BootDiscCtx::default();
    let all_objects = !path.has(Level::Object);

    let mut count = 0;
    for (idx, obj) in self.objs.iter().enumerate() {
      if all_objects || path.oid() == Some(obj.oid) {
        if !all_objects {
          ctx.obj_idx = idx;
        }
        count += 1 + obj.inst_count();
      }
    }
    if !all_objects && count == 0 {
      log::error!("object not found");
      return Err(Error::NotFound);
    }
    self.op.op_count = count;
    self.op.ctx = OpCtx::BootDisc(ctx);
    Ok(())
  }

  /// Pull the next Bootstrap-Discover record, enriched with SSID/URI
  /// for Security, Server and OSCORE instances.
  pub fn get_bootstrap_discover_record<'a>(
    &mut self,
    user: &'a mut U)
    -> Result<Entry<BootstrapDiscoverRecord<'a>>, Error> {
    self.op_guard(&[Operation::Discover])?;
    if !self.op.bootstrap || self.op.op_count == 0 {
      return Err(Error::Logic);
    }
    let mut ctx = match self.op.ctx {
      | OpCtx::BootDisc(c) => c,
      | _ => return Err(Error::Logic),
    };

    let obj_idx = ctx.obj_idx;
    let obj = &self.objs[obj_idx];
    let record = if ctx.level == Level::Object {
      if obj.inst_count() > 0 {
        ctx.level = Level::Instance;
        ctx.inst_idx = 0;
      } else {
        ctx.obj_idx += 1;
      }
      BootstrapDiscoverRecord { path: Path::object(obj.oid),
                                version: obj.version,
                                ssid: None,
                                uri: None }
    } else {
      let oid = obj.oid;
      let iid = obj.insts[ctx.inst_idx].iid;
      ctx.inst_idx += 1;
      if ctx.inst_idx == obj.inst_count() {
        ctx.inst_idx = 0;
        ctx.obj_idx += 1;
        ctx.level = Level::Object;
      }
      let (ssid, uri) = self.ssid_and_uri(user, oid, iid);
      BootstrapDiscoverRecord { path: Path::instance(oid, iid),
                                version: None,
                                ssid,
                                uri }
    };

    self.op.ctx = OpCtx::BootDisc(ctx);
    self.op.op_count -= 1;
    if self.op.op_count > 0 {
      Ok(Entry::Next(record))
    } else {
      Ok(Entry::Last(record))
    }
  }

  /// SSID and URI enrichment per instance:
  /// - Security: nothing for the bootstrap server, else its SSID + URI
  /// - Server: its SSID
  /// - OSCORE: the SSID of the non-bootstrap Security instance whose
  ///   resource 17 links here
  fn ssid_and_uri<'a>(&self,
                      user: &'a mut U,
                      oid: u16,
                      iid: u16)
                      -> (Option<u16>, Option<&'a str>) {
    match oid {
      | OID_SECURITY => {
        let ssid = self.security_ssid(&mut *user, iid);
        if ssid.is_none() {
          return (None, None);
        }
        let uri =
          self.res_read(user, &Path::resource(OID_SECURITY, iid, SECURITY_RID_SERVER_URI))
              .ok()
              .and_then(|v| v.as_str().ok());
        (ssid, uri)
      },
      | OID_SERVER => {
        let ssid = self.res_read(user, &Path::resource(OID_SERVER, iid, SERVER_RID_SSID))
                       .ok()
                       .and_then(as_id);
        (ssid, None)
      },
      | OID_OSCORE => (self.oscore_ssid(user, iid), None),
      | _ => (None, None),
    }
  }

  /// The SSID of a Security instance, `None` when it is the bootstrap
  /// server (or unreadable).
  fn security_ssid(&self, user: &mut U, iid: u16) -> Option<u16> {
    let bootstrap =
      self.res_read(&mut *user, &Path::resource(OID_SECURITY, iid, SECURITY_RID_BOOTSTRAP))
          .and_then(|v| v.as_bool())
          .unwrap_or(true);
    if bootstrap {
      return None;
    }
    self.res_read(user, &Path::resource(OID_SECURITY, iid, SECURITY_RID_SSID))
        .ok()
        .and_then(as_id)
  }

  fn oscore_ssid(&self, user: &mut U, oscore_iid: u16) -> Option<u16> {
    let sec_idx = self.find_obj(OID_SECURITY)?;
    for inst_idx in 0..self.objs[sec_idx].inst_count() {
      let siid = self.objs[sec_idx].insts[inst_idx].iid;
      let linked =
        self.res_read(&mut *user,
                      &Path::resource(OID_SECURITY, siid, SECURITY_RID_OSCORE))
            .and_then(|v| v.as_objlnk())
            .map_or(false, |l| l.iid == oscore_iid);
      if linked {
        return self.security_ssid(user, siid);
      }
    }
    None
  }
}

fn as_id(v: Value<'_>) -> Option<u16> {
  match v {
    | Value::Int(n) => Some(n as u16),
    | Value::Uint(n) => Some(n as u16),
    | _ => None,
  }
}

fn bump_res(ctx: &mut DiscCtx, res_count: usize) {
  ctx.res_idx += 1;
  if ctx.res_idx == res_count {
    ctx.res_idx = 0;
    ctx.inst_idx += 1;
    ctx.level = Level::Instance;
  }
}
