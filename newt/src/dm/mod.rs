use core::fmt;

use tinyvec::ArrayVec;

use crate::config::{INVALID_ID,
                    MAX_CHANGE_EVENTS,
                    MAX_OBJECTS,
                    MAX_OBJ_INSTANCES,
                    MAX_RESOURCES,
                    MAX_RES_INSTANCES};
use crate::error::Error;
use crate::path::{Level, Path};
use crate::req::Operation;
use crate::value::{ResType, Value};

mod create;
mod delete;
mod discover;
mod execute;
mod read;
mod register;
mod write;

pub use discover::{BootstrapDiscoverRecord, DiscoverRecord};
#[cfg(feature = "composite")]
pub use read::NextPath;
pub(crate) use read::{readable_from_inst, readable_from_obj, readable_from_res};
pub use register::RegisterRecord;

/// Object id of the LwM2M Security object.
pub const OID_SECURITY: u16 = 0;
/// Object id of the LwM2M Server object.
pub const OID_SERVER: u16 = 1;
/// Object id of the Access Control object.
pub const OID_ACCESS_CONTROL: u16 = 2;
/// Object id of the Device object.
pub const OID_DEVICE: u16 = 3;
/// Object id of the OSCORE object.
pub const OID_OSCORE: u16 = 21;

/// Resource id of the Bootstrap-Server flag within a Security instance.
pub(crate) const SECURITY_RID_BOOTSTRAP: u16 = 1;
/// Resource id of the Server URI within a Security instance.
pub(crate) const SECURITY_RID_SERVER_URI: u16 = 0;
/// Resource id of the Short Server ID within a Security instance.
pub(crate) const SECURITY_RID_SSID: u16 = 10;
/// Resource id of the OSCORE object link within a Security instance.
pub(crate) const SECURITY_RID_OSCORE: u16 = 17;
/// Resource id of the Short Server ID within a Server instance.
pub(crate) const SERVER_RID_SSID: u16 = 0;

/// What a Resource permits, `R`/`W`/`RW`/`E` with an `M` suffix on the
/// multi-instance variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResOp {
  /// Readable
  #[default]
  R,
  /// Writable
  W,
  /// Readable and writable
  RW,
  /// Executable
  E,
  /// Readable, multi-instance
  RM,
  /// Writable, multi-instance
  WM,
  /// Readable and writable, multi-instance
  RWM,
}

impl ResOp {
  /// Can Read reach this resource?
  pub fn readable(&self) -> bool {
    matches!(self, ResOp::R | ResOp::RM | ResOp::RW | ResOp::RWM)
  }

  /// Can Write reach this resource? Bootstrap writes reach anything
  /// that is not Execute.
  pub fn writable(&self, bootstrap: bool) -> bool {
    matches!(self, ResOp::W | ResOp::RW | ResOp::WM | ResOp::RWM)
    || (bootstrap && !matches!(self, ResOp::E))
  }

  /// Does this resource hold Resource Instances?
  pub fn multi(&self) -> bool {
    matches!(self, ResOp::RM | ResOp::WM | ResOp::RWM)
  }
}

/// A Resource slot: id, operation tag, type and (for multi-instance
/// resources) the sorted Resource Instance id table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Res {
  pub(crate) rid: u16,
  pub(crate) op: ResOp,
  pub(crate) ty: Option<ResType>,
  pub(crate) max_inst_count: u16,
  pub(crate) riids: ArrayVec<[u16; MAX_RES_INSTANCES]>,
}

impl Default for Res {
  fn default() -> Self {
    Res { rid: INVALID_ID,
          op: ResOp::R,
          ty: None,
          max_inst_count: 0,
          riids: Default::default() }
  }
}

impl Res {
  /// A single-instance resource.
  pub fn new(rid: u16, op: ResOp, ty: ResType) -> Self {
    Res { rid,
          op,
          ty: Some(ty),
          ..Default::default() }
  }

  /// A multi-instance resource holding at most `max_inst_count`
  /// Resource Instances; `op` must be one of the `*M` tags.
  pub fn multi(rid: u16, op: ResOp, ty: ResType, max_inst_count: u16) -> Self {
    Res { rid,
          op,
          ty: Some(ty),
          max_inst_count,
          ..Default::default() }
  }

  /// An Execute resource. Execute resources carry no type.
  pub fn exec(rid: u16) -> Self {
    Res { rid,
          op: ResOp::E,
          ..Default::default() }
  }

  /// Seed initial Resource Instance ids (must be strictly ascending).
  pub fn with_insts(mut self, riids: &[u16]) -> Self {
    self.riids = riids.iter().copied().collect();
    self
  }

  /// Resource id.
  pub fn rid(&self) -> u16 {
    self.rid
  }

  /// Operation tag.
  pub fn op(&self) -> ResOp {
    self.op
  }

  /// Declared type, `None` for Execute resources.
  pub fn ty(&self) -> Option<ResType> {
    self.ty
  }

  /// Live Resource Instance ids, ascending.
  pub fn insts(&self) -> &[u16] {
    self.riids.as_slice()
  }

  pub(crate) fn inst_count(&self) -> usize {
    self.riids.len()
  }

  pub(crate) fn has_inst(&self, riid: u16) -> bool {
    self.riids.iter().any(|&r| r == riid)
  }

  pub(crate) fn insert_inst(&mut self, riid: u16) -> Result<(), Error> {
    if self.riids.len() >= self.max_inst_count as usize
       || self.riids.len() == MAX_RES_INSTANCES
    {
      return Err(Error::Memory);
    }
    let at = self.riids
                 .iter()
                 .position(|&r| r > riid)
                 .unwrap_or(self.riids.len());
    self.riids.insert(at, riid);
    Ok(())
  }

  pub(crate) fn remove_inst(&mut self, riid: u16) {
    if let Some(at) = self.riids.iter().position(|&r| r == riid) {
      self.riids.remove(at);
    }
  }
}

/// An Object Instance slot: the IID plus this instance's resource table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inst {
  pub(crate) iid: u16,
  pub(crate) resources: ArrayVec<[Res; MAX_RESOURCES]>,
}

impl Default for Inst {
  fn default() -> Self {
    Inst { iid: INVALID_ID,
           resources: Default::default() }
  }
}

impl Inst {
  /// Object Instance id.
  pub fn iid(&self) -> u16 {
    self.iid
  }

  /// This instance's resources, ascending by RID.
  pub fn resources(&self) -> &[Res] {
    self.resources.as_slice()
  }

  /// The resource with id `rid`, if present.
  pub fn res(&self, rid: u16) -> Option<&Res> {
    self.resources.iter().find(|r| r.rid == rid)
  }

  pub(crate) fn res_idx(&self, rid: u16) -> Option<usize> {
    self.resources.iter().position(|r| r.rid == rid)
  }
}

/// Handler invoked when an Object Instance is created, deleted or reset;
/// receives `(user, oid, iid)`.
pub type InstHandler<U> = fn(&mut U, u16, u16) -> Result<(), Error>;

/// Handler producing the value of a Resource (Instance); receives the
/// full Resource or Resource Instance path.
pub type ResReadHandler<U> = for<'a> fn(&'a mut U, &Path) -> Result<Value<'a>, Error>;

/// Handler applying a value to a Resource (Instance).
pub type ResWriteHandler<U> = fn(&mut U, &Path, &Value<'_>) -> Result<(), Error>;

/// Handler running an Execute resource with its (possibly empty)
/// argument.
pub type ResExecuteHandler<U> = fn(&mut U, &Path, &[u8]) -> Result<(), Error>;

/// Handler invoked when a Resource Instance is created or deleted;
/// receives the full Resource Instance path.
pub type ResInstHandler<U> = fn(&mut U, &Path) -> Result<(), Error>;

/// Transaction begin/validate handler; receives `(user, oid)`.
pub type TransactionHandler<U> = fn(&mut U, u16) -> Result<(), Error>;

/// Transaction end handler; receives `(user, oid, result)` and cannot
/// fail.
pub type TransactionEndHandler<U> = fn(&mut U, u16, Result<(), Error>);

/// The handler table registered with an [`Obj`].
///
/// All entries are optional, but the structural validator requires
/// `res_read`/`res_write`/`res_execute` whenever a resource's operation
/// tag implies them.
///
/// Handlers receive the host context `U`. An adapter that lives inside
/// a larger host struct reaches itself through a locator trait bound on
/// `U` (see the `newt-obj` adapters), so every entry stays a plain
/// `fn` pointer.
pub struct Handlers<U> {
  /// Create an Object Instance
  pub inst_create: Option<InstHandler<U>>,
  /// Delete an Object Instance
  pub inst_delete: Option<InstHandler<U>>,
  /// Reset an Object Instance to defaults (Write-Replace on an instance)
  pub inst_reset: Option<InstHandler<U>>,
  /// Read one Resource (Instance) value
  pub res_read: Option<ResReadHandler<U>>,
  /// Write one Resource (Instance) value
  pub res_write: Option<ResWriteHandler<U>>,
  /// Execute a resource
  pub res_execute: Option<ResExecuteHandler<U>>,
  /// Create a Resource Instance
  pub res_inst_create: Option<ResInstHandler<U>>,
  /// Delete a Resource Instance
  pub res_inst_delete: Option<ResInstHandler<U>>,
  /// Called once per Object per mutating operation, before any mutation
  pub transaction_begin: Option<TransactionHandler<U>>,
  /// Called for every touched Object when the operation ends, while the
  /// result is still OK
  pub transaction_validate: Option<TransactionHandler<U>>,
  /// Called for every touched Object when the operation ends, always
  pub transaction_end: Option<TransactionEndHandler<U>>,
}

impl<U> Default for Handlers<U> {
  fn default() -> Self {
    Handlers { inst_create: None,
               inst_delete: None,
               inst_reset: None,
               res_read: None,
               res_write: None,
               res_execute: None,
               res_inst_create: None,
               res_inst_delete: None,
               transaction_begin: None,
               transaction_validate: None,
               transaction_end: None }
  }
}

impl<U> Copy for Handlers<U> {}
impl<U> Clone for Handlers<U> {
  fn clone(&self) -> Self {
    *self
  }
}

impl<U> fmt::Debug for Handlers<U> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Handlers").finish_non_exhaustive()
  }
}

/// An Object descriptor: id, optional version, instance cap, the sorted
/// instance table and the handler table.
///
/// Built with the fluent constructors and handed to
/// [`DataModel::add_obj`]:
///
/// ```
/// use newt::dm::{Handlers, Obj, Res, ResOp};
/// use newt::value::ResType;
/// use newt::{Error, Path, Value};
///
/// struct Nothing;
///
/// fn res_read<'a>(_: &'a mut Nothing, _: &Path) -> Result<Value<'a>, Error> {
///   Ok(Value::Int(0))
/// }
///
/// let obj: Obj<Nothing> =
///   Obj::new(44).version("1.1")
///               .max_instances(4)
///               .resources(&[Res::new(0, ResOp::R, ResType::Int)])
///               .handlers(Handlers { res_read: Some(res_read),
///                                    ..Default::default() })
///               .instance(0);
/// assert_eq!(obj.oid(), 44);
/// ```
pub struct Obj<U> {
  pub(crate) oid: u16,
  pub(crate) version: Option<&'static str>,
  pub(crate) max_inst_count: u16,
  pub(crate) insts: ArrayVec<[Inst; MAX_OBJ_INSTANCES]>,
  pub(crate) layout: ArrayVec<[Res; MAX_RESOURCES]>,
  pub(crate) handlers: Handlers<U>,
  pub(crate) in_transaction: bool,
}

impl<U> Copy for Obj<U> {}
impl<U> Clone for Obj<U> {
  fn clone(&self) -> Self {
    *self
  }
}

impl<U> Default for Obj<U> {
  fn default() -> Self {
    Obj { oid: INVALID_ID,
          version: None,
          max_inst_count: MAX_OBJ_INSTANCES as u16,
          insts: Default::default(),
          layout: Default::default(),
          handlers: Default::default(),
          in_transaction: false }
  }
}

impl<U> fmt::Debug for Obj<U> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Obj")
     .field("oid", &self.oid)
     .field("version", &self.version)
     .field("insts", &self.insts)
     .finish_non_exhaustive()
  }
}

impl<U> Obj<U> {
  /// Start describing the Object with id `oid`.
  pub fn new(oid: u16) -> Self {
    Obj { oid,
          ..Default::default() }
  }

  /// Attach a version string reported in Register and Discover
  /// payloads, e.g. `"1.2"`.
  pub fn version(mut self, version: &'static str) -> Self {
    self.version = Some(version);
    self
  }

  /// Cap the number of Object Instances (defaults to, and is bounded
  /// by, the compile-time table size).
  pub fn max_instances(mut self, n: u16) -> Self {
    self.max_inst_count = n.min(MAX_OBJ_INSTANCES as u16);
    self
  }

  /// The resource layout stamped onto every instance of this Object
  /// (must be strictly ascending by RID).
  pub fn resources(mut self, resources: &[Res]) -> Self {
    self.layout = resources.iter().copied().collect();
    self
  }

  /// The handler table.
  pub fn handlers(mut self, handlers: Handlers<U>) -> Self {
    self.handlers = handlers;
    self
  }

  /// Seed an instance that exists from the moment the Object is
  /// registered.
  pub fn instance(mut self, iid: u16) -> Self {
    let layout = self.layout;
    self.push_inst(Inst { iid,
                          resources: layout });
    self
  }

  /// Seed an instance whose resource set differs from the Object's
  /// default layout.
  pub fn instance_with(mut self, iid: u16, resources: &[Res]) -> Self {
    self.push_inst(Inst { iid,
                          resources: resources.iter().copied().collect() });
    self
  }

  fn push_inst(&mut self, inst: Inst) {
    let at = self.insts
                 .iter()
                 .position(|i| i.iid > inst.iid)
                 .unwrap_or(self.insts.len());
    self.insts.insert(at, inst);
  }

  /// Object id.
  pub fn oid(&self) -> u16 {
    self.oid
  }

  /// Live instances, ascending by IID.
  pub fn instances(&self) -> &[Inst] {
    self.insts.as_slice()
  }

  /// The instance with id `iid`, if present.
  pub fn inst(&self, iid: u16) -> Option<&Inst> {
    self.insts.iter().find(|i| i.iid == iid)
  }

  pub(crate) fn inst_idx(&self, iid: u16) -> Option<usize> {
    self.insts.iter().position(|i| i.iid == iid)
  }

  pub(crate) fn inst_count(&self) -> usize {
    self.insts.len()
  }

  /// Check the structural invariants of this descriptor: ascending ids,
  /// types on non-Execute resources, handlers present for the operation
  /// tags in use.
  ///
  /// [`DataModel::add_obj`] runs this in debug builds.
  pub fn validate(&self) -> Result<(), Error> {
    if self.insts.len() > self.max_inst_count as usize {
      return Err(Error::InputArg);
    }
    for inst in self.insts.iter() {
      if inst.iid == INVALID_ID {
        return Err(Error::InputArg);
      }
    }
    if !strictly_ascending(self.insts.iter().map(|i| i.iid)) {
      return Err(Error::InputArg);
    }
    for resources in core::iter::once(&self.layout).chain(self.insts
                                                              .iter()
                                                              .map(|i| &i.resources))
    {
      if !strictly_ascending(resources.iter().map(|r| r.rid)) {
        return Err(Error::InputArg);
      }
      for res in resources.iter() {
        self.validate_res(res)?;
      }
    }
    Ok(())
  }

  fn validate_res(&self, res: &Res) -> Result<(), Error> {
    if res.rid == INVALID_ID {
      return Err(Error::InputArg);
    }
    match res.op {
      | ResOp::E if res.ty.is_some() || self.handlers.res_execute.is_none() => {
        return Err(Error::InputArg);
      },
      | ResOp::E => (),
      | op => {
        if res.ty.is_none()
           || (op.readable() && self.handlers.res_read.is_none())
           || (op.writable(false) && self.handlers.res_write.is_none())
        {
          return Err(Error::InputArg);
        }
      },
    }
    if res.op.multi() {
      if !strictly_ascending(res.riids.iter().copied()) {
        return Err(Error::InputArg);
      }
      if res.riids.len() > res.max_inst_count as usize {
        return Err(Error::InputArg);
      }
    } else if !res.riids.is_empty() || res.max_inst_count != 0 {
      return Err(Error::InputArg);
    }
    Ok(())
  }
}

fn strictly_ascending(ids: impl Iterator<Item = u16>) -> bool {
  let mut prev: Option<u16> = None;
  for id in ids {
    if id == INVALID_ID {
      return false;
    }
    match prev {
      | Some(p) if id <= p => return false,
      | _ => prev = Some(id),
    }
  }
  true
}

/// What happened to the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangeKind {
  /// An entity appeared
  Added,
  /// An entity disappeared
  Deleted,
  /// A resource value changed
  #[default]
  ValueChanged,
}

/// One buffered data-model change, consumed by the observation
/// subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeEvent {
  /// Path of the affected entity
  pub path: Path,
  /// What happened to it
  pub kind: ChangeKind,
  /// SSID of the server whose request caused the change, 0 for local
  /// mutations
  pub ssid: u16,
}

/// One record pulled out of an iterating operation, flagged when it is
/// the final one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry<T> {
  /// More records follow
  Next(T),
  /// The final record
  Last(T),
}

impl<T> Entry<T> {
  /// The record, discarding the last-flag.
  pub fn record(self) -> T {
    match self {
      | Entry::Next(t) | Entry::Last(t) => t,
    }
  }

  /// Was this the final record?
  pub fn is_last(&self) -> bool {
    matches!(self, Entry::Last(_))
  }
}

/// Index form of a located `(Object, Instance, Resource, RIID)` tuple.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Cursor {
  pub(crate) obj: usize,
  pub(crate) inst: Option<usize>,
  pub(crate) res: Option<usize>,
  pub(crate) riid: Option<u16>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ReadCtx {
  pub(crate) base_level: Level,
  pub(crate) total: usize,
  pub(crate) inst_idx: usize,
  pub(crate) res_idx: usize,
  pub(crate) res_inst_idx: usize,
  /// current composite sub-path
  pub(crate) path: Path,
  /// table index used to walk all objects for a composite root path
  pub(crate) composite_obj_idx: usize,
}

impl Default for ReadCtx {
  fn default() -> Self {
    ReadCtx { base_level: Level::Object,
              total: 0,
              inst_idx: 0,
              res_idx: 0,
              res_inst_idx: 0,
              path: Path::root(),
              composite_obj_idx: 0 }
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct WriteCtx {
  pub(crate) path: Path,
  pub(crate) instance_created: bool,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RegCtx {
  pub(crate) level: Level,
  pub(crate) obj_idx: usize,
  pub(crate) inst_idx: usize,
}

impl Default for RegCtx {
  fn default() -> Self {
    RegCtx { level: Level::Object,
             obj_idx: 0,
             inst_idx: 0 }
  }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct DiscCtx {
  pub(crate) level: Level,
  pub(crate) inst_idx: usize,
  pub(crate) res_idx: usize,
  pub(crate) res_inst_idx: usize,
}

impl Default for DiscCtx {
  fn default() -> Self {
    DiscCtx { level: Level::Object,
              inst_idx: 0,
              res_idx: 0,
              res_inst_idx: 0 }
  }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct BootDiscCtx {
  pub(crate) level: Level,
  pub(crate) obj_idx: usize,
  pub(crate) inst_idx: usize,
}

impl Default for BootDiscCtx {
  fn default() -> Self {
    BootDiscCtx { level: Level::Object,
                  obj_idx: 0,
                  inst_idx: 0 }
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) enum OpCtx {
  #[default]
  None,
  Read(ReadCtx),
  Write(WriteCtx),
  Reg(RegCtx),
  Disc(DiscCtx),
  BootDisc(BootDiscCtx),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct OpState {
  pub(crate) in_progress: bool,
  pub(crate) operation: Operation,
  pub(crate) bootstrap: bool,
  pub(crate) transactional: bool,
  pub(crate) result: Result<(), Error>,
  pub(crate) op_count: usize,
  pub(crate) ssid: u16,
  pub(crate) cursor: Cursor,
  pub(crate) ctx: OpCtx,
}

impl Default for OpState {
  fn default() -> Self {
    OpState { in_progress: false,
              operation: Operation::Read,
              bootstrap: false,
              transactional: false,
              result: Ok(()),
              op_count: 0,
              ssid: 0,
              cursor: Default::default(),
              ctx: Default::default() }
  }
}

/// The data model engine: the Object registry plus the state of the one
/// in-flight protocol operation.
///
/// `U` is the host context handed to every handler; the engine itself
/// never stores user data, only the shape index (which Objects,
/// Instances, Resources and Resource Instances exist).
///
/// Exactly one operation is active at a time:
///
/// ```
/// use newt::dm::{DataModel, Handlers, Obj, Res, ResOp};
/// use newt::value::{ResType, Value};
/// use newt::{Error, Operation, Path};
///
/// struct Counter(i64);
///
/// fn res_read<'a>(c: &'a mut Counter, _: &Path) -> Result<Value<'a>, Error> {
///   Ok(Value::Int(c.0))
/// }
///
/// let mut dm = DataModel::<Counter>::new();
/// let mut user = Counter(42);
///
/// dm.add_obj(Obj::new(7).resources(&[Res::new(0, ResOp::R, ResType::Int)])
///                       .handlers(Handlers { res_read: Some(res_read),
///                                            ..Default::default() })
///                       .instance(0))
///   .unwrap();
///
/// dm.operation_begin(&mut user, Operation::Read, false, Some(Path::object(7)), 1)
///   .unwrap();
/// assert_eq!(dm.get_readable_res_count().unwrap(), 1);
/// let entry = dm.get_read_entry(&mut user).unwrap();
/// assert!(entry.is_last());
/// assert_eq!(entry.record().value.as_i64().unwrap(), 42);
/// dm.operation_end(&mut user).unwrap();
/// ```
pub struct DataModel<U> {
  pub(crate) objs: ArrayVec<[Obj<U>; MAX_OBJECTS]>,
  pub(crate) op: OpState,
  pub(crate) events: ArrayVec<[ChangeEvent; MAX_CHANGE_EVENTS]>,
}

impl<U> Default for DataModel<U> {
  fn default() -> Self {
    DataModel { objs: Default::default(),
                op: Default::default(),
                events: Default::default() }
  }
}

impl<U> fmt::Debug for DataModel<U> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DataModel")
     .field("objs", &self.objs)
     .field("op", &self.op)
     .finish_non_exhaustive()
  }
}

impl<U> DataModel<U> {
  /// An empty data model.
  pub fn new() -> Self {
    Default::default()
  }

  /// Register an Object.
  ///
  /// Fails with [`Error::Logic`] while an operation is in progress or
  /// when the OID is already registered, and with [`Error::Memory`]
  /// when the Object table is full. Emits an `Added` change event.
  pub fn add_obj(&mut self, obj: Obj<U>) -> Result<(), Error> {
    if self.op.in_progress {
      return Err(Error::Logic);
    }
    #[cfg(debug_assertions)]
    obj.validate()?;

    if self.objs.len() == MAX_OBJECTS {
      log::error!("no space for object /{}", obj.oid);
      return Err(Error::Memory);
    }
    let mut at = self.objs.len();
    for (idx, existing) in self.objs.iter().enumerate() {
      if existing.oid == obj.oid {
        log::error!("object /{} exists", obj.oid);
        return Err(Error::Logic);
      }
      if existing.oid > obj.oid {
        at = idx;
        break;
      }
    }
    let oid = obj.oid;
    self.objs.insert(at, obj);
    self.push_event(Path::object(oid), ChangeKind::Added, 0);
    Ok(())
  }

  /// Deregister the Object with id `oid`. Emits a `Deleted` change
  /// event.
  pub fn remove_obj(&mut self, oid: u16) -> Result<(), Error> {
    if self.op.in_progress {
      return Err(Error::Logic);
    }
    match self.find_obj(oid) {
      | Some(idx) => {
        self.objs.remove(idx);
        self.push_event(Path::object(oid), ChangeKind::Deleted, 0);
        Ok(())
      },
      | None => {
        log::error!("object /{} not found", oid);
        Err(Error::NotFound)
      },
    }
  }

  /// The registered Object with id `oid`, if any.
  pub fn obj(&self, oid: u16) -> Option<&Obj<U>> {
    self.find_obj(oid).map(|idx| &self.objs[idx])
  }

  /// Registered Object ids, ascending.
  pub fn oids(&self) -> impl Iterator<Item = u16> + '_ {
    self.objs.iter().map(|o| o.oid)
  }

  /// Drain the buffered change events.
  ///
  /// The engine only queues; it never calls into the observation table
  /// itself. Hosts must drain this after every operation and feed each
  /// event to
  /// [`Observations::data_model_changed`](crate::observe::Observations::data_model_changed),
  /// or value changes and deletions never reach the observations:
  ///
  /// ```ignore
  /// dm.operation_end(&mut user)?;
  /// for ev in dm.take_events() {
  ///   observations.data_model_changed(&ev.path, ev.kind, ev.ssid);
  /// }
  /// ```
  pub fn take_events(&mut self) -> ArrayVec<[ChangeEvent; MAX_CHANGE_EVENTS]> {
    core::mem::take(&mut self.events)
  }

  /// Begin a protocol operation.
  ///
  /// `path` is the request path where the operation has one (Register
  /// and Read-Composite do not). `ssid` identifies the requesting
  /// server and is echoed in change events.
  ///
  /// Fails with [`Error::Logic`] if another operation is already in
  /// progress. Any error from here on is latched: subsequent calls
  /// short-circuit with it, and [`operation_end`](Self::operation_end)
  /// must still be invoked to unwind transactions.
  pub fn operation_begin(&mut self,
                         user: &mut U,
                         operation: Operation,
                         bootstrap: bool,
                         path: Option<Path>,
                         ssid: u16)
                         -> Result<(), Error> {
    if self.op.in_progress {
      return Err(Error::Logic);
    }
    self.op = OpState { in_progress: true,
                        operation,
                        bootstrap,
                        ssid,
                        ..Default::default() };

    let r = match operation {
      | Operation::Register | Operation::Update => self.begin_register(),
      | Operation::Read => self.begin_read(path),
      #[cfg(feature = "composite")]
      | Operation::ReadComposite => self.begin_read_composite(),
      #[cfg(not(feature = "composite"))]
      | Operation::ReadComposite => Err(Error::NotImplemented),
      | Operation::Discover if bootstrap => self.begin_bootstrap_discover(path),
      | Operation::Discover => self.begin_discover(path),
      | Operation::Execute => self.begin_execute(path),
      | Operation::WriteReplace | Operation::WritePartialUpdate => {
        self.begin_write(user, path)
      },
      | Operation::WriteComposite => {
        log::error!("composite write not supported");
        Err(Error::NotImplemented)
      },
      | Operation::Create => self.begin_create(user, path),
      | Operation::Delete => self.begin_delete(user, path),
      | _ => {
        log::error!("incorrect operation type");
        Err(Error::InputArg)
      },
    };
    self.latch(r)
  }

  /// Finish the in-flight operation: run the validate and end passes of
  /// every touched Object's transaction (in table order) and return the
  /// operation's first error, if any.
  ///
  /// Must be called exactly once per `operation_begin`, including on
  /// the error path.
  pub fn operation_end(&mut self, user: &mut U) -> Result<(), Error> {
    if !self.op.in_progress {
      return Err(Error::Logic);
    }
    if self.op.transactional {
      for idx in 0..self.objs.len() {
        if self.op.result.is_err() {
          break;
        }
        if !self.objs[idx].in_transaction {
          continue;
        }
        if let Some(validate) = self.objs[idx].handlers.transaction_validate {
          let oid = self.objs[idx].oid;
          self.op.result = validate(user, oid);
        }
      }
      for idx in 0..self.objs.len() {
        if self.objs[idx].in_transaction {
          if let Some(end) = self.objs[idx].handlers.transaction_end {
            let oid = self.objs[idx].oid;
            end(user, oid, self.op.result);
          }
          self.objs[idx].in_transaction = false;
        }
      }
    }
    self.op.in_progress = false;
    self.op.result
  }

  /// Read one Resource (Instance) value outside of any operation.
  ///
  /// The path must name a resource; multi-instance resources must be
  /// addressed down to the RIID.
  pub fn res_read<'a>(&self, user: &'a mut U, path: &Path) -> Result<Value<'a>, Error> {
    if !path.has(Level::Resource) {
      log::error!("incorrect path {}", path);
      return Err(Error::BadRequest);
    }
    let cursor = self.locate(path)?;
    let res = self.res_at(&cursor);
    if !res.op.readable() {
      log::error!("resource is not readable");
      return Err(Error::MethodNotAllowed);
    }
    if res.op.multi() != path.has(Level::ResourceInstance) {
      log::error!("resource is multi-instance, provide path with RIID");
      return Err(Error::BadRequest);
    }
    self.call_res_read(user, &cursor, path)
  }

  /// The declared type of the resource named by `path` (the RIID, if
  /// any, is ignored: the Resource Instance need not exist yet).
  ///
  /// Execute resources have no type and yield [`Error::BadRequest`].
  pub fn resource_type(&self, path: &Path) -> Result<ResType, Error> {
    let res_path = if path.has(Level::ResourceInstance) {
      path.parent()
    } else {
      *path
    };
    if !res_path.has(Level::Resource) {
      return Err(Error::BadRequest);
    }
    let cursor = self.locate(&res_path)?;
    self.res_at(&cursor).ty.ok_or(Error::BadRequest)
  }

  pub(crate) fn find_obj(&self, oid: u16) -> Option<usize> {
    self.objs.iter().position(|o| o.oid == oid)
  }

  /// Walk `path` down from the Object level, yielding table indices.
  /// A present RIID must exist and the resource must be
  /// multi-instance.
  pub(crate) fn locate(&self, path: &Path) -> Result<Cursor, Error> {
    let oid = path.oid().ok_or(Error::InputArg)?;
    match self.find_obj(oid) {
      | Some(obj_idx) => self.locate_in_obj(obj_idx, path),
      | None => {
        log::error!("object not found");
        Err(Error::NotFound)
      },
    }
  }

  /// [`locate`](Self::locate) below an already-found Object.
  pub(crate) fn locate_in_obj(&self, obj_idx: usize, path: &Path) -> Result<Cursor, Error> {
    let obj = &self.objs[obj_idx];
    let mut cursor = Cursor { obj: obj_idx,
                              ..Default::default() };

    let iid = match path.iid() {
      | Some(iid) => iid,
      | None => return Ok(cursor),
    };
    cursor.inst = match obj.inst_idx(iid) {
      | Some(idx) => Some(idx),
      | None => {
        log::warn!("instance not found");
        return Err(Error::NotFound);
      },
    };

    let rid = match path.rid() {
      | Some(rid) => rid,
      | None => return Ok(cursor),
    };
    let inst = &obj.insts[cursor.inst.unwrap_or_default()];
    cursor.res = match inst.res_idx(rid) {
      | Some(idx) => Some(idx),
      | None => {
        log::error!("resource not found");
        return Err(Error::NotFound);
      },
    };

    let riid = match path.riid() {
      | Some(riid) => riid,
      | None => return Ok(cursor),
    };
    let res = &inst.resources[cursor.res.unwrap_or_default()];
    if !res.op.multi() {
      log::error!("resource is not multi-instance");
      return Err(Error::NotFound);
    }
    if !res.has_inst(riid) {
      log::warn!("resource instance not found");
      return Err(Error::NotFound);
    }
    cursor.riid = Some(riid);
    Ok(cursor)
  }

  pub(crate) fn res_at(&self, cursor: &Cursor) -> &Res {
    let inst = &self.objs[cursor.obj].insts[cursor.inst.unwrap_or_default()];
    &inst.resources[cursor.res.unwrap_or_default()]
  }

  pub(crate) fn res_at_mut(&mut self, cursor: &Cursor) -> &mut Res {
    let inst = &mut self.objs[cursor.obj].insts[cursor.inst.unwrap_or_default()];
    &mut inst.resources[cursor.res.unwrap_or_default()]
  }

  pub(crate) fn cursor_path(&self, cursor: &Cursor) -> Path {
    let obj = &self.objs[cursor.obj];
    let inst = &obj.insts[cursor.inst.unwrap_or_default()];
    let res = &inst.resources[cursor.res.unwrap_or_default()];
    match cursor.riid {
      | Some(riid) => Path::resource_instance(obj.oid, inst.iid, res.rid, riid),
      | None => Path::resource(obj.oid, inst.iid, res.rid),
    }
  }

  /// Invoke `res_read` for the resource under `cursor`, addressed as
  /// `path`.
  pub(crate) fn call_res_read<'a>(&self,
                                  user: &'a mut U,
                                  cursor: &Cursor,
                                  path: &Path)
                                  -> Result<Value<'a>, Error> {
    let handler = self.objs[cursor.obj].handlers
                                       .res_read
                                       .ok_or(Error::MethodNotAllowed)?;
    handler(user, path)
  }

  /// Find `oid` and open its transaction if not yet open.
  pub(crate) fn obj_transaction_begin(&mut self,
                                      user: &mut U,
                                      oid: u16)
                                      -> Result<usize, Error> {
    let idx = match self.find_obj(oid) {
      | Some(idx) => idx,
      | None => {
        log::error!("object /{} not found in data model", oid);
        return Err(Error::NotFound);
      },
    };
    self.transaction_begin_at(user, idx)?;
    Ok(idx)
  }

  pub(crate) fn transaction_begin_at(&mut self,
                                     user: &mut U,
                                     idx: usize)
                                     -> Result<(), Error> {
    if self.objs[idx].in_transaction {
      return Ok(());
    }
    self.objs[idx].in_transaction = true;
    match self.objs[idx].handlers.transaction_begin {
      | Some(begin) => begin(user, self.objs[idx].oid),
      | None => Ok(()),
    }
  }

  /// Latch the first error of the operation; short-circuit later steps.
  pub(crate) fn latch<T>(&mut self, r: Result<T, Error>) -> Result<T, Error> {
    if let Err(e) = &r {
      if self.op.result.is_ok() {
        self.op.result = Err(*e);
      }
    }
    r
  }

  /// Bail out early if a previous step of this operation failed.
  pub(crate) fn op_guard(&self, operations: &[Operation]) -> Result<(), Error> {
    if !self.op.in_progress || !operations.contains(&self.op.operation) {
      return Err(Error::Logic);
    }
    self.op.result
  }

  pub(crate) fn push_event(&mut self, path: Path, kind: ChangeKind, ssid: u16) {
    let ev = ChangeEvent { path, kind, ssid };
    if self.events.try_push(ev).is_some() {
      log::error!("change event queue full, {} dropped", path);
    }
  }

  /// Record a change caused by the in-flight operation. Bootstrap
  /// operations stay silent.
  pub(crate) fn op_event(&mut self, path: Path, kind: ChangeKind) {
    if self.op.bootstrap {
      return;
    }
    let ssid = self.op.ssid;
    self.push_event(path, kind, ssid);
  }
}
