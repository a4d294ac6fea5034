use core::fmt;

use toad_msg::{Code, ContentFormat, Token};

use crate::config::{MAX_OBSERVATIONS, MAX_WRITE_ATTRIBUTES};
use crate::dm::{ChangeKind, DataModel};
use crate::error::{code, Error};
use crate::path::{Level, Path};
use crate::req::{Operation, Request};
use crate::time::Millis;

mod attr;
mod notify;

pub use attr::{Attributes, ServerState};
pub use notify::BuiltMsg;

use attr::AttrEntry;
use notify::Snapshot;

/// One tracked observation.
///
/// A slot with `ssid == 0` is free. Records are keyed by
/// `(ssid, token)`; Observe-Composite links the records sharing one
/// token into a circular list through `prev`.
#[derive(Debug, Clone, Copy)]
pub struct Observation {
  pub(crate) ssid: u16,
  pub(crate) token: Token,
  pub(crate) path: Path,
  pub(crate) observation_attr: Attributes,
  pub(crate) effective_attr: Attributes,
  pub(crate) active: bool,
  pub(crate) last_notify: Millis,
  pub(crate) last_eval: Millis,
  pub(crate) last_sent: Snapshot,
  pub(crate) notify_pending: bool,
  pub(crate) changed: bool,
  pub(crate) content_format: Option<ContentFormat>,
  pub(crate) accept: Option<ContentFormat>,
  pub(crate) prev: Option<u16>,
}

impl Default for Observation {
  fn default() -> Self {
    Observation { ssid: 0,
                  token: Token(Default::default()),
                  path: Path::root(),
                  observation_attr: Default::default(),
                  effective_attr: Default::default(),
                  active: false,
                  last_notify: Millis::new(0),
                  last_eval: Millis::new(0),
                  last_sent: Default::default(),
                  notify_pending: false,
                  changed: false,
                  content_format: None,
                  accept: None,
                  prev: None }
  }
}

impl Observation {
  /// Short Server ID owning this observation (0 = free slot).
  pub fn ssid(&self) -> u16 {
    self.ssid
  }

  /// Observed path.
  pub fn path(&self) -> Path {
    self.path
  }

  /// Token echoed in notifications.
  pub fn token(&self) -> Token {
    self.token
  }

  /// Attributes in effect after inheritance.
  pub fn effective_attr(&self) -> &Attributes {
    &self.effective_attr
  }

  /// Inactive observations are retained but never notify (e.g. an
  /// inconsistent `epmin`/`epmax` pair, until attributes change).
  pub fn is_active(&self) -> bool {
    self.active
  }

  /// Has the evaluator decided a notification must go out?
  pub fn notification_pending(&self) -> bool {
    self.notify_pending
  }
}

/// The observation subsystem: the observation table plus the
/// Write-Attributes storage.
///
/// The host wires it to a [`DataModel`] by draining
/// [`take_events`](DataModel::take_events) into
/// [`data_model_changed`](Self::data_model_changed) and pumping
/// [`process`](Self::process) / [`build_msg`](Self::build_msg) /
/// [`confirm_sent`](Self::confirm_sent).
#[derive(Clone, Copy)]
pub struct Observations {
  pub(crate) records: [Observation; MAX_OBSERVATIONS],
  pub(crate) attrs: [AttrEntry; MAX_WRITE_ATTRIBUTES],
}

impl Default for Observations {
  fn default() -> Self {
    Observations { records: Default::default(),
                   attrs: Default::default() }
  }
}

impl fmt::Debug for Observations {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Observations")
     .field("records", &self.records)
     .finish_non_exhaustive()
  }
}

impl Observations {
  /// An empty observation table.
  pub fn new() -> Self {
    Default::default()
  }

  /// Live observations, in table order.
  pub fn iter(&self) -> impl Iterator<Item = &Observation> {
    self.records.iter().filter(|o| o.ssid != 0)
  }

  /// Handle one observe-related server request:
  /// Observe, Cancel-Observe, their composite variants and
  /// Write-Attributes. Returns the CoAP response code on success; the
  /// caller maps errors through [`Error::code`].
  ///
  /// `composite_paths` carries the path list decoded from an
  /// Observe-Composite payload and is ignored by the other operations.
  pub fn new_request<U>(&mut self,
                        dm: &DataModel<U>,
                        user: &mut U,
                        srv: &ServerState,
                        req: &Request<'_>,
                        composite_paths: &[Path],
                        now: Millis)
                        -> Result<Code, Error> {
    match req.operation {
      | Operation::Observe => {
        self.add_single(dm, user, srv, req, now)?;
        Ok(code::CONTENT)
      },
      | Operation::CancelObserve => {
        self.cancel(srv.ssid, req.token)?;
        Ok(code::CONTENT)
      },
      #[cfg(feature = "composite")]
      | Operation::ObserveComposite => {
        self.add_composite(dm, user, srv, req, composite_paths, now)?;
        Ok(code::CONTENT)
      },
      #[cfg(feature = "composite")]
      | Operation::CancelObserveComposite => {
        self.cancel_composite(srv.ssid, req.token)?;
        Ok(code::CONTENT)
      },
      | Operation::WriteAttributes => {
        self.write_attributes(dm, srv, req)?;
        Ok(code::CHANGED)
      },
      | _ => {
        log::error!("not an observe operation");
        Err(Error::InputArg)
      },
    }
  }

  fn add_single<U>(&mut self,
                   dm: &DataModel<U>,
                   user: &mut U,
                   srv: &ServerState,
                   req: &Request<'_>,
                   now: Millis)
                   -> Result<(), Error> {
    let path = req.uri;
    if !path.has(Level::Object) {
      return Err(Error::BadRequest);
    }
    if path.has(Level::Resource) {
      dm.path_has_readable_resources(&path)?;
    } else {
      dm.locate(&path)?;
    }

    let idx = self.slot_for(srv.ssid, req.token)?;
    self.records[idx] = self.make_record(dm, user, srv, req, path, now);
    log::debug!("observation on {} for ssid {}", path, srv.ssid);
    Ok(())
  }

  fn make_record<U>(&self,
                    dm: &DataModel<U>,
                    user: &mut U,
                    srv: &ServerState,
                    req: &Request<'_>,
                    path: Path,
                    now: Millis)
                    -> Observation {
    let own = req.attr.unwrap_or_default();
    let effective = attr::effective(&self.attrs, srv, &path, srv.ssid, &own);
    Observation { ssid: srv.ssid,
                  token: req.token,
                  path,
                  observation_attr: own,
                  effective_attr: effective,
                  active: effective.eval_periods_consistent(),
                  last_notify: now,
                  last_eval: now,
                  last_sent: notify::sample(dm, user, &path),
                  notify_pending: false,
                  changed: false,
                  content_format: req.content_format,
                  accept: req.accept,
                  prev: None }
  }

  /// The slot for `(ssid, token)`: an existing record to update, or a
  /// free one.
  fn slot_for(&self, ssid: u16, token: Token) -> Result<usize, Error> {
    if let Some(idx) = self.find(ssid, token) {
      return Ok(idx);
    }
    match self.records.iter().position(|o| o.ssid == 0) {
      | Some(idx) => Ok(idx),
      | None => {
        log::error!("no free observation slot");
        Err(Error::Internal)
      },
    }
  }

  fn find(&self, ssid: u16, token: Token) -> Option<usize> {
    self.records
        .iter()
        .position(|o| o.ssid == ssid && o.ssid != 0 && o.token == token)
  }

  /// Cancel the observation matching `(ssid, token)`; a pending
  /// notification is dropped with it.
  pub fn cancel(&mut self, ssid: u16, token: Token) -> Result<(), Error> {
    match self.find(ssid, token) {
      | Some(idx) => {
        self.records[idx] = Default::default();
        Ok(())
      },
      | None => {
        log::warn!("no observation to cancel");
        Err(Error::NotFound)
      },
    }
  }

  #[cfg(feature = "composite")]
  fn add_composite<U>(&mut self,
                      dm: &DataModel<U>,
                      user: &mut U,
                      srv: &ServerState,
                      req: &Request<'_>,
                      paths: &[Path],
                      now: Millis)
                      -> Result<(), Error> {
    if paths.is_empty() {
      return Err(Error::BadRequest);
    }
    let saved = self.records;
    let r = self.add_composite_links(dm, user, srv, req, paths, now);
    if r.is_err() {
      // no partially-inserted links may survive
      self.records = saved;
    }
    r
  }

  #[cfg(feature = "composite")]
  fn add_composite_links<U>(&mut self,
                            dm: &DataModel<U>,
                            user: &mut U,
                            srv: &ServerState,
                            req: &Request<'_>,
                            paths: &[Path],
                            now: Millis)
                            -> Result<(), Error> {
    // replacing an earlier composite with the same token drops it first
    while let Some(idx) = self.find(srv.ssid, req.token) {
      self.records[idx] = Default::default();
    }

    let mut first: Option<u16> = None;
    let mut prev: Option<u16> = None;
    for path in paths {
      if path.has(Level::Resource) || path.is_root() {
        dm.path_has_readable_resources(path)?;
      } else {
        dm.locate(path)?;
      }
      let idx = self.records
                    .iter()
                    .position(|o| o.ssid == 0)
                    .ok_or(Error::Internal)?;
      self.records[idx] = Observation { prev,
                                        ..self.make_record(dm, user, srv, req, *path, now) };
      if first.is_none() {
        first = Some(idx as u16);
      }
      prev = Some(idx as u16);
    }
    // close the ring
    if let (Some(first), Some(last)) = (first, prev) {
      self.records[first as usize].prev = Some(last);
    }
    log::debug!("composite observation with {} paths for ssid {}",
                paths.len(),
                srv.ssid);
    Ok(())
  }

  /// Cancel every link of the composite observation matching
  /// `(ssid, token)`.
  #[cfg(feature = "composite")]
  pub fn cancel_composite(&mut self, ssid: u16, token: Token) -> Result<(), Error> {
    let mut removed = false;
    for record in self.records.iter_mut() {
      if record.ssid == ssid && record.ssid != 0 && record.token == token {
        *record = Default::default();
        removed = true;
      }
    }
    if removed {
      Ok(())
    } else {
      log::warn!("no composite observation to cancel");
      Err(Error::NotFound)
    }
  }

  /// Purge everything a logging-out server left behind: its
  /// observations and its attribute storage entries.
  pub fn remove_all(&mut self, ssid: u16) {
    for record in self.records.iter_mut() {
      if record.ssid == ssid {
        *record = Default::default();
      }
    }
    attr::entry_remove_matching(&mut self.attrs, |e| e.ssid == ssid);
  }

  /// Feed one data-model change event into the table.
  ///
  /// The engine never calls into this table itself: after every
  /// operation the host drains
  /// [`DataModel::take_events`](crate::dm::DataModel::take_events) and
  /// feeds each event here, before the next [`process`](Self::process)
  /// tick. An event that is never delivered is a change the
  /// observations never see.
  ///
  /// Deletions tear down observations inside the deleted subtree;
  /// additions and value changes mark the observations they may affect
  /// for re-evaluation on the next [`process`](Self::process).
  pub fn data_model_changed(&mut self, path: &Path, kind: ChangeKind, _ssid: u16) {
    match kind {
      | ChangeKind::Deleted => {
        for record in self.records.iter_mut() {
          if record.ssid != 0 && !record.path.outside_base(path) {
            *record = Default::default();
          }
        }
        attr::entry_remove_matching(&mut self.attrs, |e| !e.path.outside_base(path));
      },
      | ChangeKind::Added | ChangeKind::ValueChanged => {
        for record in self.records.iter_mut() {
          if record.ssid != 0
             && (!path.outside_base(&record.path) || !record.path.outside_base(path))
          {
            record.changed = true;
          }
        }
      },
    }
  }

  /// Store notification attributes for `(ssid, req.uri)` per the
  /// request's parsed attributes, and refresh affected observations.
  pub fn write_attributes<U>(&mut self,
                             dm: &DataModel<U>,
                             srv: &ServerState,
                             req: &Request<'_>)
                             -> Result<(), Error> {
    let path = req.uri;
    if !path.has(Level::Object) {
      return Err(Error::BadRequest);
    }
    let attributes = match req.attr {
      | Some(a) => a,
      | None => {
        log::error!("write-attributes without attributes");
        return Err(Error::BadRequest);
      },
    };
    dm.locate(&path)?;
    attr::validate(dm, &path, &attributes)?;
    attr::entry_insert(&mut self.attrs, srv.ssid, path, attributes)?;

    // attributes inherit: refresh every observation at or below `path`
    for record in self.records.iter_mut() {
      if record.ssid == srv.ssid && !record.path.outside_base(&path) {
        record.effective_attr = attr::effective(&self.attrs,
                                                srv,
                                                &record.path,
                                                record.ssid,
                                                &record.observation_attr);
        record.active = record.effective_attr.eval_periods_consistent();
      }
    }
    Ok(())
  }
}
