use crate::dm::DataModel;
use crate::error::Error;
use crate::path::{Level, Path};
#[cfg(feature = "lwm2m12")]
use crate::value::ResType;

/// LwM2M notification attributes, every field independently optional.
///
/// `pmin`/`pmax` pace notifications on the wall clock, `epmin`/`epmax`
/// pace evaluation, `gt`/`lt`/`st` put thresholds on numeric resources
/// and `edge` triggers on boolean transitions.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Attributes {
  /// `pmin`, seconds
  pub min_period: Option<u32>,
  /// `pmax`, seconds
  pub max_period: Option<u32>,
  /// `epmin`, seconds
  pub min_eval_period: Option<u32>,
  /// `epmax`, seconds
  pub max_eval_period: Option<u32>,
  /// `gt` threshold
  pub greater_than: Option<f64>,
  /// `lt` threshold
  pub less_than: Option<f64>,
  /// `st` step
  pub step: Option<f64>,
  /// `edge`: notify on transition to `true` (rising) or `false`
  #[cfg(feature = "lwm2m12")]
  pub edge: Option<bool>,
  /// `con`: confirmable notifications
  #[cfg(feature = "lwm2m12")]
  pub con: Option<bool>,
  /// `hqmax`: cap on queued "historical" notifications
  #[cfg(feature = "lwm2m12")]
  pub hqmax: Option<u32>,
}

impl Attributes {
  /// Overlay `other` on `self`: fields present in `other` win.
  pub(crate) fn overlay(&mut self, other: &Attributes) {
    fn lay<T: Copy>(dst: &mut Option<T>, src: &Option<T>) {
      if src.is_some() {
        *dst = *src;
      }
    }
    lay(&mut self.min_period, &other.min_period);
    lay(&mut self.max_period, &other.max_period);
    lay(&mut self.min_eval_period, &other.min_eval_period);
    lay(&mut self.max_eval_period, &other.max_eval_period);
    lay(&mut self.greater_than, &other.greater_than);
    lay(&mut self.less_than, &other.less_than);
    lay(&mut self.step, &other.step);
    #[cfg(feature = "lwm2m12")]
    {
      lay(&mut self.edge, &other.edge);
      lay(&mut self.con, &other.con);
      lay(&mut self.hqmax, &other.hqmax);
    }
  }

  /// `epmin`/`epmax` consistency; an observation carrying an
  /// inconsistent pair is kept but stays inactive.
  pub(crate) fn eval_periods_consistent(&self) -> bool {
    match (self.min_eval_period, self.max_eval_period) {
      | (Some(min), Some(max)) => min <= max,
      | _ => true,
    }
  }
}

/// Per-server state the observation subsystem needs from the host: the
/// server's identity and its configured notification defaults (Server
/// object resources 2 and 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerState {
  /// Short Server ID of the server the request came from
  pub ssid: u16,
  /// `pmin` fallback when no attribute sets one
  pub default_min_period: Option<u32>,
  /// `pmax` fallback when no attribute sets one
  pub default_max_period: Option<u32>,
}

/// One stored Write-Attributes entry. `ssid == 0` marks a free slot.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct AttrEntry {
  pub(crate) ssid: u16,
  pub(crate) path: Path,
  pub(crate) attr: Attributes,
}

/// Compute the effective attributes at `path` for `ssid`: overlay the
/// stored entries from `/OID` down to the full path, then the
/// observation's own attributes, then backfill the server defaults.
pub(crate) fn effective(storage: &[AttrEntry],
                        srv: &ServerState,
                        path: &Path,
                        ssid: u16,
                        own: &Attributes)
                        -> Attributes {
  let mut out = Attributes::default();
  for len in 1..=path.len() {
    let prefix = path.truncated(len);
    for entry in storage {
      if entry.ssid == ssid && entry.path == prefix {
        out.overlay(&entry.attr);
      }
    }
  }
  out.overlay(own);
  if out.min_period.is_none() {
    out.min_period = srv.default_min_period;
  }
  if out.max_period.is_none() {
    out.max_period = srv.default_max_period;
  }
  out
}

/// Validate an attribute set against the resource it is attached to.
///
/// `epmin > epmax` is rejected outright; `st` needs a numeric resource
/// and a positive value; `edge` needs a single-instance boolean
/// resource. `pmin > pmax` is deliberately accepted.
pub(crate) fn validate<U>(dm: &DataModel<U>,
                          path: &Path,
                          attr: &Attributes)
                          -> Result<(), Error> {
  if !attr.eval_periods_consistent() {
    log::error!("epmin greater than epmax");
    return Err(Error::BadRequest);
  }
  if let Some(st) = attr.step {
    if st <= 0.0 {
      return Err(Error::BadRequest);
    }
    if !path.has(Level::Resource) || !dm.resource_type(path)?.numeric() {
      log::error!("step attribute on non-numeric resource");
      return Err(Error::BadRequest);
    }
  }
  #[cfg(feature = "lwm2m12")]
  if attr.edge.is_some() {
    let single_bool = path.is(Level::Resource)
                      && dm.resource_type(path)? == ResType::Bool
                      && dm.locate(path)
                           .map_or(false, |c| !dm.res_at(&c).op().multi());
    if !single_bool {
      log::error!("edge attribute needs a single-instance boolean resource");
      return Err(Error::BadRequest);
    }
  }
  Ok(())
}

pub(crate) fn entry_find(storage: &[AttrEntry], ssid: u16, path: &Path) -> Option<usize> {
  storage.iter()
         .position(|e| e.ssid == ssid && e.ssid != 0 && e.path == *path)
}

pub(crate) fn entry_insert(storage: &mut [AttrEntry],
                           ssid: u16,
                           path: Path,
                           attr: Attributes)
                           -> Result<(), Error> {
  if let Some(idx) = entry_find(storage, ssid, &path) {
    storage[idx].attr.overlay(&attr);
    return Ok(());
  }
  match storage.iter().position(|e| e.ssid == 0) {
    | Some(idx) => {
      storage[idx] = AttrEntry { ssid, path, attr };
      Ok(())
    },
    | None => {
      log::error!("attribute storage full");
      Err(Error::Memory)
    },
  }
}

pub(crate) fn entry_remove_matching(storage: &mut [AttrEntry],
                                    mut predicate: impl FnMut(&AttrEntry) -> bool) {
  for entry in storage.iter_mut() {
    if entry.ssid != 0 && predicate(entry) {
      *entry = Default::default();
    }
  }
}
