use blake2::digest::consts::U8;
use blake2::{Blake2b, Digest};
use tinyvec::ArrayVec;
use toad_msg::ContentFormat;

use super::Observations;
use crate::config::{MAX_OBSERVATIONS, MIN_NOTIFY_BUFFER};
use crate::dm::DataModel;
use crate::error::Error;
use crate::io::{self, Serializer};
use crate::path::{Level, Path};
use crate::req::Operation;
use crate::time::{secs, Millis};
use crate::value::{Objlnk, Value};

/// A by-value snapshot of a resource reading, comparable across time.
///
/// Strings, bytes and external values are folded into an 8-byte digest
/// (the same construction `toad-msg` uses for opaque tokens); "did it
/// change" is all the evaluator ever asks of them.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub(crate) enum Snapshot {
  /// Nothing sampled (container path, or unreadable at sample time)
  #[default]
  None,
  Int(i64),
  Uint(u64),
  Double(f64),
  Bool(bool),
  Time(i64),
  Objlnk(Objlnk),
  Digest(u64),
}

impl Snapshot {
  pub(crate) fn of(value: &Value<'_>) -> Snapshot {
    match value {
      | Value::Int(n) => Snapshot::Int(*n),
      | Value::Uint(n) => Snapshot::Uint(*n),
      | Value::Double(n) => Snapshot::Double(*n),
      | Value::Bool(b) => Snapshot::Bool(*b),
      | Value::Time(t) => Snapshot::Time(*t),
      | Value::Objlnk(l) => Snapshot::Objlnk(*l),
      | Value::Str(c) => Snapshot::Digest(digest(c.data.as_bytes())),
      | Value::Bytes(c) => Snapshot::Digest(digest(c.data)),
      | Value::ExtStr(e) | Value::ExtBytes(e) => {
        let mut hasher = Blake2b::<U8>::new();
        let mut buf = [0u8; 64];
        let mut offset = 0;
        loop {
          match e.source.read(offset, &mut buf) {
            | Ok(0) | Err(_) => break,
            | Ok(n) => {
              hasher.update(&buf[..n]);
              offset += n;
            },
          }
        }
        Snapshot::Digest(u64::from_be_bytes(Into::<[u8; 8]>::into(hasher.finalize())))
      },
    }
  }

  fn as_f64(&self) -> Option<f64> {
    match self {
      | Snapshot::Int(n) => Some(*n as f64),
      | Snapshot::Uint(n) => Some(*n as f64),
      | Snapshot::Double(n) => Some(*n),
      | Snapshot::Time(t) => Some(*t as f64),
      | _ => None,
    }
  }
}

fn digest(data: &[u8]) -> u64 {
  let mut hasher = Blake2b::<U8>::new();
  hasher.update(data);
  u64::from_be_bytes(Into::<[u8; 8]>::into(hasher.finalize()))
}

/// Sample the current reading behind an observation. Container paths
/// and multi-instance resource paths have no single value to snapshot.
pub(crate) fn sample<U>(dm: &DataModel<U>, user: &mut U, path: &Path) -> Snapshot {
  if !path.has(Level::Resource) {
    return Snapshot::None;
  }
  if !path.has(Level::ResourceInstance) {
    let multi = dm.locate(path)
                  .map(|c| dm.res_at(&c).op().multi())
                  .unwrap_or(true);
    if multi {
      return Snapshot::None;
    }
  }
  dm.res_read(user, path)
    .map(|v| Snapshot::of(&v))
    .unwrap_or(Snapshot::None)
}

/// Did the observed value move enough to notify?
fn value_fired(attr: &super::Attributes,
               last: &Snapshot,
               current: &Snapshot,
               container_changed: bool)
               -> bool {
  let thresholds =
    attr.greater_than.is_some() || attr.less_than.is_some() || attr.step.is_some();
  if thresholds {
    let (last, current) = match (last.as_f64(), current.as_f64()) {
      | (Some(a), Some(b)) => (a, b),
      | _ => return last != current || container_changed,
    };
    let stepped = attr.step.map_or(false, |st| (current - last).abs() >= st);
    let crossed = |threshold: f64| {
      (last <= threshold && current > threshold)
      || (last >= threshold && current < threshold)
    };
    return stepped
           || attr.greater_than.map_or(false, crossed)
           || attr.less_than.map_or(false, crossed);
  }

  #[cfg(feature = "lwm2m12")]
  if let Some(edge) = attr.edge {
    return match (last, current) {
      | (Snapshot::Bool(l), Snapshot::Bool(c)) => l != c && *c == edge,
      | _ => false,
    };
  }

  last != current || container_changed
}

/// A notification payload produced by [`Observations::build_msg`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltMsg {
  /// Bytes written into the caller's buffer
  pub len: usize,
  /// Format actually used (echo it in the Content-Format option)
  pub format: ContentFormat,
  /// `false` when the payload did not fit and the caller must send
  /// this block, then call again with the same `already_processed`
  pub finished: bool,
}

impl Observations {
  /// Evaluate every active observation against the data model at time
  /// `now`, arming `notification_pending` where the attribute rules
  /// say a notification is due.
  pub fn process<U>(&mut self, dm: &DataModel<U>, user: &mut U, now: Millis) {
    for idx in 0..MAX_OBSERVATIONS {
      let mut obs = self.records[idx];
      if obs.ssid == 0 || !obs.active || obs.notify_pending {
        continue;
      }
      let attr = obs.effective_attr;

      if let Some(epmin) = attr.min_eval_period {
        if now.0.saturating_sub(obs.last_eval.0) < secs(epmin).0 {
          continue;
        }
      }
      obs.last_eval = now;

      let elapsed = now.0.saturating_sub(obs.last_notify.0);
      let current = sample(dm, user, &obs.path);
      let moved = value_fired(&attr, &obs.last_sent, &current, obs.changed);
      let overdue = attr.max_period.map_or(false, |p| elapsed >= secs(p).0)
                    || attr.max_eval_period.map_or(false, |p| elapsed >= secs(p).0);

      if moved || overdue {
        // pmin throttles even an overdue notification
        if attr.min_period.map_or(true, |p| elapsed >= secs(p).0) {
          obs.notify_pending = true;
          obs.changed = false;
          log::debug!("notification armed for {}", obs.path);
        }
      }
      self.records[idx] = obs;
    }
  }

  /// The table index of the next observation with a pending
  /// notification, if any.
  pub fn next_pending(&self) -> Option<usize> {
    self.records
        .iter()
        .position(|o| o.ssid != 0 && o.notify_pending)
  }

  /// The observation at `idx`, if live.
  pub fn observation(&self, idx: usize) -> Option<&super::Observation> {
    self.records.get(idx).filter(|o| o.ssid != 0)
  }

  /// Serialize the current readings of observation `idx` (the whole
  /// ring, for a composite observation) into `buf`.
  ///
  /// `already_processed` counts the paths fully emitted so far and
  /// must start at 0; on [`BuiltMsg::finished`] `== false` send the
  /// window and call again, leaving `already_processed` untouched.
  /// A path with no readable content becomes an empty container.
  pub fn build_msg<U, S>(&mut self,
                         dm: &mut DataModel<U>,
                         user: &mut U,
                         serializer: &mut S,
                         idx: usize,
                         already_processed: &mut usize,
                         buf: &mut [u8])
                         -> Result<BuiltMsg, Error>
    where S: Serializer
  {
    if buf.len() < MIN_NOTIFY_BUFFER {
      return Err(Error::InputArg);
    }
    let obs = match self.observation(idx) {
      | Some(o) => *o,
      | None => return Err(Error::InputArg),
    };

    let composite = obs.prev.is_some();
    let mut paths: ArrayVec<[Path; MAX_OBSERVATIONS]> = Default::default();
    if composite {
      for record in self.records.iter() {
        if record.ssid == obs.ssid && record.ssid != 0 && record.token == obs.token {
          paths.push(record.path);
        }
      }
    } else {
      paths.push(obs.path);
    }

    let format = io::negotiate(serializer, obs.accept, composite)?;
    let total: usize = paths.iter().map(|p| readable_count(dm, p)).sum();

    if total == 0 {
      buf[0] = if composite { io::EMPTY_ARRAY } else { io::EMPTY_MAP };
      *already_processed = paths.len();
      return Ok(BuiltMsg { len: 1,
                           format,
                           finished: true });
    }

    let mut written = 0;
    if *already_processed == 0 {
      written += serializer.begin(format, composite, total, buf)
                           .map_err(|_| Error::Internal)?;
    }

    let mut checkpoint = written;
    for path in paths.iter().skip(*already_processed) {
      match emit_path(dm, user, serializer, path, buf, &mut written) {
        | Ok(()) => {
          checkpoint = written;
          *already_processed += 1;
        },
        | Err(Error::Memory) => {
          // window full; ship what we have and come back
          if checkpoint == 0 {
            return Err(Error::Internal);
          }
          return Ok(BuiltMsg { len: checkpoint,
                               format,
                               finished: false });
        },
        | Err(e) => return Err(e),
      }
    }

    written += serializer.end(&mut buf[written..]).map_err(|_| Error::Internal)?;
    Ok(BuiltMsg { len: written,
                  format,
                  finished: true })
  }

  /// Acknowledge that the notification for observation `idx` reached
  /// the server: stamp the send time, snapshot the values just sent
  /// and clear the pending flag (for the whole ring when composite).
  pub fn confirm_sent<U>(&mut self,
                         dm: &DataModel<U>,
                         user: &mut U,
                         idx: usize,
                         now: Millis) {
    let (ssid, token) = match self.observation(idx) {
      | Some(o) => (o.ssid, o.token),
      | None => return,
    };
    for i in 0..MAX_OBSERVATIONS {
      let record = &self.records[i];
      if record.ssid != ssid || record.token != token {
        continue;
      }
      let snapshot = sample(dm, &mut *user, &self.records[i].path);
      let record = &mut self.records[i];
      record.last_sent = snapshot;
      record.last_notify = now;
      record.notify_pending = false;
      record.changed = false;
    }
  }
}

/// Stream one path's records through the serializer.
/// [`Error::Memory`] means the window overflowed.
fn emit_path<U, S>(dm: &mut DataModel<U>,
                   user: &mut U,
                   serializer: &mut S,
                   path: &Path,
                   buf: &mut [u8],
                   written: &mut usize)
                   -> Result<(), Error>
  where S: Serializer
{
  #[cfg(feature = "composite")]
  let begun = if path.is_root() {
    dm.operation_begin(user, Operation::ReadComposite, false, None, 0)
      .and_then(|()| {
        dm.composite_next_path(&Path::root()).map(|status| {
                                               status == crate::dm::NextPath::Ready
                                             })
      })
  } else {
    dm.operation_begin(user, Operation::Read, false, Some(*path), 0)
      .map(|()| dm.get_readable_res_count().unwrap_or(0) > 0)
  };
  #[cfg(not(feature = "composite"))]
  let begun = dm.operation_begin(user, Operation::Read, false, Some(*path), 0)
                .map(|()| dm.get_readable_res_count().unwrap_or(0) > 0);

  let mut result = match begun {
    | Ok(true) => Ok(()),
    | Ok(false) => {
      dm.operation_end(user).ok();
      return Ok(());
    },
    | Err(e) => {
      dm.operation_end(user).ok();
      return Err(e);
    },
  };

  loop {
    let entry = match dm.get_read_entry(&mut *user) {
      | Ok(e) => e,
      | Err(e) => {
        result = Err(e);
        break;
      },
    };
    let last = entry.is_last();
    let record = entry.record();
    match serializer.record(&record, &mut buf[*written..]) {
      | Ok(n) => *written += n,
      | Err(io::Overflow) => {
        result = Err(Error::Memory);
        break;
      },
    }
    if last {
      break;
    }
  }
  dm.operation_end(user).ok();
  result
}

/// How many records a Read of `path` would yield right now.
fn readable_count<U>(dm: &DataModel<U>, path: &Path) -> usize {
  if !path.has(Level::Object) {
    return dm.objs.iter().map(crate::dm::readable_from_obj).sum();
  }
  let cursor = match dm.locate(path) {
    | Ok(c) => c,
    | Err(_) => return 0,
  };
  if cursor.riid.is_some() {
    return if dm.res_at(&cursor).op().readable() { 1 } else { 0 };
  }
  if cursor.res.is_some() {
    return crate::dm::readable_from_res(dm.res_at(&cursor));
  }
  if let Some(inst_idx) = cursor.inst {
    return crate::dm::readable_from_inst(&dm.objs[cursor.obj].insts[inst_idx]);
  }
  crate::dm::readable_from_obj(&dm.objs[cursor.obj])
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::observe::{Attributes, ServerState};
  use crate::req::Request;
  use crate::test::fixture;
  use toad_msg::Token;

  fn token(b: u8) -> Token {
    Token([b].into_iter().collect())
  }

  fn srv() -> ServerState {
    ServerState { ssid: 1,
                  ..Default::default() }
  }

  fn observe(obs: &mut Observations,
             dm: &DataModel<crate::test::TestUser>,
             user: &mut crate::test::TestUser,
             path: Path,
             attr: Attributes,
             now: Millis) {
    let req = Request { token: token(0x22),
                        attr: Some(attr),
                        ..Request::new(Operation::Observe, path) };
    obs.new_request(dm, user, &srv(), &req, &[], now).unwrap();
  }

  #[test]
  fn step_attribute_gates_notifications() {
    let (dm, mut user) = fixture::basic();
    let mut obs = Observations::new();
    let path = Path::resource_instance(3, 1, 4, 0);
    user.doubles.insert((3, 1, 4, 0), 7.0);

    observe(&mut obs,
            &dm,
            &mut user,
            path,
            Attributes { min_period: Some(5),
                         step: Some(2.0),
                         ..Default::default() },
            Millis::new(0));

    // two seconds later: 8.5, below the step
    user.doubles.insert((3, 1, 4, 0), 8.5);
    obs.process(&dm, &mut user, Millis::new(2_000));
    assert_eq!(obs.next_pending(), None);

    // six seconds after that: 9.1, |9.1 - 7.0| >= 2
    user.doubles.insert((3, 1, 4, 0), 9.1);
    obs.process(&dm, &mut user, Millis::new(8_000));
    assert_eq!(obs.next_pending(), Some(0));
  }

  #[test]
  fn pmin_suppresses_until_elapsed() {
    let (dm, mut user) = fixture::basic();
    let mut obs = Observations::new();
    let path = Path::resource(3, 1, 1);
    user.ints.insert((3, 1, 1, u16::MAX), 1);

    observe(&mut obs,
            &dm,
            &mut user,
            path,
            Attributes { min_period: Some(10),
                         ..Default::default() },
            Millis::new(0));

    user.ints.insert((3, 1, 1, u16::MAX), 2);
    obs.process(&dm, &mut user, Millis::new(3_000));
    assert_eq!(obs.next_pending(), None);

    obs.process(&dm, &mut user, Millis::new(10_000));
    assert_eq!(obs.next_pending(), Some(0));
  }

  #[test]
  fn pmax_forces_notification_without_change() {
    let (dm, mut user) = fixture::basic();
    let mut obs = Observations::new();
    let path = Path::resource(3, 1, 1);
    observe(&mut obs,
            &dm,
            &mut user,
            path,
            Attributes { max_period: Some(30),
                         ..Default::default() },
            Millis::new(0));

    obs.process(&dm, &mut user, Millis::new(29_000));
    assert_eq!(obs.next_pending(), None);
    obs.process(&dm, &mut user, Millis::new(30_000));
    assert_eq!(obs.next_pending(), Some(0));
  }

  #[test]
  fn threshold_crossings_fire_in_both_directions() {
    let attr = Attributes { greater_than: Some(10.0),
                            ..Default::default() };
    let below = Snapshot::Double(5.0);
    let above = Snapshot::Double(15.0);
    assert!(value_fired(&attr, &below, &above, false));
    assert!(value_fired(&attr, &above, &below, false));
    assert!(!value_fired(&attr, &below, &Snapshot::Double(7.0), false));
  }

  #[cfg(feature = "lwm2m12")]
  #[test]
  fn edge_fires_on_configured_transition_only() {
    let rising = Attributes { edge: Some(true),
                              ..Default::default() };
    assert!(value_fired(&rising, &Snapshot::Bool(false), &Snapshot::Bool(true), false));
    assert!(!value_fired(&rising, &Snapshot::Bool(true), &Snapshot::Bool(false), false));
    assert!(!value_fired(&rising, &Snapshot::Bool(true), &Snapshot::Bool(true), false));
  }

  #[test]
  fn pending_collapses_until_confirmed() {
    let (dm, mut user) = fixture::basic();
    let mut obs = Observations::new();
    let path = Path::resource(3, 1, 1);
    user.ints.insert((3, 1, 1, u16::MAX), 1);
    observe(&mut obs, &dm, &mut user, path, Default::default(), Millis::new(0));

    user.ints.insert((3, 1, 1, u16::MAX), 2);
    obs.process(&dm, &mut user, Millis::new(1_000));
    user.ints.insert((3, 1, 1, u16::MAX), 3);
    obs.process(&dm, &mut user, Millis::new(2_000));
    // still exactly one pending notification
    assert_eq!(obs.records.iter().filter(|o| o.notify_pending).count(), 1);

    obs.confirm_sent(&dm, &mut user, 0, Millis::new(2_500));
    assert_eq!(obs.next_pending(), None);
    assert_eq!(obs.records[0].last_sent, Snapshot::Int(3));
    assert_eq!(obs.records[0].last_notify, Millis::new(2_500));

    // no further change, nothing new to send
    obs.process(&dm, &mut user, Millis::new(3_000));
    assert_eq!(obs.next_pending(), None);
  }

  /// Serializer stand-in: 4 bytes of path ids per record, no framing.
  struct Flat;

  impl Serializer for Flat {
    fn supports(&self, format: ContentFormat) -> bool {
      format == io::LWM2M_CBOR || format == io::SENML_CBOR
    }

    fn begin(&mut self,
             _: ContentFormat,
             _: bool,
             _: usize,
             _: &mut [u8])
             -> Result<usize, io::Overflow> {
      Ok(0)
    }

    fn record(&mut self,
              record: &io::Record<'_>,
              out: &mut [u8])
              -> Result<usize, io::Overflow> {
      if out.len() < 8 {
        return Err(io::Overflow);
      }
      let p = record.path;
      out[0] = p.oid().unwrap_or(0) as u8;
      out[1] = p.iid().unwrap_or(0) as u8;
      out[2] = p.rid().unwrap_or(0) as u8;
      out[3] = p.riid().unwrap_or(0xFF) as u8;
      Ok(4)
    }

    fn end(&mut self, _: &mut [u8]) -> Result<usize, io::Overflow> {
      Ok(0)
    }
  }

  #[test]
  fn build_msg_single_path_defaults_to_lwm2m_cbor() {
    let (mut dm, mut user) = fixture::basic();
    let mut obs = Observations::new();
    observe(&mut obs,
            &dm,
            &mut user,
            Path::instance(3, 1),
            Default::default(),
            Millis::new(0));

    let mut buf = [0u8; 128];
    let mut done = 0;
    let built = obs.build_msg(&mut dm, &mut user, &mut Flat, 0, &mut done, &mut buf)
                   .unwrap();
    assert!(built.finished);
    assert_eq!(built.format, io::LWM2M_CBOR);
    // 4 readable records under /3/1
    assert_eq!(built.len, 16);
  }

  #[test]
  fn build_msg_empty_path_is_an_empty_container() {
    let (mut dm, mut user) = fixture::basic();
    let mut obs = Observations::new();
    observe(&mut obs,
            &dm,
            &mut user,
            Path::resource(3, 1, 5),
            Default::default(),
            Millis::new(0));

    let mut buf = [0u8; 128];
    let mut done = 0;
    let built = obs.build_msg(&mut dm, &mut user, &mut Flat, 0, &mut done, &mut buf)
                   .unwrap();
    assert!(built.finished);
    assert_eq!(&buf[..built.len], &[0xA0]);
  }

  #[test]
  fn build_msg_rejects_unsupported_accept() {
    let (mut dm, mut user) = fixture::basic();
    let mut obs = Observations::new();
    let req = Request { token: token(1),
                        accept: Some(ContentFormat::Json),
                        ..Request::new(Operation::Observe, Path::resource(3, 1, 1)) };
    obs.new_request(&dm, &mut user, &srv(), &req, &[], Millis::new(0))
       .unwrap();

    let mut buf = [0u8; 128];
    let mut done = 0;
    assert_eq!(obs.build_msg(&mut dm, &mut user, &mut Flat, 0, &mut done, &mut buf),
               Err(Error::UnsupportedFormat));
  }

  #[cfg(feature = "composite")]
  #[test]
  fn composite_root_build_matches_composite_count() {
    let (mut dm, mut user) = fixture::basic();
    dm.add_obj(crate::test::obj_with(13, &[], &[])).unwrap();
    let mut obs = Observations::new();
    let req = Request { token: token(7),
                        ..Request::new(Operation::ObserveComposite, Path::root()) };
    obs.new_request(&dm, &mut user, &srv(), &req, &[Path::root()], Millis::new(0))
       .unwrap();

    let mut buf = [0u8; 256];
    let mut done = 0;
    let built = obs.build_msg(&mut dm, &mut user, &mut Flat, 0, &mut done, &mut buf)
                   .unwrap();
    assert!(built.finished);
    assert_eq!(built.format, io::SENML_CBOR);

    dm.operation_begin(&mut user, Operation::ReadComposite, false, None, 0)
      .unwrap();
    let count = dm.get_composite_readable_res_count(&Path::root()).unwrap();
    dm.operation_end(&mut user).unwrap();
    assert_eq!(built.len, count * 4);
  }

  #[cfg(feature = "composite")]
  #[test]
  fn block_split_resumes_at_unfinished_path() {
    let (mut dm, mut user) = fixture::basic();
    let mut obs = Observations::new();

    // three object-level links, 5 records of 4 bytes each: 60 bytes of
    // payload against a 58-byte window
    let req = Request { token: token(7),
                        ..Request::new(Operation::ObserveComposite, Path::root()) };
    let paths = [Path::object(3), Path::object(3), Path::object(3)];
    obs.new_request(&dm, &mut user, &srv(), &req, &paths, Millis::new(0))
       .unwrap();

    let mut buf = [0u8; 58];
    let mut done = 0;
    let first = obs.build_msg(&mut dm, &mut user, &mut Flat, 0, &mut done, &mut buf)
                   .unwrap();
    assert!(!first.finished);
    // two links fit whole; the third starts over in the next window
    assert_eq!(first.len, 40);
    assert_eq!(done, 2);

    let second = obs.build_msg(&mut dm, &mut user, &mut Flat, 0, &mut done, &mut buf)
                    .unwrap();
    assert!(second.finished);
    assert_eq!(second.len, 20);
    assert_eq!(done, 3);
  }

  #[test]
  fn epmin_paces_evaluation() {
    let (dm, mut user) = fixture::basic();
    let mut obs = Observations::new();
    let path = Path::resource(3, 1, 1);
    user.ints.insert((3, 1, 1, u16::MAX), 1);
    observe(&mut obs,
            &dm,
            &mut user,
            path,
            Attributes { min_eval_period: Some(10),
                         ..Default::default() },
            Millis::new(0));

    user.ints.insert((3, 1, 1, u16::MAX), 2);
    // the change is real, but the evaluation window has not opened
    obs.process(&dm, &mut user, Millis::new(4_000));
    assert_eq!(obs.next_pending(), None);
    obs.process(&dm, &mut user, Millis::new(10_000));
    assert_eq!(obs.next_pending(), Some(0));
  }

  #[test]
  fn container_observation_fires_on_change_events() {
    let (dm, mut user) = fixture::basic();
    let mut obs = Observations::new();
    observe(&mut obs,
            &dm,
            &mut user,
            Path::instance(3, 1),
            Default::default(),
            Millis::new(0));

    obs.process(&dm, &mut user, Millis::new(1_000));
    assert_eq!(obs.next_pending(), None);

    obs.data_model_changed(&Path::resource(3, 1, 2),
                           crate::dm::ChangeKind::ValueChanged,
                           1);
    obs.process(&dm, &mut user, Millis::new(2_000));
    assert_eq!(obs.next_pending(), Some(0));
  }

  #[test]
  fn inactive_observation_never_fires() {
    let (dm, mut user) = fixture::basic();
    let mut obs = Observations::new();
    user.ints.insert((3, 1, 1, u16::MAX), 1);
    observe(&mut obs,
            &dm,
            &mut user,
            Path::resource(3, 1, 1),
            Attributes { min_eval_period: Some(9),
                         max_eval_period: Some(3),
                         ..Default::default() },
            Millis::new(0));
    assert!(!obs.observation(0).unwrap().is_active());

    user.ints.insert((3, 1, 1, u16::MAX), 2);
    obs.process(&dm, &mut user, Millis::new(60_000));
    assert_eq!(obs.next_pending(), None);
  }

  #[cfg(feature = "composite")]
  #[test]
  fn confirm_clears_the_whole_ring() {
    use crate::req::Operation;

    let (dm, mut user) = fixture::basic();
    let mut obs = Observations::new();
    user.ints.insert((3, 1, 1, u16::MAX), 1);
    user.ints.insert((3, 1, 2, u16::MAX), 1);
    let req = Request { token: token(7),
                        ..Request::new(Operation::ObserveComposite, Path::root()) };
    let paths = [Path::resource(3, 1, 1), Path::resource(3, 1, 2)];
    obs.new_request(&dm, &mut user, &srv(), &req, &paths, Millis::new(0))
       .unwrap();

    user.ints.insert((3, 1, 1, u16::MAX), 2);
    user.ints.insert((3, 1, 2, u16::MAX), 2);
    obs.process(&dm, &mut user, Millis::new(1_000));
    assert!(obs.records[0].notify_pending);

    obs.confirm_sent(&dm, &mut user, 0, Millis::new(1_500));
    assert!(obs.records.iter().all(|o| !o.notify_pending));
    assert_eq!(obs.records[0].last_sent, Snapshot::Int(2));
    assert_eq!(obs.records[1].last_sent, Snapshot::Int(2));
    assert_eq!(obs.records[1].last_notify, Millis::new(1_500));
  }
}
