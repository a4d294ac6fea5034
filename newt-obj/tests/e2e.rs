//! End-to-end scenarios driving the engine the way a CoAP front end
//! would.

use newt::dm::{DataModel, Entry, Handlers, Obj, Res, ResOp};
use newt::observe::{Attributes, Observations, ServerState};
use newt::time::Millis;
use newt::value::{ResType, Value};
use newt::{Error, Operation, Path, Request};
use toad_msg::Token;

#[derive(Default)]
struct Host {
  temp: f64,
}

fn read_temp<'a>(h: &'a mut Host, p: &Path) -> Result<Value<'a>, Error> {
  match p.rid() {
    | Some(8) => Ok(Value::Double(h.temp)),
    | _ => Ok(Value::Int(0)),
  }
}

fn ok_inst(_: &mut Host, _: u16, _: u16) -> Result<(), Error> {
  Ok(())
}

fn handlers() -> Handlers<Host> {
  Handlers { res_read: Some(read_temp),
             inst_create: Some(ok_inst),
             inst_delete: Some(ok_inst),
             ..Default::default() }
}

fn token(b: u8) -> Token {
  Token([b].into_iter().collect())
}

#[test]
fn register_record_order_skips_security() {
  let mut dm: DataModel<Host> = DataModel::new();
  let mut host = Host::default();
  let r = [Res::new(0, ResOp::R, ResType::Int)];

  dm.add_obj(Obj::new(0).resources(&r).handlers(handlers()).instance(0))
    .unwrap();
  dm.add_obj(Obj::new(1).resources(&r)
                        .handlers(handlers())
                        .instance(1)
                        .instance(2))
    .unwrap();
  dm.add_obj(Obj::new(3).resources(&r).handlers(handlers()).instance(0))
    .unwrap();
  dm.add_obj(Obj::new(5).resources(&r).handlers(handlers())).unwrap();
  dm.add_obj(Obj::new(55).resources(&r).handlers(handlers()).version("1.2"))
    .unwrap();

  dm.operation_begin(&mut host, Operation::Register, false, None, 0)
    .unwrap();
  let mut records = Vec::new();
  loop {
    let entry = dm.get_register_record().unwrap();
    let last = entry.is_last();
    records.push(entry.record());
    if last {
      break;
    }
  }
  dm.operation_end(&mut host).unwrap();

  let paths: Vec<Path> = records.iter().map(|r| r.path).collect();
  assert_eq!(paths,
             vec![Path::object(1),
                  Path::instance(1, 1),
                  Path::instance(1, 2),
                  Path::object(3),
                  Path::instance(3, 0),
                  Path::object(5),
                  Path::object(55)]);
  assert_eq!(records[6].version, Some("1.2"));
  assert!(records[..6].iter().all(|r| r.version.is_none()));
}

#[test]
fn create_allocates_lowest_free_iids() {
  let mut dm: DataModel<Host> = DataModel::new();
  let mut host = Host::default();
  dm.add_obj(Obj::new(42).max_instances(5)
                         .resources(&[Res::new(0, ResOp::R, ResType::Int)])
                         .handlers(handlers())
                         .instance(1)
                         .instance(3))
    .unwrap();

  let create = |dm: &mut DataModel<Host>, host: &mut Host| {
    let begun = dm.operation_begin(host, Operation::Create, false, Some(Path::object(42)), 1);
    let got = begun.and_then(|()| dm.create_object_instance(host, newt::config::INVALID_ID));
    let end = dm.operation_end(host);
    end.and(got)
  };

  assert_eq!(create(&mut dm, &mut host), Ok(0));
  assert_eq!(create(&mut dm, &mut host), Ok(2));
  assert_eq!(create(&mut dm, &mut host), Ok(4));
  assert_eq!(create(&mut dm, &mut host), Err(Error::MethodNotAllowed));
}

/// Observe `/3/1/8/1` with `pmin=5, st=2`: an 1.5 move stays quiet, a
/// 2.1 move past `pmin` notifies.
#[test]
fn observe_with_step_threshold() {
  let mut dm: DataModel<Host> = DataModel::new();
  let mut host = Host { temp: 7.0 };
  dm.add_obj(Obj::new(3).resources(&[Res::multi(8, ResOp::RM, ResType::Double, 4).with_insts(&[1])])
                        .handlers(handlers())
                        .instance(1))
    .unwrap();

  let mut obs = Observations::new();
  let srv = ServerState { ssid: 1,
                          ..Default::default() };
  let req = Request { token: token(0x22),
                      attr: Some(Attributes { min_period: Some(5),
                                              step: Some(2.0),
                                              ..Default::default() }),
                      ..Request::new(Operation::Observe,
                                     Path::resource_instance(3, 1, 8, 1)) };
  obs.new_request(&dm, &mut host, &srv, &req, &[], Millis::new(0))
     .unwrap();

  host.temp = 8.5;
  obs.process(&dm, &mut host, Millis::new(2_000));
  assert_eq!(obs.next_pending(), None);

  host.temp = 9.1;
  obs.process(&dm, &mut host, Millis::new(8_000));
  assert_eq!(obs.next_pending(), Some(0));
  assert!(obs.observation(0).unwrap().notification_pending());
}

#[cfg(feature = "composite")]
mod composite {
  use super::*;
  use newt::io::{self, Record, Serializer};
  use toad_msg::ContentFormat;

  struct Flat(usize);

  impl Serializer for Flat {
    fn supports(&self, format: ContentFormat) -> bool {
      format == io::SENML_CBOR || format == io::LWM2M_CBOR
    }

    fn begin(&mut self,
             _: ContentFormat,
             _: bool,
             _: usize,
             _: &mut [u8])
             -> Result<usize, io::Overflow> {
      Ok(0)
    }

    fn record(&mut self, _: &Record<'_>, out: &mut [u8]) -> Result<usize, io::Overflow> {
      if out.len() < 4 {
        return Err(io::Overflow);
      }
      self.0 += 1;
      Ok(4)
    }

    fn end(&mut self, _: &mut [u8]) -> Result<usize, io::Overflow> {
      Ok(0)
    }
  }

  /// Observe-Composite on `/` only yields the readable records of
  /// populated objects; empty objects contribute nothing.
  #[test]
  fn observe_composite_root_skips_empty_objects() {
    let mut dm: DataModel<Host> = DataModel::new();
    let mut host = Host { temp: 1.0 };
    dm.add_obj(Obj::new(3).resources(&[Res::new(7, ResOp::R, ResType::Double),
                                       Res::new(8, ResOp::R, ResType::Double)])
                          .handlers(handlers())
                          .instance(1))
      .unwrap();
    dm.add_obj(Obj::new(13)
                   .resources(&[Res::new(0, ResOp::R, ResType::Int)])
                   .handlers(handlers()))
      .unwrap();
    dm.add_obj(Obj::new(21).handlers(handlers()).instance(0)).unwrap();

    let mut obs = Observations::new();
    let srv = ServerState { ssid: 1,
                            ..Default::default() };
    let req = Request { token: token(7),
                        ..Request::new(Operation::ObserveComposite, Path::root()) };
    obs.new_request(&dm, &mut host, &srv, &req, &[Path::root()], Millis::new(0))
       .unwrap();

    dm.operation_begin(&mut host, Operation::ReadComposite, false, None, 1)
      .unwrap();
    let expected = dm.get_composite_readable_res_count(&Path::root()).unwrap();
    dm.operation_end(&mut host).unwrap();
    assert_eq!(expected, 2);

    let mut flat = Flat(0);
    let mut buf = [0u8; 128];
    let mut done = 0;
    let built = obs.build_msg(&mut dm, &mut host, &mut flat, 0, &mut done, &mut buf)
                   .unwrap();
    assert!(built.finished);
    assert_eq!(built.format, io::SENML_CBOR);
    assert_eq!(flat.0, expected);
  }
}

/// The engine's change-event queue is the seam between the data model
/// and the observation table: after every operation the host drains
/// `take_events` and feeds each event to `data_model_changed`.
#[test]
fn change_events_pump_the_observation_table() {
  struct Store(i64);

  fn read<'x>(s: &'x mut Store, _: &Path) -> Result<Value<'x>, Error> {
    Ok(Value::Int(s.0))
  }

  fn write(s: &mut Store, _: &Path, v: &Value<'_>) -> Result<(), Error> {
    s.0 = v.as_i64()?;
    Ok(())
  }

  fn ok_inst(_: &mut Store, _: u16, _: u16) -> Result<(), Error> {
    Ok(())
  }

  let mut dm: DataModel<Store> = DataModel::new();
  let mut store = Store(1);
  dm.add_obj(Obj::new(44).resources(&[Res::new(0, ResOp::RW, ResType::Int)])
                         .handlers(Handlers { res_read: Some(read),
                                              res_write: Some(write),
                                              inst_delete: Some(ok_inst),
                                              ..Default::default() })
                         .instance(0))
    .unwrap();
  dm.take_events();

  let mut obs = Observations::new();
  let srv = ServerState { ssid: 1,
                          ..Default::default() };
  let req = Request { token: token(0x31),
                      ..Request::new(Operation::Observe, Path::instance(44, 0)) };
  obs.new_request(&dm, &mut store, &srv, &req, &[], Millis::new(0))
     .unwrap();

  // a server write lands in the engine's event queue
  dm.operation_begin(&mut store,
                     Operation::WritePartialUpdate,
                     false,
                     Some(Path::instance(44, 0)),
                     1)
    .unwrap();
  dm.write_entry(&mut store,
                 &newt::io::Record { path: Path::resource(44, 0, 0),
                                     value: Value::Int(5) })
    .unwrap();
  dm.operation_end(&mut store).unwrap();

  // the instance-level observation has no value snapshot of its own;
  // without the pump the change stays invisible
  obs.process(&dm, &mut store, Millis::new(1_000));
  assert_eq!(obs.next_pending(), None);

  for ev in dm.take_events() {
    obs.data_model_changed(&ev.path, ev.kind, ev.ssid);
  }
  obs.process(&dm, &mut store, Millis::new(2_000));
  assert_eq!(obs.next_pending(), Some(0));
  obs.confirm_sent(&dm, &mut store, 0, Millis::new(2_000));

  // a delete flows through the same seam and tears the observation down
  dm.operation_begin(&mut store, Operation::Delete, false, Some(Path::instance(44, 0)), 1)
    .unwrap();
  dm.operation_end(&mut store).unwrap();
  for ev in dm.take_events() {
    obs.data_model_changed(&ev.path, ev.kind, ev.ssid);
  }
  assert!(obs.iter().next().is_none());
}

/// A replace-then-read round trip leaves exactly the written values
/// plus whatever `inst_reset` restored.
#[test]
fn write_replace_read_round_trip() {
  struct Store {
    a: i64,
    b: i64,
  }

  fn read<'x>(s: &'x mut Store, p: &Path) -> Result<Value<'x>, Error> {
    match p.rid() {
      | Some(0) => Ok(Value::Int(s.a)),
      | Some(1) => Ok(Value::Int(s.b)),
      | _ => Err(Error::NotFound),
    }
  }

  fn write(s: &mut Store, p: &Path, v: &Value<'_>) -> Result<(), Error> {
    match p.rid() {
      | Some(0) => s.a = v.as_i64()?,
      | Some(1) => s.b = v.as_i64()?,
      | _ => return Err(Error::NotFound),
    }
    Ok(())
  }

  fn reset(s: &mut Store, _: u16, _: u16) -> Result<(), Error> {
    s.a = 0;
    s.b = 0;
    Ok(())
  }

  let mut dm: DataModel<Store> = DataModel::new();
  let mut store = Store { a: 5, b: 6 };
  dm.add_obj(Obj::new(9).resources(&[Res::new(0, ResOp::RW, ResType::Int),
                                     Res::new(1, ResOp::RW, ResType::Int)])
                        .handlers(Handlers { res_read: Some(read),
                                             res_write: Some(write),
                                             inst_reset: Some(reset),
                                             ..Default::default() })
                        .instance(0))
    .unwrap();

  dm.operation_begin(&mut store, Operation::WriteReplace, false, Some(Path::instance(9, 0)), 1)
    .unwrap();
  dm.write_entry(&mut store,
                 &newt::io::Record { path: Path::resource(9, 0, 1),
                                     value: Value::Int(11) })
    .unwrap();
  dm.operation_end(&mut store).unwrap();

  dm.operation_begin(&mut store, Operation::Read, false, Some(Path::instance(9, 0)), 1)
    .unwrap();
  let mut got = Vec::new();
  loop {
    let entry = dm.get_read_entry(&mut store).unwrap();
    let last = entry.is_last();
    if let Entry::Next(r) | Entry::Last(r) = entry {
      got.push((r.path, r.value.as_i64().unwrap()));
    }
    if last {
      break;
    }
  }
  dm.operation_end(&mut store).unwrap();

  // resource 0 was reset, resource 1 carries the written value
  assert_eq!(got,
             vec![(Path::resource(9, 0, 0), 0), (Path::resource(9, 0, 1), 11)]);
}
