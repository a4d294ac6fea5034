use super::{DataModel, ResOp};
use crate::error::Error;
use crate::path::{Level, Path};
use crate::req::Operation;

impl<U> DataModel<U> {
  pub(crate) fn begin_execute(&mut self, path: Option<Path>) -> Result<(), Error> {
    let path = match path {
      | Some(p) if p.is(Level::Resource) => p,
      | _ => {
        log::error!("execute needs a resource path");
        return Err(Error::BadRequest);
      },
    };
    self.op.cursor = self.locate(&path)?;
    if self.res_at(&self.op.cursor).op != ResOp::E {
      log::error!("resource is not executable");
      return Err(Error::MethodNotAllowed);
    }
    Ok(())
  }

  /// Run the Execute operation's resource with `arg` (may be empty).
  pub fn execute(&mut self, user: &mut U, arg: &[u8]) -> Result<(), Error> {
    self.op_guard(&[Operation::Execute])?;
    let cursor = self.op.cursor;
    let path = self.cursor_path(&cursor);
    let exec = match self.objs[cursor.obj].handlers.res_execute {
      | Some(f) => f,
      | None => return Err(Error::MethodNotAllowed),
    };
    let r = exec(user, &path, arg).map_err(|e| {
                                    log::error!("res_execute handler failed");
                                    e
                                  });
    self.latch(r)
  }
}
