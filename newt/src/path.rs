use core::fmt;

use crate::config::INVALID_ID;

/// One level of the LwM2M addressing hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
  /// Object (`/3`)
  Object = 0,
  /// Object Instance (`/3/0`)
  Instance = 1,
  /// Resource (`/3/0/9`)
  Resource = 2,
  /// Resource Instance (`/3/0/9/1`)
  ResourceInstance = 3,
}

/// An LwM2M path: the root, an Object, an Object Instance, a Resource or
/// a Resource Instance.
///
/// ```
/// use newt::path::{Level, Path};
///
/// let p = Path::resource(3, 0, 9);
/// assert_eq!(p.len(), 3);
/// assert_eq!(p.oid(), Some(3));
/// assert!(p.has(Level::Instance));
/// assert!(p.is(Level::Resource));
/// assert!(!p.has(Level::ResourceInstance));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Path {
  ids: [u16; 4],
  len: u8,
}

impl Path {
  /// The root path `/`.
  pub const fn root() -> Self {
    Path { ids: [INVALID_ID; 4],
           len: 0 }
  }

  /// An Object path `/OID`.
  pub const fn object(oid: u16) -> Self {
    Path { ids: [oid, INVALID_ID, INVALID_ID, INVALID_ID],
           len: 1 }
  }

  /// An Object Instance path `/OID/IID`.
  pub const fn instance(oid: u16, iid: u16) -> Self {
    Path { ids: [oid, iid, INVALID_ID, INVALID_ID],
           len: 2 }
  }

  /// A Resource path `/OID/IID/RID`.
  pub const fn resource(oid: u16, iid: u16, rid: u16) -> Self {
    Path { ids: [oid, iid, rid, INVALID_ID],
           len: 3 }
  }

  /// A Resource Instance path `/OID/IID/RID/RIID`.
  pub const fn resource_instance(oid: u16, iid: u16, rid: u16, riid: u16) -> Self {
    Path { ids: [oid, iid, rid, riid],
           len: 4 }
  }

  /// Number of ids in this path, `0..=4`.
  pub fn len(&self) -> usize {
    self.len as usize
  }

  /// Is this the root path?
  pub fn is_root(&self) -> bool {
    self.len == 0
  }

  /// Does this path reach (at least) `level`?
  pub fn has(&self, level: Level) -> bool {
    self.len() > level as usize
  }

  /// Does this path terminate exactly at `level`?
  pub fn is(&self, level: Level) -> bool {
    self.len() == level as usize + 1
  }

  /// The id at `level`, if present.
  pub fn id(&self, level: Level) -> Option<u16> {
    if self.has(level) {
      Some(self.ids[level as usize])
    } else {
      None
    }
  }

  /// Object id.
  pub fn oid(&self) -> Option<u16> {
    self.id(Level::Object)
  }

  /// Object Instance id.
  pub fn iid(&self) -> Option<u16> {
    self.id(Level::Instance)
  }

  /// Resource id.
  pub fn rid(&self) -> Option<u16> {
    self.id(Level::Resource)
  }

  /// Resource Instance id.
  pub fn riid(&self) -> Option<u16> {
    self.id(Level::ResourceInstance)
  }

  /// The prefix of this path holding its first `len` ids (`len` greater
  /// than the path's own length is saturated).
  ///
  /// ```
  /// use newt::Path;
  ///
  /// let p = Path::resource(3, 0, 9);
  /// assert_eq!(p.truncated(1), Path::object(3));
  /// assert_eq!(p.truncated(9), p);
  /// ```
  pub fn truncated(&self, len: usize) -> Path {
    let mut out = Path::root();
    out.len = (self.len as usize).min(len) as u8;
    out.ids[..out.len as usize].copy_from_slice(&self.ids[..out.len as usize]);
    out
  }

  /// The path one level up (the root's parent is the root).
  pub fn parent(&self) -> Path {
    let mut up = *self;
    if up.len > 0 {
      up.len -= 1;
      up.ids[up.len as usize] = INVALID_ID;
    }
    up
  }

  /// Is `self` outside the subtree rooted at `base`?
  ///
  /// A path is outside `base` iff any of its first `base.len()` ids
  /// differ from `base`'s. The root contains everything.
  ///
  /// ```
  /// use newt::path::Path;
  ///
  /// let base = Path::instance(3, 0);
  /// assert!(!Path::resource(3, 0, 9).outside_base(&base));
  /// assert!(Path::resource(3, 1, 9).outside_base(&base));
  /// assert!(Path::object(3).outside_base(&base));
  /// ```
  pub fn outside_base(&self, base: &Path) -> bool {
    if self.len < base.len {
      return true;
    }
    self.ids[..base.len()] != base.ids[..base.len()]
  }
}

impl fmt::Display for Path {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.is_root() {
      return write!(f, "/");
    }
    for id in &self.ids[..self.len()] {
      write!(f, "/{}", id)?;
    }
    Ok(())
  }
}
