//! Built-in LwM2M objects for the [`newt`] runtime:
//! Security (0), Server (1), Device (3) and Firmware Update (5).
//!
//! Each adapter is a plain struct the host embeds in its own context
//! type; a `Has*` trait tells the generic handler functions where to
//! find it:
//!
//! ```
//! use newt::dm::DataModel;
//! use newt_obj::device::{DeviceObject, HasDevice};
//!
//! struct MyDevice {
//!   device: DeviceObject,
//! }
//!
//! impl HasDevice for MyDevice {
//!   fn device(&mut self) -> &mut DeviceObject {
//!     &mut self.device
//!   }
//! }
//!
//! let mut ctx = MyDevice { device: DeviceObject::new("ACME", "newt-1") };
//! let mut dm: DataModel<MyDevice> = DataModel::new();
//! dm.add_obj(ctx.device.object()).unwrap();
//! ```
//!
//! All adapters follow the transactional contract of the engine: they
//! shadow-copy their mutable state in `transaction_begin`, check their
//! invariants in `transaction_validate` and roll back in
//! `transaction_end` when the operation failed.

// docs
#![doc(html_root_url = "https://docs.rs/newt-obj/0.3.0")]
#![cfg_attr(any(docsrs, feature = "docs"), feature(doc_cfg))]
// -
// style
#![allow(clippy::unused_unit)]
// -
// deny
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(not(test), deny(unsafe_code))]
// -
// warnings
#![cfg_attr(not(test), warn(unreachable_pub))]
// -
// features
#![cfg_attr(not(test), no_std)]

/// LwM2M Security object (0)
pub mod security;

/// LwM2M Server object (1)
pub mod server;

/// LwM2M Device object (3)
pub mod device;

/// LwM2M Firmware Update object (5)
pub mod fwu;
