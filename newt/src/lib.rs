//! `newt` is the core of a client-side LwM2M device-management runtime:
//! the data model engine and its observation/notification subsystem.
//!
//! ## LwM2M
//! LwM2M is a device-management protocol layered on CoAP that models a
//! device as a tree of Objects, Object Instances, Resources and Resource
//! Instances, addressed by the numeric quadruple `/OID/IID/RID/RIID`.
//! A management server operates on that tree with Read, Write, Create,
//! Delete, Execute and Discover requests, and subscribes to value changes
//! with Observe.
//!
//! ## What this crate is
//! - The [object registry](dm::DataModel) and the per-request operation
//!   state machine that drives user handler tables under transactional
//!   begin/validate/end rules.
//! - [Chunked value](value) plumbing for large strings & byte streams
//!   arriving across several calls.
//! - [Attribute storage](observe) with `pmin`/`pmax`/`gt`/`lt`/`st`-style
//!   notification attributes inherited along the path hierarchy, and the
//!   observation table + notification evaluator built on top of it.
//!
//! ## What this crate is not
//! The CoAP codec, payload (de)serialization, DTLS and the registration
//! state machine all live elsewhere; this crate consumes already-parsed
//! [requests](crate::Request) and produces records for a host-supplied
//! [serializer](io::Serializer).
//!
//! Everything is `no_std` and allocation-free: all tables are fixed-size,
//! sized by the caps in [`config`].

// docs
#![doc(html_root_url = "https://docs.rs/newt/0.3.0")]
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


/// compile-time capacity caps
pub mod config;

/// LwM2M paths (`/OID/IID/RID/RIID`)
pub mod path;

/// resource values and chunked transfer helpers
pub mod value;

/// engine errors and their CoAP response codes
pub mod error;

/// the data model engine
pub mod dm;

/// observations, notification attributes and the notification evaluator
pub mod observe;

/// the record stream handed to payload serializers
pub mod io;

/// time primitives shared with the host
pub mod time;

mod req;

pub use error::Error;
pub use path::Path;
pub use req::{Block, BlockKind, Operation, Request};
pub use value::Value;
