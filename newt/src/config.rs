//! Compile-time capacity caps.
//!
//! Everything in this crate is allocation-free; every table is a
//! fixed-capacity array sized by one of these constants. Tune them to the
//! footprint of your device and rebuild.

/// Reserved identifier value meaning "invalid" / "free slot".
///
/// IID/RIID values live in `0..65534`; `65535` never names a live entity.
///
/// ```
/// use newt::config::INVALID_ID;
///
/// assert_eq!(INVALID_ID, 65535);
/// ```
pub const INVALID_ID: u16 = u16::MAX;

/// Cap on Objects registered with one [`DataModel`](crate::dm::DataModel).
pub const MAX_OBJECTS: usize = 16;

/// Cap on Object Instances per Object.
///
/// Objects may additionally declare a smaller per-object
/// `max_inst_count`; this constant only bounds the backing storage.
pub const MAX_OBJ_INSTANCES: usize = 8;

/// Cap on Resources per Object Instance.
pub const MAX_RESOURCES: usize = 24;

/// Cap on Resource Instances per multi-instance Resource.
pub const MAX_RES_INSTANCES: usize = 8;

/// Cap on concurrently tracked observations.
pub const MAX_OBSERVATIONS: usize = 8;

/// Cap on stored Write-Attributes entries.
pub const MAX_WRITE_ATTRIBUTES: usize = 8;

/// Cap on buffered data-model change events.
///
/// The host must drain events after each operation
/// (see [`DataModel::take_events`](crate::dm::DataModel::take_events));
/// the queue only needs to absorb the mutations of a single request.
pub const MAX_CHANGE_EVENTS: usize = 16;

/// Smallest notification build buffer the engine accepts.
///
/// Sized to the largest single SenML-CBOR record a serializer may need to
/// place in one piece.
pub const MIN_NOTIFY_BUFFER: usize = 58;
