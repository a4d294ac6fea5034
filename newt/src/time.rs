/// A duration or real-time timestamp, in milliseconds
///
/// The engine never reads a clock itself; hosts sample their clock and
/// pass `Millis` into the observation APIs.
pub type Millis = embedded_time::duration::Milliseconds<u64>;

/// Supertrait of [`embedded_time::Clock`] pinning the
/// type of "ticks" to u64
///
/// Hosts that already run an `embedded_time` clock can produce the
/// `now` arguments this crate wants with
/// `Millis::try_from(clock.try_now()?.duration_since_epoch())`.
pub trait Clock: embedded_time::Clock<T = u64> {}
impl<C: embedded_time::Clock<T = u64>> Clock for C {}

/// Seconds-denominated attribute value widened to [`Millis`].
pub(crate) fn secs(s: u32) -> Millis {
  Millis::new(s as u64 * 1_000)
}
