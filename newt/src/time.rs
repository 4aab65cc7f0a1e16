use embedded_time::clock::Error;
use embedded_time::Instant;

/// A duration, in milliseconds
pub type Millis = embedded_time::duration::Milliseconds<u64>;

/// Supertrait of [`embedded_time::Clock`] pinning the
/// type of "ticks" to u64
pub trait Clock: embedded_time::Clock<T = u64> {}
impl<C: embedded_time::Clock<T = u64>> Clock for C {}

/// Data associated with a timestamp
#[derive(Debug)]
pub struct Stamped<C: Clock, T>(pub T, pub Instant<C>);

impl<C: Clock, T: PartialEq> PartialEq for Stamped<C, T> {
  fn eq(&self, other: &Self) -> bool {
    self.0 == other.0 && self.1 == other.1
  }
}

impl<C: Clock, T: Eq> Eq for Stamped<C, T> {}

impl<C: Clock, T: PartialOrd> PartialOrd for Stamped<C, T> {
  fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
    use core::cmp::Ordering;

    match self.0.partial_cmp(&other.0) {
      | Some(Ordering::Equal) => Some(self.1.cmp(&other.1)),
      | ne => ne,
    }
  }
}

impl<C: Clock, T: Ord> Ord for Stamped<C, T> {
  fn cmp(&self, other: &Self) -> core::cmp::Ordering {
    use core::cmp::Ordering;

    match self.0.cmp(&other.0) {
      | Ordering::Equal => self.1.cmp(&other.1),
      | ne => ne,
    }
  }
}

impl<C: Clock, T: Default> Default for Stamped<C, T> {
  fn default() -> Self {
    Self(T::default(), Instant::new(0))
  }
}

impl<C: Clock, T: Clone> Clone for Stamped<C, T> {
  fn clone(&self) -> Self {
    Self(self.0.clone(), self.1)
  }
}

impl<C: Clock, T: Copy> Copy for Stamped<C, T> {}

impl<C: Clock, T> Stamped<C, T> {
  /// Stamp a value with the current time
  pub fn new(clock: &C, t: T) -> Result<Self, Error> {
    clock.try_now().map(|now| Self(t, now))
  }

  /// Borrow the stamped value
  pub fn data(&self) -> &T {
    &self.0
  }

  /// The time the value was stamped with
  pub fn time(&self) -> Instant<C> {
    self.1
  }

  /// Discard the timestamp
  pub fn discard_timestamp(self) -> T {
    self.0
  }
}
