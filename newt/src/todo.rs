//! Future inherent methods on structs in other crates
use core::fmt::Write;

use tinyvec::ArrayVec;
use toad_writable::Writable;

/// A [`Map`](toad_map::Map) stored completely on the stack
pub type StackMap<K, V, const N: usize> = ArrayVec<[(K, V); N]>;

/// Stack-allocated mutable string with a fixed capacity
#[derive(Debug, Copy, Clone, Default)]
pub struct String<const N: usize>(Writable<ArrayVec<[u8; N]>>);

/// Stack-allocated string with a capacity of 1KB
pub type String1Kb = String<1000>;

impl<const N: usize> String<N> {
  /// Alias for [`AsRef`]
  pub fn as_str(&self) -> &str {
    self.as_ref()
  }

  /// Render format arguments into a new string,
  /// discarding anything that does not fit
  pub fn fmt(args: core::fmt::Arguments) -> Self {
    let mut s = Self::default();
    s.write_fmt(args).ok();
    s
  }
}

impl<const N: usize> PartialEq for String<N> {
  fn eq(&self, other: &Self) -> bool {
    self.0.as_str() == other.0.as_str()
  }
}

impl<const N: usize> Eq for String<N> {}

impl<const N: usize> core::fmt::Write for String<N> {
  fn write_str(&mut self, s: &str) -> core::fmt::Result {
    // a log line that doesn't fit is truncated, not an error
    self.0.write_str(s).ok();
    Ok(())
  }
}

impl<const N: usize> AsRef<str> for String<N> {
  fn as_ref(&self) -> &str {
    self.0.as_str()
  }
}

impl<const N: usize> From<&str> for String<N> {
  fn from(s: &str) -> Self {
    let mut out = Self::default();
    out.write_str(s).ok();
    out
  }
}

impl<const N: usize> core::fmt::Display for String<N> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn string_fmt_and_truncation() {
    let s = String::<8>::fmt(format_args!("{}-{}", 12, 34));
    assert_eq!(s.as_str(), "12-34");

    let long = String::<4>::fmt(format_args!("{}", "much too long"));
    assert!(long.as_str().len() <= 4);
  }
}
