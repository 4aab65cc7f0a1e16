use core::fmt::Debug;
use core::hash::Hash;

use toad_array::{AppendCopy, Array};
use toad_cursor::Cursor;
use toad_len::Len;
use toad_map::Map;

use crate::from_bytes::TryConsumeBytes;

/// Errors that can occur when parsing options
pub mod parse_error;
pub use parse_error::*;

/// Known option numbers & typed accessors
pub mod known;
pub use known::*;

pub(crate) fn parse_opt_len_or_delta<A: AsRef<[u8]>>(head: u8,
                                                     bytes: &mut Cursor<A>,
                                                     reserved_err: OptParseError)
                                                     -> Result<u16, OptParseError> {
  match head {
    | 13 => {
      let n = bytes.next().ok_or_else(OptParseError::eof)?;
      Ok((n as u16) + 13)
    },
    | 14 => match bytes.take_exact(2) {
      | Some(&[a, b]) => Ok(u16::from_be_bytes([a, b]) + 269),
      | _ => Err(OptParseError::eof()),
    },
    | 15 => Err(reserved_err),
    | _ => Ok(head as u16),
  }
}

/// Low-level representation of a freshly parsed CoAP Option
///
/// This struct just stores data parsed directly from the message on the wire,
/// and does not compute or store the Option Number; [`Message`](crate::Message)
/// accumulates the deltas into [`OptNumber`]s as it parses.
#[derive(Clone, PartialEq, PartialOrd, Debug, Default)]
pub struct Opt<C> {
  /// See [`OptDelta`]
  pub delta: OptDelta,
  /// See [`OptValue`]
  pub value: OptValue<C>,
}

impl<C: Array<Item = u8>> Len for Opt<C> {
  const CAPACITY: Option<usize> = None;

  fn len(&self) -> usize {
    let header_size = 1;
    let delta_size = match self.delta.0 {
      | n if n >= 269 => 2,
      | n if n >= 13 => 1,
      | _ => 0,
    };

    let value_len_size = match self.value.0.len() {
      | n if n >= 269 => 2,
      | n if n >= 13 => 1,
      | _ => 0,
    };

    header_size + delta_size + value_len_size + self.value.0.len()
  }

  fn is_full(&self) -> bool {
    false
  }
}

impl<C: Array<Item = u8>> Opt<C> {
  /// Given a collection to [`Extend`] and an Opt, add that Opt's bytes to the collection.
  pub fn extend_bytes(self, bytes: &mut impl Extend<u8>) {
    let (del, del_bytes) = crate::to_bytes::opt_len_or_delta(self.delta.0);
    let (len, len_bytes) = crate::to_bytes::opt_len_or_delta(self.value.0.len() as u16);
    let del = del << 4;

    let header = del | len;

    bytes.extend(Some(header));

    if let Some(bs) = del_bytes {
      bytes.extend(bs);
    }

    if let Some(bs) = len_bytes {
      bytes.extend(bs);
    }

    bytes.extend(self.value.0);
  }
}

impl<Bytes: AsRef<[u8]>, V: Array<Item = u8> + AppendCopy<u8>> TryConsumeBytes<Bytes> for Opt<V> {
  type Error = OptParseError;

  fn try_consume_bytes(bytes: &mut Cursor<Bytes>) -> Result<Self, Self::Error> {
    let byte1 = bytes.next().ok_or_else(OptParseError::eof)?;

    // NOTE: Delta **MUST** be consumed before Value.
    let delta = parse_opt_len_or_delta(byte1 >> 4,
                                       bytes,
                                       OptParseError::OptionDeltaReservedValue(15))?;
    let delta = OptDelta(delta);

    let len = parse_opt_len_or_delta(byte1 & 0b00001111,
                                     bytes,
                                     OptParseError::ValueLengthReservedValue(15))?
              as usize;

    let mut value = V::reserve(len);
    match bytes.take_exact(len) {
      | Some(taken) => value.append_copy(taken),
      | None => return Err(Self::Error::UnexpectedEndOfStream),
    }

    let value = OptValue(value);

    Ok(Opt { delta, value })
  }
}

/// The "Option Delta" is the difference between this Option's Number
/// and the previous Option's number.
///
/// This is just used to compute the Option Number, identifying which
/// Option is being set (e.g. Content-Format has a Number of 12)
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct OptDelta(pub u16);

/// # Option Number
///
/// Identifies which option is being set (e.g. Uri-Path has a Number of 11).
///
/// On the wire options are identified by the running sum of deltas,
/// sorted ascending; in memory we store the absolute number.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct OptNumber(pub u32);

/// Whether or not this option may be ignored by the receiver
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptionMustBeProcessed {
  /// This option must be processed,
  /// and a message that ignores it
  /// will be rejected.
  ///
  /// Corresponds to the option being "critical"
  /// in strict CoAP terms
  Yes,
  /// This option does not _need_ to
  /// be processed,
  /// and a message that ignores it
  /// will be processed anyway.
  ///
  /// Corresponds to the option being "elective"
  /// in strict CoAP terms
  No,
}

/// Whether or not this option may be forwarded blindly by
/// a proxy that does not support processing it
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum WhenOptionUnsupportedByProxy {
  /// This option /must be/ processed & understood by proxies
  /// and may not be forwarded blindly to their destination.
  ///
  /// Corresponds to the option being "UnSafe" to forward
  /// in strict CoAP terms
  Error,
  /// This option may not be processed & understood by proxies
  /// and may be forwarded blindly to their destination.
  ///
  /// Corresponds to the option being "SafeToForward"
  /// in strict CoAP terms
  Forward,
}

impl OptNumber {
  /// Whether or not this option may be ignored by a server
  pub fn must_be_processed(&self) -> OptionMustBeProcessed {
    #[allow(clippy::wildcard_in_or_patterns)] // will only ever be 0 or 1
    match self.0 & 0b1 {
      | 1 => OptionMustBeProcessed::Yes,
      | 0 | _ => OptionMustBeProcessed::No,
    }
  }

  /// Whether or not this option may be forwarded blindly by
  /// a proxy that does not support processing it
  pub fn when_unsupported_by_proxy(&self) -> WhenOptionUnsupportedByProxy {
    #[allow(clippy::wildcard_in_or_patterns)] // will only ever be 0 or 1
    match (self.0 & 0b10) >> 1 {
      | 1 => WhenOptionUnsupportedByProxy::Error,
      | 0 | _ => WhenOptionUnsupportedByProxy::Forward,
    }
  }
}

/// # Option Value
///
/// The bytes of an option; the meaning is given by the [`OptNumber`]
/// it is stored under.
#[derive(Default, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct OptValue<C>(pub C);

impl<C: Array<Item = u8>> OptValue<C> {
  /// Read the value as a utf8 string
  pub fn as_str(&self) -> Option<&str> {
    core::str::from_utf8(&self.0).ok()
  }
}

/// Errors encounterable when setting an option on a message
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SetError {
  /// The backing option collection is at capacity and
  /// cannot fit any more options.
  ///
  /// Only applicable to heapless backing structures.
  CapacityExhausted,
}

/// The collection of options in a [`Message`](crate::Message);
/// a [`Map`] from [`OptNumber`] to one or more [`OptValue`]s.
///
/// Iteration order **must** be ascending by option number
/// (`BTreeMap` satisfies this for free), since the wire format
/// delta-encodes numbers in ascending order.
pub trait OptionMap
  where Self: Map<OptNumber, <Self as OptionMap>::OptValues> + Clone + Debug + PartialEq + 'static
{
  /// Byte buffer backing a single option value
  type OptValue: Array<Item = u8> + AppendCopy<u8> + Clone + Debug + PartialEq + Hash + 'static;

  /// Collection of the values sharing one option number
  type OptValues: Array<Item = OptValue<Self::OptValue>> + Clone + Debug + PartialEq;
}

#[cfg(feature = "alloc")]
impl<B> OptionMap for std_alloc::collections::BTreeMap<OptNumber, std_alloc::vec::Vec<OptValue<B>>>
  where B: Array<Item = u8> + AppendCopy<u8> + Clone + Debug + PartialEq + Hash + 'static
{
  type OptValue = B;
  type OptValues = std_alloc::vec::Vec<OptValue<B>>;
}

#[cfg(test)]
mod tests {
  use std_alloc::vec;
  use std_alloc::vec::Vec;

  use super::*;

  #[test]
  fn parse_opt() {
    let mut opt_bytes = Cursor::new([0b00010001, 0b00000001]);
    let opt = Opt::try_consume_bytes(&mut opt_bytes).unwrap();
    assert_eq!(opt,
               Opt { delta: OptDelta(1),
                     value: OptValue(vec![1]) });

    let mut opt_bytes = Cursor::new([0b11010001, 0b00000001, 0b00000001]);
    let opt = Opt::try_consume_bytes(&mut opt_bytes).unwrap();
    assert_eq!(opt,
               Opt { delta: OptDelta(14),
                     value: OptValue(vec![1]) });

    let mut opt_bytes = Cursor::new([0b11100001, 0b00000000, 0b00000001, 0b00000001]);
    let opt = Opt::try_consume_bytes(&mut opt_bytes).unwrap();
    assert_eq!(opt,
               Opt { delta: OptDelta(270),
                     value: OptValue(vec![1]) });
  }

  #[test]
  fn parse_opt_value_longer_than_buffer() {
    // declared length 5, only 1 byte follows
    let mut opt_bytes = Cursor::new([0b00010101, 0b00000001]);
    let opt = Opt::<Vec<u8>>::try_consume_bytes(&mut opt_bytes);
    assert_eq!(opt, Err(OptParseError::UnexpectedEndOfStream));
  }

  #[test]
  fn parse_opt_reserved_nibbles() {
    let mut opt_bytes = Cursor::new([0b11110001, 0b00000001]);
    assert_eq!(Opt::<Vec<u8>>::try_consume_bytes(&mut opt_bytes),
               Err(OptParseError::OptionDeltaReservedValue(15)));

    let mut opt_bytes = Cursor::new([0b00011111, 0b00000001]);
    assert_eq!(Opt::<Vec<u8>>::try_consume_bytes(&mut opt_bytes),
               Err(OptParseError::ValueLengthReservedValue(15)));
  }

  #[test]
  fn opt_number_qualities() {
    // critical, safe-to-fwd
    let if_match = OptNumber(1);

    // critical, unsafe-to-fwd
    let uri_host = OptNumber(3);

    // elective, safe-to-fwd
    let etag = OptNumber(4);
    let size1 = OptNumber(60);

    [&if_match, &uri_host].into_iter()
                          .for_each(|num| {
                            assert_eq!(num.must_be_processed(), OptionMustBeProcessed::Yes);
                          });

    [&etag, &size1].into_iter().for_each(|num| {
                                 assert_eq!(num.must_be_processed(), OptionMustBeProcessed::No);
                               });

    [&if_match, &etag, &size1].into_iter().for_each(|num| {
                                            assert_eq!(num.when_unsupported_by_proxy(),
                                                       WhenOptionUnsupportedByProxy::Forward);
                                          });

    [&uri_host].into_iter().for_each(|num| {
                             assert_eq!(num.when_unsupported_by_proxy(),
                                        WhenOptionUnsupportedByProxy::Error);
                           });
  }
}
