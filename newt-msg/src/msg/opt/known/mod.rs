use tinyvec::ArrayVec;
use toad_array::{AppendCopy, Array};
use toad_len::Len;
use toad_map::{InsertError, Map};

use crate::{Message, OptNumber, OptValue, OptionMap, SetError};

/// The Block option value
pub mod block;
pub use block::Block;

/// The Observe option value
pub mod observe;

macro_rules! opt {
  (#[doc = $doc:expr] $name:ident = $n:literal) => {
    #[doc = $doc]
    #[allow(clippy::zero_prefixed_literal)]
    pub const $name: crate::OptNumber = crate::OptNumber($n);
  };
}

pub(crate) use opt;

/// Non-repeatable options
pub mod no_repeat {
  use super::opt;

  opt!(#[doc = "Uri-Host"] HOST = 3);
  opt!(#[doc = "If-None-Match"] IF_NONE_MATCH = 5);
  opt!(#[doc = "Observe; an [`observe::Action`](super::observe::Action) on requests, a \
                [`observe::Sequence`](super::observe::Sequence) on notifications"]
       OBSERVE = 6);
  opt!(#[doc = "Uri-Port"] PORT = 7);
  opt!(#[doc = "Content-Format"] CONTENT_FORMAT = 12);
  opt!(#[doc = "Max-Age"] MAX_AGE = 14);
  opt!(#[doc = "Accept"] ACCEPT = 17);
  opt!(#[doc = "Block2; descriptor/control of response-body blockwise transfer"] BLOCK2 = 23);
  opt!(#[doc = "Block1; descriptor/control of request-body blockwise transfer"] BLOCK1 = 27);
  opt!(#[doc = "Size2; total response body size hint"] SIZE2 = 28);
  opt!(#[doc = "Proxy-Uri"] PROXY_URI = 35);
  opt!(#[doc = "Proxy-Scheme"] PROXY_SCHEME = 39);
  opt!(#[doc = "Size1; total request body size hint"] SIZE1 = 60);
}

/// Repeatable options
pub mod repeat {
  use super::opt;

  opt!(#[doc = "If-Match"] IF_MATCH = 1);
  opt!(#[doc = "ETag"] ETAG = 4);
  opt!(#[doc = "Location-Path"] LOCATION_PATH = 8);
  opt!(#[doc = "Uri-Path"] PATH = 11);
  opt!(#[doc = "Uri-Query"] QUERY = 15);
  opt!(#[doc = "Location-Query"] LOCATION_QUERY = 20);
}

pub(crate) fn uint_to_bytes(n: u32) -> ArrayVec<[u8; 4]> {
  let mut out = ArrayVec::new();
  n.to_be_bytes().into_iter()
                 .skip_while(|b| *b == 0)
                 .for_each(|b| out.push(b));
  out
}

pub(crate) fn uint_from_bytes(bytes: &[u8]) -> Option<u32> {
  if bytes.len() > 4 {
    return None;
  }

  Some(bytes.iter().fold(0u32, |n, b| (n << 8) | *b as u32))
}

/// Typed access to the options this crate understands.
///
/// All accessors are plain reads/writes of the option map; an
/// unrecognized option number is never touched or dropped by them,
/// so vendor options round-trip untouched next to the known ones.
pub trait MessageOptions {
  /// Collection of the values sharing one option number
  type OptValues;

  /// Byte buffer backing a single option value
  type Bytes: Array<Item = u8>;

  /// Read all values of an option
  fn get(&self, n: OptNumber) -> Option<&Self::OptValues>;

  /// Read the first value of an option
  fn get_first(&self, n: OptNumber) -> Option<&OptValue<Self::Bytes>>;

  /// Replace all values of an option with a single value
  fn set(&mut self, n: OptNumber, value: OptValue<Self::Bytes>) -> Result<(), SetError>;

  /// Add a value for a (repeatable) option
  fn add(&mut self, n: OptNumber, value: OptValue<Self::Bytes>) -> Result<(), SetError>;

  /// Remove all values of an option
  fn remove(&mut self, n: OptNumber) -> Option<Self::OptValues>;

  /// Read Uri-Path
  fn path(&self) -> Option<&str>;

  /// Set Uri-Path
  fn set_path(&mut self, path: &str) -> Result<(), SetError>;

  /// Read Block1 (request body fragmentation)
  fn block1(&self) -> Option<Block>;

  /// Set Block1
  fn set_block1(&mut self, size: u16, num: u32, more: bool) -> Result<(), SetError>;

  /// Read Block2 (response body fragmentation)
  fn block2(&self) -> Option<Block>;

  /// Set Block2
  fn set_block2(&mut self, size: u16, num: u32, more: bool) -> Result<(), SetError>;

  /// Read Observe as a request action (register/deregister)
  fn observe(&self) -> Option<observe::Action>;

  /// Set Observe to a request action
  fn set_observe(&mut self, action: observe::Action) -> Result<(), SetError>;

  /// Read Observe as a notification sequence number
  fn observe_seq(&self) -> Option<observe::Sequence>;

  /// Set Observe to a notification sequence number
  fn set_observe_seq(&mut self, seq: observe::Sequence) -> Result<(), SetError>;

  /// Read Size1 (total request body size)
  fn size1(&self) -> Option<u32>;

  /// Set Size1
  fn set_size1(&mut self, size: u32) -> Result<(), SetError>;

  /// Read Size2 (total response body size)
  fn size2(&self) -> Option<u32>;

  /// Set Size2
  fn set_size2(&mut self, size: u32) -> Result<(), SetError>;
}

impl<P, O> MessageOptions for Message<P, O>
  where P: Array<Item = u8> + AppendCopy<u8>,
        O: OptionMap
{
  type OptValues = O::OptValues;
  type Bytes = O::OptValue;

  fn get(&self, n: OptNumber) -> Option<&O::OptValues> {
    self.opts.get(&n)
  }

  fn get_first(&self, n: OptNumber) -> Option<&OptValue<O::OptValue>> {
    self.get(n).and_then(|vs| vs.iter().next())
  }

  fn set(&mut self, n: OptNumber, value: OptValue<O::OptValue>) -> Result<(), SetError> {
    self.opts.remove(&n);

    let mut values = O::OptValues::default();
    values.push(value);

    match self.opts.insert(n, values) {
      | Ok(()) | Err(InsertError::Exists(_)) => Ok(()),
      | Err(InsertError::CapacityExhausted) => Err(SetError::CapacityExhausted),
    }
  }

  fn add(&mut self, n: OptNumber, value: OptValue<O::OptValue>) -> Result<(), SetError> {
    match self.opts.get_mut(&n) {
      | Some(values) if values.is_full() => Err(SetError::CapacityExhausted),
      | Some(values) => {
        values.push(value);
        Ok(())
      },
      | None => self.set(n, value),
    }
  }

  fn remove(&mut self, n: OptNumber) -> Option<O::OptValues> {
    self.opts.remove(&n)
  }

  fn path(&self) -> Option<&str> {
    self.get_first(repeat::PATH).and_then(|v| v.as_str())
  }

  fn set_path(&mut self, path: &str) -> Result<(), SetError> {
    self.set(repeat::PATH, OptValue(path.bytes().collect()))
  }

  fn block1(&self) -> Option<Block> {
    self.get_first(no_repeat::BLOCK1)
        .and_then(|v| Block::from_bytes(&v.0))
  }

  fn set_block1(&mut self, size: u16, num: u32, more: bool) -> Result<(), SetError> {
    self.set(no_repeat::BLOCK1,
             OptValue(Block::new(size, num, more).bytes().into_iter().collect()))
  }

  fn block2(&self) -> Option<Block> {
    self.get_first(no_repeat::BLOCK2)
        .and_then(|v| Block::from_bytes(&v.0))
  }

  fn set_block2(&mut self, size: u16, num: u32, more: bool) -> Result<(), SetError> {
    self.set(no_repeat::BLOCK2,
             OptValue(Block::new(size, num, more).bytes().into_iter().collect()))
  }

  fn observe(&self) -> Option<observe::Action> {
    self.get_first(no_repeat::OBSERVE).and_then(|v| match &*v.0 {
                                        | [] => Some(observe::Action::Register),
                                        | [b] => observe::Action::from_byte(*b),
                                        | _ => None,
                                      })
  }

  fn set_observe(&mut self, action: observe::Action) -> Result<(), SetError> {
    let byte: u8 = action.into();
    self.set(no_repeat::OBSERVE,
             OptValue(uint_to_bytes(byte as u32).into_iter().collect()))
  }

  fn observe_seq(&self) -> Option<observe::Sequence> {
    self.get_first(no_repeat::OBSERVE)
        .and_then(|v| uint_from_bytes(&v.0))
        .map(observe::Sequence)
  }

  fn set_observe_seq(&mut self, seq: observe::Sequence) -> Result<(), SetError> {
    self.set(no_repeat::OBSERVE,
             OptValue(uint_to_bytes(seq.0).into_iter().collect()))
  }

  fn size1(&self) -> Option<u32> {
    self.get_first(no_repeat::SIZE1).and_then(|v| uint_from_bytes(&v.0))
  }

  fn set_size1(&mut self, size: u32) -> Result<(), SetError> {
    self.set(no_repeat::SIZE1,
             OptValue(uint_to_bytes(size).into_iter().collect()))
  }

  fn size2(&self) -> Option<u32> {
    self.get_first(no_repeat::SIZE2).and_then(|v| uint_from_bytes(&v.0))
  }

  fn set_size2(&mut self, size: u32) -> Result<(), SetError> {
    self.set(no_repeat::SIZE2,
             OptValue(uint_to_bytes(size).into_iter().collect()))
  }
}
