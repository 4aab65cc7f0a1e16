use tinyvec::ArrayVec;
use toad_array::{AppendCopy, Array};
use toad_len::Len;

use crate::*;

/// Trait allowing fallible conversion into bytes
pub trait TryIntoBytes {
  /// Error type yielded if conversion fails
  type Error;

  /// Try to convert into a collection of bytes
  ///
  /// ```
  /// use newt_msg::{alloc::Message, Code, Id, Token, Type, TryIntoBytes};
  ///
  /// let msg = Message::new(Type::Con,
  ///                        Code::new(0, 1),
  ///                        Id(1),
  ///                        Token(Default::default()));
  ///
  /// let bytes: Vec<u8> = msg.try_into_bytes().unwrap();
  /// ```
  fn try_into_bytes<C: Array<Item = u8>>(self) -> Result<C, Self::Error>;
}

/// Errors encounterable serializing to bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageToBytesError {
  /// Reserved capacity was not enough for size of message
  TooLong {
    /// Capacity of the byte buffer
    capacity: usize,
    /// Actual size of the serialized message
    size: usize,
  },
  /// The gap between two adjacent option numbers was too
  /// large for the wire format's extended delta encoding
  OptionDeltaTooLarge(OptNumber),
}

impl<PayloadBytes, Options> TryIntoBytes for Message<PayloadBytes, Options>
  where PayloadBytes: Array<Item = u8> + AppendCopy<u8>,
        Options: OptionMap
{
  type Error = MessageToBytesError;

  fn try_into_bytes<C: Array<Item = u8>>(self) -> Result<C, Self::Error> {
    let size: usize = self.len();
    let mut bytes = C::reserve(size);

    if let Some(max) = C::CAPACITY {
      if max < size {
        return Err(Self::Error::TooLong { capacity: max,
                                          size });
      }
    }

    let Message { id,
                  ty,
                  ver,
                  token,
                  code,
                  opts,
                  payload, } = self;

    let byte1: u8 = Byte1 { tkl: token.0.len() as u8,
                            ver,
                            ty }.into();
    let code: u8 = code.into();
    let id: [u8; 2] = id.into();

    bytes.extend(Some(byte1));
    bytes.extend(Some(code));
    bytes.extend(id);
    bytes.extend(token.0);

    let mut prev = 0u32;
    for (num, values) in opts.into_iter() {
      let mut first = true;
      for value in values.into_iter() {
        let delta = if first { num.0 - prev } else { 0 };
        let delta = u16::try_from(delta).map_err(|_| Self::Error::OptionDeltaTooLarge(num))?;

        Opt { delta: OptDelta(delta),
              value }.extend_bytes(&mut bytes);
        first = false;
      }
      prev = num.0;
    }

    if !payload.0.is_empty() {
      bytes.extend(Some(0b11111111));
      bytes.extend(payload.0);
    }

    Ok(bytes)
  }
}

pub(crate) fn opt_len_or_delta(val: u16) -> (u8, Option<ArrayVec<[u8; 2]>>) {
  match val {
    | n if n >= 269 => {
      let mut bytes = ArrayVec::new();
      bytes.extend((n - 269).to_be_bytes());
      (14, Some(bytes))
    },
    | n if n >= 13 => {
      let mut bytes = ArrayVec::new();
      bytes.push((n as u8) - 13);
      (13, Some(bytes))
    },
    | n => (n as u8, None),
  }
}

impl From<Id> for [u8; 2] {
  fn from(id: Id) -> [u8; 2] {
    id.0.to_be_bytes()
  }
}

impl From<Type> for u8 {
  fn from(t: Type) -> u8 {
    use Type::*;
    match t {
      | Con => 0,
      | Non => 1,
      | Ack => 2,
      | Reset => 3,
    }
  }
}

impl From<Byte1> for u8 {
  fn from(b: Byte1) -> u8 {
    let ver = b.ver.0 << 6;
    let ty = u8::from(b.ty) << 4;
    let tkl = b.tkl;

    ver | ty | tkl
  }
}

#[cfg(test)]
mod tests {
  use std_alloc::vec::Vec;

  use super::*;

  macro_rules! assert_eqb {
    ($actual:expr, $expected:expr) => {
      if $actual != $expected {
        panic!("expected {:08b} to equal {:08b}", $actual, $expected)
      }
    };
  }

  macro_rules! assert_eqb_iter {
    ($actual:expr, $expected:expr) => {
      if $actual.iter().ne($expected.iter()) {
        panic!("expected {:?} to equal {:?}",
               $actual.into_iter()
                      .map(|b| format!("{:08b}", b))
                      .collect::<Vec<_>>(),
               $expected.into_iter()
                        .map(|b| format!("{:08b}", b))
                        .collect::<Vec<_>>())
      }
    };
  }

  #[test]
  fn msg() {
    let (msg, expected) = crate::test_msg();
    let actual: Vec<u8> = msg.try_into_bytes().unwrap();
    assert_eqb_iter!(actual, expected);
  }

  #[test]
  fn byte_1() {
    let byte = Byte1 { ver: Version(1),
                       ty: Type::Ack,
                       tkl: 3 };
    let actual: u8 = byte.into();
    let expected = 0b_01_10_0011u8;
    assert_eqb!(actual, expected)
  }

  #[test]
  fn code() {
    let code = Code { class: 2,
                      detail: 5 };
    let actual: u8 = code.into();
    let expected = 0b0100_0101_u8;
    assert_eqb!(actual, expected)
  }

  #[test]
  fn id() {
    let id = Id(16);
    let actual = u16::from_be_bytes(id.into());
    assert_eq!(actual, 16)
  }

  #[test]
  fn opt() {
    use core::iter::repeat;
    let cases: [(u16, Vec<u8>, Vec<u8>); 4] =
      [(24,
        repeat(1).take(100).collect(),
        [[0b1101_1101u8, 24 - 13, 100 - 13].as_ref(),
         repeat(1).take(100).collect::<Vec<u8>>().as_ref()].concat()),
       (1, vec![1], vec![0b0001_0001, 1]),
       (24, vec![1], vec![0b1101_0001, 11, 1]),
       (24,
        repeat(1).take(300).collect(),
        [[0b1101_1110, 24 - 13].as_ref(),
         (300u16 - 269).to_be_bytes().as_ref(),
         repeat(1).take(300).collect::<Vec<u8>>().as_ref()].concat())];

    cases.into_iter().for_each(|(delta, values, expected)| {
                       let opt = Opt::<Vec<u8>> { delta: OptDelta(delta),
                                                  value: OptValue(values.into_iter().collect()) };
                       let mut actual = Vec::<u8>::new();
                       opt.extend_bytes(&mut actual);
                       assert_eqb_iter!(actual, expected)
                     });
  }

  #[test]
  fn no_payload_marker() {
    let msg = alloc::Message::new(Type::Con,
                                  Code { class: 2,
                                         detail: 5 },
                                  Id(0),
                                  Token(Default::default()));

    assert_ne!(msg.try_into_bytes::<Vec<_>>().unwrap().last(),
               Some(&0b11111111));
  }

  #[test]
  fn repeated_options_delta_encode_as_zero() {
    use crate::TryFromBytes;

    let mut msg = alloc::Message::new(Type::Con, Code::new(0, 1), Id(9), Token(Default::default()));
    msg.opts
       .insert(OptNumber(15),
               vec![OptValue(b"a=1".to_vec()), OptValue(b"b=2".to_vec())])
       .unwrap();

    let bytes: Vec<u8> = msg.clone().try_into_bytes().unwrap();

    // header (4) | opt 1: nibble 13, ext 2, 3 value bytes | opt 2: delta 0
    assert_eq!(bytes[4] >> 4, 13);
    assert_eq!(bytes[5], 15 - 13);
    assert_eq!(bytes[9] >> 4, 0);

    let parsed = alloc::Message::try_from_bytes(&bytes).unwrap();
    assert_eq!(parsed, msg);
  }
}
