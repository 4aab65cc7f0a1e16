use toad_array::{AppendCopy, Array};
use toad_cursor::Cursor;
use toad_len::Len;
use toad_map::Map;

/// Message Code
pub mod code;

/// Message parsing errors
pub mod parse_error;

/// Message ID
pub mod id;

/// Message Options
pub mod opt;

/// Message Type
pub mod ty;

/// Message Token
pub mod token;

/// Message Version
pub mod ver;

pub use code::*;
pub use id::*;
pub use opt::*;
pub use parse_error::*;
pub use token::*;
pub use ty::*;
pub use ver::*;

use crate::from_bytes::TryConsumeBytes;
use crate::TryFromBytes;

/// Message payload
#[derive(Clone, Debug, PartialEq, PartialOrd, Default)]
pub struct Payload<C>(pub C);

/// Struct representing the first byte of a message.
///
/// ```text
/// CoAP version
/// |
/// |  Message type (request, response, empty)
/// |  |
/// |  |  Length of token, in bytes. (4-bit integer)
/// |  |  |
/// vv vv vvvv
/// 01 00 0000
/// ```
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub(crate) struct Byte1 {
  pub(crate) ver: Version,
  pub(crate) ty: Type,
  pub(crate) tkl: u8,
}

impl TryFrom<u8> for Byte1 {
  type Error = MessageParseError;

  fn try_from(b: u8) -> Result<Self, Self::Error> {
    let ver = b >> 6; // bits 0 & 1
    let ty = b >> 4 & 0b11; // bits 2 & 3
    let tkl = b & 0b1111u8; // last 4 bits

    Ok(Byte1 { ver: Version(ver),
               ty: Type::try_from(ty)?,
               tkl })
  }
}

fn opt_header_ext_len(n: usize) -> usize {
  match n {
    | n if n >= 269 => 2,
    | n if n >= 13 => 1,
    | _ => 0,
  }
}

impl<PayloadBytes, Options> Len for Message<PayloadBytes, Options>
  where PayloadBytes: Array<Item = u8> + AppendCopy<u8>,
        Options: OptionMap
{
  const CAPACITY: Option<usize> = None;

  fn len(&self) -> usize {
    let header_size = 4;
    let token_size = self.token.0.len();

    let mut opts_size = 0;
    let mut prev = 0u32;
    for (num, values) in self.opts.iter() {
      let mut first = true;
      for v in values.iter() {
        let delta = if first { (num.0 - prev) as usize } else { 0 };
        opts_size += 1 + opt_header_ext_len(delta) + opt_header_ext_len(v.0.len()) + v.0.len();
        first = false;
      }
      prev = num.0;
    }

    let payload_size = if self.payload.0.is_empty() {
      0
    } else {
      1 + self.payload.0.len()
    };

    header_size + token_size + opts_size + payload_size
  }

  fn is_full(&self) -> bool {
    false
  }
}

/// # `Message` struct
/// Low-level representation of a message that has been parsed from the raw binary format.
///
/// Note that `Message` is generic over 2 [`Array`]s:
///  - `PayloadBytes`: the byte buffer used to store the message's [`Payload`]
///  - `Options`: the [`OptionMap`] collection storing option values by [`OptNumber`]
///
/// Messages support both serializing to bytes and parsing from bytes, via the
/// provided [`TryFromBytes`] and [`TryIntoBytes`](crate::TryIntoBytes) traits.
///
/// ```
/// use newt_msg::{alloc::Message, Code, Id, Token, Type};
/// use newt_msg::{TryFromBytes, TryIntoBytes};
///
/// let msg = Message::new(Type::Con,
///                        Code::new(0, 1),
///                        Id(16),
///                        Token(tinyvec::array_vec!([u8; 8] => 254)));
///
/// let bytes: Vec<u8> = msg.clone().try_into_bytes().unwrap();
/// assert_eq!(Message::try_from_bytes(&bytes).unwrap(), msg);
/// ```
#[derive(Clone, PartialEq, Debug)]
pub struct Message<PayloadBytes, Options> {
  /// see [`Id`] for details
  pub id: Id,
  /// see [`Type`] for details
  pub ty: Type,
  /// see [`Version`] for details
  pub ver: Version,
  /// see [`Token`] for details
  pub token: Token,
  /// see [`Code`] for details
  pub code: Code,
  /// see [`OptionMap`] for details
  pub opts: Options,
  /// see [`Payload`]
  pub payload: Payload<PayloadBytes>,
}

impl<PayloadBytes, Options> Message<PayloadBytes, Options>
  where PayloadBytes: Array<Item = u8> + AppendCopy<u8>,
        Options: OptionMap
{
  /// Create a new message with no options or payload
  pub fn new(ty: Type, code: Code, id: Id, token: Token) -> Self {
    Self { id,
           ty,
           code,
           token,
           ver: Default::default(),
           opts: Default::default(),
           payload: Payload(Default::default()) }
  }

  /// Create the bare Acknowledgement for this message.
  ///
  /// Empty code, no token: the ack is correlated to this
  /// message purely by echoing its [`Id`].
  pub fn ack(&self) -> Self {
    Self { id: self.id,
           token: Token(Default::default()),
           ver: Default::default(),
           ty: Type::Ack,
           code: Code::new(0, 0),
           payload: Payload(Default::default()),
           opts: Default::default() }
  }

  /// Create the Reset reply for this message.
  ///
  /// Sent when a message was received but the context needed to
  /// process it is gone (or never existed).
  pub fn rst(&self) -> Self {
    Self { id: self.id,
           token: Token(Default::default()),
           ver: Default::default(),
           ty: Type::Reset,
           code: Code::new(0, 0),
           payload: Payload(Default::default()),
           opts: Default::default() }
  }
}

impl<Bytes, PayloadBytes, Options> TryFromBytes<Bytes> for Message<PayloadBytes, Options>
  where Bytes: AsRef<[u8]>,
        PayloadBytes: Array<Item = u8> + AppendCopy<u8>,
        Options: OptionMap
{
  type Error = MessageParseError;

  fn try_from_bytes(bytes: Bytes) -> Result<Self, Self::Error> {
    let total = bytes.as_ref().len();
    let mut bytes = Cursor::new(bytes);

    let Byte1 { tkl, ty, ver } = bytes.next()
                                      .ok_or_else(MessageParseError::eof)?
                                      .try_into()?;

    if tkl > 8 {
      return Err(Self::Error::InvalidTokenLength(tkl));
    }

    let code: Code = bytes.next().ok_or_else(MessageParseError::eof)?.into();
    let id: Id = Id::try_consume_bytes(&mut bytes)?;

    let token = bytes.take_exact(tkl as usize)
                     .ok_or_else(MessageParseError::eof)?;
    let token = tinyvec::ArrayVec::<[u8; 8]>::try_from(token).expect("tkl was checked to be <= 8");
    let token = Token(token);

    let mut opts = Options::default();
    let mut number = 0u32;
    let mut payload = Payload(PayloadBytes::default());

    loop {
      let head = bytes.peek_exact(1).map(|b| b[0]);

      match head {
        | None => break,
        | Some(0b11111111) => {
          bytes.next();

          let len = total - bytes.position();
          if len == 0 {
            return Err(Self::Error::PayloadMarkerWithNoPayload);
          }

          let mut p = PayloadBytes::reserve(len);
          p.append_copy(bytes.take_exact(len).expect("len is exactly the bytes remaining"));
          payload = Payload(p);
          break;
        },
        | Some(_) => {
          let Opt { delta, value } =
            Opt::try_consume_bytes(&mut bytes).map_err(Self::Error::OptParseError)?;

          number += delta.0 as u32;

          match opts.get_mut(&OptNumber(number)) {
            | Some(values) if values.is_full() => {
              return Err(Self::Error::OptParseError(OptParseError::TooManyOptions))
            },
            | Some(values) => values.push(value),
            | None => {
              let mut values = Options::OptValues::default();
              values.push(value);
              opts.insert(OptNumber(number), values)
                  .map_err(|_| Self::Error::OptParseError(OptParseError::TooManyOptions))?;
            },
          }
        },
      }
    }

    Ok(Message { id,
                 ty,
                 ver,
                 code,
                 token,
                 opts,
                 payload })
  }
}
