use newt_msg::{Id, Payload, Token, Type};

use crate::platform::{self, PlatformTypes};
use crate::req::Req;

/// Response codes
pub mod code;

/// A response
pub struct Resp<P>(platform::Message<P>) where P: PlatformTypes;

impl<P> AsRef<platform::Message<P>> for Resp<P> where P: PlatformTypes
{
  fn as_ref(&self) -> &platform::Message<P> {
    &self.0
  }
}

impl<P> AsMut<platform::Message<P>> for Resp<P> where P: PlatformTypes
{
  fn as_mut(&mut self) -> &mut platform::Message<P> {
    &mut self.0
  }
}

impl<P> core::fmt::Debug for Resp<P> where P: PlatformTypes
{
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_tuple("Resp").field(&self.0).finish()
  }
}

impl<P> Clone for Resp<P> where P: PlatformTypes
{
  fn clone(&self) -> Self {
    Self(self.0.clone())
  }
}

impl<P> PartialEq for Resp<P> where P: PlatformTypes
{
  fn eq(&self, other: &Self) -> bool {
    self.0 == other.0
  }
}

impl<P: PlatformTypes> Resp<P> {
  /// Obtain a reference to the inner message
  pub fn msg(&self) -> &platform::Message<P> {
    &self.0
  }

  /// Obtain a mutable reference to the inner message
  pub fn msg_mut(&mut self) -> &mut platform::Message<P> {
    &mut self.0
  }

  /// Create a new response for a given request.
  ///
  /// If the request is CONfirmable, this will return Some(ACK).
  ///
  /// If the request is NONconfirmable, this will return Some(NON).
  ///
  /// If the request is EMPTY or RESET, this will return None.
  pub fn for_request(req: &Req<P>) -> Option<Self> {
    match req.msg_type() {
      | Type::Con => Some(Self::ack(req)),
      | Type::Non => Some(Self::non(req)),
      | _ => None,
    }
  }

  /// Create a response ACKnowledging an incoming request.
  ///
  /// An ack response must be used when you receive
  /// a CON request.
  ///
  /// You may choose to include the response payload in an ACK
  /// (a "piggybacked" response), or send the ACK empty and follow
  /// up with a CON response later.
  pub fn ack(req: &Req<P>) -> Self {
    let msg = platform::Message::<P> { ty: Type::Ack,
                                       id: req.msg().id,
                                       opts: Default::default(),
                                       code: code::CONTENT,
                                       ver: Default::default(),
                                       payload: Payload(Default::default()),
                                       token: req.msg().token };

    Self(msg)
  }

  /// Create a CONfirmable response for an incoming request.
  ///
  /// A confirmable response should be used when
  /// you receive a NON request and want to ensure
  /// the client receives your response.
  ///
  /// The engine will continually retry sending this until
  /// an ACKnowledgement from the client is received.
  pub fn con(req: &Req<P>) -> Self {
    let msg = platform::Message::<P> { ty: Type::Con,
                                       id: Id(0),
                                       opts: Default::default(),
                                       code: code::CONTENT,
                                       ver: Default::default(),
                                       payload: Payload(Default::default()),
                                       token: req.msg().token };

    Self(msg)
  }

  /// Create a NONconfirmable response for an incoming request.
  ///
  /// A non-confirmable response should be used when:
  /// - you receive a NON request and don't need to ensure the client received the response
  /// - you receive a CON request and don't need to ensure the client received the response (**you _must_ ACK this type of request separately**)
  pub fn non(req: &Req<P>) -> Self {
    let msg = platform::Message::<P> { ty: Type::Non,
                                       id: Id(0),
                                       opts: Default::default(),
                                       code: code::CONTENT,
                                       ver: Default::default(),
                                       payload: Payload(Default::default()),
                                       token: req.msg().token };

    Self(msg)
  }

  /// Get the payload's raw bytes
  pub fn payload(&self) -> impl Iterator<Item = &u8> {
    self.0.payload.0.iter()
  }

  /// Get the message type
  pub fn msg_type(&self) -> Type {
    self.0.ty
  }

  /// Get the message id
  pub fn msg_id(&self) -> Id {
    self.0.id
  }

  /// Get the message token
  pub fn token(&self) -> Token {
    self.0.token
  }

  /// Get the payload and attempt to interpret it as an ASCII string
  #[cfg(feature = "alloc")]
  pub fn payload_string(&self) -> Result<std_alloc::string::String, std_alloc::string::FromUtf8Error> {
    std_alloc::string::String::from_utf8(self.payload().copied().collect())
  }

  /// Get the response code
  pub fn code(&self) -> newt_msg::Code {
    self.0.code
  }

  /// Change the response code
  pub fn set_code(&mut self, code: newt_msg::Code) {
    self.0.code = code;
  }

  /// Add a payload to this response
  pub fn set_payload<Bytes: IntoIterator<Item = u8>>(&mut self, payload: Bytes) {
    self.0.payload = Payload(payload.into_iter().collect());
  }
}

impl<P: PlatformTypes> From<Resp<P>> for platform::Message<P> {
  fn from(rep: Resp<P>) -> Self {
    rep.0
  }
}

impl<P: PlatformTypes> From<platform::Message<P>> for Resp<P> {
  fn from(msg: platform::Message<P>) -> Self {
    Self(msg)
  }
}
