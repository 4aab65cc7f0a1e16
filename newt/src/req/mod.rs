use newt_msg::{Id, MessageOptions, Payload, Token, Type};

/// Request methods
pub mod method;

#[doc(inline)]
pub use method::Method;

use crate::platform::{self, PlatformTypes};

/// A request
///
/// Owns a [`platform::Message`] and lends it request semantics:
/// a method instead of a code, confirmability toggles, path access.
#[derive(Debug)]
pub struct Req<P: PlatformTypes>(platform::Message<P>);

impl<P: PlatformTypes> PartialEq for Req<P> {
  fn eq(&self, other: &Self) -> bool {
    self.0 == other.0
  }
}

impl<P: PlatformTypes> Clone for Req<P> {
  fn clone(&self) -> Self {
    Self(self.0.clone())
  }
}

impl<P: PlatformTypes> Req<P> {
  /// Create a request
  ///
  /// The message id and token are left zero / empty; the engine
  /// provisions real ones when the request is sent.
  pub fn new(method: Method, path: impl AsRef<str>) -> Self {
    let mut msg = platform::Message::<P>::new(Type::Con,
                                              method.0,
                                              Id(0),
                                              Token(Default::default()));
    msg.set_path(path.as_ref()).ok();

    Self(msg)
  }

  /// Creates a new GET request
  pub fn get(path: impl AsRef<str>) -> Self {
    Self::new(Method::GET, path)
  }

  /// Creates a new POST request
  pub fn post(path: impl AsRef<str>) -> Self {
    Self::new(Method::POST, path)
  }

  /// Creates a new PUT request
  pub fn put(path: impl AsRef<str>) -> Self {
    Self::new(Method::PUT, path)
  }

  /// Creates a new DELETE request
  pub fn delete(path: impl AsRef<str>) -> Self {
    Self::new(Method::DELETE, path)
  }

  /// Obtain a reference to the inner message
  pub fn msg(&self) -> &platform::Message<P> {
    &self.0
  }

  /// Obtain a mutable reference to the inner message
  pub fn msg_mut(&mut self) -> &mut platform::Message<P> {
    &mut self.0
  }

  /// Get the request method
  pub fn method(&self) -> Method {
    Method(self.0.code)
  }

  /// Get the request path (Uri-Path option)
  pub fn path(&self) -> Option<&str> {
    self.0.path()
  }

  /// Get the request type (confirmable, non-confirmable)
  pub fn msg_type(&self) -> Type {
    self.0.ty
  }

  /// Set this request to be non-confirmable
  ///
  /// Some messages do not require an acknowledgement.
  ///
  /// This is particularly true for messages that are repeated regularly for
  /// application requirements, such as repeated readings from a sensor.
  pub fn non(&mut self) -> () {
    self.0.ty = Type::Non;
  }

  /// Get a copy of the message id for this request
  pub fn msg_id(&self) -> Id {
    self.0.id
  }

  /// Get a copy of the message token for this request
  pub fn msg_token(&self) -> Token {
    self.0.token
  }

  /// Add a payload to this request
  pub fn set_payload<Bytes: IntoIterator<Item = u8>>(&mut self, payload: Bytes) {
    self.0.payload = Payload(payload.into_iter().collect());
  }

  /// Get the payload's raw bytes
  pub fn payload(&self) -> &[u8] {
    &self.0.payload.0
  }

  /// Get the payload and attempt to interpret it as an ASCII string
  pub fn payload_str(&self) -> Result<&str, core::str::Utf8Error> {
    core::str::from_utf8(self.payload())
  }
}

impl<P> AsRef<platform::Message<P>> for Req<P> where P: PlatformTypes
{
  fn as_ref(&self) -> &platform::Message<P> {
    &self.0
  }
}

impl<P> AsMut<platform::Message<P>> for Req<P> where P: PlatformTypes
{
  fn as_mut(&mut self) -> &mut platform::Message<P> {
    &mut self.0
  }
}

impl<P: PlatformTypes> From<Req<P>> for platform::Message<P> {
  fn from(req: Req<P>) -> Self {
    req.0
  }
}

impl<P: PlatformTypes> From<platform::Message<P>> for Req<P> {
  fn from(msg: platform::Message<P>) -> Self {
    Self(msg)
  }
}
