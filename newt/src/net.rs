use no_std_net::{SocketAddr, ToSocketAddrs};
use toad_array::Array;

/// Data that came from a network socket
#[derive(PartialEq, PartialOrd, Eq, Ord, Hash, Debug, Clone, Copy)]
pub struct Addrd<T>(pub T, pub SocketAddr);

impl<T> Addrd<T> {
  /// Borrow the contents of this Addressed
  pub fn as_ref(&self) -> Addrd<&T> {
    Addrd(self.data(), self.addr())
  }

  /// Discard the socket and get the data in this Addressed
  pub fn unwrap(self) -> T {
    self.0
  }

  /// Map the data contained in this Addressed
  pub fn map<R>(self, f: impl FnOnce(T) -> R) -> Addrd<R> {
    Addrd(f(self.0), self.1)
  }

  /// Borrow the contents of the addressed item
  pub fn data(&self) -> &T {
    &self.0
  }

  /// Mutably borrow the contents of the addressed item
  pub fn data_mut(&mut self) -> &mut T {
    &mut self.0
  }

  /// Copy the socket address for the data
  pub fn addr(&self) -> SocketAddr {
    self.1
  }

  /// Turn the entire structure into something else
  pub fn fold<R>(self, f: impl FnOnce(T, SocketAddr) -> R) -> R {
    f(self.0, self.1)
  }
}

impl<T> AsMut<T> for Addrd<T> {
  fn as_mut(&mut self) -> &mut T {
    &mut self.0
  }
}

/// The engine's view of the transport: something that can throw
/// whole datagrams at a peer and have whole datagrams thrown at it.
///
/// This is the seam a secured transport plugs into: a DTLS session
/// that encrypts on `send` and decrypts on `recv` satisfies this
/// trait and the engine never knows the difference.
///
/// This mirrors the Udp socket traits in embedded-nal, but allows us to
/// implement them for foreign types (like `std::net::UdpSocket`).
pub trait Socket: Sized {
  /// The error yielded by socket operations
  type Error: core::fmt::Debug;

  /// Buffer type used for receiving and sending datagrams.
  ///
  /// GOTCHA: if the length of the buffer is zero (even if the capacity is greater in the case
  /// of ArrayVec or Vec), no bytes will be read. Make sure you set the length
  /// manually with zero `0u8` filled in each position.
  type Dgram: Array<Item = u8> + AsRef<[u8]> + Clone + core::fmt::Debug + PartialEq;

  /// Create an empty [`Socket::Dgram`] buffer
  ///
  /// (this has a major GOTCHA, see [`Socket::Dgram`].)
  fn empty_dgram() -> Self::Dgram;

  /// Bind the socket to a local address.
  ///
  /// The behavior of `addr` yielding multiple addresses is implementation-specific,
  /// but will most likely bind to the first address that is available.
  ///
  /// Implementors should yield a socket in a non-blocking state.
  fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self, Self::Error>;

  /// Send a message to a remote address
  fn send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), Self::Error>;

  /// Pull a buffered datagram from the socket, along with the address of the sender.
  ///
  /// This clears the internal receiver queue, meaning that subsequent calls
  /// to `peek` or `recv` will block until a new datagram is received.
  ///
  /// It is expected that (like [`std::net::UdpSocket`]) if the message is larger
  /// than the buffer, those bytes are dropped and not considered an error condition.
  fn recv(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error>;

  /// Pull a buffered datagram from the socket without clearing the
  /// receiver queue.
  fn peek(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error>;

  /// Poll the socket for a datagram, `None` meaning "nothing to receive right now"
  fn poll(&self) -> Result<Option<Addrd<Self::Dgram>>, Self::Error> {
    let mut buf = Self::empty_dgram();
    let recvd = self.recv(&mut buf);

    match recvd {
      | Ok(Addrd(n, addr)) => Ok(Some(Addrd(buf.into_iter().take(n).collect(), addr))),
      | Err(nb::Error::WouldBlock) => Ok(None),
      | Err(nb::Error::Other(e)) => Err(e),
    }
  }
}
