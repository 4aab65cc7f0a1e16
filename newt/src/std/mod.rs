#![allow(clippy::many_single_char_names)]

use std::fmt::Debug;
use std::io;
use std::net::UdpSocket;

use embedded_time::rate::Fraction;

use crate::net::{Addrd, Socket};
use crate::req::Req;
use crate::resp::Resp;
use crate::step::{self, Step};

/// implementor of [`crate::platform::PlatformTypes`] for
/// platforms that support `std`.
pub type PlatformTypes = crate::platform::Alloc<Clock, UdpSocket>;

/// The full step pipeline on [`PlatformTypes`]:
///
/// ```text
/// Observe<Block<BufferResponses<Exchange<ProvisionTokens<ProvisionIds<Ack<Dedup<Parse<Empty>>>>>>>>>
/// ```
pub type Steps =
  step::observe::alloc::Observe<PlatformTypes,
    step::block::alloc::Block<PlatformTypes,
      step::buffer_responses::alloc::BufferResponses<
        step::exchange::alloc::Exchange<PlatformTypes,
          step::provision_tokens::ProvisionTokens<
            step::provision_ids::alloc::ProvisionIds<PlatformTypes,
              step::ack::Ack<
                step::dedup::alloc::Dedup<PlatformTypes,
                  step::parse::Parse<step::Empty>>>>>>,
        PlatformTypes>>>;

impl<StepError, SocketError> crate::platform::PlatformError<StepError, SocketError> for io::Error
  where StepError: Debug,
        SocketError: Debug
{
  fn msg_to_bytes(e: newt_msg::to_bytes::MessageToBytesError) -> Self {
    io::Error::new(io::ErrorKind::InvalidData, format!("{:?}", e))
  }

  fn step(e: StepError) -> Self {
    io::Error::new(io::ErrorKind::Other, format!("{:?}", e))
  }

  fn socket(e: SocketError) -> Self {
    io::Error::new(io::ErrorKind::Other, format!("{:?}", e))
  }

  fn clock(e: embedded_time::clock::Error) -> Self {
    io::Error::new(io::ErrorKind::Other, format!("{:?}", e))
  }
}

/// implementor of [`crate::platform::Platform`] for `std`
#[derive(Debug)]
pub struct Platform<Steps> {
  steps: Steps,
  config: crate::config::Config,
  socket: UdpSocket,
  clock: Clock,
}

impl<Steps> Platform<Steps> {
  /// Create a new std runtime
  pub fn try_new<A: std::net::ToSocketAddrs>(bind_to_addr: A,
                                             cfg: crate::config::Config)
                                             -> io::Result<Self>
    where Steps: Default
  {
    let socket = UdpSocket::bind(bind_to_addr)?;
    socket.set_nonblocking(true)?;

    Ok(Self { steps: Steps::default(),
              config: cfg,
              socket,
              clock: Clock::new() })
  }
}

impl<Steps> crate::platform::Platform<Steps> for Platform<Steps>
  where Steps: Step<PlatformTypes,
                    PollReq = Addrd<Req<PlatformTypes>>,
                    PollResp = Addrd<Resp<PlatformTypes>>>
{
  type Types = PlatformTypes;
  type Error = io::Error;

  fn log(&self, level: log::Level, msg: crate::todo::String1Kb) -> Result<(), Self::Error> {
    log::log!(target: "newt", level, "{}", msg.as_str());
    Ok(())
  }

  fn config(&self) -> crate::config::Config {
    self.config
  }

  fn steps(&self) -> &Steps {
    &self.steps
  }

  fn socket(&self) -> &UdpSocket {
    &self.socket
  }

  fn clock(&self) -> &Clock {
    &self.clock
  }
}

/// Implement [`embedded_time::Clock`] using [`std::time`] primitives
#[derive(Debug, Clone, Copy)]
pub struct Clock(std::time::Instant);

impl Default for Clock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock {
  /// Create a new clock
  pub fn new() -> Self {
    Self(std::time::Instant::now())
  }
}

impl embedded_time::Clock for Clock {
  type T = u64;

  // microseconds
  const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000_000);

  fn try_now(&self) -> Result<embedded_time::Instant<Self>, embedded_time::clock::Error> {
    let now = std::time::Instant::now();
    let elapsed = now.duration_since(self.0);
    Ok(embedded_time::Instant::new(elapsed.as_micros() as u64))
  }
}

fn no_std_addr(addr: std::net::SocketAddr) -> no_std_net::SocketAddr {
  use no_std_net as n;

  match addr {
    | std::net::SocketAddr::V4(v4) => {
      n::SocketAddr::V4(n::SocketAddrV4::new(v4.ip().octets().into(), v4.port()))
    },
    | std::net::SocketAddr::V6(v6) => {
      n::SocketAddr::V6(n::SocketAddrV6::new(v6.ip().octets().into(),
                                             v6.port(),
                                             v6.flowinfo(),
                                             v6.scope_id()))
    },
  }
}

fn std_addr(addr: no_std_net::SocketAddr) -> std::net::SocketAddr {
  match addr {
    | no_std_net::SocketAddr::V4(v4) => {
      std::net::SocketAddr::V4(std::net::SocketAddrV4::new(v4.ip().octets().into(), v4.port()))
    },
    | no_std_net::SocketAddr::V6(v6) => {
      std::net::SocketAddr::V6(std::net::SocketAddrV6::new(v6.ip().octets().into(),
                                                           v6.port(),
                                                           v6.flowinfo(),
                                                           v6.scope_id()))
    },
  }
}

fn io_to_nb(e: io::Error) -> nb::Error<io::Error> {
  match e.kind() {
    | io::ErrorKind::WouldBlock => nb::Error::WouldBlock,
    | _ => nb::Error::Other(e),
  }
}

impl Socket for UdpSocket {
  type Error = io::Error;
  type Dgram = Vec<u8>;

  fn empty_dgram() -> Vec<u8> {
    vec![0u8; 1152]
  }

  fn bind<A: no_std_net::ToSocketAddrs>(addr: A) -> Result<Self, Self::Error> {
    let addrs = addr.to_socket_addrs()
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "bad address"))?
                    .map(std_addr)
                    .collect::<Vec<_>>();

    let sock = UdpSocket::bind(&addrs[..])?;
    sock.set_nonblocking(true)?;
    Ok(sock)
  }

  fn send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), Self::Error> {
    self.send_to(msg.data(), std_addr(msg.addr()))
        .map(|_| ())
        .map_err(io_to_nb)
  }

  fn recv(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error> {
    self.recv_from(buffer)
        .map(|(n, addr)| Addrd(n, no_std_addr(addr)))
        .map_err(io_to_nb)
  }

  fn peek(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, Self::Error> {
    self.peek_from(buffer)
        .map(|(n, addr)| Addrd(n, no_std_addr(addr)))
        .map_err(io_to_nb)
  }
}
