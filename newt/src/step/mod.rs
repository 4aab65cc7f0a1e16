use core::convert::Infallible;

use newt_msg::Token;
use no_std_net::SocketAddr;

use crate::net::Addrd;
use crate::platform::{self, PlatformTypes};

/// Datagram -> Message
pub mod parse;

/// Suppress & re-acknowledge duplicates
pub mod dedup;

/// Acknowledge confirmable messages
pub mod ack;

/// Assign message ids to outbound messages
pub mod provision_ids;

/// Assign tokens to outbound requests
pub mod provision_tokens;

/// The exchange matcher: retransmission, correlation, timeouts
pub mod exchange;

/// Hold responses until someone polls for their token
pub mod buffer_responses;

/// Blockwise transfer
pub mod block;

/// Observe relations
pub mod observe;

/// ```text
///             None -> "You may run, the step may have done nothing or just performed some effects"
///         Some(Ok) -> "You may run, the step yielded a T that could be transformed or discarded"
///        Some(Err) -> "You should not run, something unrecoverable happened"
/// Some(WouldBlock) -> "You may run, but we should all wait until the resource would no longer block"
/// ```
pub type StepOutput<T, E> = Option<nb::Result<T, E>>;

/// An error that can be yielded by a step
pub trait Error: core::fmt::Debug {
  /// If this error means an exchange died (retry budget exhausted,
  /// or the peer Reset it), the token & peer of that exchange.
  ///
  /// Steps wrapping other steps delegate to the inner error, which is
  /// how the observe step hears about dead notification exchanges
  /// without knowing the concrete error type that killed them.
  fn dead_exchange(&self) -> Option<Addrd<Token>> {
    None
  }
}

impl Error for Infallible {}
impl Error for () {}

/// Returns early with the appropriate output when the
/// inner step (or a fallible bit of this step) doesn't yield.
macro_rules! _try {
  (Result; $r:expr) => {
    match $r {
      | Ok(t) => t,
      | Err(e) => return Some(Err(nb::Error::Other(e.into()))),
    }
  };
  (Option<nb::Result>; $r:expr) => {
    match $r {
      | None => return None,
      | Some(Ok(t)) => t,
      | Some(Err(nb::Error::WouldBlock)) => return Some(Err(nb::Error::WouldBlock)),
      | Some(Err(nb::Error::Other(e))) => return Some(Err(nb::Error::Other(e.into()))),
    }
  };
}

pub(crate) use _try;

/// Queue a log line as an [`Effect`](crate::platform::Effect).
macro_rules! log {
  ($effects:expr, $level:expr, $($arg:tt)*) => {{
    let msg = $crate::todo::String1Kb::fmt(format_args!($($arg)*));
    $effects.push($crate::platform::Effect::Log($level, msg));
  }};
}

pub(crate) use log;

/// A step in the message-exchange pipeline.
///
/// Each step wraps the one before it (`Inner`) and may transform its
/// output, queue [`Effect`](crate::platform::Effect)s, or consume
/// messages entirely. The full engine is the composition
///
/// ```text
/// Observe<Block<BufferResponses<Exchange<ProvisionTokens<ProvisionIds<Ack<Dedup<Parse<Empty>>>>>>>>>
/// ```
///
/// Two flows run through the chain: "poll for a request" and "poll for
/// a response to a request I sent". Two hooks run in the other
/// direction when a message is sent: `before_message_sent` (innermost
/// first; fills in identity and may rewrite the message) and
/// `on_message_sent` (registers the sent message, e.g. for
/// retransmission).
pub trait Step<P: PlatformTypes>: Default {
  /// Type yielded by the poll_req flow
  type PollReq;

  /// Type yielded by the poll_resp flow
  type PollResp;

  /// Errors this step can produce.
  ///
  /// Must be able to lift the inner step's errors, so that default
  /// method implementations can delegate inward.
  type Error: Error + From<<Self::Inner as Step<P>>::Error>;

  /// The step that came before this one
  type Inner: Step<P>;

  /// Borrow the inner step
  fn inner(&self) -> &Self::Inner;

  /// Poll for an inbound request
  fn poll_req(&self,
              snap: &platform::Snapshot<P>,
              effects: &mut P::Effects)
              -> StepOutput<Self::PollReq, Self::Error>;

  /// Poll for an inbound response to the request `token` sent to `addr`
  fn poll_resp(&self,
               snap: &platform::Snapshot<P>,
               effects: &mut P::Effects,
               token: Token,
               addr: SocketAddr)
               -> StepOutput<Self::PollResp, Self::Error>;

  /// Invoked before a message is serialized & sent; may mutate the message
  fn before_message_sent(&self,
                         snap: &platform::Snapshot<P>,
                         effects: &mut P::Effects,
                         msg: &mut Addrd<platform::Message<P>>)
                         -> Result<(), Self::Error> {
    self.inner()
        .before_message_sent(snap, effects, msg)
        .map_err(Self::Error::from)
  }

  /// Invoked after a message was written to the socket
  fn on_message_sent(&self,
                     snap: &platform::Snapshot<P>,
                     effects: &mut P::Effects,
                     msg: &Addrd<platform::Message<P>>)
                     -> Result<(), Self::Error> {
    self.inner()
        .on_message_sent(snap, effects, msg)
        .map_err(Self::Error::from)
  }

  /// The state behind `path` changed; observe relations matching it
  /// should be notified
  fn notify<Path>(&self, path: Path) -> Result<(), Self::Error>
    where Path: AsRef<str> + Clone
  {
    self.inner().notify(path).map_err(Self::Error::from)
  }
}

/// The do-nothing start of the step chain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Empty;

impl<P: PlatformTypes> Step<P> for Empty {
  type PollReq = ();
  type PollResp = ();
  type Error = Infallible;
  type Inner = Empty;

  fn inner(&self) -> &Empty {
    self
  }

  fn poll_req(&self,
              _: &platform::Snapshot<P>,
              _: &mut P::Effects)
              -> StepOutput<(), Infallible> {
    None
  }

  fn poll_resp(&self,
               _: &platform::Snapshot<P>,
               _: &mut P::Effects,
               _: Token,
               _: SocketAddr)
               -> StepOutput<(), Infallible> {
    None
  }

  fn before_message_sent(&self,
                         _: &platform::Snapshot<P>,
                         _: &mut P::Effects,
                         _: &mut Addrd<platform::Message<P>>)
                         -> Result<(), Infallible> {
    Ok(())
  }

  fn on_message_sent(&self,
                     _: &platform::Snapshot<P>,
                     _: &mut P::Effects,
                     _: &Addrd<platform::Message<P>>)
                     -> Result<(), Infallible> {
    Ok(())
  }

  fn notify<Path>(&self, _: Path) -> Result<(), Infallible>
    where Path: AsRef<str> + Clone
  {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use newt_msg::opt::known::observe::Action;
  use newt_msg::{Code, Id, MessageOptions, Payload, TryFromBytes, TryIntoBytes, Type};
  use tinyvec::array_vec;

  use super::*;
  use crate::platform::Platform as _;
  use crate::req::Req;
  use crate::resp::Resp;
  use crate::test;

  /// The whole pipeline, exactly as a real runtime composes it
  type Steps =
    observe::alloc::Observe<test::Platform,
      block::alloc::Block<test::Platform,
        buffer_responses::alloc::BufferResponses<
          exchange::alloc::Exchange<test::Platform,
            provision_tokens::ProvisionTokens<
              provision_ids::alloc::ProvisionIds<test::Platform,
                ack::Ack<
                  dedup::alloc::Dedup<test::Platform,
                    parse::Parse<Empty>>>>>>,
          test::Platform>>>;

  type Engine = test::MockPlatform<Steps>;

  fn push_rx(engine: &Engine, msg: test::Message, from: no_std_net::SocketAddr) {
    let bytes: Vec<u8> = msg.try_into_bytes().unwrap();
    engine.socket.rx.lock().unwrap().push(Addrd(bytes, from));
  }

  fn wire(engine: &Engine) -> Vec<test::Message> {
    engine.socket
          .tx
          .lock()
          .unwrap()
          .iter()
          .map(|d| test::Message::try_from_bytes(d.data()).unwrap())
          .collect()
  }

  #[test]
  fn lost_ack_and_repeated_response_deliver_exactly_once() {
    simple_logger::SimpleLogger::new().with_level(log::LevelFilter::Off)
                                      .init()
                                      .ok();

    let engine = Engine::default();
    let server = test::dummy_addr_2();

    // send Request(token=B, Confirmable, GET)
    let mut req = Req::<test::Platform>::get("status");
    req.msg_mut().token = Token(array_vec!([u8; 8] => 0xB));
    let token = engine.send_msg(Addrd(req.into(), server)).unwrap();
    assert_eq!(token, Token(array_vec!([u8; 8] => 0xB)));
    assert_eq!(engine.socket.tx.lock().unwrap().len(), 1);

    // the server replies confirmably, twice: our first ACK got lost
    // and it retransmitted
    let mut rep = test::Message::new(Type::Con, Code::new(2, 5), Id(77), token);
    rep.payload = Payload(b"ok".to_vec());
    push_rx(&engine, rep.clone(), server);
    push_rx(&engine, rep, server);

    // exactly one delivery
    let delivered = engine.poll_resp(token, server).unwrap();
    assert_eq!(delivered.data().payload_string().unwrap(), "ok");
    assert!(matches!(engine.poll_resp(token, server), Err(nb::Error::WouldBlock)));

    // but both copies were acknowledged
    let acks = wire(&engine).into_iter()
                            .filter(|m| m.ty == Type::Ack && m.id == Id(77))
                            .count();
    assert_eq!(acks, 2);
  }

  #[test]
  fn repeated_request_delivers_once_and_acks_every_copy() {
    let engine = Engine::default();
    let client = test::dummy_addr_2();

    let mut req = test::Message::new(Type::Con,
                                     Code::new(0, 1),
                                     Id(41),
                                     Token(array_vec!([u8; 8] => 7)));
    req.set_path("status").unwrap();

    for _ in 0..3 {
      push_rx(&engine, req.clone(), client);
    }

    assert!(engine.poll_req().is_ok());
    assert!(matches!(engine.poll_req(), Err(nb::Error::WouldBlock)));
    assert!(matches!(engine.poll_req(), Err(nb::Error::WouldBlock)));

    let acks = wire(&engine).into_iter()
                            .filter(|m| m.ty == Type::Ack && m.id == Id(41))
                            .count();
    assert_eq!(acks, 3);
  }

  #[test]
  fn observe_relation_stamps_and_paces_notifications() {
    let engine = Engine::default();
    let observer = test::dummy_addr_2();
    let token = Token(array_vec!([u8; 8] => 0xC));

    // the observer registers
    let mut register = test::Message::new(Type::Con, Code::new(0, 1), Id(5), token);
    register.set_path("weather/temp").unwrap();
    register.set_observe(Action::Register).unwrap();
    push_rx(&engine, register, observer);

    let req = engine.poll_req().unwrap();
    assert_eq!(req.data().msg().token, token);

    // registration response binds the relation at sequence 0
    let rep = Resp::for_request(req.data()).unwrap();
    engine.send_msg(req.as_ref().map(|_| rep.into())).unwrap();

    // the resource changes; the engine re-asks the server and the
    // server answers again
    engine.notify("weather/temp").unwrap();
    let req = engine.poll_req().unwrap();

    let mut rep = Resp::con(req.data());
    rep.set_payload("21C".bytes());
    engine.send_msg(req.as_ref().map(|_| rep.into())).unwrap();

    let notifications = wire(&engine).into_iter()
                                     .filter(|m| m.token == token
                                                 && m.code == Code::new(2, 5))
                                     .collect::<Vec<_>>();

    assert_eq!(notifications.len(), 2);
    assert_eq!(notifications[0].observe_seq().map(|s| s.0), Some(0));
    assert_eq!(notifications[1].observe_seq().map(|s| s.0), Some(1));
    // first real notification is confirmable so a dead peer is noticed
    assert_eq!(notifications[1].ty, Type::Con);
  }
}
