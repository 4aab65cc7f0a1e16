use core::fmt::Debug;
use core::marker::PhantomData;

use embedded_time::Instant;
use newt_msg::{CodeKind, MessageOptions, Token, Type};
use no_std_net::SocketAddr;
use toad_array::Array;
use toad_stem::Stem;

use super::{log, Step, StepOutput};
use crate::config::Config;
use crate::net::Addrd;
use crate::platform::{self, Effect, PlatformTypes, Snapshot};
use crate::req::Req;
use crate::resp::Resp;
use crate::retry::{Attempts, RetryTimer, Strategy, YouShould};
use crate::time::Clock;

/// `Exchange` that uses Vec
///
/// Only enabled when feature "alloc" enabled.
#[cfg(feature = "alloc")]
pub mod alloc {
  use ::std_alloc::vec::Vec;

  use super::*;

  /// [`Exchange`](super::Exchange) that uses Vec.
  pub type Exchange<P, S> =
    super::Exchange<P,
                    S,
                    Vec<(State<<P as PlatformTypes>::Clock>,
                         Addrd<crate::platform::Message<P>>)>,
                    Vec<Dead>>;
}

/// The retransmission state of one stored exchange
#[derive(Debug)]
pub enum State<C>
  where C: Clock
{
  /// An un-acked CON.
  ///
  /// When it is acked, the current timer is replaced with one using
  /// the lazier [acked strategy](crate::config::Con::acked_retry_strategy),
  /// since the peer has proven reachable and is just slow to answer.
  ConPreAck {
    /// The current (unacked) retry state
    timer: RetryTimer<C>,
    /// The strategy to use once the message is acked
    post_ack_strategy: Strategy,
    /// The max number of retry attempts for the post-ack state
    post_ack_max_attempts: Attempts,
  },
  /// A message retrying with a fixed strategy
  /// (an acked CON, or a NON request)
  Just(RetryTimer<C>),
  /// An exchange held open for observe notifications.
  ///
  /// No retransmission; the token stays reserved so that future
  /// notifications from the peer keep correlating to the original
  /// request instead of being dropped as unmatched.
  Observing,
}

impl<C> State<C> where C: Clock
{
  fn timer_mut(&mut self) -> Option<&mut RetryTimer<C>> {
    match self {
      | Self::ConPreAck { timer, .. } => Some(timer),
      | Self::Just(timer) => Some(timer),
      | Self::Observing => None,
    }
  }
}

/// Why an exchange was torn down before completing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
  /// The retry budget was exhausted
  Timeout,
  /// The peer answered with Reset
  Reset,
}

/// Record of an exchange that died, waiting to be surfaced
/// (exactly once) to whoever is polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dead {
  /// The token & peer of the dead exchange
  pub token: Addrd<Token>,
  /// Whether we had sent a request or a response (notification)
  pub sent_kind: CodeKind,
  /// See [`Cause`]
  pub cause: Cause,
}

impl Dead {
  fn into_error<E>(self) -> Error<E> {
    match self.cause {
      | Cause::Timeout => Error::Timeout(self.token),
      | Cause::Reset => Error::Rejected(self.token),
    }
  }
}

/// Errors encounterable by the exchange matcher
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Error<E> {
  /// The inner step failed.
  ///
  /// This variant's Debug representation is completely
  /// replaced by the inner type E's debug representation.
  Inner(E),
  /// The retry budget for this exchange was exhausted without the
  /// peer acknowledging or answering. Yielded exactly once.
  Timeout(Addrd<Token>),
  /// The peer rejected this exchange with Reset. Yielded exactly once.
  Rejected(Addrd<Token>),
  /// Storing this exchange would exceed a hard capacity for the
  /// retry buffer.
  ///
  /// Only applicable to `Exchange` using a heapless backing structure.
  RetryBufferFull,
}

impl<E: Debug> Debug for Error<E> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | Self::Inner(e) => e.fmt(f),
      | Self::Timeout(t) => f.debug_tuple("Timeout").field(t).finish(),
      | Self::Rejected(t) => f.debug_tuple("Rejected").field(t).finish(),
      | Self::RetryBufferFull => f.debug_struct("RetryBufferFull").finish(),
    }
  }
}

impl<E> From<E> for Error<E> {
  fn from(e: E) -> Self {
    Error::Inner(e)
  }
}

impl<E> super::Error for Error<E> where E: super::Error
{
  fn dead_exchange(&self) -> Option<Addrd<Token>> {
    match self {
      | Self::Timeout(t) | Self::Rejected(t) => Some(*t),
      | Self::Inner(e) => e.dead_exchange(),
      | Self::RetryBufferFull => None,
    }
  }
}

/// Buffer used to store outstanding exchanges
pub trait Buf<P>
  where P: PlatformTypes,
        Self: Array<Item = (State<P::Clock>, Addrd<platform::Message<P>>)>
{
  /// Find the exchange a message belongs to: by token when the message
  /// carries one, by `(message id, peer)` for bare ACKs & Resets.
  fn find(&self, msg: &Addrd<&platform::Message<P>>) -> Option<usize> {
    let token = msg.data().token;

    if token != Token(Default::default()) {
      self.iter()
          .position(|(_, stored)| stored.data().token == token && stored.addr() == msg.addr())
    } else {
      self.iter().position(|(_, stored)| {
                    stored.data().id == msg.data().id && stored.addr() == msg.addr()
                  })
    }
  }

  /// Resend every stored message whose timer is due, and move the ones
  /// whose budget is exhausted into `dead`.
  fn attempt_all<D>(&mut self, time: Instant<P::Clock>, effects: &mut P::Effects, dead: &mut D)
    where D: Array<Item = Dead>
  {
    self.iter_mut().for_each(|(state, msg)| {
                     if let Some(timer) = state.timer_mut() {
                       if let Ok(YouShould::Retry) = timer.what_should_i_do(time) {
                         effects.push(Effect::Send(msg.clone()));
                       }
                     }
                   });

    loop {
      let died = self.iter_mut()
                     .enumerate()
                     .find_map(|(ix, (state, _))| match state.timer_mut() {
                       | Some(timer) => match timer.what_should_i_do(time) {
                         | Ok(YouShould::Cry) => Some(ix),
                         | _ => None,
                       },
                       | None => None,
                     });

      match died {
        | Some(ix) => {
          let (_, msg) = self.remove(ix).expect("index yielded by enumerate");
          dead.push(Dead { token: Addrd(msg.data().token, msg.addr()),
                           sent_kind: msg.data().code.kind(),
                           cause: Cause::Timeout });
        },
        | None => break,
      }
    }
  }

  /// An ACK for the stored exchange at `ix` arrived
  fn mark_acked(&mut self, time: Instant<P::Clock>, ix: usize) {
    // an acked response is a delivered response
    if self[ix].1.data().code.kind() == CodeKind::Response {
      self.remove(ix);
      return;
    }

    // an acked request is still waiting on its (separate) response;
    // the deadline extends to the lazier post-ack schedule
    let new_timer = match &self[ix].0 {
      | State::ConPreAck { post_ack_strategy,
                           post_ack_max_attempts,
                           .. } => Some(RetryTimer::new(time, *post_ack_strategy, *post_ack_max_attempts)),
      | _ => None,
    };

    if let Some(timer) = new_timer {
      self[ix].0 = State::Just(timer);
    }
  }

  /// A message of ours was just sent; store (or refresh) its exchange.
  fn store_retryables(&mut self,
                      msg: &Addrd<platform::Message<P>>,
                      time: Instant<P::Clock>,
                      config: Config)
                      -> Result<(), ()> {
    match (msg.data().ty, msg.data().code.kind()) {
      | (Type::Con | Type::Non, kind) if kind != CodeKind::Empty => (),
      | _ => return Ok(()),
    };

    let existing = self.find(&msg.as_ref());

    match existing {
      | Some(ix) if self[ix].1.data().id == msg.data().id => {
        // either a retransmission of the stored copy, or a notification
        // that took over the in-flight stream (id & type pinned in
        // before_message_sent): the stored bytes follow, the timer doesn't
        self[ix].1 = msg.clone();
        Ok(())
      },
      | Some(ix) if msg.data().code.kind() == CodeKind::Request => {
        // a fresh request reusing a live token evicts the stale exchange
        self.remove(ix);
        self.store_new(msg, time, config)
      },
      | Some(_) => Ok(()),
      | None => self.store_new(msg, time, config),
    }
  }

  /// Register a brand new exchange
  fn store_new(&mut self,
               msg: &Addrd<platform::Message<P>>,
               time: Instant<P::Clock>,
               config: Config)
               -> Result<(), ()> {
    if self.is_full() {
      return Err(());
    }

    // the timer is allowed max_attempts + 1 turns so that death comes
    // one full interval *after* the last retransmission, not with it
    let state = match msg.data().ty {
      | Type::Con => State::ConPreAck { timer:
                                          RetryTimer::new(time,
                                                          config.msg.con.unacked_retry_strategy,
                                                          Attempts(config.msg.con.max_attempts.0
                                                                   + 1)),
                                        post_ack_strategy: config.msg.con.acked_retry_strategy,
                                        post_ack_max_attempts:
                                          Attempts(config.msg.con.max_attempts.0 + 1) },
      | Type::Non if msg.data().code.kind() == CodeKind::Request => {
        State::Just(RetryTimer::new(time,
                                    config.msg.non.retry_strategy,
                                    Attempts(config.msg.non.max_attempts.0 + 1)))
      },
      | _ => return Ok(()),
    };

    self.push((state, msg.clone()));
    Ok(())
  }
}

impl<T, P> Buf<P> for T
  where T: Array<Item = (State<P::Clock>, Addrd<platform::Message<P>>)>,
        P: PlatformTypes
{
}

/// The canonical exchange matcher.
///
/// One table holds every outstanding exchange; everything the
/// protocol calls "the Exchange" lives here:
///
/// * outbound CONs retransmit on a randomized exponential schedule
///   until acked, answered, Reset, or out of budget
/// * bare ACKs & Resets correlate by `(id, peer)`, everything else by
///   token
/// * an empty ACK defers the deadline (separate response pending)
///   rather than closing the exchange
/// * a response closes the exchange, unless it carries the observe
///   option, in which case the exchange is parked open ([`State::Observing`])
/// * a notification sent while the previous one is still in flight
///   takes over the previous one's message id, type and timer instead
///   of starting a second retransmission stream
/// * death (timeout or Reset) is surfaced exactly once, as
///   [`Error::Timeout`] / [`Error::Rejected`]
#[derive(Debug)]
pub struct Exchange<P, S, B, D> {
  inner: S,
  buf: Stem<B>,
  dead: Stem<D>,
  __p: PhantomData<P>,
}

impl<P, S, B, D> Default for Exchange<P, S, B, D>
  where S: Default,
        B: Default,
        D: Default
{
  fn default() -> Self {
    Self { inner: S::default(),
           buf: Default::default(),
           dead: Default::default(),
           __p: PhantomData }
  }
}

impl<P, S, B, D> Exchange<P, S, B, D>
  where P: PlatformTypes,
        B: Buf<P>,
        D: Array<Item = Dead>
{
  fn attempt_all(&self, snap: &Snapshot<P>, effects: &mut P::Effects) {
    self.buf.map_mut(|buf| {
              self.dead
                  .map_mut(|dead| buf.attempt_all(snap.time, effects, dead))
            });
  }

  fn pop_dead(&self, matches: impl Fn(&Dead) -> bool) -> Option<Dead> {
    self.dead.map_mut(|dead| {
               dead.iter()
                   .position(|d| matches(d))
                   .and_then(|ix| dead.remove(ix))
             })
  }

  /// A bare ACK arrived; defers or closes the matching exchange.
  fn handle_empty_ack(&self,
                      snap: &Snapshot<P>,
                      effects: &mut P::Effects,
                      msg: &Addrd<&platform::Message<P>>) {
    let found = self.buf.map_mut(|buf| match buf.find(msg) {
                          | Some(ix) => {
                            buf.mark_acked(snap.time, ix);
                            true
                          },
                          | None => false,
                        });

    if !found {
      log!(effects,
           log::Level::Warn,
           "Ignoring ACK from {} matching no exchange (id {:?})",
           msg.addr(),
           msg.data().id);

      if msg.data().token == Token(Default::default()) {
        // an ack we can't correlate even by id is a protocol violation
        // the peer should hear about
        effects.push(Effect::Send(Addrd(msg.data().rst(), msg.addr())));
      }
    }
  }

  /// A Reset arrived; cancels the matching exchange.
  ///
  /// Returns the dead record when the Reset killed something we sent.
  fn handle_reset(&self,
                  effects: &mut P::Effects,
                  msg: &Addrd<&platform::Message<P>>)
                  -> Option<Dead> {
    let removed = self.buf.map_mut(|buf| match buf.find(msg) {
                            | Some(ix) => buf.remove(ix),
                            | None => None,
                          });

    match removed {
      | Some((_, stored)) => Some(Dead { token: Addrd(stored.data().token, stored.addr()),
                                         sent_kind: stored.data().code.kind(),
                                         cause: Cause::Reset }),
      | None => {
        log!(effects,
             log::Level::Warn,
             "Ignoring Reset from {} matching no exchange (id {:?})",
             msg.addr(),
             msg.data().id);
        None
      },
    }
  }

  /// A response arrived; close (or park) the exchange it answers.
  ///
  /// `true` when the response correlated to something we sent.
  fn seen_response(&self, msg: &Addrd<&platform::Message<P>>) -> bool {
    let keep_open = msg.data().observe_seq().is_some();

    self.buf.map_mut(|buf| match buf.find(msg) {
              | Some(ix) if keep_open => {
                buf[ix].0 = State::Observing;
                true
              },
              | Some(ix) => {
                buf.remove(ix);
                true
              },
              | None => false,
            })
  }
}

impl<P, S, B, D, E> Step<P> for Exchange<P, S, B, D>
  where P: PlatformTypes,
        S: Step<P, PollReq = Addrd<Req<P>>, PollResp = Addrd<Resp<P>>, Error = E>,
        B: Buf<P> + Debug + Default,
        D: Array<Item = Dead> + Debug + Default,
        E: super::Error
{
  type PollReq = Addrd<Req<P>>;
  type PollResp = Addrd<Resp<P>>;
  type Error = Error<E>;
  type Inner = S;

  fn inner(&self) -> &S {
    &self.inner
  }

  fn poll_req(&self,
              snap: &platform::Snapshot<P>,
              effects: &mut P::Effects)
              -> StepOutput<Self::PollReq, Self::Error> {
    self.attempt_all(snap, effects);

    let out = match self.inner.poll_req(snap, effects) {
      | None => None,
      | Some(Err(nb::Error::WouldBlock)) => return Some(Err(nb::Error::WouldBlock)),
      | Some(Err(nb::Error::Other(e))) => return Some(Err(nb::Error::Other(Error::Inner(e)))),
      | Some(Ok(req)) => {
        let msg = req.data().msg().clone();
        let addrd = Addrd(&msg, req.addr());

        match (msg.ty, msg.code.kind()) {
          | (Type::Ack, CodeKind::Empty) => {
            self.handle_empty_ack(snap, effects, &addrd);
            None
          },
          | (Type::Reset, _) => {
            self.handle_reset(effects, &addrd)
                .map(|dead| Err(nb::Error::Other(dead.into_error())))
          },
          | (Type::Con, CodeKind::Empty) => {
            // a "ping"; we're alive, but there is no context: Reset
            effects.push(Effect::Send(Addrd(msg.rst(), req.addr())));
            None
          },
          | (_, CodeKind::Response) => {
            if self.seen_response(&addrd) {
              // the response rides up the req flow so an outer step can
              // buffer it for whoever polls its token
              Some(Ok(req))
            } else {
              log!(effects,
                   log::Level::Warn,
                   "Ignoring response from {} matching no exchange ({:?})",
                   req.addr(),
                   msg.token);
              None
            }
          },
          | _ => Some(Ok(req)),
        }
      },
    };

    match out {
      | Some(out) => Some(out),
      | None => {
        self.pop_dead(|d| d.sent_kind == CodeKind::Response)
            .map(|dead| Err(nb::Error::Other(dead.into_error())))
      },
    }
  }

  fn poll_resp(&self,
               snap: &platform::Snapshot<P>,
               effects: &mut P::Effects,
               token: Token,
               addr: SocketAddr)
               -> StepOutput<Self::PollResp, Self::Error> {
    self.attempt_all(snap, effects);

    let out = match self.inner.poll_resp(snap, effects, token, addr) {
      | None => None,
      | Some(Err(nb::Error::WouldBlock)) => return Some(Err(nb::Error::WouldBlock)),
      | Some(Err(nb::Error::Other(e))) => return Some(Err(nb::Error::Other(Error::Inner(e)))),
      | Some(Ok(resp)) => {
        let msg = resp.data().msg().clone();
        let addrd = Addrd(&msg, resp.addr());

        match (msg.ty, msg.code.kind()) {
          | (Type::Ack, CodeKind::Empty) => {
            self.handle_empty_ack(snap, effects, &addrd);
            None
          },
          | (Type::Reset, _) => {
            match self.handle_reset(effects, &addrd) {
              // the Reset answers a request of ours: the caller gets it as
              // their one and final "response"
              | Some(Dead { sent_kind: CodeKind::Request,
                            .. }) => Some(Ok(resp)),
              | Some(dead) => Some(Err(nb::Error::Other(dead.into_error()))),
              | None => None,
            }
          },
          | (_, CodeKind::Response) => {
            if self.seen_response(&addrd) {
              Some(Ok(resp))
            } else {
              log!(effects,
                   log::Level::Warn,
                   "Ignoring response from {} matching no exchange ({:?})",
                   resp.addr(),
                   msg.token);
              None
            }
          },
          | _ => Some(Ok(resp)),
        }
      },
    };

    match out {
      | Some(out) => Some(out),
      | None => {
        self.pop_dead(|d| d.token == Addrd(token, addr) && d.sent_kind == CodeKind::Request)
            .map(|dead| Err(nb::Error::Other(dead.into_error())))
      },
    }
  }

  fn before_message_sent(&self,
                         snap: &platform::Snapshot<P>,
                         effects: &mut P::Effects,
                         msg: &mut Addrd<platform::Message<P>>)
                         -> Result<(), Self::Error> {
    self.inner
        .before_message_sent(snap, effects, msg)
        .map_err(Error::Inner)?;

    if msg.data().code.kind() == CodeKind::Response {
      self.buf.map_mut(|buf| {
                let pinned = match buf.find(&msg.as_ref()) {
                  | Some(ix) => {
                    let (state, stored) = &buf[ix];
                    let in_flight = stored.data().code.kind() == CodeKind::Response
                                    && !matches!(state, State::Observing);

                    if in_flight {
                      Some((stored.data().id, stored.data().ty))
                    } else {
                      None
                    }
                  },
                  | None => None,
                };

                if let Some((id, ty)) = pinned {
                  // take over the in-flight notification's stream: same id,
                  // same type, same (already running) retransmission budget
                  msg.data_mut().id = id;
                  msg.data_mut().ty = ty;
                }
              });
    }

    Ok(())
  }

  fn on_message_sent(&self,
                     snap: &platform::Snapshot<P>,
                     effects: &mut P::Effects,
                     msg: &Addrd<platform::Message<P>>)
                     -> Result<(), Self::Error> {
    self.inner
        .on_message_sent(snap, effects, msg)
        .map_err(Error::Inner)?;

    self.buf
        .map_mut(|buf| buf.store_retryables(msg, snap.time, snap.config))
        .map_err(|()| Error::RetryBufferFull)
  }
}

#[cfg(test)]
mod tests {
  use embedded_time::duration::Milliseconds;
  use newt_msg::opt::known::observe::Sequence;
  use newt_msg::{Code, Id, Payload};
  use tinyvec::array_vec;

  use super::*;
  use crate::config;
  use crate::test;

  type Mock = test::MockStep<(), Addrd<Req<test::Platform>>, Addrd<Resp<test::Platform>>, ()>;
  type Exchange = alloc::Exchange<test::Platform, Mock>;

  fn config(con_delay: u64, post_delay: u64, max: u16) -> Config {
    Config { msg: config::Msg { con: config::Con { unacked_retry_strategy:
                                                     Strategy::Delay { min:
                                                                         Milliseconds(con_delay),
                                                                       max:
                                                                         Milliseconds(con_delay) },
                                                   acked_retry_strategy:
                                                     Strategy::Delay { min:
                                                                         Milliseconds(post_delay),
                                                                       max:
                                                                         Milliseconds(post_delay) },
                                                   max_attempts: Attempts(max) },
                                ..Default::default() },
             ..Default::default() }
  }

  fn snap(cfg: Config, time_millis: u64) -> test::Snapshot {
    test::Snapshot { time: test::instant(time_millis),
                     recvd_dgram: None,
                     config: cfg }
  }

  fn token() -> Token {
    Token(array_vec!([u8; 8] => 0xBB))
  }

  fn con_get(id: u16) -> Addrd<platform::Message<test::Platform>> {
    Addrd(test::Message::new(Type::Con, Code::new(0, 1), Id(id), token()),
          test::dummy_addr())
  }

  fn con_notification(id: u16, payload: &str) -> Addrd<platform::Message<test::Platform>> {
    let mut msg = test::Message::new(Type::Con, Code::new(2, 5), Id(id), token());
    msg.set_observe_seq(Sequence(1)).unwrap();
    msg.payload = Payload(payload.bytes().collect());
    Addrd(msg, test::dummy_addr())
  }

  fn sends(effects: &[test::Effect]) -> Vec<&Addrd<platform::Message<test::Platform>>> {
    effects.iter().filter_map(|e| e.get_send()).collect()
  }

  #[test]
  fn con_request_retransmits_then_times_out_exactly_once() {
    let cfg = config(100, 1000, 1);
    let step = Exchange::default();
    let mut effects = vec![];

    step.on_message_sent(&snap(cfg, 0), &mut effects, &con_get(21))
        .unwrap();

    // before the interval: nothing
    assert!(step.poll_resp(&snap(cfg, 50), &mut effects, token(), test::dummy_addr())
                .is_none());
    assert!(sends(&effects).is_empty());

    // one retransmission of the identical datagram
    assert!(step.poll_resp(&snap(cfg, 100), &mut effects, token(), test::dummy_addr())
                .is_none());
    assert_eq!(sends(&effects), vec![&con_get(21)]);

    // budget exhausted one interval later: surfaced as a timeout
    let out = step.poll_resp(&snap(cfg, 200), &mut effects, token(), test::dummy_addr());
    assert_eq!(out,
               Some(Err(nb::Error::Other(Error::Timeout(Addrd(token(), test::dummy_addr()))))));

    // ...exactly once
    assert!(step.poll_resp(&snap(cfg, 201), &mut effects, token(), test::dummy_addr())
                .is_none());
    assert_eq!(sends(&effects).len(), 1);
  }

  #[test]
  fn empty_ack_extends_deadline_response_closes() {
    let cfg = config(100, 300, 2);
    let step = Exchange::default();
    let mut effects = vec![];

    step.on_message_sent(&snap(cfg, 0), &mut effects, &con_get(5))
        .unwrap();

    step.inner().set_poll_resp(|_, snap, _, _, _| {
                  if snap.time == test::instant(50) {
                    let ack = test::Message::new(Type::Ack,
                                                 Code::new(0, 0),
                                                 Id(5),
                                                 Token(Default::default()));
                    Some(Ok(Addrd(Resp::from(ack), test::dummy_addr())))
                  } else if snap.time == test::instant(400) {
                    let rep = test::Message::new(Type::Non, Code::new(2, 5), Id(80), token());
                    Some(Ok(Addrd(Resp::from(rep), test::dummy_addr())))
                  } else {
                    None
                  }
                });

    // ack consumed, not yielded to the caller
    assert!(step.poll_resp(&snap(cfg, 50), &mut effects, token(), test::dummy_addr())
                .is_none());

    // the unacked schedule no longer applies
    assert!(step.poll_resp(&snap(cfg, 110), &mut effects, token(), test::dummy_addr())
                .is_none());
    assert!(sends(&effects).is_empty());

    // but the lazier post-ack schedule does
    assert!(step.poll_resp(&snap(cfg, 350), &mut effects, token(), test::dummy_addr())
                .is_none());
    assert_eq!(sends(&effects).len(), 1);

    // the response closes the exchange
    let out = step.poll_resp(&snap(cfg, 400), &mut effects, token(), test::dummy_addr());
    assert!(matches!(out, Some(Ok(_))));

    // closed means closed: no more retransmissions, no timeout
    assert!(step.poll_resp(&snap(cfg, 10_000), &mut effects, token(), test::dummy_addr())
                .is_none());
    assert_eq!(sends(&effects).len(), 1);
  }

  #[test]
  fn unmatched_tokenless_ack_answered_with_reset() {
    let step = Exchange::default();
    let mut effects = vec![];

    step.inner().set_poll_resp(|_, _, _, _, _| {
                  let ack = test::Message::new(Type::Ack,
                                               Code::new(0, 0),
                                               Id(99),
                                               Token(Default::default()));
                  Some(Ok(Addrd(Resp::from(ack), test::dummy_addr())))
                });

    assert!(step.poll_resp(&test::snapshot(), &mut effects, token(), test::dummy_addr())
                .is_none());

    assert!(effects.iter()
                   .any(|e| matches!(e, Effect::Log(log::Level::Warn, _))));

    let rst = sends(&effects)[0];
    assert_eq!(rst.data().ty, Type::Reset);
    assert_eq!(rst.data().id, Id(99));
  }

  #[test]
  fn reset_rejects_notification_exchange() {
    let cfg = config(100, 100, 2);
    let step = Exchange::default();
    let mut effects = vec![];

    step.on_message_sent(&snap(cfg, 0), &mut effects, &con_notification(10, "v1"))
        .unwrap();

    step.inner().set_poll_req(|_, _, _| {
                  let rst = test::Message::new(Type::Reset,
                                               Code::new(0, 0),
                                               Id(10),
                                               Token(Default::default()));
                  Some(Ok(Addrd(Req::from(rst), test::dummy_addr())))
                });

    let out = step.poll_req(&snap(cfg, 10), &mut effects);
    assert_eq!(out,
               Some(Err(nb::Error::Other(Error::Rejected(Addrd(token(), test::dummy_addr()))))));

    // the exchange is gone; nothing retransmits
    step.inner().set_poll_req(|_, _, _| None);
    assert!(step.poll_req(&snap(cfg, 10_000), &mut effects).is_none());
    assert!(sends(&effects).is_empty());
  }

  #[test]
  fn notification_timeout_surfaces_in_req_flow() {
    let cfg = config(100, 100, 1);
    let step = Exchange::default();
    let mut effects = vec![];

    step.on_message_sent(&snap(cfg, 0), &mut effects, &con_notification(10, "v1"))
        .unwrap();

    // retransmission at 100, death at 200
    assert!(step.poll_req(&snap(cfg, 100), &mut effects).is_none());
    let out = step.poll_req(&snap(cfg, 200), &mut effects);
    assert_eq!(out,
               Some(Err(nb::Error::Other(Error::Timeout(Addrd(token(), test::dummy_addr()))))));
    assert!(step.poll_req(&snap(cfg, 201), &mut effects).is_none());
  }

  #[test]
  fn observe_response_parks_the_exchange_open() {
    let cfg = config(100, 100, 2);
    let step = Exchange::default();
    let mut effects = vec![];

    step.on_message_sent(&snap(cfg, 0), &mut effects, &con_get(3))
        .unwrap();

    step.inner().set_poll_resp(|_, snap, _, _, _| {
                  let seq = if snap.time == test::instant(10) { 0 } else { 1 };
                  let mut rep = test::Message::new(Type::Non, Code::new(2, 5), Id(40 + seq as u16), token());
                  rep.set_observe_seq(Sequence(seq)).unwrap();
                  Some(Ok(Addrd(Resp::from(rep), test::dummy_addr())))
                });

    // first response delivered, exchange parked instead of closed
    assert!(matches!(step.poll_resp(&snap(cfg, 10), &mut effects, token(), test::dummy_addr()),
                     Some(Ok(_))));

    // parked exchanges never retransmit the original request
    assert!(sends(&effects).is_empty());

    // ...and later notifications still correlate
    assert!(matches!(step.poll_resp(&snap(cfg, 5_000), &mut effects, token(), test::dummy_addr()),
                     Some(Ok(_))));
    assert!(sends(&effects).is_empty());
  }

  #[test]
  fn response_without_exchange_is_dropped_with_warning() {
    let step = Exchange::default();
    let mut effects = vec![];

    step.inner().set_poll_resp(|_, _, _, _, _| {
                  let rep = test::Message::new(Type::Non, Code::new(2, 5), Id(7), token());
                  Some(Ok(Addrd(Resp::from(rep), test::dummy_addr())))
                });

    assert!(step.poll_resp(&test::snapshot(), &mut effects, token(), test::dummy_addr())
                .is_none());
    assert!(effects.iter()
                   .any(|e| matches!(e, Effect::Log(log::Level::Warn, _))));
  }

  #[test]
  fn new_notification_takes_over_inflight_stream() {
    let cfg = config(100, 100, 3);
    let step = Exchange::default();
    let mut effects = vec![];

    // v1 is in flight, unacked
    step.on_message_sent(&snap(cfg, 0), &mut effects, &con_notification(10, "v1"))
        .unwrap();

    // the state changed again: v2 goes out while v1 retransmits.
    // provisioning gave it a fresh id and the cadence said NON,
    // but the in-flight stream wins both
    let mut v2 = con_notification(11, "v2");
    v2.data_mut().ty = Type::Non;

    step.before_message_sent(&snap(cfg, 20), &mut effects, &mut v2)
        .unwrap();
    assert_eq!(v2.data().id, Id(10));
    assert_eq!(v2.data().ty, Type::Con);

    step.on_message_sent(&snap(cfg, 20), &mut effects, &v2)
        .unwrap();

    // the retransmission that fires carries v2, on v1's schedule
    assert!(step.poll_req(&snap(cfg, 100), &mut effects).is_none());
    let re = sends(&effects)[0];
    assert_eq!(re.data().id, Id(10));
    assert_eq!(re.data().payload.0, "v2".bytes().collect::<Vec<u8>>());
    assert_eq!(sends(&effects).len(), 1);
  }

  #[test]
  fn fresh_request_reusing_token_evicts_stale_exchange() {
    let cfg = config(100, 100, 5);
    let step = Exchange::default();
    let mut effects = vec![];

    step.on_message_sent(&snap(cfg, 0), &mut effects, &con_get(1))
        .unwrap();
    step.on_message_sent(&snap(cfg, 50), &mut effects, &con_get(2))
        .unwrap();

    // only the new request retransmits
    assert!(step.poll_resp(&snap(cfg, 150), &mut effects, token(), test::dummy_addr())
                .is_none());
    let re = sends(&effects);
    assert_eq!(re.len(), 1);
    assert_eq!(re[0].data().id, Id(2));
  }

  #[test]
  fn con_ping_answered_with_reset() {
    let step = Exchange::default();
    let mut effects = vec![];

    step.inner().set_poll_req(|_, _, _| {
                  let ping = test::Message::new(Type::Con,
                                                Code::new(0, 0),
                                                Id(77),
                                                Token(Default::default()));
                  Some(Ok(Addrd(Req::from(ping), test::dummy_addr())))
                });

    assert!(step.poll_req(&test::snapshot(), &mut effects).is_none());

    let rst = sends(&effects)[0];
    assert_eq!(rst.data().ty, Type::Reset);
    assert_eq!(rst.data().id, Id(77));
  }
}
