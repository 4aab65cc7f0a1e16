use core::fmt::Debug;
use core::marker::PhantomData;

use newt_msg::opt::known::observe::{Action, Sequence};
use newt_msg::{CodeKind, MessageOptions, Token, Type};
use toad_array::Array;
use toad_stem::Stem;

use super::{log, Step, StepOutput, _try};
use crate::net::Addrd;
use crate::platform::{self, PlatformTypes};
use crate::req::Req;
use crate::resp::Resp;

/// `Observe` that uses Vec
///
/// Only enabled when feature "alloc" enabled.
#[cfg(feature = "alloc")]
pub mod alloc {
  use ::std_alloc::vec::Vec;

  use super::*;

  /// [`Observe`](super::Observe) that uses Vec.
  pub type Observe<P, S> = super::Observe<P,
                                          S,
                                          Vec<Sub<P>>,
                                          Vec<Addrd<Req<P>>>,
                                          Vec<(Addrd<Token>, Sequence)>>;
}

/// An observe relation: one standing subscription of one peer (by
/// token) to one resource (by the path of the request that created it).
pub struct Sub<P>
  where P: PlatformTypes
{
  req: Addrd<Req<P>>,
  seq: Sequence,
  count: u16,
}

impl<P> Debug for Sub<P> where P: PlatformTypes
{
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Sub")
     .field("req", &self.req)
     .field("seq", &self.seq)
     .field("count", &self.count)
     .finish()
  }
}

impl<P> Sub<P> where P: PlatformTypes
{
  /// Create a new subscription from its originating request
  pub fn new(req: Addrd<Req<P>>) -> Self {
    Self { req,
           seq: Sequence(0),
           count: 0 }
  }

  /// Get a reference to the request this subscription originated from
  pub fn req(&self) -> &Addrd<Req<P>> {
    &self.req
  }

  #[allow(missing_docs)]
  pub fn token(&self) -> Token {
    self.req.data().msg().token
  }

  #[allow(missing_docs)]
  pub fn addr(&self) -> no_std_net::SocketAddr {
    self.req.addr()
  }

  fn matches_path(&self, path: &str) -> bool {
    self.req.data().path() == Some(path)
  }
}

/// The observe coordinator.
///
/// Server side: tracks relations, fans `notify(path)` out by
/// re-enqueueing each matching subscription's request, and stamps the
/// responses with a monotonically increasing 24-bit sequence and a
/// con/non cadence ([`crate::config::Observe::con_every`]).
///
/// Relations die on Deregister, on a fresh un-registered request for
/// the same (peer, token), on a Reset answering a notification, and on
/// retransmission budget exhaustion; the latter two arrive as
/// [`dead_exchange`](crate::step::Error::dead_exchange) errors from
/// the matcher below and are swallowed here after the cancellation.
///
/// Client side: drops notifications whose sequence is not strictly
/// newer (24-bit signed distance) than the last accepted one.
#[derive(Debug)]
pub struct Observe<P, S, Subs, RequestQueue, LastSeen> {
  inner: S,
  subs: Stem<Subs>,
  request_queue: Stem<RequestQueue>,
  last_seen: Stem<LastSeen>,
  __p: PhantomData<P>,
}

impl<P, S, Subs, RQ, L> Default for Observe<P, S, Subs, RQ, L>
  where S: Default,
        Subs: Default,
        RQ: Default,
        L: Default
{
  fn default() -> Self {
    Observe { inner: S::default(),
              subs: Default::default(),
              request_queue: Default::default(),
              last_seen: Default::default(),
              __p: PhantomData }
  }
}

impl<P, S, Subs, RQ, L> Observe<P, S, Subs, RQ, L>
  where P: PlatformTypes,
        Subs: Array<Item = Sub<P>>,
        RQ: Array<Item = Addrd<Req<P>>>,
        L: Array<Item = (Addrd<Token>, Sequence)>
{
  fn sub_index(&self, token: Token, addr: no_std_net::SocketAddr) -> Option<usize> {
    self.subs.map_ref(|subs| {
               subs.iter()
                   .position(|s| s.token() == token && s.addr() == addr)
             })
  }

  fn remove_sub(&self, token: Token, addr: no_std_net::SocketAddr) -> bool {
    self.subs.map_mut(|subs| {
               match subs.iter()
                         .position(|s| s.token() == token && s.addr() == addr)
               {
                 | Some(ix) => {
                   subs.remove(ix);
                   true
                 },
                 | None => false,
               }
             })
  }

  fn push_sub(&self, req: &Addrd<Req<P>>) {
    self.remove_sub(req.data().msg().token, req.addr());

    let mut sub = Some(Sub::new(req.clone()));
    self.subs
        .map_mut(|subs| subs.push(Option::take(&mut sub).expect("pushed once")));
  }

  fn pop_queued(&self) -> Option<Addrd<Req<P>>> {
    self.request_queue.map_mut(|rq| {
                        if rq.is_empty() {
                          None
                        } else {
                          rq.remove(rq.len() - 1)
                        }
                      })
  }

  fn handle_incoming_request<E>(&self, req: Addrd<Req<P>>) -> StepOutput<Addrd<Req<P>>, E> {
    let msg = req.data().msg();
    let (token, addr) = (msg.token, req.addr());

    if msg.code.kind() == CodeKind::Request {
      match msg.observe() {
        | Some(Action::Register) => self.push_sub(&req),
        | Some(Action::Deregister) => {
          self.remove_sub(token, addr);
        },
        | None => {
          // a fresh request on a subscribed (peer, token) without the
          // register option means the subscription is over
          if self.sub_index(token, addr).is_some() {
            self.remove_sub(token, addr);
          }
        },
      }
    }

    Some(Ok(req))
  }

  /// Cancel anything the dead exchange was serving.
  ///
  /// `true` when the death belonged to one of our relations (and was
  /// therefore handled here).
  fn handle_dead_exchange(&self, dead: Addrd<Token>, effects: &mut P::Effects) -> bool {
    let Addrd(token, addr) = dead;

    self.last_seen.map_mut(|last| {
                    if let Some(ix) = last.iter().position(|(k, _)| *k == dead) {
                      last.remove(ix);
                    }
                  });

    if self.remove_sub(token, addr) {
      log!(effects,
           log::Level::Warn,
           "Observe relation for {:?} cancelled; peer is unreachable or rejected it",
           token);
      true
    } else {
      false
    }
  }
}

impl<P, S, Subs, RQ, L> Step<P> for Observe<P, S, Subs, RQ, L>
  where P: PlatformTypes,
        S: Step<P, PollReq = Addrd<Req<P>>, PollResp = Addrd<Resp<P>>>,
        Subs: Array<Item = Sub<P>> + Debug,
        RQ: Array<Item = Addrd<Req<P>>> + Debug,
        L: Array<Item = (Addrd<Token>, Sequence)> + Debug
{
  type PollReq = Addrd<Req<P>>;
  type PollResp = Addrd<Resp<P>>;
  type Error = S::Error;
  type Inner = S;

  fn inner(&self) -> &S {
    &self.inner
  }

  fn poll_req(&self,
              snap: &platform::Snapshot<P>,
              effects: &mut P::Effects)
              -> StepOutput<Self::PollReq, Self::Error> {
    match self.inner.poll_req(snap, effects) {
      | Some(Ok(req)) => self.handle_incoming_request(req),
      | Some(Err(nb::Error::Other(e))) => {
        match super::Error::dead_exchange(&e) {
          | Some(dead) if self.handle_dead_exchange(dead, effects) => None,
          | _ => Some(Err(nb::Error::Other(e))),
        }
      },
      | None | Some(Err(nb::Error::WouldBlock)) => self.pop_queued().map(Ok),
    }
  }

  fn poll_resp(&self,
               snap: &platform::Snapshot<P>,
               effects: &mut P::Effects,
               token: Token,
               addr: no_std_net::SocketAddr)
               -> StepOutput<Self::PollResp, Self::Error> {
    let resp = _try!(Option<nb::Result>; self.inner.poll_resp(snap, effects, token, addr));

    let seq = match (resp.data().msg().code.kind(), resp.data().msg().observe_seq()) {
      | (CodeKind::Response, Some(seq)) => seq,
      | _ => return Some(Ok(resp)),
    };

    let key = Addrd(resp.data().token(), resp.addr());
    let fresh = self.last_seen.map_mut(|last| {
                                match last.iter().position(|(k, _)| *k == key) {
                                  | Some(ix) if seq.is_newer_than(last[ix].1) => {
                                    last[ix].1 = seq;
                                    true
                                  },
                                  | Some(_) => false,
                                  | None => {
                                    last.push((key, seq));
                                    true
                                  },
                                }
                              });

    if fresh {
      Some(Ok(resp))
    } else {
      log!(effects,
           log::Level::Debug,
           "Dropping stale notification {:?} for {:?}",
           seq,
           key.data());
      None
    }
  }

  fn before_message_sent(&self,
                         snap: &platform::Snapshot<P>,
                         effects: &mut P::Effects,
                         msg: &mut Addrd<platform::Message<P>>)
                         -> Result<(), Self::Error> {
    self.inner.before_message_sent(snap, effects, msg)?;

    if msg.data().code.kind() != CodeKind::Response || msg.data().observe_seq().is_some() {
      return Ok(());
    }

    let ix = self.sub_index(msg.data().token, msg.addr());

    if let Some(ix) = ix {
      let con_every = snap.config.observe.con_every.max(1);

      let (seq, ty) = self.subs.map_mut(|subs| {
                                 let sub = &mut subs[ix];

                                 let seq = if sub.count == 0 {
                                   Sequence(0)
                                 } else {
                                   sub.seq.next()
                                 };
                                 sub.seq = seq;

                                 // registration response keeps whatever type the
                                 // responder chose; notifications follow the cadence
                                 let ty = match sub.count {
                                   | 0 => None,
                                   | n if (n - 1) % con_every == 0 => Some(Type::Con),
                                   | _ => Some(Type::Non),
                                 };

                                 sub.count += 1;
                                 (seq, ty)
                               });

      msg.data_mut().set_observe_seq(seq).ok();
      if let Some(ty) = ty {
        msg.data_mut().ty = ty;
      }
    }

    Ok(())
  }

  fn notify<Path>(&self, path: Path) -> Result<(), Self::Error>
    where Path: AsRef<str> + Clone
  {
    self.inner.notify(path.clone())?;

    self.request_queue.map_mut(|rq| {
                        // drop queued fan-outs for this path that nobody has
                        // polled yet; they'd re-render stale state anyway
                        loop {
                          match rq.iter()
                                  .position(|req| req.data().path() == Some(path.as_ref()))
                          {
                            | Some(ix) => {
                              rq.remove(ix);
                            },
                            | None => break,
                          }
                        }

                        self.subs.map_ref(|subs| {
                                   subs.iter()
                                       .filter(|sub| sub.matches_path(path.as_ref()))
                                       .for_each(|sub| rq.push(sub.req().clone()));
                                 });
                      });

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use newt_msg::{Code, Id};
  use tinyvec::array_vec;

  use super::*;
  use crate::platform::Effect;
  use crate::step::exchange;
  use crate::test;

  type Mock = test::MockStep<(),
                             Addrd<Req<test::Platform>>,
                             Addrd<Resp<test::Platform>>,
                             exchange::Error<()>>;
  type Observe = alloc::Observe<test::Platform, Mock>;

  fn token() -> Token {
    Token(array_vec!([u8; 8] => 1, 2, 3, 4))
  }

  fn register_request() -> Addrd<Req<test::Platform>> {
    let mut msg = test::Message::new(Type::Con, Code::new(0, 1), Id(1), token());
    msg.set_path("weather/temp").unwrap();
    msg.set_observe(Action::Register).unwrap();
    Addrd(Req::from(msg), test::dummy_addr())
  }

  fn content_response() -> Addrd<platform::Message<test::Platform>> {
    Addrd(test::Message::new(Type::Non, Code::new(2, 5), Id(0), token()),
          test::dummy_addr())
  }

  fn register(step: &Observe) {
    step.inner()
        .set_poll_req(|_, _, _| Some(Ok(register_request())));
    step.poll_req(&test::snapshot(), &mut vec![])
        .unwrap()
        .unwrap();
    step.inner().set_poll_req(|_, _, _| None);
  }

  #[test]
  fn register_then_notify_requeues_the_request() {
    let step = Observe::default();
    register(&step);

    step.notify("weather/temp").unwrap();

    let req = step.poll_req(&test::snapshot(), &mut vec![])
                  .unwrap()
                  .unwrap();
    assert_eq!(req.data().msg().token, token());

    // drained
    assert!(step.poll_req(&test::snapshot(), &mut vec![]).is_none());
  }

  #[test]
  fn notify_for_unrelated_path_does_nothing() {
    let step = Observe::default();
    register(&step);

    step.notify("weather/humidity").unwrap();
    assert!(step.poll_req(&test::snapshot(), &mut vec![]).is_none());
  }

  #[test]
  fn responses_are_stamped_in_sequence_with_cadence() {
    let step = Observe::default();
    register(&step);

    let mut effects = vec![];

    // the registration response binds the relation at sequence 0
    let mut rep = content_response();
    step.before_message_sent(&test::snapshot(), &mut effects, &mut rep)
        .unwrap();
    assert_eq!(rep.data().observe_seq(), Some(Sequence(0)));
    assert_eq!(rep.data().ty, Type::Non);

    // first notification: sequence 1, always confirmable
    let mut rep = content_response();
    step.before_message_sent(&test::snapshot(), &mut effects, &mut rep)
        .unwrap();
    assert_eq!(rep.data().observe_seq(), Some(Sequence(1)));
    assert_eq!(rep.data().ty, Type::Con);

    // following notifications ride non-confirmably until the cadence
    // comes round again
    for expected in 2..=8u32 {
      let mut rep = content_response();
      step.before_message_sent(&test::snapshot(), &mut effects, &mut rep)
          .unwrap();
      assert_eq!(rep.data().observe_seq(), Some(Sequence(expected)));
      assert_eq!(rep.data().ty, Type::Non);
    }

    let mut rep = content_response();
    step.before_message_sent(&test::snapshot(), &mut effects, &mut rep)
        .unwrap();
    assert_eq!(rep.data().observe_seq(), Some(Sequence(9)));
    assert_eq!(rep.data().ty, Type::Con);
  }

  #[test]
  fn responses_to_unobserved_tokens_are_untouched() {
    let step = Observe::default();

    let mut rep = content_response();
    step.before_message_sent(&test::snapshot(), &mut vec![], &mut rep)
        .unwrap();
    assert_eq!(rep.data().observe_seq(), None);
  }

  #[test]
  fn deregister_cancels_the_relation() {
    let step = Observe::default();
    register(&step);

    step.inner().set_poll_req(|_, _, _| {
                  let mut msg =
                    test::Message::new(Type::Con, Code::new(0, 1), Id(2), token());
                  msg.set_path("weather/temp").unwrap();
                  msg.set_observe(Action::Deregister).unwrap();
                  Some(Ok(Addrd(Req::from(msg), test::dummy_addr())))
                });
    step.poll_req(&test::snapshot(), &mut vec![])
        .unwrap()
        .unwrap();
    step.inner().set_poll_req(|_, _, _| None);

    step.notify("weather/temp").unwrap();
    assert!(step.poll_req(&test::snapshot(), &mut vec![]).is_none());
  }

  #[test]
  fn fresh_unregistered_request_cancels_the_relation() {
    let step = Observe::default();
    register(&step);

    step.inner().set_poll_req(|_, _, _| {
                  let mut msg =
                    test::Message::new(Type::Con, Code::new(0, 1), Id(3), token());
                  msg.set_path("weather/temp").unwrap();
                  Some(Ok(Addrd(Req::from(msg), test::dummy_addr())))
                });
    step.poll_req(&test::snapshot(), &mut vec![])
        .unwrap()
        .unwrap();
    step.inner().set_poll_req(|_, _, _| None);

    step.notify("weather/temp").unwrap();
    assert!(step.poll_req(&test::snapshot(), &mut vec![]).is_none());
  }

  #[test]
  fn dead_exchange_for_relation_is_swallowed_and_cancels() {
    let step = Observe::default();
    register(&step);

    step.inner().set_poll_req(|_, _, _| {
                  Some(Err(nb::Error::Other(exchange::Error::Timeout(Addrd(token(),
                                                                           test::dummy_addr())))))
                });

    let mut effects = vec![];
    assert!(step.poll_req(&test::snapshot(), &mut effects).is_none());
    assert!(effects.iter()
                   .any(|e| matches!(e, Effect::Log(log::Level::Warn, _))));

    // the relation is gone
    step.inner().set_poll_req(|_, _, _| None);
    step.notify("weather/temp").unwrap();
    assert!(step.poll_req(&test::snapshot(), &mut vec![]).is_none());
  }

  #[test]
  fn dead_exchange_for_something_else_propagates() {
    let step = Observe::default();

    step.inner().set_poll_req(|_, _, _| {
                  Some(Err(nb::Error::Other(exchange::Error::Timeout(Addrd(token(),
                                                                           test::dummy_addr())))))
                });

    let out = step.poll_req(&test::snapshot(), &mut vec![]);
    assert!(matches!(out, Some(Err(nb::Error::Other(exchange::Error::Timeout(_))))));
  }

  #[test]
  fn stale_notifications_are_dropped() {
    let step = Observe::default();
    let mut effects = vec![];

    let notification = |seq: u32| {
      let mut msg = test::Message::new(Type::Non, Code::new(2, 5), Id(seq as u16), token());
      msg.set_observe_seq(Sequence(seq)).unwrap();
      Addrd(Resp::from(msg), test::dummy_addr())
    };

    step.inner()
        .set_poll_resp(move |_, _, _, _, _| Some(Ok(notification(5))));
    assert!(matches!(step.poll_resp(&test::snapshot(), &mut effects, token(), test::dummy_addr()),
                     Some(Ok(_))));

    let notification = |seq: u32| {
      let mut msg = test::Message::new(Type::Non, Code::new(2, 5), Id(seq as u16), token());
      msg.set_observe_seq(Sequence(seq)).unwrap();
      Addrd(Resp::from(msg), test::dummy_addr())
    };

    step.inner()
        .set_poll_resp(move |_, _, _, _, _| Some(Ok(notification(4))));
    assert!(step.poll_resp(&test::snapshot(), &mut effects, token(), test::dummy_addr())
                .is_none());

    step.inner()
        .set_poll_resp(move |_, _, _, _, _| Some(Ok(notification(6))));
    assert!(matches!(step.poll_resp(&test::snapshot(), &mut effects, token(), test::dummy_addr()),
                     Some(Ok(_))));
  }
}
