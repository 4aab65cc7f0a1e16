use core::fmt::Debug;
use core::marker::PhantomData;

use embedded_time::duration::Milliseconds;
use newt_msg::{CodeKind, Id, Type};
use no_std_net::SocketAddr;
use toad_array::Array;
use toad_len::Len;
use toad_map::Map;
use toad_stem::Stem;

use super::{log, Step, StepOutput, _try};
use crate::net::Addrd;
use crate::platform::{self, Effect, PlatformTypes, Snapshot};
use crate::req::Req;
use crate::resp::Resp;
use crate::time::Stamped;

/// `Dedup` that uses BTreeMap
///
/// Only enabled when feature "alloc" enabled.
#[cfg(feature = "alloc")]
pub mod alloc {
  use ::std_alloc::collections::BTreeMap;
  use ::std_alloc::vec::Vec;

  use super::*;

  /// `Dedup` that uses BTreeMap
  ///
  /// For more information see [`super::Dedup`].
  pub type Dedup<P, S> =
    super::Dedup<P, S, BTreeMap<SocketAddr, Vec<Stamped<<P as PlatformTypes>::Clock, IdWithDefault>>>>;
}

/// Newtype wrapping [`newt_msg::Id`] that adds a Default implementation.
///
/// Defined so that a [`tinyvec::ArrayVec`] may be used with this type.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[non_exhaustive]
pub struct IdWithDefault(pub Id);

impl Default for IdWithDefault {
  fn default() -> Self {
    Self(Id(0))
  }
}

/// Supertrait type shenanigans
///
/// What we want: "given `A` which is an [`Array`] of timestamped [`Id`]s,
/// I want a [`Map`] from [`SocketAddr`] to `A`."
pub trait IdsBySocketAddr<P: PlatformTypes>: Map<SocketAddr, Self::Ids> + Debug {
  /// the "given `A` which is an..." type above
  type Ids: Array<Item = Stamped<P::Clock, IdWithDefault>>;
}

#[cfg(feature = "alloc")]
impl<P, A> IdsBySocketAddr<P> for std_alloc::collections::BTreeMap<SocketAddr, A>
  where P: PlatformTypes,
        A: Array<Item = Stamped<P::Clock, IdWithDefault>> + Debug
{
  type Ids = A;
}

/// Step enforcing the deduplication rule: a message id we already
/// processed from a peer inside the dedup window is acknowledged
/// again (when confirmable) but never handed up the chain twice.
///
/// Feeding the same serialized datagram to the engine N times
/// therefore yields exactly one delivery.
#[derive(Debug)]
pub struct Dedup<P, S, Seen> {
  inner: S,
  seen: Stem<Seen>,
  __p: PhantomData<P>,
}

impl<P, S, Seen> Default for Dedup<P, S, Seen>
  where S: Default,
        Seen: Default
{
  fn default() -> Self {
    Self { inner: Default::default(),
           seen: Default::default(),
           __p: PhantomData }
  }
}

impl<P, S, Seen> Dedup<P, S, Seen>
  where P: PlatformTypes,
        Seen: IdsBySocketAddr<P>
{
  fn prune(seen: &mut Seen, snap: &Snapshot<P>) {
    let window = Milliseconds(snap.config.exchange_lifetime_millis());

    for (_, ids) in seen.iter_mut() {
      loop {
        let expired = ids.iter()
                         .enumerate()
                         .find(|(_, stamped)| {
                           Milliseconds::<u64>::try_from(snap.time - stamped.time())
                                                        .map(|since| since >= window)
                                                        .unwrap_or(true)
                         })
                         .map(|(ix, _)| ix);

        match expired {
          | Some(ix) => {
            ids.remove(ix);
          },
          | None => break,
        }
      }
    }
  }

  /// Record `(addr, id)` as seen; true if it was already in the window.
  fn suppress(&self, snap: &Snapshot<P>, addr: SocketAddr, id: Id) -> bool {
    self.seen.map_mut(|seen| {
               Self::prune(seen, snap);

               match seen.get_mut(&addr) {
                 | Some(ids) if ids.iter().any(|s| s.data().0 == id) => true,
                 | Some(ids) => {
                   if ids.is_full() {
                     // drop the oldest to make room; better to forget an old
                     // id (and maybe re-deliver) than to ignore a new one
                     ids.remove(0);
                   }
                   ids.push(Stamped(IdWithDefault(id), snap.time));
                   false
                 },
                 | None => {
                   let mut ids = Seen::Ids::default();
                   ids.push(Stamped(IdWithDefault(id), snap.time));
                   seen.insert(addr, ids).ok();
                   false
                 },
               }
             })
  }
}

macro_rules! common {
  ($self:expr, $snap:expr, $effects:expr, $in:expr, $msg:expr) => {{
    let msg: &platform::Message<P> = $msg;
    let (ty, kind, id, addr) = (msg.ty, msg.code.kind(), msg.id, $in.addr());

    match kind {
      // bare ACKs & Resets are idempotent controls, correlated by id
      // one layer up; the dedup window only guards payload-bearing messages
      | CodeKind::Empty => Some(Ok($in)),
      | _ if !$self.suppress($snap, addr, id) => Some(Ok($in)),
      | _ => {
        if ty == Type::Con {
          $effects.push(Effect::Send(Addrd(msg.ack(), addr)));
        }

        log!($effects,
             log::Level::Debug,
             "Suppressing duplicate {:?} from {} (id {:?})",
             ty,
             addr,
             id);
        None
      },
    }
  }};
}

impl<P, S, Seen, E> Step<P> for Dedup<P, S, Seen>
  where P: PlatformTypes,
        S: Step<P, PollReq = Addrd<Req<P>>, PollResp = Addrd<Resp<P>>, Error = E>,
        Seen: IdsBySocketAddr<P> + Default,
        E: super::Error
{
  type PollReq = Addrd<Req<P>>;
  type PollResp = Addrd<Resp<P>>;
  type Error = E;
  type Inner = S;

  fn inner(&self) -> &S {
    &self.inner
  }

  fn poll_req(&self,
              snap: &platform::Snapshot<P>,
              effects: &mut P::Effects)
              -> StepOutput<Self::PollReq, Self::Error> {
    let req = _try!(Option<nb::Result>; self.inner.poll_req(snap, effects));
    let msg = req.data().msg().clone();
    common!(self, snap, effects, req, &msg)
  }

  fn poll_resp(&self,
               snap: &platform::Snapshot<P>,
               effects: &mut P::Effects,
               token: newt_msg::Token,
               addr: no_std_net::SocketAddr)
               -> StepOutput<Self::PollResp, Self::Error> {
    let resp = _try!(Option<nb::Result>; self.inner.poll_resp(snap, effects, token, addr));
    let msg = resp.data().msg().clone();
    common!(self, snap, effects, resp, &msg)
  }
}

#[cfg(test)]
mod test {
  use newt_msg::{Code, Token};

  use super::*;
  use crate::test;

  type Dedup = alloc::Dedup<test::Platform, test::MockStep<(),
                                                           Addrd<Req<test::Platform>>,
                                                           Addrd<Resp<test::Platform>>,
                                                           ()>>;

  fn con_request(id: u16) -> Addrd<Req<test::Platform>> {
    let msg = test::Message::new(Type::Con, Code::new(0, 1), Id(id), Token(Default::default()));
    Addrd(Req::from(msg), test::dummy_addr())
  }

  #[test]
  fn fresh_messages_pass_through() {
    let step = Dedup::default();
    step.inner().set_poll_req(|_, _, _| Some(Ok(con_request(1))));

    let mut effects = vec![];
    assert!(matches!(step.poll_req(&test::snapshot(), &mut effects), Some(Ok(_))));
    assert!(effects.is_empty());
  }

  #[test]
  fn duplicate_con_is_reacked_and_suppressed() {
    let step = Dedup::default();
    step.inner().set_poll_req(|_, _, _| Some(Ok(con_request(33))));

    let mut effects = vec![];

    // first delivery goes through
    assert!(matches!(step.poll_req(&test::snapshot(), &mut effects), Some(Ok(_))));
    assert!(effects.is_empty());

    // the retransmission is answered with another ACK but not redelivered
    assert!(step.poll_req(&test::snapshot(), &mut effects).is_none());

    let ack = effects[0].get_send().unwrap();
    assert_eq!(ack.data().ty, Type::Ack);
    assert_eq!(ack.data().code.kind(), CodeKind::Empty);
    assert_eq!(ack.data().id, Id(33));
  }

  #[test]
  fn duplicate_non_is_dropped_without_ack() {
    let step = Dedup::default();
    step.inner().set_poll_req(|_, _, _| {
                  let mut req = con_request(7);
                  req.data_mut().msg_mut().ty = Type::Non;
                  Some(Ok(req))
                });

    let mut effects = vec![];
    assert!(matches!(step.poll_req(&test::snapshot(), &mut effects), Some(Ok(_))));
    assert!(step.poll_req(&test::snapshot(), &mut effects).is_none());
    assert!(effects.iter().all(|e| !e.is_send()));
  }

  #[test]
  fn same_id_different_peer_is_not_a_duplicate() {
    let step = Dedup::default();

    let mut effects = vec![];

    step.inner().set_poll_req(|_, _, _| Some(Ok(con_request(5))));
    assert!(matches!(step.poll_req(&test::snapshot(), &mut effects), Some(Ok(_))));

    step.inner().set_poll_req(|_, _, _| {
                  Some(Ok(Addrd(con_request(5).unwrap(), test::dummy_addr_2())))
                });
    assert!(matches!(step.poll_req(&test::snapshot(), &mut effects), Some(Ok(_))));
  }

  #[test]
  fn ids_age_out_of_the_window() {
    let step = Dedup::default();
    step.inner().set_poll_req(|_, _, _| Some(Ok(con_request(9))));

    let mut effects = vec![];
    let t_0 = test::snapshot();
    let mut t_n = test::snapshot();
    t_n.time = test::instant(t_n.config.exchange_lifetime_millis() + 1);

    assert!(matches!(step.poll_req(&t_0, &mut effects), Some(Ok(_))));

    // long after the exchange lifetime the same id is new again
    assert!(matches!(step.poll_req(&t_n, &mut effects), Some(Ok(_))));
  }
}
