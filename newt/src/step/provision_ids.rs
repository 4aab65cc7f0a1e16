use core::fmt::Debug;
use core::marker::PhantomData;

use embedded_time::duration::Milliseconds;
use newt_msg::Id;
use no_std_net::SocketAddr;
use toad_array::Array;
use toad_len::Len;
use toad_map::Map;
use toad_stem::Stem;

use super::{Step, StepOutput};
use crate::net::Addrd;
use crate::platform::{self, PlatformTypes, Snapshot};
use crate::req::Req;
use crate::resp::Resp;
use crate::step::dedup::{IdWithDefault, IdsBySocketAddr};
use crate::time::Stamped;

/// `ProvisionIds` that uses BTreeMap
///
/// Only enabled when feature "alloc" enabled.
#[cfg(feature = "alloc")]
pub mod alloc {
  use ::std_alloc::collections::BTreeMap;
  use ::std_alloc::vec::Vec;

  use super::*;

  /// `ProvisionIds` that uses BTreeMap
  ///
  /// For more information see [`super::ProvisionIds`].
  pub type ProvisionIds<P, S> =
    super::ProvisionIds<P,
                        S,
                        BTreeMap<SocketAddr,
                                 Vec<Stamped<<P as PlatformTypes>::Clock, IdWithDefault>>>>;
}

/// Step responsible for replacing all message ids of zero `Id(0)` (assumed to be meaningless)
/// on outbound messages with a new meaningful Id that is guaranteed to be unique to the
/// conversation with the message's destination address.
///
/// Message ids are a bounded namespace (16 bits per peer); ids older
/// than the exchange lifetime are reclaimed.
#[derive(Debug)]
pub struct ProvisionIds<P, Inner, SeenIds> {
  inner: Inner,
  seen: Stem<SeenIds>,
  __p: PhantomData<P>,
}

impl<P, Inner, SeenIds> Default for ProvisionIds<P, Inner, SeenIds>
  where Inner: Default,
        SeenIds: Default
{
  fn default() -> Self {
    Self { inner: Default::default(),
           seen: Default::default(),
           __p: PhantomData }
  }
}

impl<P, Inner, Ids> ProvisionIds<P, Inner, Ids>
  where Ids: IdsBySocketAddr<P>,
        P: PlatformTypes
{
  fn prune(seen: &mut Ids, snap: &Snapshot<P>) {
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

  /// Generate a Message ID that has not been used yet with the connection with this socket
  ///
  /// best case O(1), worst case O(n)
  fn next(&self, snap: &Snapshot<P>, addr: SocketAddr) -> Id {
    self.seen.map_mut(|seen| {
               Self::prune(seen, snap);

               if !seen.has(&addr) {
                 seen.insert(addr, Default::default()).ok();
               }

               let ids = seen.get_mut(&addr).expect("just inserted");

               // Pessimistically assume peers are sending us non-sequential
               // IDs and sort every time we need a new one.
               ids.sort_unstable();

               let next = if ids.is_empty() {
                 Id(1)
               } else {
                 let smallest = ids[0].data().0 .0;
                 let biggest = ids[ids.len() - 1].data().0 .0;

                 if biggest < u16::MAX {
                   Id(biggest + 1)
                 } else if smallest > 1 {
                   Id(smallest - 1)
                 } else {
                   // the namespace is pinched at both ends; find a gap.
                   //
                   // if the set of ids is literally **EVERY** u16 then
                   // no id can be unique and we reuse the oldest.
                   let mut ahead = ids.iter();
                   ahead.next();

                   ids.iter()
                      .zip(ahead)
                      .find(|(cur, next)| next.data().0 .0 - cur.data().0 .0 > 1)
                      .map(|(cur, _)| Id(cur.data().0 .0 + 1))
                      .unwrap_or_else(|| ids[0].data().0)
                 }
               };

               if ids.is_full() {
                 ids.remove(0);
               }

               ids.push(Stamped(IdWithDefault(next), snap.time));

               next
             })
  }
}

impl<P, E, Inner, Ids> Step<P> for ProvisionIds<P, Inner, Ids>
  where P: PlatformTypes,
        E: super::Error,
        Inner: Step<P, PollReq = Addrd<Req<P>>, PollResp = Addrd<Resp<P>>, Error = E>,
        Ids: IdsBySocketAddr<P> + Default + Debug
{
  type PollReq = Addrd<Req<P>>;
  type PollResp = Addrd<Resp<P>>;
  type Error = E;
  type Inner = Inner;

  fn inner(&self) -> &Inner {
    &self.inner
  }

  fn poll_req(&self,
              snap: &platform::Snapshot<P>,
              effects: &mut P::Effects)
              -> StepOutput<Self::PollReq, Self::Error> {
    self.inner.poll_req(snap, effects)
  }

  fn poll_resp(&self,
               snap: &platform::Snapshot<P>,
               effects: &mut P::Effects,
               token: newt_msg::Token,
               addr: SocketAddr)
               -> StepOutput<Self::PollResp, Self::Error> {
    self.inner.poll_resp(snap, effects, token, addr)
  }

  fn before_message_sent(&self,
                         snap: &platform::Snapshot<P>,
                         effects: &mut P::Effects,
                         msg: &mut Addrd<platform::Message<P>>)
                         -> Result<(), Self::Error> {
    self.inner.before_message_sent(snap, effects, msg)?;

    if msg.data().id == Id(0) {
      let id = self.next(snap, msg.addr());
      msg.data_mut().id = id;
    }

    Ok(())
  }
}

#[cfg(test)]
mod test {
  use newt_msg::{Code, Token, Type};

  use super::*;
  use crate::test;

  type Mock = test::MockStep<(), Addrd<Req<test::Platform>>, Addrd<Resp<test::Platform>>, ()>;
  type ProvisionIds = alloc::ProvisionIds<test::Platform, Mock>;

  fn outbound(id: u16) -> Addrd<test::Message> {
    Addrd(test::Message::new(Type::Con,
                             Code::new(0, 1),
                             Id(id),
                             Token(Default::default())),
          test::dummy_addr())
  }

  #[test]
  fn zero_id_gets_provisioned() {
    let step = ProvisionIds::default();
    let mut effects = vec![];
    let mut msg = outbound(0);

    step.before_message_sent(&test::snapshot(), &mut effects, &mut msg)
        .unwrap();
    assert!(msg.data().id.0 > 0);
  }

  #[test]
  fn nonzero_id_left_alone() {
    let step = ProvisionIds::default();
    let mut effects = vec![];
    let mut msg = outbound(1234);

    step.before_message_sent(&test::snapshot(), &mut effects, &mut msg)
        .unwrap();
    assert_eq!(msg.data().id, Id(1234));
  }

  #[test]
  fn provisioned_ids_are_unique_per_peer() {
    let step = ProvisionIds::default();
    let mut effects = vec![];

    let mut seen = std::collections::BTreeSet::new();
    for _ in 0..100 {
      let mut msg = outbound(0);
      step.before_message_sent(&test::snapshot(), &mut effects, &mut msg)
          .unwrap();
      assert!(seen.insert(msg.data().id));
    }
  }

  #[test]
  fn id_generation_counts_up_from_biggest() {
    let step = ProvisionIds::default();
    let mut effects = vec![];

    let mut msg = outbound(0);
    step.before_message_sent(&test::snapshot(), &mut effects, &mut msg)
        .unwrap();
    assert_eq!(msg.data().id, Id(1));

    let mut msg = outbound(0);
    step.before_message_sent(&test::snapshot(), &mut effects, &mut msg)
        .unwrap();
    assert_eq!(msg.data().id, Id(2));
  }
}
