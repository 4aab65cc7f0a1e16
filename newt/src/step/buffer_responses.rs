use core::fmt::Debug;

use newt_msg::{CodeKind, Token, Type};
use toad_map::Map;
use toad_stem::Stem;

use super::{Step, StepOutput, _try};
use crate::net::Addrd;
use crate::platform::PlatformTypes;
use crate::req::Req;
use crate::resp::Resp;

/// `BufferResponses` that uses BTreeMap
///
/// Only enabled when feature "alloc" enabled.
#[cfg(feature = "alloc")]
pub mod alloc {
  use ::std_alloc::collections::BTreeMap;

  use super::*;

  /// `BufferResponses` that uses BTreeMap
  ///
  /// For more information see [`super::BufferResponses`].
  pub type BufferResponses<S, P> =
    super::BufferResponses<S, BTreeMap<Addrd<Token>, Addrd<Resp<P>>>>;
}

/// Step responsible for routing responses to the poll that is
/// waiting for them.
///
/// A dual-role engine consumes every datagram through the same reader
/// loop, so a response frequently surfaces in the request flow.  This
/// step diverts anything response-shaped into a buffer keyed by
/// `(token, peer)` and yields it when `poll_resp` asks for that key.
///
/// A newer response for a key replaces an unclaimed older one (a
/// notification stream only ever owes its observer the latest state).
#[derive(Debug)]
pub struct BufferResponses<S, B> {
  inner: S,
  buffer: Stem<B>,
}

impl<S: Default, B: Default> Default for BufferResponses<S, B> {
  fn default() -> Self {
    Self { inner: S::default(),
           buffer: Default::default() }
  }
}

/// Errors that can be encountered when buffering responses
#[derive(Clone, PartialEq, Eq)]
pub enum Error<E> {
  /// The inner step failed.
  ///
  /// This variant's Debug representation is completely
  /// replaced by the inner type E's debug representation
  Inner(E),
  /// Storing this response would exceed a hard capacity for the
  /// response buffer.
  ///
  /// Only applicable to [`BufferResponses`] using a heapless
  /// backing structure.
  CapacityExhausted,
}

impl<E: Debug> Debug for Error<E> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | Self::CapacityExhausted => f.debug_struct("CapacityExhausted").finish(),
      | Self::Inner(e) => e.fmt(f),
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
      | Self::Inner(e) => e.dead_exchange(),
      | _ => None,
    }
  }
}

impl<S, B> BufferResponses<S, B> {
  fn stash<P>(&self, resp: Addrd<Resp<P>>) -> Result<(), Error<<S as Step<P>>::Error>>
    where P: PlatformTypes,
          S: Step<P>,
          B: Map<Addrd<Token>, Addrd<Resp<P>>>
  {
    let key = Addrd(resp.data().token(), resp.addr());

    self.buffer.map_mut(|buf| {
                 if buf.is_full() && !buf.has(&key) {
                   Err(Error::CapacityExhausted)
                 } else {
                   buf.remove(&key);
                   buf.insert(key, resp.clone()).ok();
                   Ok(())
                 }
               })
  }
}

impl<P, S, B, E> Step<P> for BufferResponses<S, B>
  where P: PlatformTypes,
        S: Step<P, PollReq = Addrd<Req<P>>, PollResp = Addrd<Resp<P>>, Error = E>,
        B: Map<Addrd<Token>, Addrd<Resp<P>>> + Debug + Default,
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
              snap: &crate::platform::Snapshot<P>,
              effects: &mut P::Effects)
              -> StepOutput<Self::PollReq, Self::Error> {
    let req = _try!(Option<nb::Result>; self.inner.poll_req(snap, effects));

    let msg = req.data().msg();
    let is_response = msg.code.kind() == CodeKind::Response && msg.ty != Type::Reset;

    if is_response {
      match self.stash(req.clone().map(|r| Resp::from(platform_msg(r)))) {
        | Ok(()) => None,
        | Err(e) => Some(Err(nb::Error::Other(e))),
      }
    } else {
      Some(Ok(req))
    }
  }

  fn poll_resp(&self,
               snap: &crate::platform::Snapshot<P>,
               effects: &mut P::Effects,
               token: Token,
               addr: no_std_net::SocketAddr)
               -> StepOutput<Self::PollResp, Self::Error> {
    let fresh = match self.inner.poll_resp(snap, effects, token, addr) {
      | None => None,
      | Some(Err(nb::Error::WouldBlock)) => None,
      | Some(Err(nb::Error::Other(e))) => return Some(Err(nb::Error::Other(Error::Inner(e)))),
      | Some(Ok(resp)) => Some(resp),
    };

    // a fresh response for someone else's key waits its turn in the buffer
    let polled_for = Addrd(token, addr);

    if let Some(resp) = fresh {
      // control messages (a Reset standing in for a response) were
      // already correlated by the matcher; don't re-key them
      if resp.data().msg().code.kind() != CodeKind::Response {
        return Some(Ok(resp));
      }

      let key = Addrd(resp.data().token(), resp.addr());

      if key == polled_for {
        return Some(Ok(resp));
      }

      match self.stash(resp) {
        | Ok(()) => (),
        | Err(e) => return Some(Err(nb::Error::Other(e))),
      }
    }

    self.buffer
        .map_mut(|buf| buf.remove(&polled_for))
        .map(|resp| Ok(resp))
  }
}

fn platform_msg<P: PlatformTypes>(r: Req<P>) -> crate::platform::Message<P> {
  r.into()
}
