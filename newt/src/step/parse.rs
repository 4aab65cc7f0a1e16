use newt_msg::TryFromBytes;
use toad_array::Array;

use super::{log, Step, StepOutput};
use crate::net::Addrd;
use crate::platform::{self, PlatformTypes};
use crate::req::Req;
use crate::resp::Resp;

/// The message parsing step
///
/// Turns the datagram in the snapshot (if any) into a [`Req`] /
/// [`Resp`] for the steps above it.
///
/// A datagram that fails to parse is logged and dropped; a
/// malformed packet from one peer must never take down the
/// whole poll loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct Parse<S>(S);

impl<S> Parse<S> {
  /// Create a new Parse step
  pub fn new(s: S) -> Self {
    Self(s)
  }
}

macro_rules! parse {
  ($snap:expr, $effects:expr) => {{
    match $snap.recvd_dgram.as_ref() {
      | None => None,
      | Some(dgram) => {
        match platform::Message::<P>::try_from_bytes(dgram.data()) {
          | Ok(msg) => Some(Addrd(msg, dgram.addr())),
          | Err(e) => {
            log!($effects,
                 log::Level::Warn,
                 "Discarding {}b datagram from {}: failed to parse ({:?})",
                 dgram.data().as_ref().len(),
                 dgram.addr(),
                 e);
            None
          },
        }
      },
    }
  }};
}

impl<Inner, P> Step<P> for Parse<Inner>
  where P: PlatformTypes,
        Inner: Step<P, PollReq = (), PollResp = ()>
{
  type PollReq = Addrd<Req<P>>;
  type PollResp = Addrd<Resp<P>>;
  type Error = Inner::Error;
  type Inner = Inner;

  fn inner(&self) -> &Inner {
    &self.0
  }

  fn poll_req(&self,
              snap: &platform::Snapshot<P>,
              effects: &mut P::Effects)
              -> StepOutput<Self::PollReq, Self::Error> {
    match self.0.poll_req(snap, effects) {
      | Some(Err(e)) => return Some(Err(e)),
      | _ => (),
    };

    parse!(snap, effects).map(|addrd| Ok(addrd.map(Req::from)))
  }

  fn poll_resp(&self,
               snap: &platform::Snapshot<P>,
               effects: &mut P::Effects,
               token: newt_msg::Token,
               addr: no_std_net::SocketAddr)
               -> StepOutput<Self::PollResp, Self::Error> {
    match self.0.poll_resp(snap, effects, token, addr) {
      | Some(Err(e)) => return Some(Err(e)),
      | _ => (),
    };

    parse!(snap, effects).map(|addrd| Ok(addrd.map(Resp::from)))
  }
}
