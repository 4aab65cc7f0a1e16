use newt_msg::{CodeKind, Type};
use toad_array::Array;

use super::{Step, StepOutput, _try};
use crate::net::Addrd;
use crate::platform::{Effect, PlatformTypes};
use crate::req::Req;
use crate::resp::Resp;

/// Acknowledge inbound Confirmable messages
///
/// Every payload-bearing CON we receive (a request when we're the
/// server, a response or notification when we're the client) is
/// answered with a bare ACK so the peer stops retransmitting.
/// Empty CONs ("pings") are left for the exchange matcher, which
/// answers them with Reset.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ack<S>(S);

impl<S> Ack<S> {
  /// Create a new Ack step
  pub fn new(s: S) -> Self {
    Self(s)
  }
}

type InnerPollReq<P> = Addrd<Req<P>>;
type InnerPollResp<P> = Addrd<Resp<P>>;

impl<Inner, P> Step<P> for Ack<Inner>
  where P: PlatformTypes,
        Inner: Step<P, PollReq = InnerPollReq<P>, PollResp = InnerPollResp<P>>
{
  type PollReq = Addrd<Req<P>>;
  type PollResp = Addrd<Resp<P>>;
  type Error = Inner::Error;
  type Inner = Inner;

  fn inner(&self) -> &Inner {
    &self.0
  }

  fn poll_req(&self,
              snap: &crate::platform::Snapshot<P>,
              effects: &mut P::Effects)
              -> StepOutput<Self::PollReq, Self::Error> {
    let req = _try!(Option<nb::Result>; self.0.poll_req(snap, effects));

    if req.data().msg().ty == Type::Con && req.data().msg().code.kind() != CodeKind::Empty {
      effects.push(Effect::Send(Addrd(req.data().msg().ack(), req.addr())));
    }

    Some(Ok(req))
  }

  fn poll_resp(&self,
               snap: &crate::platform::Snapshot<P>,
               effects: &mut P::Effects,
               token: newt_msg::Token,
               addr: no_std_net::SocketAddr)
               -> StepOutput<Self::PollResp, Self::Error> {
    let resp = _try!(Option<nb::Result>; self.0.poll_resp(snap, effects, token, addr));

    if resp.data().msg().ty == Type::Con && resp.data().msg().code.kind() != CodeKind::Empty {
      effects.push(Effect::Send(Addrd(resp.data().msg().ack(), resp.addr())));
    }

    Some(Ok(resp))
  }
}
