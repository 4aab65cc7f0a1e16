use newt_msg::{CodeKind, Token};

use super::Step;
use crate::net::Addrd;
use crate::platform::{self, PlatformTypes};
use crate::req::Req;
use crate::resp::Resp;
use crate::time::Millis;

/// Errors that can be encountered when provisioning tokens
#[derive(PartialEq, Eq, PartialOrd, Clone, Copy)]
pub enum Error<E> {
  /// The inner step failed.
  ///
  /// This variant's Debug representation is completely
  /// replaced by the inner type E's debug representation.
  Inner(E),
  /// This exceedingly rare error will only ever happen
  /// when the [`Clock`](crate::time::Clock) implementation
  /// is defined as 1 tick meaning 1 second.
  ///
  /// If this is the case, it would be highly advised to use
  /// milli ticks, as seconds are too granular to be reliable
  /// for timings used in the engine.
  MillisSinceEpochWouldOverflow,
}

impl<E: core::fmt::Debug> core::fmt::Debug for Error<E> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | Self::MillisSinceEpochWouldOverflow => {
        f.debug_tuple("MillisSinceEpochWouldOverflow").finish()
      },
      | Self::Inner(e) => e.fmt(f),
    }
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

impl<E> From<E> for Error<E> {
  fn from(e: E) -> Self {
    Error::Inner(e)
  }
}

/// Step responsible for setting the token of all outbound requests with
/// empty tokens (`Token(Default::default())`, assumed to be meaningless)
/// to a new token that is practically guaranteed to be unique to the
/// conversation with the message's destination address.
#[derive(Debug, Clone)]
pub struct ProvisionTokens<Inner> {
  inner: Inner,
}

impl<Inner> Default for ProvisionTokens<Inner> where Inner: Default
{
  fn default() -> Self {
    Self { inner: Default::default() }
  }
}

impl<Inner> ProvisionTokens<Inner> {
  fn next<E, Clock>(&self,
                    now: embedded_time::Instant<Clock>,
                    cfg: crate::config::Config)
                    -> Result<Token, Error<E>>
    where Clock: crate::time::Clock
  {
    let now_since_epoch =
      Millis::try_from(now.duration_since_epoch()).map_err(|_| {
                                                    Error::MillisSinceEpochWouldOverflow
                                                  })?;

    #[allow(clippy::many_single_char_names)]
    let bytes = {
      let ([a, b], [c, d, e, f, g, h, i, j]) =
        (cfg.msg.token_seed.to_be_bytes(), now_since_epoch.0.to_be_bytes());
      [a, b, c, d, e, f, g, h, i, j]
    };

    Ok(Token::opaque(&bytes))
  }
}

impl<P, E, Inner> Step<P> for ProvisionTokens<Inner>
  where P: PlatformTypes,
        E: super::Error,
        Inner: Step<P, PollReq = Addrd<Req<P>>, PollResp = Addrd<Resp<P>>, Error = E>
{
  type PollReq = Addrd<Req<P>>;
  type PollResp = Addrd<Resp<P>>;
  type Error = Error<E>;
  type Inner = Inner;

  fn inner(&self) -> &Inner {
    &self.inner
  }

  fn poll_req(&self,
              snap: &platform::Snapshot<P>,
              effects: &mut P::Effects)
              -> super::StepOutput<Self::PollReq, Self::Error> {
    self.inner
        .poll_req(snap, effects)
        .map(|r| r.map_err(|e| e.map(Error::Inner)))
  }

  fn poll_resp(&self,
               snap: &platform::Snapshot<P>,
               effects: &mut P::Effects,
               token: Token,
               addr: no_std_net::SocketAddr)
               -> super::StepOutput<Self::PollResp, Self::Error> {
    self.inner
        .poll_resp(snap, effects, token, addr)
        .map(|r| r.map_err(|e| e.map(Error::Inner)))
  }

  fn before_message_sent(&self,
                         snap: &platform::Snapshot<P>,
                         effects: &mut P::Effects,
                         msg: &mut Addrd<platform::Message<P>>)
                         -> Result<(), Self::Error> {
    self.inner
        .before_message_sent(snap, effects, msg)
        .map_err(Error::Inner)?;

    let token = match (msg.data().code.kind(), msg.data().token) {
      | (CodeKind::Request, t) if t == Token(Default::default()) => {
        self.next(snap.time, snap.config)?
      },
      | (_, t) => t,
    };

    msg.data_mut().token = token;

    Ok(())
  }
}

#[cfg(test)]
mod test {
  use newt_msg::{Code, Id, Type};

  use super::*;
  use crate::test;

  type Mock = test::MockStep<(), Addrd<Req<test::Platform>>, Addrd<Resp<test::Platform>>, ()>;
  type ProvisionTokens = super::ProvisionTokens<Mock>;

  #[test]
  fn tokenless_request_gets_one() {
    let step = ProvisionTokens::default();
    let mut effects = vec![];
    let mut msg = Addrd(test::Message::new(Type::Con,
                                           Code::new(0, 1),
                                           Id(1),
                                           Token(Default::default())),
                        test::dummy_addr());

    step.before_message_sent(&test::snapshot(), &mut effects, &mut msg)
        .unwrap();
    assert_ne!(msg.data().token, Token(Default::default()));
  }

  #[test]
  fn responses_and_existing_tokens_left_alone() {
    let step = ProvisionTokens::default();
    let mut effects = vec![];

    let token = Token(tinyvec::array_vec!([u8; 8] => 1, 2, 3));
    let mut req = Addrd(test::Message::new(Type::Con, Code::new(0, 1), Id(1), token),
                        test::dummy_addr());
    step.before_message_sent(&test::snapshot(), &mut effects, &mut req)
        .unwrap();
    assert_eq!(req.data().token, token);

    let mut rep = Addrd(test::Message::new(Type::Ack,
                                           Code::new(2, 5),
                                           Id(1),
                                           Token(Default::default())),
                        test::dummy_addr());
    step.before_message_sent(&test::snapshot(), &mut effects, &mut rep)
        .unwrap();
    assert_eq!(rep.data().token, Token(Default::default()));
  }
}
