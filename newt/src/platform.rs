use core::fmt::Debug;

use embedded_time::{Clock as _, Instant};
use newt_msg::{OptionMap, Token, TryIntoBytes};
use no_std_net::SocketAddr;
use toad_array::{AppendCopy, Array};

use crate::config::Config;
use crate::net::{Addrd, Socket};
use crate::req::Req;
use crate::resp::Resp;
use crate::step::Step;
use crate::time::Clock;
use crate::todo::String1Kb;

/// [`newt_msg::Message`] shorthand using Platform types
pub type Message<P> =
  newt_msg::Message<<P as PlatformTypes>::MessagePayload, <P as PlatformTypes>::MessageOptions>;

/// Compile-time configuration of the collections, clock and socket
/// the engine runs on.
///
/// This is how one codebase serves std servers and heapless
/// microcontrollers alike: every buffer the engine needs is an
/// associated type here.
pub trait PlatformTypes: Sized + 'static + Debug {
  /// What type should we use to store the message payloads?
  type MessagePayload: Array<Item = u8> + Clone + Debug + PartialEq + AppendCopy<u8>;

  /// What type should we use to store the options?
  type MessageOptions: OptionMap;

  /// What should we use to keep track of time?
  type Clock: Clock;

  /// What should we use for networking?
  type Socket: Socket;

  /// How will we store a sequence of effects to perform?
  type Effects: Array<Item = Effect<Self>>;
}

/// A snapshot of the system's state at a given moment
///
/// ```text
/// let Snapshot {time, recvd_dgram, ..} = snap;
/// ```
#[allow(missing_debug_implementations)]
#[non_exhaustive]
pub struct Snapshot<P: PlatformTypes> {
  /// The current system time at the start of the step pipe
  pub time: Instant<P::Clock>,

  /// A UDP datagram received from somewhere
  pub recvd_dgram: Option<Addrd<<P::Socket as Socket>::Dgram>>,

  /// Runtime config, includes many useful timings
  pub config: Config,
}

impl<P: PlatformTypes> Clone for Snapshot<P> {
  fn clone(&self) -> Self {
    Self { time: self.time,
           recvd_dgram: self.recvd_dgram.clone(),
           config: self.config }
  }
}

/// Used by [`Step`]s to deterministically communicate
/// to [`Platform`]s side-effects that they would like
/// to perform.
#[allow(missing_docs)]
pub enum Effect<P: PlatformTypes> {
  Send(Addrd<Message<P>>),
  Log(log::Level, String1Kb),
}

impl<P: PlatformTypes> Clone for Effect<P> {
  fn clone(&self) -> Self {
    match self {
      | Effect::Send(m) => Effect::Send(m.clone()),
      | Effect::Log(l, m) => Effect::Log(*l, *m),
    }
  }
}

impl<P: PlatformTypes> core::fmt::Debug for Effect<P> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | Self::Send(m) => f.debug_tuple("Send").field(m).finish(),
      | Self::Log(l, s) => f.debug_tuple("Log").field(l).field(s).finish(),
    }
  }
}

impl<P: PlatformTypes> PartialEq for Effect<P> {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      | (Self::Send(a), Self::Send(b)) => a == b,
      | (Self::Log(al, am), Self::Log(bl, bm)) => al == bl && am == bm,
      | _ => false,
    }
  }
}

impl<P: PlatformTypes> Effect<P> {
  /// Is this a Send effect?
  pub fn is_send(&self) -> bool {
    matches!(self, Effect::Send(_))
  }

  /// Borrow the message if this is a Send effect
  pub fn get_send(&self) -> Option<&Addrd<Message<P>>> {
    match self {
      | Effect::Send(m) => Some(m),
      | _ => None,
    }
  }
}

/// Errors that may be encountered during the engine lifecycle,
/// pluggable so platforms can lift them into their own error type.
pub trait PlatformError<StepError, SocketError>: Sized {
  /// Convert a message serialization error to PlatformError
  fn msg_to_bytes(e: newt_msg::to_bytes::MessageToBytesError) -> Self;

  /// Convert a step error to PlatformError
  fn step(e: StepError) -> Self;

  /// Convert a socket error to PlatformError
  fn socket(e: SocketError) -> Self;

  /// Convert a clock error to PlatformError
  fn clock(e: embedded_time::clock::Error) -> Self;
}

/// Default [`PlatformError`] implementation
#[derive(Debug)]
#[allow(missing_docs)]
pub enum Error<Step, Socket> {
  MessageToBytes(newt_msg::to_bytes::MessageToBytesError),
  Step(Step),
  Socket(Socket),
  Clock(embedded_time::clock::Error),
}

impl<Step, Socket> PlatformError<Step, Socket> for Error<Step, Socket> {
  fn msg_to_bytes(e: newt_msg::to_bytes::MessageToBytesError) -> Self {
    Self::MessageToBytes(e)
  }

  fn step(e: Step) -> Self {
    Self::Step(e)
  }

  fn socket(e: Socket) -> Self {
    Self::Socket(e)
  }

  fn clock(e: embedded_time::clock::Error) -> Self {
    Self::Clock(e)
  }
}

/// The runtime component of the `Platform` abstraction
///
/// Wires a [`Step`] chain to a socket and a clock, drives the chain
/// on every poll, and executes the [`Effect`]s the steps queue up.
///
/// This is the engine surface the dispatcher talks to:
///  * `send_msg`: send a request, response or notification body;
///    yields the [`Token`] correlating any future response
///  * `poll_req`: "has anyone asked me anything?"
///  * `poll_resp`: "has (token, addr) answered me yet?"
///  * `notify`: "the state behind this path changed"
pub trait Platform<Steps>: Sized
  where Steps: Step<Self::Types,
                    PollReq = Addrd<Req<Self::Types>>,
                    PollResp = Addrd<Resp<Self::Types>>>
{
  /// See [`PlatformTypes`]
  type Types: PlatformTypes;

  /// Slot for any error type that impls [`PlatformError`].
  ///
  /// If no custom behavior is needed, [`self::Error`] is a sensible default.
  type Error: PlatformError<<Steps as Step<Self::Types>>::Error,
                            <<Self::Types as PlatformTypes>::Socket as Socket>::Error>;

  /// Take a snapshot of the platform's state right now,
  /// including the system time and any datagram currently
  /// waiting in the network socket
  fn snapshot(&self) -> Result<Snapshot<Self::Types>, Self::Error> {
    let recvd_dgram = self.socket().poll().map_err(Self::Error::socket)?;

    self.clock()
        .try_now()
        .map_err(Self::Error::clock)
        .map(|time| Snapshot { time,
                               recvd_dgram,
                               config: self.config() })
  }

  /// Poll for an incoming request, and pass it through `Steps`
  /// for processing.
  fn poll_req(&self) -> nb::Result<Addrd<Req<Self::Types>>, Self::Error> {
    let mut effects = <Self::Types as PlatformTypes>::Effects::default();
    let snap = self.snapshot().map_err(nb::Error::Other)?;

    let polled = self.steps().poll_req(&snap, &mut effects);

    self.exec_many(effects)
        .map_err(|(_, e)| nb::Error::Other(e))?;

    match polled {
      | None => Err(nb::Error::WouldBlock),
      | Some(Ok(req)) => Ok(req),
      | Some(Err(nb::Error::WouldBlock)) => Err(nb::Error::WouldBlock),
      | Some(Err(nb::Error::Other(e))) => Err(nb::Error::Other(Self::Error::step(e))),
    }
  }

  /// Poll for a response to a sent request, and pass it through `Steps`
  /// for processing.
  fn poll_resp(&self,
               token: Token,
               addr: SocketAddr)
               -> nb::Result<Addrd<Resp<Self::Types>>, Self::Error> {
    let mut effects = <Self::Types as PlatformTypes>::Effects::default();
    let snap = self.snapshot().map_err(nb::Error::Other)?;

    let polled = self.steps().poll_resp(&snap, &mut effects, token, addr);

    self.exec_many(effects)
        .map_err(|(_, e)| nb::Error::Other(e))?;

    match polled {
      | None => Err(nb::Error::WouldBlock),
      | Some(Ok(resp)) => Ok(resp),
      | Some(Err(nb::Error::WouldBlock)) => Err(nb::Error::WouldBlock),
      | Some(Err(nb::Error::Other(e))) => Err(nb::Error::Other(Self::Error::step(e))),
    }
  }

  /// Send a message, routing it through the step pipeline.
  ///
  /// `before_message_sent` fills in identity (message id, token) and may
  /// rewrite the message (e.g. fragmenting an oversized body down to its
  /// first block); `on_message_sent` registers it for retransmission.
  ///
  /// Returns the (possibly freshly provisioned) [`Token`], which is the
  /// handle [`Platform::poll_resp`] correlates responses with.
  fn send_msg(&self, msg: Addrd<Message<Self::Types>>) -> Result<Token, Self::Error> {
    type Dgram<P> = <<P as PlatformTypes>::Socket as Socket>::Dgram;

    let mut effects = <Self::Types as PlatformTypes>::Effects::default();

    // note: no socket poll here; the send path must never eat a
    // datagram the next poll was going to see
    let snap = self.clock()
                   .try_now()
                   .map_err(Self::Error::clock)
                   .map(|time| Snapshot { time,
                                          recvd_dgram: None,
                                          config: self.config() })?;

    let mut msg = msg;
    self.steps()
        .before_message_sent(&snap, &mut effects, &mut msg)
        .map_err(Self::Error::step)?;

    let token = msg.data().token;

    let bytes = msg.data()
                   .clone()
                   .try_into_bytes::<Dgram<Self::Types>>()
                   .map_err(Self::Error::msg_to_bytes)?;

    nb::block!(self.socket().send(Addrd(bytes.as_ref(), msg.addr()))).map_err(Self::Error::socket)?;

    self.steps()
        .on_message_sent(&snap, &mut effects, &msg)
        .map_err(Self::Error::step)?;

    self.exec_many(effects).map_err(|(_, e)| e)?;

    Ok(token)
  }

  /// Tell the engine that the state behind `path` changed,
  /// so observe relations subscribed to it should be notified.
  fn notify<Path: AsRef<str> + Clone>(&self, path: Path) -> Result<(), Self::Error> {
    self.steps().notify(path).map_err(Self::Error::step)
  }

  /// Execute an [`Effect`]
  fn exec_1(&self, effect: Effect<Self::Types>) -> Result<(), Self::Error> {
    match effect {
      | Effect::Log(level, msg) => self.log(level, msg),
      | Effect::Send(msg) => self.send_msg(msg).map(|_| ()),
    }
  }

  /// Execute many [`Effect`]s
  ///
  /// If executing an effect errors, the erroring effect and all remaining effects are
  /// returned along with the error.
  fn exec_many(&self,
               effects: <Self::Types as PlatformTypes>::Effects)
               -> Result<(), (<Self::Types as PlatformTypes>::Effects, Self::Error)> {
    effects.into_iter()
           .fold(Ok(()), |so_far, eff| match so_far {
             | Ok(()) => self.exec_1(eff.clone()).map_err(|e| {
                           let mut effs: <Self::Types as PlatformTypes>::Effects =
                             Default::default();
                           effs.push(eff);
                           (effs, e)
                         }),
             | Err((mut effs, e)) => {
               effs.push(eff);
               Err((effs, e))
             },
           })
  }

  /// The engine may occasionally emit tracing and logs by invoking this method.
  ///
  /// It's completely up to the Platform to handle them meaningfully (e.g. `println!`)
  fn log(&self, level: log::Level, msg: String1Kb) -> Result<(), Self::Error>;

  /// Copy of runtime behavior [`Config`] to be used
  ///
  /// Typically this will be a field access (`self.config`)
  fn config(&self) -> Config;

  /// Obtain a reference to the step chain
  ///
  /// Typically this will be a field access (`&self.steps`)
  fn steps(&self) -> &Steps;

  /// Obtain an immutable reference to the socket
  ///
  /// Typically this will be a field access (`&self.socket`)
  fn socket(&self) -> &<Self::Types as PlatformTypes>::Socket;

  /// Get a reference to the system clock
  ///
  /// Typically this will be a field access (`&self.clock`)
  fn clock(&self) -> &<Self::Types as PlatformTypes>::Clock;
}

/// Configures the engine to use `Vec` for collections and
/// whatever clock & socket you hand it.
#[cfg(feature = "alloc")]
#[cfg_attr(docsrs, doc(cfg(feature = "alloc")))]
#[derive(Copy)]
pub struct Alloc<Clk, Sock>(core::marker::PhantomData<(Clk, Sock)>)
  where Clk: Clock + 'static,
        Sock: Socket + 'static;

#[cfg(feature = "alloc")]
impl<Clk: Clock + 'static, Sock: Socket + 'static> core::fmt::Debug for Alloc<Clk, Sock> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    write!(f, "Alloc::<_, _>(_)")
  }
}

#[cfg(feature = "alloc")]
impl<Clk: Clock + 'static, Sock: Socket + 'static> Clone for Alloc<Clk, Sock> {
  fn clone(&self) -> Self {
    Self(Default::default())
  }
}

#[cfg(feature = "alloc")]
impl<Clk: Clock + Debug + 'static, Sock: Socket + Debug + 'static> PlatformTypes
  for Alloc<Clk, Sock>
{
  type MessagePayload = std_alloc::vec::Vec<u8>;
  type MessageOptions = std_alloc::collections::BTreeMap<newt_msg::OptNumber,
                                                          std_alloc::vec::Vec<newt_msg::OptValue<std_alloc::vec::Vec<u8>>>>;
  type Clock = Clk;
  type Socket = Sock;
  type Effects = std_alloc::vec::Vec<Effect<Self>>;
}
