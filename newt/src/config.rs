use embedded_time::duration::Milliseconds;

use crate::retry::{Attempts, Strategy};

/// Configuration options related to parsing & handling outbound CON messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Con {
  /// Retry strategy for CON messages that
  /// have not yet been ACKed.
  ///
  /// The initial delay is drawn from `[init_min, init_max]` (in
  /// protocol terms, `ACK_TIMEOUT * [1, ACK_RANDOM_FACTOR]`) and
  /// doubles after each unanswered transmission.
  ///
  /// Defaults to an exponential retry strategy:
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use newt::config::Con;
  /// use newt::retry::Strategy;
  ///
  /// assert_eq!(Con::default().unacked_retry_strategy,
  ///            Strategy::Exponential { init_min: Milliseconds(500),
  ///                                    init_max: Milliseconds(1_000) });
  /// ```
  pub unacked_retry_strategy: Strategy,
  /// Retry strategy for CON messages that have been ACKed.
  ///
  /// Usually this should be **lazier** than `unacked_retry_strategy`,
  /// since we can reasonably expect the duration between "received request"
  /// and "responded with ACK" to be much shorter than "responded with ACK" and
  /// "sent actual response."
  ///
  /// Defaults to a lazy exponential retry strategy:
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use newt::config::Con;
  /// use newt::retry::Strategy;
  ///
  /// assert_eq!(Con::default().acked_retry_strategy,
  ///            Strategy::Exponential { init_min: Milliseconds(1_000),
  ///                                    init_max: Milliseconds(2_000) });
  /// ```
  pub acked_retry_strategy: Strategy,
  /// Number of times we are allowed to resend a CON message
  /// before giving up (MAX_RETRANSMIT).
  ///
  /// Defaults to 4 attempts.
  /// ```
  /// use newt::config::Con;
  /// use newt::retry::Attempts;
  ///
  /// assert_eq!(Con::default().max_attempts, Attempts(4));
  /// ```
  pub max_attempts: Attempts,
}

/// Configuration options related to parsing & handling outbound NON requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Non {
  /// Strategy to use when we sent a NON request and haven't yet
  /// received a response.
  ///
  /// Defaults to a pessimistic exponential retry strategy:
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use newt::config::Non;
  /// use newt::retry::Strategy;
  ///
  /// assert_eq!(Non::default().retry_strategy,
  ///            Strategy::Exponential { init_min: Milliseconds(250),
  ///                                    init_max: Milliseconds(500) });
  /// ```
  pub retry_strategy: Strategy,
  /// Number of times we are allowed to resend a NON request
  /// before giving up.
  ///
  /// Defaults to 4 attempts.
  pub max_attempts: Attempts,
}

/// Configuration options related to messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Msg {
  /// Seed used to generate message [`Token`](newt_msg::Token)s,
  /// customizable to allow for your application to generate tokens
  /// less guessably.
  ///
  /// The default value is 0, although it is
  /// best practice to set this to something else.
  /// (random integer, machine identifier)
  pub token_seed: u16,

  /// See [`Con`]
  pub con: Con,

  /// See [`Non`]
  pub non: Non,
}

/// Configuration options for the observe coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Observe {
  /// Send every Nth notification as a CON, the rest as NON.
  ///
  /// The first notification for a relation is always CON,
  /// so a dead peer is detected even with a large cadence.
  ///
  /// ```
  /// use newt::config::Observe;
  ///
  /// assert_eq!(Observe::default().con_every, 8);
  /// ```
  pub con_every: u16,
}

impl Default for Con {
  fn default() -> Self {
    Con { unacked_retry_strategy: Strategy::Exponential { init_min: Milliseconds(500),
                                                          init_max: Milliseconds(1_000) },
          acked_retry_strategy: Strategy::Exponential { init_min: Milliseconds(1_000),
                                                        init_max: Milliseconds(2_000) },
          max_attempts: Attempts(4) }
  }
}

impl Default for Non {
  fn default() -> Self {
    Non { retry_strategy: Strategy::Exponential { init_min: Milliseconds(250),
                                                  init_max: Milliseconds(500) },
          max_attempts: Attempts(4) }
  }
}

impl Default for Msg {
  fn default() -> Self {
    Msg { token_seed: 0,
          con: Con::default(),
          non: Non::default() }
  }
}

impl Default for Observe {
  fn default() -> Self {
    Observe { con_every: 8 }
  }
}

/// Runtime config
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Config {
  /// See [`Msg`]
  pub msg: Msg,

  /// See [`Observe`]
  pub observe: Observe,

  /// Preferred block size for blockwise transfers (DEFAULT_BLOCK_SIZE).
  ///
  /// Must be a power of two in `[16, 1024]`. A peer may negotiate
  /// this *down* for an exchange, never up.
  ///
  /// ```
  /// use newt::config::Config;
  ///
  /// assert_eq!(Config::default().block_size, 1024);
  /// ```
  pub block_size: u16,

  /// Ceiling on the size of a single serialized datagram
  /// (MAX_MESSAGE_SIZE).
  ///
  /// A message that would exceed this is transparently fragmented
  /// even if the caller never asked for blockwise transfer.
  ///
  /// ```
  /// use newt::config::Config;
  ///
  /// assert_eq!(Config::default().max_message_size, 1152);
  /// ```
  pub max_message_size: u16,
}

impl Default for Config {
  fn default() -> Self {
    Config { msg: Msg::default(),
             observe: Observe::default(),
             block_size: 1024,
             max_message_size: 1152 }
  }
}

impl Config {
  pub(crate) fn max_transmit_span_millis(&self) -> u64 {
    let acked_con = self.msg
                        .con
                        .acked_retry_strategy
                        .max_time(self.msg.con.max_attempts - Attempts(1))
                        .0;

    let unacked_con = self.msg
                          .con
                          .unacked_retry_strategy
                          .max_time(self.msg.con.max_attempts - Attempts(1))
                          .0;

    let non = self.msg
                  .non
                  .retry_strategy
                  .max_time(self.msg.non.max_attempts - Attempts(1))
                  .0;

    acked_con.max(unacked_con).max(non)
  }

  // TODO: adjust these on the fly based on actual timings?
  pub(crate) fn max_latency_millis(&self) -> u64 {
    100_000
  }

  pub(crate) fn expected_processing_delay_millis(&self) -> u64 {
    200
  }

  /// How long a message id / token / block context must stay
  /// unique for one peer; doubles as the dedup window.
  pub(crate) fn exchange_lifetime_millis(&self) -> u64 {
    self.max_transmit_span_millis()
    + (2 * self.max_latency_millis())
    + self.expected_processing_delay_millis()
  }
}
