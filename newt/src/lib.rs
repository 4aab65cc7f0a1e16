//! `newt` is a CoAP-style message-exchange engine that aims to be:
//! - Platform-independent
//! - Extensible
//! - Approachable
//!
//! ## What lives here
//! The hard, stateful middle of the protocol:
//! - matching responses to outstanding requests (and surfacing each
//!   outcome, be it a response, a Reset or a timeout, exactly once)
//! - reliable delivery of confirmable messages: retransmission with
//!   randomized exponential back-off, and deduplication of whatever
//!   the network delivers twice
//! - fragmenting oversized bodies into negotiated-size blocks and
//!   reassembling them strictly in order on the peer
//! - ordering, deduplicating and pacing the notifications of standing
//!   ("observe") subscriptions as resource state changes mid-flight
//!
//! ## What deliberately does not live here
//! Resource trees and URI dispatch, HTTP translation, persistence,
//! and the security handshake. The engine only ever sees an abstract
//! "send/receive opaque datagram" primitive ([`net::Socket`]); a
//! secured transport is just another implementor.
//!
//! ## Architecture
//! The engine is an explicit pipeline of [`step::Step`]s, each one a
//! small, independently testable state machine that wraps the one
//! before it. There is no global state: a [`platform::Platform`]
//! value owns its socket, clock, config and step chain, and is driven
//! by polling.
//!
//! ```text
//! inbound:  datagram -> Parse -> Dedup -> Ack -> Exchange -> Block -> Observe -> you
//! outbound: you -> Observe (stamp) -> Block (fragment) -> Exchange (retry) -> socket
//! ```

// -
// style
#![allow(clippy::unused_unit)]
// -
// deny
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(not(test), deny(unsafe_code))]
// -
// features
#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(any(docsrs, feature = "docs"), feature(doc_cfg))]

#[cfg(feature = "alloc")]
extern crate alloc as std_alloc;

#[doc(hidden)]
pub mod todo;


/// customizable retrying of fallible operations
pub mod retry;

/// responses
pub mod resp;

/// requests
pub mod req;

/// # The step pipeline
///
/// The engine is broken into discrete steps
/// that are mostly deterministic and therefore highly
/// testable.
///
/// Steps are expressed as types that impl a [`Step`](crate::step::Step) trait
/// which defines 2 flows: "poll for a request" and "poll for a response to a request i sent",
/// plus hooks invoked around every message send.
///
/// Steps are usually parameterized by 1 type; the Step that came before it.
///
/// This means that the entire engine transparently describes what happens
/// when a message is received, and stages can be swapped or added at the end
/// without forking `newt`.
///
/// # Step demands
/// Steps demand 2 pieces of information:
///  - A snapshot of the system's state right now
///  - A mutable reference to a list of effectful actions to perform once all steps have run
///
/// The system state allows for all steps to have access to the same effectful information
/// e.g. system time, incoming network messages
///
/// The list of Effects allows for steps to deterministically express the IO that they would
/// like to be performed, e.g. log to stdout or send network messages.
pub mod step;

/// platform configuration
pub mod platform;

/// network abstractions
pub mod net;

/// time abstractions
pub mod time;

/// configuring runtime behavior
pub mod config;

/// `std`-only newt stuff
#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub mod std;
