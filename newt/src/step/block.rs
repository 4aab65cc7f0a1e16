use core::fmt::Debug;
use core::marker::PhantomData;

use embedded_time::duration::Milliseconds;
use embedded_time::Instant;
use newt_msg::opt::known::no_repeat::{BLOCK1, BLOCK2, SIZE1, SIZE2};
use newt_msg::{CodeKind, Id, MessageOptions, Payload, Token, Type};
use toad_array::{AppendCopy, Array, Reserve};
use toad_stem::Stem;

use super::{log, Step, StepOutput, _try};
use crate::net::Addrd;
use crate::platform::{self, Effect, PlatformTypes, Snapshot};
use crate::req::Req;
use crate::resp::code::{BAD_REQUEST, CONTINUE, REQUEST_ENTITY_INCOMPLETE};
use crate::resp::Resp;

/// `Block` that uses Vec
///
/// Only enabled when feature "alloc" enabled.
#[cfg(feature = "alloc")]
pub mod alloc {
  use ::std_alloc::vec::Vec;

  use super::*;

  /// [`Block`](super::Block) that uses Vec.
  pub type Block<P, S> = super::Block<P, S, Vec<RxCtx<P>>, Vec<TxCtx<P>>>;
}

/// An in-progress reassembly of a fragmented inbound body.
///
/// The message that carried block 0 donates the metadata; the payload
/// grows strictly in order: a block is appended only when its byte
/// offset (`num * size`) is exactly the amount already assembled.
#[derive(Debug)]
pub struct RxCtx<P>
  where P: PlatformTypes
{
  first: Addrd<platform::Message<P>>,
  payload: P::MessagePayload,
  size: u16,
  expires_at: Instant<P::Clock>,
}

/// A cached outbound message.
///
/// For fragmented bodies this is the unfragmented original: every
/// block is sliced from it on demand, so a block can never be computed
/// from a half-updated buffer. Sent requests are cached here too, as
/// the template for follow-up block requests.
#[derive(Debug)]
pub struct TxCtx<P>
  where P: PlatformTypes
{
  original: Addrd<platform::Message<P>>,
  block_size: u16,
  expires_at: Instant<P::Clock>,
}

/// The blockwise transfer coordinator.
///
/// Outbound: a message whose payload exceeds the block size (or whose
/// datagram would exceed the configured ceiling) is rewritten to its
/// first block before sending; subsequent blocks are cut from the
/// cached original as the peer acknowledges (requests) or asks for
/// them (responses).
///
/// Inbound: blocks are reassembled strictly in order; violations are
/// answered on the wire (4.00 for a block out of scope, 4.08 to ask
/// the peer to restart at block 0) rather than surfaced as local
/// errors.
#[derive(Debug)]
pub struct Block<P, S, Rx, Tx> {
  inner: S,
  rx: Stem<Rx>,
  tx: Stem<Tx>,
  __p: PhantomData<P>,
}

impl<P, S, Rx, Tx> Default for Block<P, S, Rx, Tx>
  where S: Default,
        Rx: Default,
        Tx: Default
{
  fn default() -> Self {
    Block { inner: S::default(),
            rx: Default::default(),
            tx: Default::default(),
            __p: PhantomData }
  }
}

fn min_size(a: u16, b: u16) -> u16 {
  if a < b {
    a
  } else {
    b
  }
}

impl<P, S, Rx, Tx> Block<P, S, Rx, Tx>
  where P: PlatformTypes,
        Rx: Array<Item = RxCtx<P>>,
        Tx: Array<Item = TxCtx<P>>
{
  fn prune(&self, effects: &mut P::Effects, now: Instant<P::Clock>) {
    let mut removed = 0usize;

    self.rx.map_mut(|rx| loop {
              match rx.iter().position(|ctx| now >= ctx.expires_at) {
                | Some(ix) => {
                  rx.remove(ix);
                  removed += 1;
                },
                | None => break,
              }
            });

    self.tx.map_mut(|tx| loop {
              match tx.iter().position(|ctx| now >= ctx.expires_at) {
                | Some(ix) => {
                  tx.remove(ix);
                  removed += 1;
                },
                | None => break,
              }
            });

    if removed > 0 {
      log!(effects,
           log::Level::Debug,
           "Removed {} expired blockwise transfer contexts",
           removed);
    }
  }

  fn rx_find(&self, token: Token, addr: no_std_net::SocketAddr) -> Option<usize> {
    self.rx.map_ref(|rx| {
             rx.iter().position(|ctx| {
                        ctx.first.data().token == token && ctx.first.addr() == addr
                      })
           })
  }

  fn rx_remove(&self, ix: usize) {
    self.rx.map_mut(|rx| {
             rx.remove(ix);
           });
  }

  fn tx_find(&self, token: Token, addr: no_std_net::SocketAddr) -> Option<usize> {
    self.tx.map_ref(|tx| {
             tx.iter().position(|ctx| {
                        ctx.original.data().token == token && ctx.original.addr() == addr
                      })
           })
  }

  fn tx_remove(&self, ix: usize) {
    self.tx.map_mut(|tx| {
             tx.remove(ix);
           });
  }

  /// Total payload length of the cached original at `ix`
  fn tx_total(&self, ix: usize) -> usize {
    self.tx.map_ref(|tx| tx[ix].original.data().payload.0.len())
  }

  fn tx_block_size(&self, ix: usize) -> u16 {
    self.tx.map_ref(|tx| tx[ix].block_size)
  }

  fn tx_shrink_block_size(&self, ix: usize, size: u16) {
    self.tx.map_mut(|tx| {
             tx[ix].block_size = min_size(tx[ix].block_size, size);
           });
  }

  /// Slice `[offset, offset + len)` out of the cached original's payload
  fn tx_slice(&self, ix: usize, offset: usize, len: usize) -> P::MessagePayload {
    self.tx.map_ref(|tx| {
             let payload = &tx[ix].original.data().payload.0;
             let end = (offset + len).min(payload.len());
             let mut out = P::MessagePayload::reserve(end.saturating_sub(offset));
             if offset < payload.len() {
               out.append_copy(&payload[offset..end]);
             }
             out
           })
  }

  fn tx_clone_original(&self, ix: usize) -> Addrd<platform::Message<P>> {
    self.tx.map_ref(|tx| tx[ix].original.clone())
  }

  fn expiry(&self, snap: &Snapshot<P>) -> Instant<P::Clock> {
    snap.time + Milliseconds(snap.config.exchange_lifetime_millis())
  }
}

macro_rules! respond {
  ($effects:expr, $req_msg:expr, $addr:expr, $code:expr, $block1:expr) => {{
    let rep_ty = if $req_msg.ty == Type::Con {
      Type::Ack
    } else {
      Type::Non
    };

    let mut rep = platform::Message::<P>::new(rep_ty, $code, $req_msg.id, $req_msg.token);

    if let Some((size, num, more)) = $block1 {
      rep.set_block1(size, num, more).ok();
    }

    $effects.push(Effect::Send(Addrd(rep, $addr)));
  }};
}

impl<P, S, Rx, Tx> Step<P> for Block<P, S, Rx, Tx>
  where P: PlatformTypes,
        S: Step<P, PollReq = Addrd<Req<P>>, PollResp = Addrd<Resp<P>>>,
        Rx: Array<Item = RxCtx<P>> + Debug,
        Tx: Array<Item = TxCtx<P>> + Debug
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
    self.prune(effects, snap.time);

    let mut req = _try!(Option<nb::Result>; self.inner.poll_req(snap, effects));
    let msg = req.data().msg().clone();
    let (token, addr) = (msg.token, req.addr());

    match msg.block1() {
      | Some(block) => {
        let offset = block.num() as usize * block.size() as usize;

        match self.rx_find(token, addr) {
          | None if block.num() == 0 && !block.more() => {
            // one self-describing block; nothing to assemble
            Some(Ok(req))
          },
          | None if block.num() == 0 => {
            let size = min_size(block.size(), snap.config.block_size);
            let mut payload = P::MessagePayload::default();
            payload.append_copy(&msg.payload.0);

            let mut ctx = Some(RxCtx { first: Addrd(msg.clone(), addr),
                                       payload,
                                       size,
                                       expires_at: self.expiry(snap) });
            self.rx
                .map_mut(|rx| rx.push(Option::take(&mut ctx).expect("pushed once")));

            respond!(effects, msg, addr, CONTINUE, Some((size, 0, true)));
            Some(Err(nb::Error::WouldBlock))
          },
          | None => {
            // the peer jumped into the middle of a transfer we know
            // nothing about
            respond!(effects, msg, addr, BAD_REQUEST, None);
            Some(Err(nb::Error::WouldBlock))
          },
          | Some(ix) => {
            let (assembled_len, size) =
              self.rx
                  .map_ref(|rx| (rx[ix].payload.len(), rx[ix].size));

            if block.size() > size {
              // the peer may shrink the block size mid-transfer, never grow it
              self.rx_remove(ix);
              respond!(effects, msg, addr, REQUEST_ENTITY_INCOMPLETE, None);
              return Some(Err(nb::Error::WouldBlock));
            }

            if offset == assembled_len {
              self.rx.map_mut(|rx| {
                       rx[ix].size = min_size(rx[ix].size, block.size());
                       rx[ix].payload.append_copy(&msg.payload.0);
                       rx[ix].expires_at = snap.time
                                           + Milliseconds(snap.config.exchange_lifetime_millis());
                     });

              if block.more() {
                respond!(effects, msg, addr, CONTINUE, Some((block.size(), block.num(), true)));
                Some(Err(nb::Error::WouldBlock))
              } else {
                let payload = self.rx.map_mut(|rx| {
                                       let mut out = P::MessagePayload::default();
                                       out.append_copy(&rx[ix].payload);
                                       out
                                     });
                self.rx_remove(ix);

                req.as_mut().msg_mut().payload = Payload(payload);
                req.as_mut().msg_mut().remove(BLOCK1);
                req.as_mut().msg_mut().remove(SIZE1);
                Some(Ok(req))
              }
            } else if offset < assembled_len {
              // a retransmitted block we already applied: acknowledge
              // again, append nothing
              respond!(effects, msg, addr, CONTINUE, Some((block.size(), block.num(), true)));
              Some(Err(nb::Error::WouldBlock))
            } else {
              // a hole; the only safe recovery is a restart
              self.rx_remove(ix);
              respond!(effects, msg, addr, REQUEST_ENTITY_INCOMPLETE, None);
              Some(Err(nb::Error::WouldBlock))
            }
          },
        }
      },
      | None => {
        match msg.block2() {
          | Some(block) if block.num() > 0 => {
            // the peer is fetching a later block of a response we sent
            match self.tx_find(token, addr) {
              | Some(ix) => {
                self.tx_shrink_block_size(ix, block.size());
                let size = self.tx_block_size(ix);
                let total = self.tx_total(ix);
                let offset = block.num() as usize * size as usize;

                if offset >= total {
                  respond!(effects, msg, addr, BAD_REQUEST, None);
                  return Some(Err(nb::Error::WouldBlock));
                }

                let slice = self.tx_slice(ix, offset, size as usize);
                let more = offset + (size as usize) < total;

                let original = self.tx_clone_original(ix);
                let rep_ty = if msg.ty == Type::Con { Type::Ack } else { Type::Non };
                let mut rep = platform::Message::<P>::new(rep_ty,
                                                          original.data().code,
                                                          msg.id,
                                                          token);
                rep.payload = Payload(slice);
                rep.set_block2(size, block.num(), more).ok();
                rep.set_size2(total as u32).ok();

                effects.push(Effect::Send(Addrd(rep, addr)));

                if !more {
                  self.tx_remove(ix);
                }

                Some(Err(nb::Error::WouldBlock))
              },
              | None => {
                // no cached response to serve from: out of scope
                respond!(effects, msg, addr, BAD_REQUEST, None);
                Some(Err(nb::Error::WouldBlock))
              },
            }
          },
          | _ => {
            // a blockless request aborts any half-done transfer on the
            // same token
            if let Some(ix) = self.rx_find(token, addr) {
              log!(effects,
                   log::Level::Warn,
                   "Expected {:?} to continue its block sequence; asking for a restart",
                   token);
              self.rx_remove(ix);
              respond!(effects, msg, addr, REQUEST_ENTITY_INCOMPLETE, None);
            }

            Some(Ok(req))
          },
        }
      },
    }
  }

  fn poll_resp(&self,
               snap: &platform::Snapshot<P>,
               effects: &mut P::Effects,
               token: Token,
               addr: no_std_net::SocketAddr)
               -> StepOutput<Self::PollResp, Self::Error> {
    self.prune(effects, snap.time);

    let mut resp = _try!(Option<nb::Result>; self.inner.poll_resp(snap, effects, token, addr));
    let msg = resp.data().msg().clone();
    let (token, addr) = (msg.token, resp.addr());

    // a 2.31 Continue means the peer took one block of our fragmented
    // request and wants the next
    if msg.code == CONTINUE {
      if let (Some(echo), Some(ix)) = (msg.block1(), self.tx_find(token, addr)) {
        self.tx_shrink_block_size(ix, echo.size());
        let size = self.tx_block_size(ix);
        let total = self.tx_total(ix);
        let next_offset = (echo.num() as usize + 1) * echo.size() as usize;

        if next_offset < total {
          let num = (next_offset / size as usize) as u32;
          let more = next_offset + (size as usize) < total;

          let mut next = self.tx_clone_original(ix).map(|mut original| {
                                                     original.id = Id(0);
                                                     original
                                                   });
          let slice = self.tx_slice(ix, next_offset, size as usize);
          next.data_mut().payload = Payload(slice);
          next.data_mut().set_block1(size, num, more).ok();

          effects.push(Effect::Send(next));
        }

        return Some(Err(nb::Error::WouldBlock));
      }
    }

    match msg.block2() {
      | None => {
        // transfer (if any) is over
        if let Some(ix) = self.rx_find(token, addr) {
          self.rx_remove(ix);
        }
        if msg.code.kind() == CodeKind::Response {
          if let Some(ix) = self.tx_find(token, addr) {
            self.tx_remove(ix);
          }
        }
        Some(Ok(resp))
      },
      | Some(block) if block.num() == 0 && !block.more() => Some(Ok(resp)),
      | Some(block) => {
        let offset = block.num() as usize * block.size() as usize;

        match self.rx_find(token, addr) {
          | None if block.num() == 0 => {
            let mut payload = P::MessagePayload::default();
            payload.append_copy(&msg.payload.0);

            let mut ctx = Some(RxCtx { first: Addrd(msg.clone(), addr),
                                       payload,
                                       size: block.size(),
                                       expires_at: self.expiry(snap) });
            self.rx
                .map_mut(|rx| rx.push(Option::take(&mut ctx).expect("pushed once")));

            self.request_block2(effects, token, addr, block.size(), 1);
            Some(Err(nb::Error::WouldBlock))
          },
          | None => {
            // never saw block 0; ask for a restart
            log!(effects,
                 log::Level::Warn,
                 "Response block {} from {} arrived without block 0; restarting",
                 block.num(),
                 addr);
            self.request_block2(effects, token, addr, block.size(), 0);
            Some(Err(nb::Error::WouldBlock))
          },
          | Some(ix) => {
            let (assembled_len, size) =
              self.rx
                  .map_ref(|rx| (rx[ix].payload.len(), rx[ix].size));

            if offset == assembled_len && block.size() <= size {
              self.rx.map_mut(|rx| {
                       rx[ix].size = min_size(rx[ix].size, block.size());
                       rx[ix].payload.append_copy(&msg.payload.0);
                       rx[ix].expires_at = snap.time
                                           + Milliseconds(snap.config.exchange_lifetime_millis());
                     });

              if block.more() {
                let next = (offset + msg.payload.0.len()) / block.size() as usize;
                self.request_block2(effects, token, addr, block.size(), next as u32);
                Some(Err(nb::Error::WouldBlock))
              } else {
                let payload = self.rx.map_mut(|rx| {
                                       let mut out = P::MessagePayload::default();
                                       out.append_copy(&rx[ix].payload);
                                       out
                                     });
                self.rx_remove(ix);

                resp.as_mut().msg_mut().payload = Payload(payload);
                resp.as_mut().msg_mut().remove(BLOCK2);
                resp.as_mut().msg_mut().remove(SIZE2);
                Some(Ok(resp))
              }
            } else if offset < assembled_len {
              // duplicate of something we already have
              Some(Err(nb::Error::WouldBlock))
            } else {
              // a hole; restart from scratch
              self.rx_remove(ix);
              self.request_block2(effects, token, addr, size, 0);
              Some(Err(nb::Error::WouldBlock))
            }
          },
        }
      },
    }
  }

  fn before_message_sent(&self,
                         snap: &platform::Snapshot<P>,
                         effects: &mut P::Effects,
                         msg: &mut Addrd<platform::Message<P>>)
                         -> Result<(), Self::Error> {
    self.inner.before_message_sent(snap, effects, msg)?;

    let kind = msg.data().code.kind();
    if kind == CodeKind::Empty {
      return Ok(());
    }

    let payload_len = msg.data().payload.0.len();
    let msg_len = toad_len::Len::len(msg.data());
    let max = snap.config.max_message_size as usize;

    // the datagram ceiling may demand blocks smaller than the
    // configured preference when the message carries heavy options
    let block_size = {
      let overhead = msg_len - payload_len;
      let mut size = snap.config.block_size;
      while size > 16 && size as usize + overhead > max {
        size /= 2;
      }
      size
    };

    let oversized = payload_len > block_size as usize;

    if !oversized || msg.data().block1().is_some() || msg.data().block2().is_some() {
      return Ok(());
    }

    // cache the unfragmented original; every block is cut from this
    let mut ctx = Some(TxCtx { original: msg.clone(),
                               block_size,
                               expires_at: self.expiry(snap) });
    let (token, addr) = (msg.data().token, msg.addr());

    self.tx.map_mut(|tx| {
             if let Some(ix) = tx.iter().position(|c| {
                                          c.original.data().token == token
                                          && c.original.addr() == addr
                                        })
             {
               tx.remove(ix);
             }
           });
    self.tx
        .map_mut(|tx| tx.push(Option::take(&mut ctx).expect("pushed once")));

    let first = {
      let payload = &msg.data().payload.0;
      let mut out = P::MessagePayload::reserve(block_size as usize);
      out.append_copy(&payload[0..block_size as usize]);
      out
    };

    msg.data_mut().payload = Payload(first);
    match kind {
      | CodeKind::Request => {
        msg.data_mut().set_block1(block_size, 0, true).ok();
        msg.data_mut().set_size1(payload_len as u32).ok();
      },
      | _ => {
        msg.data_mut().set_block2(block_size, 0, true).ok();
        msg.data_mut().set_size2(payload_len as u32).ok();
      },
    };

    Ok(())
  }

  fn on_message_sent(&self,
                     snap: &platform::Snapshot<P>,
                     effects: &mut P::Effects,
                     msg: &Addrd<platform::Message<P>>)
                     -> Result<(), Self::Error> {
    self.inner.on_message_sent(snap, effects, msg)?;

    // sent requests are kept as the template for follow-up block
    // requests (and to slice request bodies from); first write wins so
    // a fragmented original isn't replaced by its own block 0
    if msg.data().code.kind() == CodeKind::Request
       && self.tx_find(msg.data().token, msg.addr()).is_none()
    {
      let mut ctx = Some(TxCtx { original: msg.clone(),
                                 block_size: snap.config.block_size,
                                 expires_at: self.expiry(snap) });
      self.tx
          .map_mut(|tx| tx.push(Option::take(&mut ctx).expect("pushed once")));
    }

    Ok(())
  }
}

impl<P, S, Rx, Tx> Block<P, S, Rx, Tx>
  where P: PlatformTypes,
        Rx: Array<Item = RxCtx<P>>,
        Tx: Array<Item = TxCtx<P>>
{
  /// Ask the peer for block `num` of the response to the cached
  /// request for `(token, addr)`.
  fn request_block2(&self,
                    effects: &mut P::Effects,
                    token: Token,
                    addr: no_std_net::SocketAddr,
                    size: u16,
                    num: u32) {
    match self.tx_find(token, addr) {
      | Some(ix) => {
        let mut next = self.tx_clone_original(ix).map(|mut original| {
                                                   original.id = Id(0);
                                                   original
                                                 });
        next.data_mut().payload = Payload(Default::default());
        next.data_mut().set_block2(size, num, false).ok();
        next.data_mut().remove(BLOCK1);
        next.data_mut().remove(SIZE1);

        effects.push(Effect::Send(next));
      },
      | None => {
        log!(effects,
             log::Level::Warn,
             "No cached request for {:?}; cannot continue blockwise transfer",
             token);
      },
    }
  }
}
