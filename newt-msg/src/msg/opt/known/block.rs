use tinyvec::ArrayVec;

/// Three items of information may need to be transferred in a
/// Block (Block1 or Block2) option:
/// * the size of the block ([`Block::size`])
/// * whether more blocks are following ([`Block::more`])
/// * the relative number of the block ([`Block::num`]) within a sequence of blocks with the given size.
///
/// Packed as `num << 4 | more << 3 | szx` where the transmitted
/// block size is `2^(szx + 4)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block(u32);

impl Block {
  #[allow(missing_docs)]
  pub fn new(size: u16, num: u32, more: bool) -> Self {
    // block numbers are 20 bits on the wire
    let num = (num & 0xF_FFFF) << 4;
    let more = u32::from(more) << 3;
    let size = f32::from(size.max(16).min(1024)).log2() as u32 - 4;

    Self(num | more | size)
  }

  #[allow(missing_docs)]
  pub fn size(&self) -> u16 {
    let szx = (self.0 & 0b111).min(6);
    2u16.pow(szx + 4)
  }

  #[allow(missing_docs)]
  pub fn more(&self) -> bool {
    (self.0 & 0b1000) >> 3 == 1
  }

  #[allow(missing_docs)]
  pub fn num(&self) -> u32 {
    self.0 >> 4
  }

  /// Parse a Block from the 0-3 byte uint option value encoding
  pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
    if bytes.len() > 3 {
      return None;
    }

    Some(Block(bytes.iter().fold(0u32, |n, b| (n << 8) | *b as u32)))
  }

  /// The minimal 0-3 byte uint option value encoding of this Block
  pub fn bytes(&self) -> ArrayVec<[u8; 3]> {
    let mut out = ArrayVec::new();
    self.0
        .to_be_bytes()
        .into_iter()
        .skip_while(|b| *b == 0)
        .for_each(|b| out.push(b));
    out
  }
}

impl From<Block> for u32 {
  fn from(b: Block) -> Self {
    b.0
  }
}

impl From<u32> for Block {
  fn from(n: u32) -> Self {
    Block(n)
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn block() {
    let b = Block(33);
    assert_eq!(b.size(), 32);
    assert_eq!(b.num(), 2);
    assert_eq!(b.more(), false);

    let b = Block(59);
    assert_eq!(b.size(), 128);
    assert_eq!(b.num(), 3);
    assert_eq!(b.more(), true);

    assert_eq!(Block::new(32, 2, false), Block(33));
    assert_eq!(Block::new(128, 3, true), Block(59));
  }

  #[test]
  fn size_rounds_down_to_nearest_power_of_two() {
    assert_eq!(Block::new(0, 1, false).size(), 16);
    assert_eq!(Block::new(10, 1, false).size(), 16);
    assert_eq!(Block::new(17, 1, false).size(), 16);
    assert_eq!(Block::new(31, 1, false).size(), 16);
    assert_eq!(Block::new(33, 1, false).size(), 32);
    assert_eq!(Block::new(64, 1, false).size(), 64);
    assert_eq!(Block::new(1024, 1, false).size(), 1024);
    assert_eq!(Block::new(2048, 1, false).size(), 1024);
  }

  #[test]
  fn wire_encoding_is_minimal() {
    assert_eq!(Block::new(16, 0, false).bytes().as_ref(), &[] as &[u8]);
    assert_eq!(Block::new(16, 0, true).bytes().as_ref(), &[0b1000]);
    assert_eq!(Block::new(1024, 1, true).bytes().as_ref(), &[0b0001_1110]);

    let big = Block::new(1024, 3000, true);
    assert_eq!(Block::from_bytes(&big.bytes()), Some(big));
    assert_eq!(Block::from_bytes(&[]), Some(Block(0)));
    assert_eq!(Block::from_bytes(&[1, 2, 3, 4]), None);
  }
}
