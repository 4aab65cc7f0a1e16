use newt_msg::Code;

/// A request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Method(pub Code);

impl Method {
  /// GET
  pub const GET: Method = Method(Code::new(0, 1));
  /// POST
  pub const POST: Method = Method(Code::new(0, 2));
  /// PUT
  pub const PUT: Method = Method(Code::new(0, 3));
  /// DELETE
  pub const DELETE: Method = Method(Code::new(0, 4));
}
