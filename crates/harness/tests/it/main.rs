mod dispatch;
mod harness;
mod session;
pub mod utils;

fn main() {}
