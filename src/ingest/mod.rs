pub mod frame;
pub mod listener;
pub mod sim;

pub use self::frame::*;
pub use self::listener::*;
pub use self::sim::*;
