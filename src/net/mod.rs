pub mod endpoint;
pub mod tcp;
pub mod utils;
pub use self::endpoint::*;
pub use self::tcp::*;
