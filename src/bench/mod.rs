pub mod buffer;
pub mod config;
pub mod handoff;
pub mod receiver;
pub mod report;
pub mod sender;
pub mod state;
pub mod stream;

pub use self::buffer::*;
pub use self::config::*;
pub use self::handoff::*;
pub use self::receiver::*;
pub use self::report::*;
pub use self::sender::*;
pub use self::state::*;
pub use self::stream::*;
