//! Database models, one file per table.

pub mod schedule;
pub mod streamer;
pub mod tracking;
pub mod user;

pub use self::schedule::*;
pub use self::streamer::*;
pub use self::tracking::*;
pub use self::user::*;
