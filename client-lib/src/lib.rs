pub mod link;
pub mod session;

pub use link::{ClientEvent, EventReceiver, LinkEvent, LinkId};
pub use session::{ClientSession, Connected, SessionUpdate};
