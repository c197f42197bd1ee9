//! Entities
//!
//! Minimal wire entities the session layer decodes itself. Full payload
//! decoding lives in higher layers.

mod member;
mod presence;
mod user;

pub use member::Member;
pub use presence::OnlineStatus;
pub use user::User;
