pub mod admin;
pub mod session;

pub use admin::Admin;
pub use session::{MemberClaims, SessionError};
