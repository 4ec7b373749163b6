//! Sessions and per-request context.
//! Keep the public surface thin and split implementation across sub-modules.

mod request_context;
mod session;

pub use request_context::RequestContext;
pub use session::{Session, SessionError, SessionManager, SessionToken};
