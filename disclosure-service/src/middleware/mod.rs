pub mod admin;
pub mod request_context;
pub mod user_id;

pub use admin::admin_auth_middleware;
pub use request_context::RequestContext;
pub use user_id::{UserId, Viewer};
