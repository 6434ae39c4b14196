mod admin;
mod auth;
mod modules;
pub mod response;
mod router;

pub use admin::admin_router;
pub use auth::RequireAdmin;
pub use modules::{archive_router, modules_router};
pub use router::{AppState, create_router};
