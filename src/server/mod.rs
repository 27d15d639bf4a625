mod admin;
mod badge;
pub mod cookies;
pub mod dto;
mod login;
pub mod response;
mod router;
mod upload;
mod user;
pub mod validation;

pub use admin::admin_router;
pub use badge::{badge_color, render_badge};
pub use login::{bootstrap_first_admin, login_router, provision_user};
pub use router::{AppState, create_router};
pub use upload::CoverallsUpload;
pub use user::user_router;
