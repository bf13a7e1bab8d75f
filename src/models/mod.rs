pub mod password_reset_request;
pub mod pending_registration;
pub mod user;

pub use password_reset_request::PasswordResetRequest;
pub use pending_registration::PendingRegistration;
pub use user::{Role, User, UserRow};
