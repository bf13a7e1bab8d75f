pub mod authenticate;
pub mod health;
pub mod password_reset;
pub mod register;
pub mod validation;

pub use authenticate::authenticate;
pub use health::health_check;
pub use password_reset::{forgot_password, reset_password};
pub use register::{register, resend_verification, verify_email};
