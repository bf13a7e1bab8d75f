pub mod auth;
pub mod domain_policy;
pub mod email;
pub mod password_reset;
pub mod rate_limit;
pub mod registration;
pub mod token;

pub use auth::AuthService;
pub use domain_policy::EmailDomainPolicy;
pub use email::{LinkValidity, LogNotifier, Notifier, ResendNotifier, build_notifier};
pub use password_reset::PasswordResetService;
pub use rate_limit::{RateLimitDecision, RateLimitPolicy, RateLimiter};
pub use registration::{NewRegistration, RegistrationReceipt, RegistrationService};
