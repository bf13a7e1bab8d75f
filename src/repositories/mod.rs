pub mod ephemeral;
pub mod user;

pub use ephemeral::{EphemeralRecord, EphemeralStore, InMemoryEphemeralStore, Rebuild, StoreError};
pub use user::{PgUserRepository, UserRepository};

#[cfg(test)]
pub use user::InMemoryUserRepository;
