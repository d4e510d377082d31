// Authentication module
// Manages the credential lifecycle: acquisition, storage, scheduled renewal

mod acquirer;
mod jwt;
mod manager;
mod scheduler;
mod store;
mod types;

pub use acquirer::CredentialAcquirer;
pub use manager::SessionManager;
pub use scheduler::RefreshScheduler;
pub use store::TokenStore;
pub use types::{Credential, OperatingMode, SessionState};

// Re-export for tests that need to mint decodable tokens
#[cfg(any(test, feature = "test-utils"))]
pub use jwt::encode_unsigned;
