// Authentication module
// Manages the service token lifecycle, its storage and credential loading

pub mod credentials;
mod manager;
mod refresh;
pub mod store;
mod types;

pub use manager::{CredentialLoader, TokenManager};
pub use refresh::{TokenEndpoint, DEFAULT_TOKEN_URL};
pub use store::{MemoryTokenStore, SqliteTokenStore, TokenStore};
pub use types::{CredentialConfig, PersistedToken, TokenSnapshot, TokenSource, TokenState};
