mod error;
mod paths;
mod schema;
mod store;

pub use error::IdentityStoreError;
pub use paths::{identity_path, IDENTITY_DIR, IDENTITY_FILE};
pub use schema::{IdentityRecord, IDENTITY_VERSION};
pub use store::IdentityStore;
