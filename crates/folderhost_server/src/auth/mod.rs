mod middleware;
mod store;

pub use middleware::{AuthExtractor, RequireAuth, extract_token_from_query};
pub use store::{AccountStoreError, YamlAccountStore};
