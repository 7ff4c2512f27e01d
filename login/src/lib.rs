mod auth;
mod auth_store;

pub use auth::AuthError;
pub use auth::AuthManager;
pub use auth::AuthTokenProvider;
pub use auth::ParleyAuth;
pub use auth_store::AuthDotJson;
pub use auth_store::get_auth_file;
pub use auth_store::login_with_token;
pub use auth_store::logout;
pub use auth_store::try_read_auth_json;

pub const PARLEY_AUTH_TOKEN_ENV_VAR: &str = "PARLEY_AUTH_TOKEN";
