mod client;
pub mod types;

pub use client::BackendClient;
pub use client::BackendError;
pub use types::CancelGenerationResponse;
