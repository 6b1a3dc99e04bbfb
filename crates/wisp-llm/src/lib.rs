pub mod mock;
pub mod provider;
pub mod sse;
pub mod wire;

pub use mock::{MockProvider, MockResponse};
pub use provider::{HttpProvider, ProviderKind};
