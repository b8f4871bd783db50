pub mod http;
pub mod traits;

#[cfg(test)]
pub mod scripted;

pub use http::HttpProviderClient;
pub use traits::ProviderStatusClient;
