pub mod attempt;
pub mod builder;
pub mod dispatcher;

pub use builder::ApiClientBuilder;
pub use dispatcher::ApiClient;
