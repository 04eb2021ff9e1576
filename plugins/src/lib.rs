pub mod explainer;
pub mod factory;
pub mod services;

pub use explainer::HttpExplainer;
pub use services::Services;
