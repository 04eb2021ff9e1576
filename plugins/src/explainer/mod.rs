mod http;

pub use http::HttpExplainer;
