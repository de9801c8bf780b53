mod http;

pub use http::HttpSubmissionClient;
