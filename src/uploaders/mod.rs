pub mod http;
pub mod batch;

pub use http::HttpTransport;
pub use batch::{BatchJob, BatchUploader};
