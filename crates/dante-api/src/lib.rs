//! Local HTTP control surface of the provider daemon.
//!
//! Lists and inspects the jobs the handler currently holds and lets an
//! operator cancel one. Mounted by the daemon on a loopback address.

mod error;
pub use error::ApiError;

mod handler;
pub use handler::ControlHandler;

mod adapter;
pub use adapter::TaskHandlerAdapter;

mod http;
pub use http::HttpApi;

pub use axum;
