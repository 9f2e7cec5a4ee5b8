//! NATS JetStream plumbing for the provider daemon.
//!
//! Dispatch messages are pulled from a durable consumer bound to this daemon's
//! subject, decoded into [`dante_model::Task`] values and handed to a
//! [`dante_core::TaskSink`]. Acknowledgement follows the sink's
//! [`dante_core::Disposition`], so a task is acked only after its terminal status
//! went out. Status updates go the other way through [`NatsStatusPublisher`].

mod config;
pub use config::{TransportConfig, interpolate};

mod error;
pub use error::TransportError;

mod codec;
pub use codec::{Inbound, classify, status_subject};

mod publisher;
pub use publisher::NatsStatusPublisher;

mod consumer;
pub use consumer::NatsTransport;
