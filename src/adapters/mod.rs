//! Adapters implementing the ports in `crate::ports`.

pub mod memory;
pub mod payment_gateway;
pub mod postgres;
pub mod push;
pub mod sandbox_gateway;

pub use memory::InMemoryStore;
pub use payment_gateway::HttpPaymentGateway;
pub use postgres::PostgresStore;
pub use push::HttpPushSender;
pub use sandbox_gateway::SandboxGateway;
