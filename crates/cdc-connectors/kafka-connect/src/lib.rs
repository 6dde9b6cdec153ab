mod connect_gateway;

pub use connect_gateway::{classify_failure, KafkaConnectGateway};
