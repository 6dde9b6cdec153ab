mod kafka_connector;

pub use kafka_connector::{KafkaConfig, KafkaSubscriber};
