mod capability;
mod classifier;
mod error;
mod event;
mod gateway;
mod lifecycle;
mod profile;
pub mod readiness;
mod registry;
mod relay;
mod store;
mod validation;

pub use capability::{
    base_capture_config, regex_quote, CapabilityHandler, CaptureJobConfig, CaptureSettings,
};
pub use classifier::{classify, classify_message, UNKNOWN_FORMAT};
pub use error::{Error, RegistrationFailure, Result};
pub use event::{
    CdcEvent, DataChangeEvent, FieldChange, Operation, RawMessage, SchemaChangeEvent, SourceInfo,
    TableChange, TableChangeType, TransactionInfo, UnrecognizedEvent,
};
pub use gateway::CaptureGateway;
pub use lifecycle::{ConnectorLifecycleManager, DeleteOutcome};
pub use profile::{
    check_profile_id, connector_name_for, data_topic, schema_topic, ConnectionProfile, EngineType,
    ALL_CHANGES_SUFFIX,
};
pub use readiness::{
    bounded, scalar, FixOutcome, ReadinessChecks, ReadinessEngine, SessionOpener, SqlSession,
    TextRows,
};
pub use registry::Registry;
pub use relay::{
    BrokerSubscriber, Delivery, DeliverySink, EventSequence, RelayConfig, RelayedEvent,
    StreamRelay, Subscription, UnrecognizedPolicy,
};
pub use store::ProfileStore;
pub use validation::{
    ReadinessState, StepStatus, ValidationReport, ValidationStep, CONNECTIVITY_STEP,
};
