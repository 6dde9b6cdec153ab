mod checks;
mod postgres_handler;
mod session;

pub use checks::PostgresChecks;
pub use postgres_handler::{publication_name, slot_name, PostgresHandler, CONNECTOR_CLASS};
pub use session::PgSessionOpener;
