mod checks;
mod mysql_handler;
mod session;

pub use checks::MySqlChecks;
pub use mysql_handler::{server_id, MySqlHandler, CONNECTOR_CLASS};
pub use session::MySqlSessionOpener;
