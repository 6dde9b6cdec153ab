pub mod handlers;
pub mod response;
pub mod server;

pub use handlers::AppState;
pub use response::ApiResponse;
pub use server::{router, ApiServer};
