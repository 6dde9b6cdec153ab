mod pg_store;
mod store;
mod unified_store;

pub use pg_store::PgProfileStore;
pub use store::FileProfileStore;
pub use unified_store::UnifiedProfileStore;
