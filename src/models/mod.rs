//! Database entity models.
//!
//! Structs here map to PostgreSQL tables and derive `sqlx::FromRow` for
//! the runtime-checked queries in `services::postgres_store`.

pub mod device_record;

pub use device_record::DeviceRecord;
