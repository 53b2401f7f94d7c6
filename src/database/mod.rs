//! Database module - PostgreSQL
//!
//! Backs usage accounting (`storage_usage`) and reads the platform's
//! `connections` table for credential injection.

mod postgres;

pub use postgres::{init_pool, migrations, PostgresPool};
