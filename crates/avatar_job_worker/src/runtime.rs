pub use avatar_job_core::{contract, storage_config, storage_keys};
