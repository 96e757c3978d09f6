pub mod files;
pub mod liveness;
pub mod readiness;
