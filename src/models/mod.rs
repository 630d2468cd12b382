//! Domain model module declarations.

pub mod query;
pub mod record;
pub mod run;
pub mod strategy;
