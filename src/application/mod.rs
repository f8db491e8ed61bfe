//! Front-door logic independent of the HTTP framework.

pub mod error;
pub mod proxy;
