//! Route handlers shipped with the server.

pub mod connector;

pub use connector::{Connector, default_dictionary};
