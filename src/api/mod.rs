pub mod connector;
pub mod remote;
pub mod types;
