pub mod access;
pub mod ingest;
pub mod lifecycle;
pub mod notify;
pub mod pairing;
pub mod registry;
