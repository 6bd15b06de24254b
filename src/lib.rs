pub mod asn1;
pub mod batch;
pub mod config;
pub mod directory;
pub mod domain;
pub mod events;
pub mod pki;
pub mod telemetry;
