#![forbid(unsafe_code)]

mod availability;
mod checker;
mod config;
mod error;
mod instrument;
mod linear;
mod node_map;

pub use availability::AvailabilityAnalysis;
pub use checker::{CivlTypeChecker, Signature};
pub use config::{InstrumentConfig, InstrumentSettings};
pub use error::{ConfigError, InstrumentError, TypeError};
pub use instrument::{PermissionInstrumenter, ProgramPoint};
pub use linear::{CollectorEncoding, DomainId, LinearDomain, LinearTypeChecker, PermissionEncoding};
pub use node_map::NodeMap;
