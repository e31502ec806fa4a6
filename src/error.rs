//! Configuration errors.
//!
//! Everything that can be wrong with the way a term or algorithm is set up is detected when it
//! is constructed, before any per-element or per-node work starts.
use crate::master_element::MasterElementCall;
use crate::topology::TopologyKind;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("no field named `{name}` is registered with the mesh")]
    UnknownField { name: String },
    #[error("no part named `{name}` is registered with the mesh")]
    UnknownPart { name: String },
    #[error("`{name}` is registered more than once")]
    DuplicateName { name: String },
    #[error("topology {topology} has no registered subcontrol-surface evaluator")]
    UnsupportedTopology { topology: TopologyKind },
    #[error("part `{part}` has topology {found}, but the algorithm was built for {expected}")]
    TopologyMismatch {
        part: String,
        expected: TopologyKind,
        found: TopologyKind,
    },
    #[error("field `{field}` is declared with width {declared}, but registered with width {registered}")]
    FieldWidthMismatch {
        field: String,
        declared: usize,
        registered: usize,
    },
    #[error("field `{field}` is requested with conflicting widths {first} and {second}")]
    ConflictingRequest { field: String, first: usize, second: usize },
    #[error("{call:?} is requested, but no coordinate field is declared for {coords:?} coordinates")]
    MissingCoordinates {
        call: MasterElementCall,
        coords: crate::scratch::CoordsType,
    },
    #[error("invalid value for option `{name}`: {reason}")]
    InvalidOption { name: String, reason: String },
    #[error("field `{name}` cannot be both read and written by the same algorithm")]
    AliasedField { name: String },
    #[error("term {index} declared its data on other requests than the ones staged for its element pass")]
    ForeignDataRequests { index: usize },
    #[error("invalid mesh: {reason}")]
    InvalidMesh { reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
