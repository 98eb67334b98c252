use std::error::Error;
use std::fmt::{self, Display};

/// A weight table or scheduler configuration that cannot be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The priority bounds are reversed or the default is outside of them.
    InvalidRange { min: i8, default: i8, max: i8 },

    /// A priority maps to a zero or negative weight.
    NonPositiveWeight { priority: i8, weight: i64 },

    /// A weight does not fit in 64 bits.
    WeightOverflow { priority: i8 },

    /// An explicit table does not have one weight per priority.
    TableSize { expected: usize, found: usize },

    /// A geometric curve with a zero numerator or denominator.
    InvalidRatio { numerator: u64, denominator: u64 },

    /// A zero scheduling period.
    ZeroLatency,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidRange { min, default, max } => {
                write!(f, "invalid priority range {min}..={max} with default {default}")
            }
            ConfigError::NonPositiveWeight { priority, weight } => {
                write!(f, "priority {priority} maps to non-positive weight {weight}")
            }
            ConfigError::WeightOverflow { priority } => {
                write!(f, "weight of priority {priority} overflows")
            }
            ConfigError::TableSize { expected, found } => {
                write!(f, "weight table has {found} entries, expected {expected}")
            }
            ConfigError::InvalidRatio {
                numerator,
                denominator,
            } => write!(f, "invalid weight ratio {numerator}/{denominator}"),
            ConfigError::ZeroLatency => write!(f, "scheduling latency must be positive"),
        }
    }
}

impl Error for ConfigError {}

/// A rejected tree operation or a broken tree invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeError {
    /// The key is already present.
    DuplicateKey,

    /// The root is red.
    RedRoot,

    /// A red node has a red child.
    RedViolation,

    /// Two paths to nil leaves cross a different number of black nodes.
    BlackHeightMismatch { left: usize, right: usize },

    /// A child does not point back at its parent.
    BrokenParentLink,

    /// An in-order neighbour does not compare greater than its predecessor.
    OutOfOrder,

    /// The node count differs from the recorded length.
    LengthMismatch { counted: usize, recorded: usize },
}

impl Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeError::DuplicateKey => write!(f, "key already present"),
            TreeError::RedRoot => write!(f, "root is red"),
            TreeError::RedViolation => write!(f, "red node with a red child"),
            TreeError::BlackHeightMismatch { left, right } => {
                write!(f, "black-height mismatch: {left} on the left, {right} on the right")
            }
            TreeError::BrokenParentLink => write!(f, "child does not link back to its parent"),
            TreeError::OutOfOrder => write!(f, "nodes are out of order"),
            TreeError::LengthMismatch { counted, recorded } => {
                write!(f, "counted {counted} nodes, recorded {recorded}")
            }
        }
    }
}

impl Error for TreeError {}
