pub mod position_kf;

pub use position_kf::{FilterOutcome, GateReason, PositionKf};
