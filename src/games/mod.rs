pub mod outcome_index;
pub mod rules;
pub mod types;
pub mod vrf_engine;

pub use outcome_index::{five_d_index, OutcomeIndex, Property};
pub use rules::Scope;
pub use types::*;
pub use vrf_engine::{VrfBundle, VrfEngine};
