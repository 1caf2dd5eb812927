//! Consistency enforcement subsystem (§4.6): validates each generated
//! chapter against the consistency DB and gates death-status changes behind
//! an explicit-death-phrase check.

pub mod death_gate;
pub mod validator;

pub use validator::{
    apply_consistency_output, ConsistencyAgentOutput, NewFact, NewRelationship, NewRule,
    ValidationResult, ValidationViolation,
};
