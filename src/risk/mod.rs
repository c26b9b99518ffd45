//! Risk assessment: per-trade guardrails and circuit breakers (spec.md §4.3).

pub mod assessor;
pub mod model;
pub mod store;

pub use assessor::RiskAssessor;
pub use model::{
    CircuitBreaker, LimitType, RiskAlert, RiskAssessment, RiskLevel, RiskLimit, Severity, Side,
};
pub use store::RiskStore;
