//! Projects and the request admission gate.
//!
//! [`ProjectRegistry`] owns project records and provisions each project's
//! rate counter. [`AdmissionGate`] is what the request path talks to: it
//! resolves an API key to a project and asks the
//! [`RateLimiter`](mixgate_rate_limit::RateLimiter) for a decision.

pub mod gate;
pub mod model;
pub mod registry;

pub use gate::{AdmissionGate, AdmittedProject, GateError};
pub use model::{NewProject, Project, ProjectUpdate};
pub use registry::{ProjectLookup, ProjectRegistry, RegistryError};
