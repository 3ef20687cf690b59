//! DCops CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the machine scheduler:
//! - `Machine`: a physical host with taints, health and its reservation record
//! - `ReservationRequest`: a request for one machine of a class
//! - `Oob`: the out-of-band device carrying the power command surface

pub mod labels;
pub mod machine;
pub mod oob;
pub mod references;
pub mod reservation_request;

pub use machine::*;
pub use oob::*;
pub use references::*;
pub use reservation_request::*;
