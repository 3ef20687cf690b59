//! Metal store client
//!
//! Reads and writes the resources the machine scheduler works on: `Machine`,
//! `ReservationRequest` and `Oob`. Reconcilers depend on `MetalClientTrait`; production code
//! uses the Kubernetes-backed `MetalClient`, tests use `MockMetalClient` (feature `test-util`).
//!
//! # Example
//!
//! ```no_run
//! use metal_client::{LabelSelector, MachineListParams, MetalClient, MetalClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let kube_client = kube::Client::try_default().await?;
//! let client = MetalClient::new(kube_client, "metal");
//!
//! let selector = LabelSelector::new()
//!     .equals("size-m5.metal", "true")
//!     .does_not_exist("dcops.microscaler.io/leased");
//! let page = client
//!     .list_machines(&MachineListParams::first_page(Some(selector), 100))
//!     .await?;
//! println!("{} candidates", page.items.len());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod common;
pub mod error;
#[path = "trait.rs"]
pub mod metal_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod selector;

pub use client::MetalClient;
pub use common::{MachineListParams, MachinePage};
pub use error::MetalError;
pub use metal_trait::MetalClientTrait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockFailure, MockMetalClient, MockOperation, MockWrite};
pub use selector::{LabelSelector, Requirement};
