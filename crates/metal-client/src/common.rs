//! Paging types shared by the client implementations

use crate::selector::LabelSelector;
use crds::Machine;

/// Parameters of one machine list call
#[derive(Debug, Clone, Default)]
pub struct MachineListParams {
    /// Label selector evaluated by the store
    pub selector: Option<LabelSelector>,
    /// Maximum number of items in the page
    pub limit: Option<u32>,
    /// Continue token returned by the previous page
    pub continue_token: Option<String>,
}

impl MachineListParams {
    /// First page of machines matching `selector`
    pub fn first_page(selector: Option<LabelSelector>, limit: u32) -> Self {
        Self {
            selector,
            limit: Some(limit),
            continue_token: None,
        }
    }
}

/// One page of a machine list
#[derive(Debug, Clone, Default)]
pub struct MachinePage {
    /// Machines in this page
    pub items: Vec<Machine>,
    /// Token for the next page; `None` on the last page
    pub continue_token: Option<String>,
}
