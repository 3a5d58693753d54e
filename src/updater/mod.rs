// SPDX-License-Identifier: MIT

//! Device update workflows driven by external update requests

pub mod app;
pub mod child;
pub mod config;
pub mod external;
pub mod router;
pub mod status;
pub mod topic;
