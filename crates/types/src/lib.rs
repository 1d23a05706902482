#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/cometgate/cometgate/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod error;
pub use error::{GateError, PoolKind, TransportKind};

mod endpoint;
pub use endpoint::{Endpoint, RegistryEndpoint};

mod chain;
pub use chain::{ChainMetrics, ChainState, ChainStatus, ManagerStatus, ManagerSummary};
