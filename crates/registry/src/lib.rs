#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/cometgate/cometgate/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod poller;
pub use poller::{RegistryEvent, RegistryPoller, RegistrySettings};

mod parse;
pub use parse::{normalize_url, parse_registry};
