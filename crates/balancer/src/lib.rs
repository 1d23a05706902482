#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/cometgate/cometgate/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod weight;
pub use weight::{MAX_WEIGHT, MIN_WEIGHT, WeightRecord};

mod breaker;
pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};

mod forward;
pub use forward::{Forwarder, ProxyRequest, UpstreamResponse};

mod balancer;
pub use balancer::{BalancerSettings, LoadBalancer, Pools, Selected};
