//! Cross-node proxy exchange, stray redistribution, and the repartition
//! driver (spec components C7/C8/C14).

pub mod error;
pub mod grpc;
pub mod local;
pub mod pcell;
pub mod proxy;
pub mod repartition_driver;
pub mod strays;
pub mod wire;

pub use error::{ExchangeError, ExchangeResult, RepartitionError};
pub use local::{LocalNetwork, LocalTransport};
pub use pcell::{pack_proxy_cells, reconstruct_foreign_subtree, unpack_proxy_cells, PCellNode};
pub use proxy::{Proxy, ProxySet};
pub use repartition_driver::{imbalance_exceeds_threshold, run_repartition};
pub use strays::{absorb_strays, collect_strays, identity_assignment, StrayBatch};
pub use wire::{MessageTag, Transport, WireKind, WireMessage};
