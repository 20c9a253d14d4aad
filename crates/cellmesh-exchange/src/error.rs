//! Errors raised by the proxy/exchange layer (spec §7: graph overflow,
//! communication failure are both fatal; there is no task-local retry).

use cellmesh_types::NodeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("node={to} at=transport::send values=tag={tag}: {detail}")]
    Send { to: NodeId, tag: u32, detail: String },

    #[error("node={from} at=transport::recv values=tag={tag}: {detail}")]
    Recv { from: NodeId, tag: u32, detail: String },

    #[error("at=transport::recv_timeout values=tag={tag}")]
    RecvTimeout { tag: u32 },

    #[error("at=exchange::proxies_exceeded values=nr_proxies={nr_proxies},limit={limit}")]
    ProxiesExceeded { nr_proxies: usize, limit: usize },

    #[error("at=exchange::pcell_decode values=detail={0}")]
    PcellDecode(String),

    #[error(transparent)]
    Repartition(#[from] RepartitionError),
}

#[derive(Debug, Error)]
pub enum RepartitionError {
    #[error("at=repartition::mapping_size_mismatch values=expected={expected},got={got}")]
    MappingSizeMismatch { expected: usize, got: usize },
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;
