//! Task graph construction, scheduling, and the worker pool (spec
//! components C4 task graph, C5 scheduler/queues, C6 dispatch, C10 parallel
//! primitives).

pub mod error;
pub mod graph;
pub mod pool;
pub mod queue;
pub mod scheduler;
pub mod task;
pub mod threadpool;

pub use error::SchedulerError;
pub use graph::{build_task_graph, CellTaskIndex, CrossNodeLink, GraphConfig, TaskGraph};
pub use pool::{PoolConfig, WorkerPool};
pub use queue::QueueSet;
pub use scheduler::{complete, dispatch, seed_queues, unskip, Kernels};
pub use task::{Task, TaskKind, TaskSubtype};
pub use threadpool::ThreadPool;
