//! Game state synchronization: deltas, pooling, interest and tick rate

pub mod player;
pub mod pool;
pub mod snapshot;
pub mod spatial;
pub mod tick;

pub use player::{PlayerState, PLAYER_STEP};
pub use pool::{BufferPool, Datagram, DatagramPool, Pool, PoolStats, Recycle, SnapshotPool};
pub use snapshot::{apply_delta, compute_delta};
pub use spatial::{Position, SpatialIndex};
pub use tick::{hz_for_players, TickController};
