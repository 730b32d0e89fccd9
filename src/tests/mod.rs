//! End-to-end pipeline scenarios against mocked collaborators: an in-memory
//! store, a mock wallet honoring the wallet contract, and a mock JSON-RPC
//! node. The EVM itself is never emulated.

pub(crate) mod mock;
pub(crate) mod node;
