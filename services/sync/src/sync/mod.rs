pub mod descriptor;
pub mod engine;
pub mod runner;

#[cfg(test)]
pub(crate) mod test_support;

use mirror_common::error::MirrorError;

use crate::rpc::client::RpcClientError;

/// Why an entity run failed. The rendered text is stored on the run record.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("remote: {0}")]
    Remote(#[from] RpcClientError),

    #[error("store: {0}")]
    Store(#[from] MirrorError),

    #[error("invalid record: {0}")]
    Validation(String),
}
