use async_trait::async_trait;
use mirror_common::Domain;
use serde_json::Value;

use crate::rpc::client::RpcClientError;

/// One keyset page request against a source entity.
#[derive(Debug, Clone, PartialEq)]
pub struct PageQuery {
    pub entity: String,
    pub filter: Domain,
    /// Empty requests every field.
    pub fields: Vec<String>,
    pub order: String,
    pub limit: u32,
}

/// Anything that can serve ordered, filtered pages of raw records.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_page(&self, query: &PageQuery) -> Result<Vec<Value>, RpcClientError>;
}
