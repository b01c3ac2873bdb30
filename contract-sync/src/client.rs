//! Module for handling all connections to the upstream node

use tokio::sync::{mpsc::UnboundedSender, oneshot};

use contract_netutils::JsonRpcError;

use crate::{
    primitives::{Block, BlockTopology, Multihash},
    traits::BlockSource,
    wire::WireError,
};

pub mod fetch;

/// Errors associated with fetching chain data
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Rpc call failed
    #[error("JSON-RPC error. {0}")]
    JsonRpc(#[from] JsonRpcError),
    /// Response could not be converted
    #[error("Wire error. {0}")]
    Wire(#[from] WireError),
    /// The fetch task is not running
    #[error("Fetcher is not running")]
    FetcherClosed,
}

/// Fetch requests are created and sent to the [`crate::client::fetch::fetch`] task when a connection to the node is required.
///
/// Each variant includes a [`tokio::sync::oneshot::Sender`] for returning the fetched data to the requester.
#[derive(Debug)]
pub enum FetchRequest {
    /// Gets the topology of the chain head.
    HeadTopology(oneshot::Sender<Result<BlockTopology, ClientError>>),
    /// Gets `count` consecutive blocks from `start` on the chain ending at the given head, or at
    /// the current chain head when none is given.
    BlocksByHeight(
        oneshot::Sender<Result<Vec<Block>, ClientError>>,
        Option<Multihash>,
        u64,
        u64,
    ),
}

/// Handle to the [`crate::client::fetch::fetch`] task.
///
/// Requires the task to be running concurrently, connected via the `fetch_request` channel.
#[derive(Debug, Clone)]
pub struct FetchClient {
    fetch_request_sender: UnboundedSender<FetchRequest>,
}

impl FetchClient {
    /// Wraps the sending half of the fetch request channel
    pub fn new(fetch_request_sender: UnboundedSender<FetchRequest>) -> Self {
        FetchClient {
            fetch_request_sender,
        }
    }

    async fn request<T>(
        &self,
        fetch_request: impl FnOnce(oneshot::Sender<Result<T, ClientError>>) -> FetchRequest,
    ) -> Result<T, ClientError> {
        let (sender, receiver) = oneshot::channel();
        self.fetch_request_sender
            .send(fetch_request(sender))
            .map_err(|_| ClientError::FetcherClosed)?;
        receiver.await.map_err(|_| ClientError::FetcherClosed)?
    }
}

impl BlockSource for FetchClient {
    async fn head_topology(&self) -> Result<BlockTopology, ClientError> {
        self.request(FetchRequest::HeadTopology).await
    }

    async fn blocks_by_height(
        &self,
        head: Option<&Multihash>,
        start: u64,
        count: u64,
    ) -> Result<Vec<Block>, ClientError> {
        let head = head.cloned();
        self.request(|sender| FetchRequest::BlocksByHeight(sender, head, start, count))
            .await
    }
}
