//! Queue fetch requests and answer them from the node

use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

use contract_netutils::JsonRpcConnector;

use crate::{
    client::{ClientError, FetchRequest},
    primitives::{Block, BlockTopology, Multihash},
    wire::{BlocksByHeightJson, HeadInfoJson},
};

const GET_HEAD_INFO: &str = "chain.get_head_info";
const GET_BLOCKS_BY_HEIGHT: &str = "block_store.get_blocks_by_height";

/// Receives [`crate::client::FetchRequest`]'s via an [`tokio::sync::mpsc::UnboundedReceiver`] for queueing
/// and fetching from the node.
/// Returns the data specified in the [`crate::client::FetchRequest`] variant via the provided [`tokio::sync::oneshot::Sender`].
///
/// All requests to the node are handled from this single task. It returns once the channel is
/// closed and every queued request has been answered.
pub async fn fetch(
    mut fetch_request_receiver: UnboundedReceiver<FetchRequest>,
    connector: JsonRpcConnector,
) {
    let mut fetch_request_queue: Vec<FetchRequest> = Vec::new();

    loop {
        if receive_fetch_requests(&mut fetch_request_receiver, &mut fetch_request_queue).await {
            tracing::debug!("Fetch request channel closed.");
            return;
        }

        if !fetch_request_queue.is_empty() {
            let fetch_request = fetch_request_queue.remove(0);
            fetch_from_node(&connector, fetch_request).await;
        }
    }
}

// receives fetch requests and populates the fetch request queue
//
// returns `true` if the fetch request channel is closed and all fetch requests have been completed
async fn receive_fetch_requests(
    receiver: &mut UnboundedReceiver<FetchRequest>,
    fetch_request_queue: &mut Vec<FetchRequest>,
) -> bool {
    // sleep until the next fetch request is received or the channel is closed
    if fetch_request_queue.is_empty() {
        if let Some(fetch_request) = receiver.recv().await {
            fetch_request_queue.push(fetch_request);
        }
    }
    loop {
        match receiver.try_recv() {
            Ok(fetch_request) => fetch_request_queue.push(fetch_request),
            Err(tokio::sync::mpsc::error::TryRecvError::Empty) => break,
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected) => {
                return fetch_request_queue.is_empty();
            }
        }
    }

    false
}

async fn fetch_from_node(connector: &JsonRpcConnector, fetch_request: FetchRequest) {
    let delivered = match fetch_request {
        FetchRequest::HeadTopology(sender) => {
            tracing::info!("Fetching head topology.");
            sender.send(get_head_topology(connector).await).is_ok()
        }
        FetchRequest::BlocksByHeight(sender, head, start, count) => {
            tracing::info!("Fetching {} blocks from height {}.", count, start);
            sender
                .send(get_blocks_by_height(connector, head, start, count).await)
                .is_ok()
        }
    };
    if !delivered {
        tracing::debug!("Fetch requester went away before the response arrived.");
    }
}

async fn get_head_topology(connector: &JsonRpcConnector) -> Result<BlockTopology, ClientError> {
    let head_info: HeadInfoJson = connector.call(GET_HEAD_INFO, json!({})).await?;
    Ok(head_info.head_topology.try_into()?)
}

async fn get_blocks_by_height(
    connector: &JsonRpcConnector,
    head: Option<Multihash>,
    start: u64,
    count: u64,
) -> Result<Vec<Block>, ClientError> {
    let head = match head {
        Some(head) => head,
        None => get_head_topology(connector).await?.id,
    };
    let params = json!({
        "head_block_id": head.to_string(),
        "ancestor_start_height": start,
        "num_blocks": count,
        "return_block": true,
        "return_receipt": false,
    });
    let response: BlocksByHeightJson = connector.call(GET_BLOCKS_BY_HEIGHT, params).await?;
    Ok(response.into_blocks()?)
}
