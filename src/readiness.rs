//! Node readiness polling
//!
//! After the services are up the suite waits until the API server reports
//! the node under test as Ready. The poller lists nodes at a fixed interval:
//!
//! - no nodes (or no list at all): keep waiting
//! - exactly one node, Ready=True: done
//! - exactly one node, not Ready: keep waiting
//! - more than one node: fail immediately, the node tests assume a
//!   single-node cluster
//!
//! A failed list call also fails immediately. Exceeding the timeout fails
//! with the last reason the node was not ready.

use crate::config::NodeTestContext;
use crate::error::HarnessError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Source of node lists
#[async_trait]
pub trait NodeLister: Send + Sync {
    /// List all nodes; `None` stands for a missing list
    async fn list_nodes(&self) -> Result<Option<Vec<Node>>>;
}

/// Lists nodes through the cluster API
pub struct KubeNodeLister {
    client: Client,
}

impl KubeNodeLister {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the context's kubeconfig, or its API server URL
    pub async fn from_context(ctx: &NodeTestContext) -> Result<Self> {
        let config = match ctx.kubeconfig {
            Some(ref path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .context("Failed to load kubeconfig")?
            }
            None => {
                let url = ctx
                    .api_server
                    .parse()
                    .with_context(|| format!("Invalid API server URL: {}", ctx.api_server))?;
                Config::new(url)
            }
        };

        let client = Client::try_from(config).context("Failed to create cluster client")?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl NodeLister for KubeNodeLister {
    async fn list_nodes(&self) -> Result<Option<Vec<Node>>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api
            .list(&ListParams::default())
            .await
            .context("Failed to list nodes")?;
        Ok(Some(nodes.items))
    }
}

/// Check if a node has the Ready condition set to True.
pub fn is_node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
        .unwrap_or(false)
}

fn node_name(node: &Node) -> String {
    node.metadata.name.clone().unwrap_or_else(|| "<unnamed>".to_string())
}

/// Poller state after one observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    /// Not ready yet, with the reason
    Waiting(String),
    /// The single node is Ready
    Ready(String),
}

/// Decide the poller state from one node list
pub fn observe(nodes: Option<Vec<Node>>) -> std::result::Result<PollState, HarnessError> {
    let nodes = match nodes {
        Some(nodes) => nodes,
        None => return Ok(PollState::Waiting("the node list is nil".to_string())),
    };

    if nodes.len() > 1 {
        return Err(HarnessError::MultipleNodes {
            count: nodes.len(),
            names: nodes.iter().map(node_name).collect(),
        });
    }

    match nodes.first() {
        None => Ok(PollState::Waiting("empty node list".to_string())),
        Some(node) if is_node_ready(node) => Ok(PollState::Ready(node_name(node))),
        Some(node) => Ok(PollState::Waiting(format!("node {} is not ready", node_name(node)))),
    }
}

/// Wait until the single node reports Ready
///
/// Checks immediately, then every `interval`. The last check happens at the
/// deadline. Returns the node name.
pub async fn wait_for_node_ready(
    lister: &dyn NodeLister,
    timeout: Duration,
    interval: Duration,
) -> Result<String> {
    let deadline = Instant::now() + timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let nodes = lister.list_nodes().await?;

        let reason = match observe(nodes)? {
            PollState::Ready(name) => {
                info!(node = %name, attempts, "node is ready");
                return Ok(name);
            }
            PollState::Waiting(reason) => reason,
        };
        debug!(attempts, "waiting for node: {}", reason);

        let now = Instant::now();
        if now >= deadline {
            return Err(HarnessError::NodeReadyTimeout { timeout, last: reason }.into());
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}
