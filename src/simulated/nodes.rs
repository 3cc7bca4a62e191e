use async_trait::async_trait;

use crate::config::Web3AuthNetwork;
use crate::error::{CoreKitError, CoreKitResult};
use crate::network::{NodeDetails, NodeDirectory};

/// Fixed topology of `node_count` nodes with DKG indexes `1..=node_count`.
pub struct SimulatedNodeDirectory {
    node_count: usize,
}

impl SimulatedNodeDirectory {
    pub fn new(node_count: usize) -> Self {
        Self { node_count }
    }
}

#[async_trait]
impl NodeDirectory for SimulatedNodeDirectory {
    async fn get_node_details(
        &self,
        network: Web3AuthNetwork,
        _verifier: &str,
        _verifier_id: &str,
    ) -> CoreKitResult<NodeDetails> {
        if self.node_count == 0 {
            return Err(CoreKitError::TopologyResolution(format!(
                "no nodes available on {network}"
            )));
        }
        let subdomain = network.to_string().replace('_', "-");
        let host = |i: usize| format!("https://node-{i}.{subdomain}.web3auth.simulated");
        let node_indexes = 1..=self.node_count;
        Ok(NodeDetails {
            torus_node_endpoints: node_indexes.clone().map(|i| format!("{}/sss/jrpc", host(i))).collect(),
            torus_node_tss_endpoints: node_indexes.clone().map(|i| format!("{}/tss", host(i))).collect(),
            tss_node_indexes: node_indexes
                .map(|i| u32::try_from(i).map_err(|e| CoreKitError::Internal(e.to_string())))
                .collect::<CoreKitResult<_>>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_topology_shape() {
        let details = SimulatedNodeDirectory::new(3)
            .get_node_details(Web3AuthNetwork::SapphireDevnet, "verifier", "alice")
            .await
            .unwrap();
        assert_eq!(details.torus_node_endpoints.len(), 3);
        assert_eq!(details.tss_node_indexes, vec![1, 2, 3]);
        assert!(details.torus_node_tss_endpoints[0].ends_with("/tss"));
    }

    #[tokio::test]
    async fn test_empty_topology_fails() {
        let result = SimulatedNodeDirectory::new(0)
            .get_node_details(Web3AuthNetwork::SapphireDevnet, "verifier", "alice")
            .await;
        assert!(matches!(result, Err(CoreKitError::TopologyResolution(_))));
    }
}
