//! Terrace node binary: load config, wire collaborator stubs, run the
//! driver loop until interrupted.

use async_trait::async_trait;
use std::sync::Arc;
use terrace_crypto::Keypair;
use terrace_node::{Node, NodeConfig, NullBroadcaster};
use terrace_settlement::{L1Submitter, SettlementError, SubmissionReceipt};
use terrace_vm::precompiles::verifier::ShapeCheckPairing;
use tracing_subscriber::EnvFilter;

/// Stand-in L1 submitter: logs the commitment and acknowledges it. Real
/// deployments wire the HTTPS client to the settlement chain here.
struct LoggingSubmitter;

#[async_trait]
impl L1Submitter for LoggingSubmitter {
    async fn submit(
        &self,
        batch_id: &str,
        state_root_hex: &str,
        block_count: u64,
    ) -> Result<SubmissionReceipt, SettlementError> {
        tracing::info!(batch_id, state_root_hex, block_count, "L1 submission (stub)");
        Ok(SubmissionReceipt {
            success: true,
            request_key: format!("local-{batch_id}"),
            error: None,
        })
    }
}

fn load_config() -> anyhow::Result<NodeConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&raw)?)
        }
        None => Ok(NodeConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = load_config()?;
    tracing::info!(node = %config.node_id, data_dir = %config.data_dir.display(), "starting terrace node");

    let keypair = Keypair::generate();
    tracing::info!(address = %keypair.address(), "node signing key ready");

    let broadcaster = Arc::new(NullBroadcaster);
    let node = Node::bootstrap(
        config,
        keypair,
        Arc::clone(&broadcaster) as _,
        broadcaster as _,
        Arc::new(LoggingSubmitter),
        Arc::new(ShapeCheckPairing),
    )?;

    let driver = Arc::clone(&node);
    let loop_handle = tokio::spawn(driver.run());

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested; draining");
    node.stop();
    let _ = loop_handle.await;
    Ok(())
}
