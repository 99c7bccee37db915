//! Teardown command - Remove preview containers left by earlier runs.

use anyhow::Result;
use clap::Args;
use tracing::{info, warn};

use replica_sandbox::{DockerProvider, SandboxProvider};

#[derive(Args)]
pub struct TeardownArgs {
    /// Remove only these containers (names or ids)
    handles: Vec<String>,

    /// List what would be removed without removing it
    #[arg(long)]
    dry_run: bool,
}

pub async fn execute(args: TeardownArgs) -> Result<()> {
    let provider = DockerProvider::new().await?;
    let managed = provider.managed_handles().await?;
    let targets = select_targets(&managed, &args.handles)?;

    if targets.is_empty() {
        println!("No managed preview containers found.");
        return Ok(());
    }

    let mut failed = 0;
    for handle in &targets {
        if args.dry_run {
            println!("would remove {}", handle);
            continue;
        }
        match provider.delete(handle).await {
            Ok(()) => {
                info!("Removed container {}", handle);
                println!("removed {}", handle);
            }
            Err(e) => {
                warn!("Failed to remove container {}: {}", handle, e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} container(s) could not be removed", failed);
    }
    Ok(())
}

/// Requested handles must be managed ones; none requested means all.
fn select_targets(managed: &[String], requested: &[String]) -> Result<Vec<String>> {
    if requested.is_empty() {
        return Ok(managed.to_vec());
    }
    let unknown: Vec<&str> = requested
        .iter()
        .filter(|handle| !managed.contains(handle))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        anyhow::bail!("Managed container not found: {}", unknown.join(", "));
    }
    Ok(requested.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn managed() -> Vec<String> {
        vec!["replica-aaa".to_string(), "replica-bbb".to_string()]
    }

    #[test]
    fn test_all_managed_by_default() {
        assert_eq!(select_targets(&managed(), &[]).unwrap(), managed());
    }

    #[test]
    fn test_unmanaged_handle_is_rejected() {
        let err = select_targets(&managed(), &["postgres".to_string()]).unwrap_err();
        assert!(err.to_string().contains("not found: postgres"));
    }

    #[test]
    fn test_explicit_subset() {
        let picked = select_targets(&managed(), &["replica-bbb".to_string()]).unwrap();
        assert_eq!(picked, vec!["replica-bbb".to_string()]);
    }
}
