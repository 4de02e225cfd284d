use std::path::PathBuf;

use clap::Parser;

use bnode_observe::LoggerLevel;

use crate::config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "bnode-agentd")]
#[command(version)]
#[command(about = "Build node agent: claims build tasks and runs them in isolated environments")]
pub struct Args {
    /// Configuration file (TOML)
    #[arg(long, short = 'c', env = "BNODE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Root of environments, scratch files and task logs
    #[arg(long, env = "BNODE_WORK_DIR")]
    pub work_dir: Option<PathBuf>,

    /// Builds running at once
    #[arg(long)]
    pub max_builds: Option<usize>,

    /// Identity reported to the scheduler (defaults to the host name)
    #[arg(long, env = "BNODE_NODE_ID")]
    pub node_id: Option<String>,

    #[arg(long, env = "BNODE_SCHEDULER_TOKEN", hide_env_values = true)]
    pub scheduler_token: Option<String>,

    #[arg(long, env = "BNODE_STORE_TOKEN", hide_env_values = true)]
    pub store_token: Option<String>,

    /// Debug logging
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl Args {
    /// Command line values win over the file.
    pub fn apply(&self, cfg: &mut AppConfig) -> anyhow::Result<()> {
        let node = &mut cfg.node;
        if let Some(dir) = &self.work_dir {
            node.work_dir = dir.clone();
        }
        if let Some(n) = self.max_builds {
            node.max_concurrent_builds = n;
            node.environments.max_environments = node.environments.max_environments.max(n);
        }
        if let Some(id) = &self.node_id {
            node.node_id = Some(id.clone());
        }
        if let Some(token) = &self.scheduler_token {
            node.scheduler.token = Some(token.clone());
        }
        if let Some(token) = &self.store_token {
            node.artifact_store.token = Some(token.clone());
        }
        if self.verbose {
            cfg.logger.level = LoggerLevel::new("debug")?;
        }
        Ok(())
    }
}
