//! Application state wiring the concrete infrastructure together.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use weaving_core::workflow::node::Capabilities;
use weaving_core::workflow::supervisor::RunSupervisor;
use weaving_infra::browser::ChromiumLauncher;
use weaving_infra::config::database_url;
use weaving_infra::notify::notifier_from_settings;
use weaving_infra::sqlite::pool::DatabasePool;
use weaving_infra::sqlite::workflow::SqliteWorkflowRepository;
use weaving_types::config::WeaveConfig;

pub type ConcreteSupervisor = RunSupervisor<SqliteWorkflowRepository>;

/// Browser launcher, notifier and headless policy built from configuration.
pub fn capabilities(config: &WeaveConfig) -> Capabilities {
    let launcher = ChromiumLauncher::new(
        config.browser.executable.as_ref().map(PathBuf::from),
        Duration::from_secs(config.browser.launch_timeout_secs),
    );
    Capabilities {
        browser: Some(Arc::new(launcher)),
        notifier: Some(notifier_from_settings(&config.notifications)),
        headless_override: config.browser.headless_override,
    }
}

/// State for commands that touch the workflow store.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<ConcreteSupervisor>,
    pub config: WeaveConfig,
}

impl AppState {
    /// Open the database and build the run supervisor.
    pub async fn init(data_dir: PathBuf, config: WeaveConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&data_dir).await?;

        let db_pool = DatabasePool::new(&database_url(&config, &data_dir)).await?;
        let repo = SqliteWorkflowRepository::new(db_pool);
        let supervisor = RunSupervisor::new(repo, capabilities(&config));

        Ok(Self {
            supervisor: Arc::new(supervisor),
            config,
        })
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.config.supervisor.shutdown_grace_secs)
    }
}
