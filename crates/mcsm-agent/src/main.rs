use mcsm_agent::{ProcessManager, SupervisorConfig, config, console::Console, layout};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Console output owns stdout; diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cfg = SupervisorConfig::from_env();
    let root = layout::data_root();
    std::fs::create_dir_all(&root)?;
    tracing::info!(
        root = %root.display(),
        grace_ms = cfg.grace_period.as_millis() as u64,
        "mcsm-agent starting"
    );

    let manager = ProcessManager::new(cfg);
    Console::new(
        manager,
        root,
        config::paper_profile_from_env(),
        config::server_jar_url(),
    )
    .run()
    .await
}
