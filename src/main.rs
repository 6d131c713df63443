use std::sync::Arc;

use switchboard::config::Config;
use switchboard::dispatch::http;
use switchboard::dispatch::registry::Registry;
use switchboard::generation::{HistoryBuffer, UniqueGenerator};
use switchboard::orchestrator::Orchestrator;
use switchboard::prompt::SystemPromptResolver;
use switchboard::server::{self, Gateway};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    // Load .env from the binary's directory first, then fall back to CWD.
    let beside_exe = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(".env")))
        .filter(|path| path.exists());
    match beside_exe {
        Some(path) => {
            dotenvy::from_path(&path).ok();
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    tracing::info!("switchboard starting");

    let config = Config::load();
    let registry = Arc::new(Registry::from_config(&config)?);
    let prompts = Arc::new(SystemPromptResolver::new(
        http::build_client(),
        &config.prompt_service,
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        registry.clone(),
        prompts,
        config.chat.clone(),
    ));

    // Lives for the whole process; disposed explicitly on the way out.
    let history = Arc::new(HistoryBuffer::with_capacity(config.generation.history_size));

    // `switchboard generate [N]` runs the generation loop in-process and exits.
    let mut args = std::env::args().skip(1);
    if args.next().as_deref() == Some("generate") {
        let count: usize = args.next().and_then(|n| n.parse().ok()).unwrap_or(1);
        let generator = UniqueGenerator::from_registry(
            &registry,
            history.clone(),
            config.generation.clone(),
        );
        for _ in 0..count {
            println!("{}", generator.generate_unique().await?);
        }
    } else {
        let handle = server::serve(&config.bind, Gateway { orchestrator }).await?;
        tokio::signal::ctrl_c().await?;
        handle.shutdown().await?;
    }

    let dropped = history.dispose().await;
    tracing::info!(history_entries = dropped, "switchboard shutting down");
    Ok(())
}
