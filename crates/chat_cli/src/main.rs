mod providers;
mod transcript;

use std::io::BufRead;

use agent_chat::config::EnvConfig;
use agent_chat::{init_logging, RuntimeConfig, RuntimeHandle, SessionRuntime};
use anyhow::Context;
use identity_store::IdentityStore;
use providers::{provider_for_id, ProviderOptions};
use tokio::sync::mpsc;
use tracing::{info, warn};
use transcript::TranscriptPrinter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = EnvConfig::from_env()?;
    init_logging(&config.log_filter);

    let store = match &config.data_dir {
        Some(data_dir) => IdentityStore::in_dir(data_dir),
        None => IdentityStore::default_location()?,
    };
    let user_id = store
        .resolve_identity()
        .with_context(|| format!("resolving identity at {}", store.path().display()))?;

    let provider = provider_for_id(
        &config.provider,
        &ProviderOptions {
            agent_id: &config.agent_id,
            server_url: &config.server_url,
        },
    )
    .map_err(anyhow::Error::msg)?;
    info!(provider = provider.id, agent_id = %config.agent_id, "starting chat session");

    let (runtime, handle) = SessionRuntime::new(
        RuntimeConfig::from_env_config(&config, user_id),
        provider.transport,
        provider.backend,
    );
    let mut runtime_task = tokio::spawn(runtime.run());
    let printer_task = tokio::spawn(print_transcript(handle.clone()));
    let mut input = spawn_stdin_reader();

    loop {
        tokio::select! {
            finished = &mut runtime_task => {
                finished.context("session runtime panicked")?;
                break;
            }
            line = input.recv() => match line {
                Some(line) => {
                    if !handle.submit(line) {
                        break;
                    }
                }
                None => {
                    handle.quit();
                    runtime_task.await.context("session runtime panicked")?;
                    break;
                }
            },
        }
    }

    if let Err(error) = printer_task.await {
        warn!(%error, "transcript printer stopped abnormally");
    }
    Ok(())
}

/// Reads stdin on a plain thread so a pending read never holds up shutdown.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (lines_tx, lines_rx) = mpsc::unbounded_channel();
    let _ = std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if lines_tx.send(line).is_err() {
                    break;
                }
            }
        });
    lines_rx
}

async fn print_transcript(mut handle: RuntimeHandle) {
    let mut printer = TranscriptPrinter::default();
    loop {
        for line in printer.render(&handle.snapshot()) {
            println!("{line}");
        }
        if !handle.changed().await {
            break;
        }
    }
    for line in printer.render(&handle.snapshot()) {
        println!("{line}");
    }
}
