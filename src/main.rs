mod api;
mod cli;
mod config;
mod credentials;
mod error;

use api::{
    CancelToken, ChatMessage, ChunkCallback, GenerationClient, HttpBackend, RetryPolicy,
    StreamChunk,
};
use clap::Parser;
use cli::Cli;
use colored::Colorize;
use config::Settings;
use credentials::CredentialStore;
use error::Result;
use futures::StreamExt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    let settings = if cli.settings.exists() {
        match Settings::load(&cli.settings) {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("{} {}", "Error:".bright_red().bold(), e);
                std::process::exit(1);
            }
        }
    } else {
        Settings::default()
    };

    let profile = settings.resolve_profile(cli.profile.as_deref());
    let timeout = Duration::from_secs(profile.request_timeout_secs);
    let use_stream = profile.stream && !cli.no_stream;

    eprintln!("{} {}", "Model:".bright_green(), profile.name);

    let backend = match HttpBackend::new(timeout) {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            eprintln!("{} {}", "Error:".bright_red().bold(), e);
            std::process::exit(1);
        }
    };
    let credentials = Arc::new(CredentialStore::new(settings.providers.clone()));
    let retry = RetryPolicy {
        max_retries: settings.retry.max_retries,
        initial_delay: Duration::from_millis(settings.retry.initial_delay_ms),
    };
    let client = GenerationClient::new(backend, config::shared(profile), credentials)
        .with_retry_policy(retry);

    let mut messages = Vec::new();
    if let Some(system) = &cli.system {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(&cli.prompt));

    if !use_stream {
        let text = client.generate_text(&messages).await;
        println!("{}", text);
        return Ok(());
    }

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let show_reasoning = cli.show_reasoning;
    let callback: ChunkCallback = Arc::new(move |chunk| match chunk {
        StreamChunk::Reasoning(text) if show_reasoning => {
            eprint!("{}", text.dimmed());
        }
        StreamChunk::ThinkingFinished if show_reasoning => {
            eprintln!();
        }
        _ => {}
    });

    let mut stream = client.stream_generate(messages, Some(callback), cancel);
    let mut stdout = std::io::stdout();
    while let Some(chunk) = stream.next().await {
        write!(stdout, "{}", chunk)?;
        stdout.flush()?;
    }
    writeln!(stdout)?;

    Ok(())
}
