use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "quillgen",
    about = "Streaming chat-completion client for AI-assisted writing tools",
    version
)]
pub struct Cli {
    /// Prompt to generate from
    pub prompt: String,

    /// Optional system prompt prepended to the conversation
    #[arg(short, long)]
    pub system: Option<String>,

    /// Settings file with model profiles and provider API keys
    #[arg(long, env = "QUILLGEN_SETTINGS", default_value = "quillgen.toml")]
    pub settings: PathBuf,

    /// Model profile to use instead of the file's active_profile
    #[arg(long)]
    pub profile: Option<String>,

    /// Disable streaming and print the whole completion at once
    #[arg(long)]
    pub no_stream: bool,

    /// Print reasoning (chain-of-thought) deltas to stderr, dimmed
    #[arg(long)]
    pub show_reasoning: bool,
}
