use clap::Parser;

/// Line-streaming stand-in for the generation service behind sse-relay
#[derive(Parser, Debug, Clone)]
#[command(name = "mock-upstream")]
#[command(about = "Mock generation service that streams one token per line")]
pub struct Config {
    /// Listen address
    #[arg(short, long, default_value = "127.0.0.1:8001")]
    pub listen: String,

    /// Number of generated tokens after the prompt echo
    #[arg(short = 'n', long, default_value = "12")]
    pub token_count: usize,

    /// Delay before each line in milliseconds
    #[arg(short = 'd', long, default_value = "200")]
    pub token_delay_ms: u64,

    /// Minimal logging output
    #[arg(long)]
    pub quiet: bool,
}
