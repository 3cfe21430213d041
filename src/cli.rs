//! Command-line interface for Tripguard
//!
//! Provides argument parsing and subcommand handling for the Tripguard binary.

use clap::{Parser, Subcommand};

/// Request guardrails for agent routes
#[derive(Parser)]
#[command(name = "tripguard")]
#[command(version)]
#[command(about = "Request guardrails for agent and tool-calling routes")]
#[command(
    long_about = "Tripguard enforces per-route rate limits, resolves the model provider \
    and credential path for each request, and versions cache tags so tool results can be \
    invalidated without deleting keys."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,

    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Bump cache tag versions, invalidating results cached under them
    BumpTags {
        /// Tags to invalidate
        #[arg(required = true)]
        tags: Vec<String>,
    },
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# Tripguard Configuration
# =======================
#
# Provider credentials are read from the environment, not from this file:
#   OPENAI_API_KEY, OPENROUTER_API_KEY, ANTHROPIC_API_KEY, XAI_API_KEY
#   AI_GATEWAY_API_KEY, AI_GATEWAY_URL      (team gateway)
#   PROVIDER_PREFERENCE=openai,openrouter   (direct provider order)
#   OPENROUTER_REFERER, OPENROUTER_TITLE    (attribution headers)

# ─────────────────────────────────────────────────────────────────────────────
# SERVER CONFIGURATION
# ─────────────────────────────────────────────────────────────────────────────

[server]
# IP address to bind to (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "0.0.0.0"

# Port to listen on
port = 3000

# Request timeout in seconds
request_timeout_seconds = 30

# ─────────────────────────────────────────────────────────────────────────────
# KEY-VALUE STORE
# ─────────────────────────────────────────────────────────────────────────────
#
# Redis over REST. UPSTASH_REDIS_REST_URL / UPSTASH_REDIS_REST_TOKEN override
# these values. Without a store, rate limiting passes every request through
# and cache tags stay at version 1.

[store]
# url = "https://your-db.upstash.io"
# token = "..."

# Use a process-local store when no REST store is configured
# (single instance only; counters are lost on restart)
in_memory = false

# Per-command timeout in milliseconds
timeout_ms = 1500

# ─────────────────────────────────────────────────────────────────────────────
# RATE LIMITS
# ─────────────────────────────────────────────────────────────────────────────

[rate_limits]
# "fixed": counters reset at each window boundary
# "sliding": previous window is weighted into the current count
algorithm = "fixed"

# Override or add routes. Built-in routes include agents:flights (8/min),
# agents:router (100/min), chat:stream (40/min) and search:places (10/min).
[rate_limits.routes]
"agents:flights" = { limit = 8, window_seconds = 60 }

# ─────────────────────────────────────────────────────────────────────────────
# RETRY
# ─────────────────────────────────────────────────────────────────────────────

# Policy for outbound tool calls made with retry::http::send_with_retry
[retry]
# Total attempts including the first
attempts = 3

# Delay before the first retry; doubles each retry
base_delay_ms = 250

# Cap on the un-jittered delay
max_delay_ms = 4000

# Fraction of each delay that is randomized (0.0 - 1.0)
jitter_ratio = 0.2

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# trace, debug, info, warn, error (RUST_LOG takes precedence)
log_level = "info"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn default_config_path() {
        let cli = Cli::parse_from(["tripguard"]);
        assert_eq!(cli.config, "config.toml");
        assert!(cli.command.is_none());
    }

    #[test]
    fn serve_subcommand_with_custom_config() {
        let cli = Cli::parse_from(["tripguard", "serve", "--config", "custom.toml"]);
        assert_eq!(cli.config, "custom.toml");
        assert!(matches!(cli.command, Some(Command::Serve)));
    }

    #[test]
    fn config_subcommand_with_output() {
        let cli = Cli::parse_from(["tripguard", "config", "-o", "my-config.toml"]);
        assert!(matches!(
            cli.command,
            Some(Command::Config { output: Some(ref path) }) if path == "my-config.toml"
        ));
    }

    #[test]
    fn bump_tags_requires_a_tag() {
        assert!(Cli::try_parse_from(["tripguard", "bump-tags"]).is_err());
        let cli = Cli::parse_from(["tripguard", "bump-tags", "places", "weather"]);
        assert!(matches!(
            cli.command,
            Some(Command::BumpTags { ref tags }) if tags == &["places", "weather"]
        ));
    }

    #[test]
    fn template_is_valid_config() {
        let config: crate::config::Config =
            generate_config_template().parse().expect("template should validate");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.retry.max_delay_ms, Some(4000));
    }
}
