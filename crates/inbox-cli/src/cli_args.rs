use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use inbox_follow::OutputFormat;

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_output_format(value: &str) -> Result<OutputFormat, String> {
    OutputFormat::parse(value)
        .ok_or_else(|| format!("unsupported output format '{value}': expected text or json"))
}

#[derive(Debug, Parser)]
#[command(name = "inbox", about = "Support inbox command-line client", version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub(crate) enum CliCommand {
    /// Stream live conversation activity matching the given filters.
    Follow(FollowArgs),
}

#[derive(Debug, Clone, Args)]
pub(crate) struct FollowArgs {
    #[arg(
        long,
        env = "INBOX_BASE_URL",
        help = "Base URL of the support inbox backend, e.g. https://app.example.com"
    )]
    pub(crate) base_url: String,

    #[arg(
        long,
        env = "INBOX_ACCOUNT_ID",
        value_parser = parse_positive_u64,
        help = "Account id whose conversations are followed"
    )]
    pub(crate) account_id: u64,

    #[arg(
        long,
        env = "INBOX_API_TOKEN",
        hide_env_values = true,
        help = "API access token used for snapshot hydration requests"
    )]
    pub(crate) api_token: String,

    #[arg(
        long,
        env = "INBOX_PUBSUB_TOKEN",
        hide_env_values = true,
        help = "Pubsub token used to subscribe to the live channel"
    )]
    pub(crate) pubsub_token: String,

    #[arg(
        long = "inbox",
        default_value_t = 0,
        help = "Only follow conversations in this inbox id (0 = any)"
    )]
    pub(crate) inbox_id: u64,

    #[arg(long, help = "Only follow conversations with this status: open, resolved, pending, snoozed")]
    pub(crate) status: Option<String>,

    #[arg(
        long = "assignee",
        default_value_t = 0,
        help = "Only follow conversations assigned to this agent id (0 = any)"
    )]
    pub(crate) assignee_id: u64,

    #[arg(long, help = "Only follow conversations with this priority")]
    pub(crate) priority: Option<String>,

    #[arg(
        long = "contact",
        default_value_t = 0,
        help = "Only follow conversations with this contact id (0 = any)"
    )]
    pub(crate) contact_id: u64,

    #[arg(
        long = "label",
        value_delimiter = ',',
        action = ArgAction::Append,
        help = "Required label; repeatable or comma-delimited, all must be present"
    )]
    pub(crate) labels: Vec<String>,

    #[arg(long, help = "Cursor file used to resume from the last processed message id")]
    pub(crate) cursor_file: Option<PathBuf>,

    #[arg(
        long,
        default_value_t = 2_000,
        value_parser = parse_positive_u64,
        help = "Minimum interval between cursor file writes"
    )]
    pub(crate) cursor_flush_interval_ms: u64,

    #[arg(
        long,
        default_value_t = 0,
        help = "Output queue capacity; 0 writes records inline"
    )]
    pub(crate) queue_capacity: usize,

    #[arg(
        long,
        default_value_t = false,
        help = "Drop records instead of blocking when the output queue is full"
    )]
    pub(crate) drop_on_overflow: bool,

    #[arg(long, help = "Shell command run for each emitted record; the record is written to stdin")]
    pub(crate) exec: Option<String>,

    #[arg(
        long,
        default_value_t = 30_000,
        value_parser = parse_positive_u64,
        help = "Timeout for each --exec invocation"
    )]
    pub(crate) exec_timeout_ms: u64,

    #[arg(
        long,
        default_value_t = false,
        help = "Stop following when an --exec invocation fails"
    )]
    pub(crate) exec_fatal: bool,

    #[arg(
        long,
        default_value = "text",
        value_parser = parse_output_format,
        help = "Record format: text or json (one object per line)"
    )]
    pub(crate) format: OutputFormat,

    #[arg(
        long,
        default_value_t = 20,
        value_parser = parse_positive_usize,
        help = "Page size requested when hydrating message history"
    )]
    pub(crate) message_page_size: usize,

    #[arg(
        long,
        default_value_t = false,
        help = "Do not emit snapshot records when a conversation is first seen"
    )]
    pub(crate) no_snapshots: bool,

    #[arg(
        long,
        value_parser = parse_positive_usize,
        help = "Bound on cached conversations; least recently referenced are evicted"
    )]
    pub(crate) max_tracked_conversations: Option<usize>,

    #[arg(
        long,
        default_value_t = 10_000,
        value_parser = parse_positive_u64,
        help = "Timeout for each hydration HTTP request"
    )]
    pub(crate) request_timeout_ms: u64,

    #[arg(
        long,
        default_value_t = 3,
        value_parser = parse_positive_usize,
        help = "Attempts per hydration request before giving up"
    )]
    pub(crate) request_retry_max_attempts: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_follow(extra: &[&str]) -> Result<FollowArgs, clap::Error> {
        let mut argv = vec![
            "inbox",
            "follow",
            "--base-url",
            "https://app.example.com",
            "--account-id",
            "3",
            "--api-token",
            "api-secret",
            "--pubsub-token",
            "pubsub-secret",
        ];
        argv.extend_from_slice(extra);
        let cli = Cli::try_parse_from(argv)?;
        let CliCommand::Follow(args) = cli.command;
        Ok(args)
    }

    #[test]
    fn unit_follow_defaults_are_wildcards_with_inline_text_output() {
        let args = parse_follow(&[]).expect("parse");
        assert_eq!(args.account_id, 3);
        assert_eq!(args.inbox_id, 0);
        assert!(args.status.is_none());
        assert!(args.labels.is_empty());
        assert_eq!(args.queue_capacity, 0);
        assert_eq!(args.format, OutputFormat::Text);
        assert_eq!(args.message_page_size, 20);
        assert_eq!(args.exec_timeout_ms, 30_000);
        assert_eq!(args.cursor_flush_interval_ms, 2_000);
        assert!(!args.no_snapshots);
    }

    #[test]
    fn functional_label_flag_accepts_repeats_and_comma_lists() {
        let args = parse_follow(&["--label", "vip,billing", "--label", "urgent"]).expect("parse");
        assert_eq!(args.labels, vec!["vip", "billing", "urgent"]);
    }

    #[test]
    fn functional_format_flag_accepts_json_aliases() {
        let args = parse_follow(&["--format", "jsonl"]).expect("parse");
        assert_eq!(args.format, OutputFormat::Json);
        assert!(parse_follow(&["--format", "yaml"]).is_err());
    }

    #[test]
    fn regression_zero_account_and_page_size_are_rejected() {
        assert!(parse_follow(&["--message-page-size", "0"]).is_err());
        let error = Cli::try_parse_from([
            "inbox",
            "follow",
            "--base-url",
            "https://app.example.com",
            "--account-id",
            "0",
            "--api-token",
            "t",
            "--pubsub-token",
            "p",
        ])
        .expect_err("zero account id");
        assert!(error.to_string().contains("greater than 0"));
    }
}
