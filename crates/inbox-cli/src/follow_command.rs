use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use inbox_follow::{
    live_channel_url, run_follow_session, EmitterConfig, ExecHookConfig, ExecHookFailurePolicy,
    FollowError, FollowFilters, FollowRuntimeConfig, OverflowPolicy, RecordSink,
};
use tokio::sync::watch;

use crate::cli_args::FollowArgs;
use crate::http_api::{HttpConversationApi, DEFAULT_RETRY_BASE_DELAY_MS};
use crate::live_source::LiveChannelSource;

/// Maps parsed flags onto the runtime config; fails before any I/O.
pub(crate) fn build_follow_config(args: &FollowArgs) -> Result<FollowRuntimeConfig, FollowError> {
    if args.pubsub_token.trim().is_empty() {
        return Err(FollowError::Config(
            "pubsub token must not be empty".to_string(),
        ));
    }
    let filters = FollowFilters::from_raw(
        args.inbox_id,
        args.status.as_deref(),
        args.assignee_id,
        args.priority.as_deref(),
        args.contact_id,
        &args.labels,
    )?;

    let mut config = FollowRuntimeConfig::new(args.base_url.trim(), args.account_id);
    config.filters = filters;
    config.message_page_size = args.message_page_size;
    config.emitter = EmitterConfig {
        queue_capacity: args.queue_capacity,
        overflow: if args.drop_on_overflow {
            OverflowPolicy::DropNewest
        } else {
            OverflowPolicy::Block
        },
    };
    config.exec_hook = args.exec.as_ref().map(|command| ExecHookConfig {
        command: command.clone(),
        timeout: Some(Duration::from_millis(args.exec_timeout_ms)),
        failure_policy: if args.exec_fatal {
            ExecHookFailurePolicy::Fatal
        } else {
            ExecHookFailurePolicy::Warn
        },
    });
    config.cursor_path = args.cursor_file.clone();
    config.cursor_flush_interval = Duration::from_millis(args.cursor_flush_interval_ms);
    config.emit_snapshots = !args.no_snapshots;
    config.max_tracked_conversations = args.max_tracked_conversations;
    config.validate()?;
    Ok(config)
}

pub(crate) async fn run_follow_command(args: FollowArgs) -> Result<()> {
    let config = build_follow_config(&args)?;
    let api = HttpConversationApi::new(
        &config.base_url,
        config.account_id,
        &args.api_token,
        args.request_timeout_ms,
        args.request_retry_max_attempts,
        DEFAULT_RETRY_BASE_DELAY_MS,
    )?;
    let live_url = live_channel_url(&config.base_url);
    let mut source = LiveChannelSource::connect(&live_url, &args.pubsub_token, config.account_id).await?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("follow shutdown requested");
            let _ = cancel_tx.send(true);
        }
    });

    let sink = RecordSink::stdout(args.format);
    run_follow_session(config, Arc::new(api), sink, &mut source, cancel_rx).await?;
    Ok(())
}
