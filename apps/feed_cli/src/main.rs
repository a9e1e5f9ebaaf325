use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use feed_core::{
    BroadcastObserver, FeedController, FeedEvent, FeedTrigger, HttpPageFetcher, SystemClock,
};
use shared::domain::AuthToken;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod render;

use render::FeedPrinter;

#[derive(Parser, Debug)]
#[command(about = "Page through a post feed from the terminal")]
struct Args {
    /// Settings file; defaults to ./feed.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    token: Option<String>,
    #[arg(long)]
    page_size: Option<u32>,
    /// Keep loading pages until the feed is exhausted, then exit.
    #[arg(long)]
    scroll_all: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Trigger(UserTrigger),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UserTrigger {
    ScrollNearEnd,
    PullToRefresh,
    ReloadTap,
}

impl From<UserTrigger> for FeedTrigger {
    fn from(value: UserTrigger) -> Self {
        match value {
            UserTrigger::ScrollNearEnd => FeedTrigger::ScrollNearEnd,
            UserTrigger::PullToRefresh => FeedTrigger::PullToRefresh,
            UserTrigger::ReloadTap => FeedTrigger::ReloadTap,
        }
    }
}

fn parse_command(line: &str) -> Option<Command> {
    match line.trim().to_ascii_lowercase().as_str() {
        "" | "m" | "more" => Some(Command::Trigger(UserTrigger::ScrollNearEnd)),
        "r" | "refresh" => Some(Command::Trigger(UserTrigger::PullToRefresh)),
        "reload" => Some(Command::Trigger(UserTrigger::ReloadTap)),
        "s" | "status" => Some(Command::Status),
        "h" | "help" | "?" => Some(Command::Help),
        "q" | "quit" | "exit" => Some(Command::Quit),
        _ => None,
    }
}

const HELP: &str = "commands: [enter]/more, refresh, reload, status, help, quit";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = config::load_settings(args.config.as_deref())?;
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    if let Some(token) = args.token {
        settings.auth_token = Some(token);
    }
    if args.page_size.is_some() {
        settings.page_size = args.page_size;
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&settings.log_filter))
        .with_writer(std::io::stderr)
        .init();

    let fetcher = HttpPageFetcher::with_options(
        &settings.server_url,
        settings.page_size,
        settings.request_timeout,
    )
    .context("failed to configure feed client")?;
    let observer = Arc::new(BroadcastObserver::new(256));
    let mut events = observer.subscribe();
    let controller = Arc::new(FeedController::new_with_dependencies(
        Arc::new(fetcher),
        observer,
        Arc::new(SystemClock),
        settings.exhaustion_rule,
    ));

    let printer = tokio::spawn(async move {
        let mut printer = FeedPrinter::default();
        loop {
            let lines = match events.recv().await {
                Ok(FeedEvent::Snapshot(snapshot)) => printer.update(&snapshot),
                Ok(FeedEvent::ScrollToTop) => printer.scroll_to_top(),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "renderer fell behind; some feed updates were skipped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            for line in lines {
                println!("{line}");
            }
        }
    });

    let token = settings.auth_token.and_then(AuthToken::new);
    if token.is_none() {
        warn!("no auth token configured; the feed stays idle");
    }
    info!(server_url = %settings.server_url, "mounting feed");
    controller.handle(FeedTrigger::Mount(token)).await;

    if args.scroll_all {
        while !controller.state().await.is_exhausted() {
            let before = controller.state().await.cursor_page();
            controller.handle(FeedTrigger::ScrollNearEnd).await;
            let after = controller.state().await;
            if after.cursor_page() == before {
                // Nothing moved: no session, or the page failed.
                break;
            }
        }
    } else {
        println!("{HELP}");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            match parse_command(&line) {
                Some(Command::Trigger(trigger)) => controller.handle(trigger.into()).await,
                Some(Command::Status) => {
                    let state = controller.state().await;
                    println!(
                        "posts={} next_page={} exhausted={} loading={}",
                        state.posts().len(),
                        state.cursor_page(),
                        state.is_exhausted(),
                        state.is_loading()
                    );
                }
                Some(Command::Help) => println!("{HELP}"),
                Some(Command::Quit) => break,
                None => println!("unknown command '{}'; {HELP}", line.trim()),
            }
        }
    }

    drop(controller);
    let _ = printer.await;
    Ok(())
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
