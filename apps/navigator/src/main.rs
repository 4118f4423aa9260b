use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    BackendGateway, HttpBackendGateway, Sender, WorkflowError, WorkflowSession,
};
use navigation::HighlightSummary;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod demo;

use demo::DemoGateway;

#[derive(Parser, Debug)]
#[command(name = "navigator", about = "Chat with the hospital triage assistant from a terminal")]
struct Args {
    /// TOML config file; defaults to ./navigator.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    api_base_url: Option<String>,
    /// Ask the backend to use its local model instead of the hosted one.
    #[arg(long)]
    offline_model: bool,
    /// Answer from canned responses; no backend needed.
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = config::load_settings(args.config.as_deref(), |key| std::env::var(key).ok())?;
    if let Some(url) = &args.api_base_url {
        settings.api_base_url = config::normalize_api_base_url(url)?;
    }
    if args.offline_model {
        settings.online_model = false;
    }

    let filter = EnvFilter::try_new(&settings.log_filter)
        .with_context(|| format!("invalid log filter '{}'", settings.log_filter))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let gateway: Arc<dyn BackendGateway> = if args.demo {
        info!("using demo gateway");
        Arc::new(DemoGateway::new(Duration::from_millis(300)))
    } else {
        info!(
            api_base_url = %settings.api_base_url,
            online_model = settings.online_model,
            "using triage backend"
        );
        Arc::new(
            HttpBackendGateway::with_timeout(
                settings.api_base_url.as_str(),
                Duration::from_secs(settings.request_timeout_seconds),
            )?
            .with_online_model(settings.online_model),
        )
    };

    let session = WorkflowSession::new(gateway);
    begin_conversation(&session).await;
    let mut printed = print_new_messages(&session, 0).await;
    println!("(/reset 重新开始, /map 查看地图, /state 查看状态, /quit 退出)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                begin_conversation(&session).await;
                printed = 0;
            }
            "/state" => print_state(&session).await,
            "/map" => toggle_map(&session).await,
            _ => match session.process_user_input(&line).await {
                Ok(state) => {
                    info!(%state, "input processed");
                    if state.is_terminal() {
                        printed = print_new_messages(&session, printed).await;
                        println!("(输入 /reset 重新开始)");
                    }
                }
                Err(WorkflowError::Busy) => println!("(仍在处理上一条消息，请稍候)"),
                Err(e) => warn!(error = %e, "input failed"),
            },
        }
        printed = print_new_messages(&session, printed).await;
    }

    Ok(())
}

/// Restarts the workflow and reloads the map, which a reset discards.
async fn begin_conversation(session: &WorkflowSession) {
    session.start_workflow().await;
    if let Err(e) = session.load_map().await {
        warn!(error = %e, "hospital map unavailable; routes will not be highlighted");
    }
}

async fn print_new_messages(session: &WorkflowSession, printed: usize) -> usize {
    let messages = session.messages().await;
    for message in messages.iter().skip(printed) {
        let who = match message.sender {
            Sender::Assistant if message.is_error => "助手(错误)",
            Sender::Assistant => "助手",
            Sender::User => "你",
        };
        // The user's own line is already on screen.
        if message.sender != Sender::User {
            println!("[{who}] {}", message.text);
        }
    }
    messages.len()
}

async fn print_state(session: &WorkflowSession) {
    let snapshot = session.snapshot().await;
    println!("session: {}", snapshot.session_id);
    println!("state: {} (previous: {})", snapshot.state, snapshot.previous_state);
    if let Some(error) = &snapshot.error_message {
        println!("error: {error}");
    }
    if let Some(clinic) = &snapshot.data.clinic_id {
        println!("clinic: {clinic}");
    }
    if snapshot.data.has_requirements() {
        match serde_json::to_string(&snapshot.data.requirements) {
            Ok(requirements) => println!("requirements: {requirements}"),
            Err(e) => warn!(error = %e, "failed to encode requirements"),
        }
    }
    if snapshot.data.has_modified_route() {
        println!("route:\n{}", snapshot.data.formatted_modified_route());
    } else if snapshot.data.has_original_route() {
        println!("route:\n{}", snapshot.data.formatted_original_route());
    }
    println!("map loaded: {}", snapshot.data.has_map_data());
}

async fn toggle_map(session: &WorkflowSession) {
    let snapshot = session.snapshot().await;
    let Some(highlighted) = &snapshot.data.highlighted_map else {
        println!("(还没有可显示的路线地图)");
        return;
    };

    if snapshot.show_map_overlay {
        session.hide_map().await;
        println!("(地图已隐藏)");
        return;
    }

    session.show_map().await;
    let summary = HighlightSummary::of(highlighted);
    println!(
        "地图: {}/{} 个地点, {}/{} 条路段在路线上",
        summary.highlighted_nodes.len(),
        summary.total_nodes,
        summary.highlighted_edges.len(),
        summary.total_edges
    );
    let stops: Vec<&str> = highlighted
        .nodes
        .iter()
        .filter(|n| n.highlight)
        .map(|n| n.node.name().unwrap_or(n.node.id.as_str()))
        .collect();
    if !stops.is_empty() {
        println!("  经过: {}", stops.join(", "));
    }
    for (source, target) in &summary.highlighted_edges {
        println!("  {source} - {target}");
    }
}
