//! bspmirror CLI
//!
//! Inspect and follow a bspwm-style window manager through its socket.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bspmirror::{CommandChannel, DesktopRef, Mirror, MirrorView, MonitorRef, NodeKind, NodeRef};

#[derive(Parser, Debug)]
#[command(name = "bspmirror")]
#[command(about = "State mirror for bspwm-style window managers")]
#[command(version)]
struct Cli {
    /// Socket path (overrides BSPWM_SOCKET and DISPLAY discovery)
    #[arg(short, long)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the current tree once
    Tree {
        /// Emit the tree as JSON instead of indented text
        #[arg(long)]
        json: bool,
    },

    /// Follow the tree, reprinting it after every change
    Watch,

    /// Send a raw command and print the response
    Send {
        /// Command words, joined on the wire as sent
        #[arg(required = true, trailing_var_arg = true)]
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let socket = match cli.socket {
        Some(path) => path,
        None => bspmirror::socket_path().context("cannot locate the window manager socket")?,
    };

    match cli.command {
        Commands::Tree { json } => cmd_tree(&socket, json).await,
        Commands::Watch => cmd_watch(&socket).await,
        Commands::Send { args } => cmd_send(&socket, &args).await,
    }
}

async fn cmd_tree(socket: &PathBuf, json: bool) -> Result<()> {
    let mirror = Mirror::start(socket)
        .await
        .with_context(|| format!("cannot mirror {}", socket.display()))?;
    let view = mirror.view();

    if json {
        println!("{}", serde_json::to_string_pretty(&view.snapshot())?);
    } else {
        print_tree(&view);
    }
    Ok(())
}

async fn cmd_watch(socket: &PathBuf) -> Result<()> {
    let mut mirror = Mirror::start(socket)
        .await
        .with_context(|| format!("cannot mirror {}", socket.display()))?;
    let view = mirror.view();

    print_tree(&view);
    let mut last = view.snapshot();

    let driver = tokio::spawn(async move { mirror.run().await });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                view.close();
                break;
            }
            // Coarse poll; only actual changes are printed.
            _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => {
                if !view.is_live() {
                    tracing::warn!("mirror went stale, stopping");
                    break;
                }
                let current = view.snapshot();
                if current != last {
                    print_tree(&view);
                    last = current;
                }
            }
        }
    }

    driver.await?.map_err(Into::into)
}

async fn cmd_send(socket: &PathBuf, args: &[String]) -> Result<()> {
    let mut channel = CommandChannel::connect(socket)
        .await
        .with_context(|| format!("cannot connect to {}", socket.display()))?;

    let words: Vec<&str> = args.iter().map(String::as_str).collect();
    let response = channel.request(&words).await?;
    let text = String::from_utf8_lossy(&response);
    if !text.is_empty() {
        println!("{text}");
    }
    Ok(())
}

fn print_tree(view: &MirrorView) {
    for monitor in view.monitors() {
        print_monitor(&monitor);
    }
}

fn print_monitor(monitor: &MonitorRef) {
    let Some(record) = monitor.get() else { return };
    let marker = if record.focused { "*" } else { " " };
    println!("{marker} {} {} {}", record.id, record.name, record.geometry);
    for desktop in monitor.desktops() {
        print_desktop(&desktop);
    }
}

fn print_desktop(desktop: &DesktopRef) {
    let Some(record) = desktop.get() else { return };
    let marker = if record.focused { "*" } else { " " };
    let layout = match record.layout {
        bspmirror::DesktopLayout::Tiled => "tiled",
        bspmirror::DesktopLayout::Monocle => "monocle",
    };
    println!("  {marker} {} {} [{layout}]", record.id, record.name);
    if let Some(root) = desktop.root() {
        print_node(&root, 2);
    }
}

fn print_node(node: &NodeRef, depth: usize) {
    let Some(record) = node.get() else { return };
    let marker = if record.focused { "*" } else { " " };
    let indent = "  ".repeat(depth);
    match record.kind {
        NodeKind::Leaf => {
            println!(
                "{indent}{marker} {} {} {:?}{}",
                record.id,
                record.geometry,
                record.state,
                if record.hidden { " hidden" } else { "" },
            );
        }
        NodeKind::Split { .. } => {
            println!("{indent}{marker} {} split", record.id);
            for child in node.children() {
                print_node(&child, depth + 1);
            }
        }
    }
}
