//! vislog CLI: companion receiver and recording file tools.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use vislog::codec::{check_frame_len, truncated_frame, STREAM_MAGIC};
use vislog::config::{DEFAULT_HOST, DEFAULT_PORT};
use vislog::sink::FileSink;
use vislog::{read_file, LogSink, StaticView, WireMessage};

#[derive(Parser)]
#[command(
    name = "vislog",
    about = "vislog: receive and inspect multi-modal recordings",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept live recordings over TCP and print one line per message
    Serve {
        /// Host to bind to
        #[arg(long, default_value = DEFAULT_HOST)]
        bind: String,
        /// Port to bind to
        #[arg(long, short, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Also append every received message to this recording file
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// List the messages of a recording file
    Print {
        file: PathBuf,
        /// Show component values
        #[arg(long, short)]
        verbose: bool,
    },
    /// Show the static data of a recording file (last value wins)
    Inspect { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind, port, save } => {
            cmd_serve(bind, port, save).await?;
        }
        Commands::Print { file, verbose } => {
            cmd_print(&file, verbose)?;
        }
        Commands::Inspect { file } => {
            cmd_inspect(&file)?;
        }
    }

    Ok(())
}

// ─── Command implementations ──────────────────────────────────────────────────

async fn cmd_serve(bind: String, port: u16, save: Option<PathBuf>) -> Result<()> {
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    let listener = TcpListener::bind(addr).await?;
    let save_sink = save.as_deref().map(FileSink::new).transpose()?.map(Arc::new);

    println!("vislog viewer listening on {addr}");
    if let Some(path) = &save {
        println!("   Saving to: {}", path.display());
    }

    tokio::select! {
        result = accept_loop(listener, save_sink.clone()) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    if let Some(sink) = save_sink {
        sink.close()?;
    }
    Ok(())
}

async fn accept_loop(listener: TcpListener, save_sink: Option<Arc<FileSink>>) -> Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        info!(%peer, "Recording connected");
        let sink = save_sink.clone();
        tokio::spawn(async move {
            let result = read_stream(socket, |msg| {
                println!("{}", describe(&msg));
                if let Some(sink) = &sink {
                    sink.send(Arc::new(msg))?;
                }
                Ok(())
            })
            .await;
            match result {
                // `spawn` checks the port by connecting and hanging up at once.
                Ok(0) => debug!(%peer, "Connection closed without a recording"),
                Ok(count) => info!(%peer, messages = count, "Recording finished"),
                Err(e) => warn!(%peer, error = %e, "Recording stream aborted"),
            }
        });
    }
}

/// Read one framed stream, handing every decoded message to `on_message`.
/// Returns the number of messages read. A peer that disconnects before the
/// magic or between frames ends the stream cleanly.
async fn read_stream<R, F>(mut reader: R, mut on_message: F) -> Result<usize>
where
    R: AsyncRead + Unpin,
    F: FnMut(WireMessage) -> Result<()>,
{
    let mut magic = [0u8; 8];
    match reader.read_exact(&mut magic).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(0),
        Err(e) => return Err(e.into()),
    }
    if magic != STREAM_MAGIC {
        anyhow::bail!("Not a vislog stream (bad magic)");
    }

    let mut count = 0;
    loop {
        let mut len = [0u8; 8];
        match reader.read_exact(&mut len).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let len = u64::from_le_bytes(len);
        if len == 0 {
            break;
        }
        let len = check_frame_len(len)?;
        let mut payload = Vec::new();
        (&mut reader).take(len as u64).read_to_end(&mut payload).await?;
        if payload.len() < len {
            return Err(truncated_frame(payload.len(), len).into());
        }
        on_message(WireMessage::decode(&payload)?)?;
        count += 1;
    }
    Ok(count)
}

fn cmd_print(file: &Path, verbose: bool) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("Recording not found: {}", file.display());
    }
    let messages = read_file(file)?;
    if messages.is_empty() {
        println!("No messages in '{}'", file.display());
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["#", "Entity", "Static", "Time", "Components"]);

    for (i, msg) in messages.iter().enumerate() {
        let components: Vec<String> = msg
            .batches()
            .iter()
            .map(|batch| {
                if verbose {
                    format!("{} = {}", batch.descriptor(), batch.display_values(8))
                } else {
                    format!("{} ({})", batch.descriptor(), batch.len())
                }
            })
            .collect();
        table.add_row([
            i.to_string(),
            msg.entity_path().to_string(),
            if msg.is_static() { "yes" } else { "no" }.to_string(),
            msg.timepoint().map(|t| t.to_string()).unwrap_or_else(|| "-".to_string()),
            components.join("\n"),
        ]);
    }

    if let Some(first) = messages.first() {
        let identity = first.recording();
        println!(
            "Recording: {} / {}",
            identity.application_id, identity.recording_id
        );
    }
    println!("{}", table);
    println!("{} messages", messages.len());
    Ok(())
}

fn cmd_inspect(file: &Path) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("Recording not found: {}", file.display());
    }
    let view = StaticView::from_file(file)?;
    if view.is_empty() {
        println!("No static data in '{}'", file.display());
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["Entity", "Component", "Type", "Values"]);
    for (path, batch) in view.iter() {
        let descriptor = batch.descriptor();
        table.add_row([
            path.to_string(),
            descriptor.to_string(),
            descriptor.component_type.to_string(),
            batch.display_values(8),
        ]);
    }
    println!("{}", table);
    Ok(())
}

// ─── Utilities ────────────────────────────────────────────────────────────────

/// One-line summary of a received message.
fn describe(msg: &WireMessage) -> String {
    let time = match msg.timepoint() {
        Some(t) if !t.is_empty() => t.to_string(),
        Some(_) => "-".to_string(),
        None => "static".to_string(),
    };
    let components: Vec<String> = msg
        .batches()
        .iter()
        .map(|b| format!("{}[{}]", b.descriptor().component, b.len()))
        .collect();
    format!("{} [{}] {}", msg.entity_path(), time, components.join(" "))
}
