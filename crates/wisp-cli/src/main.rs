//! wisp - chat with a browser-hosted assistant from the command line

mod config;

use clap::Parser;
use futures::{StreamExt, pin_mut};
use std::io::Write;
use std::path::PathBuf;
use wisp_capture::CaptureError;
use wisp_client::{ChatClient, ChatRequest, Error as ClientError};

/// wisp - drive a hosted chat assistant through Chrome remote debugging
#[derive(Parser, Debug)]
#[command(name = "wisp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Message to send
    #[arg(short, long, required_unless_present = "init_config")]
    message: Option<String>,

    /// Chrome remote-debugging port
    #[arg(short, long)]
    port: Option<u16>,

    /// Start a fresh conversation before sending
    #[arg(long)]
    new_chat: bool,

    /// Enable Think mode
    #[arg(long)]
    think: bool,

    /// Enable DeepSearch mode
    #[arg(long)]
    deep_search: bool,

    /// Files to attach
    #[arg(short, long)]
    files: Vec<PathBuf>,

    /// Print reply text incrementally as it arrives
    #[arg(short, long)]
    stream: bool,

    /// Total seconds to wait for the reply (overrides max_polls)
    #[arg(short, long)]
    timeout_secs: Option<f64>,

    /// Save captured raw responses as JSON into the debug directory
    #[arg(long)]
    save_responses: bool,

    /// Export the reply text into the debug directory
    #[arg(long)]
    export_content: bool,

    /// Dump a screenshot and page HTML when the reply fails
    #[arg(long)]
    debug: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing
    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("wisp=debug,wisp_capture=debug,wisp_browser=debug,wisp_client=debug")
            .init();
    }

    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let cfg = config::Config::load();
    let mut capture = cfg.capture_config();
    if let Some(secs) = args.timeout_secs {
        // Keep the poll cadence, stretch or shrink the budget
        let interval = capture.poll_interval.as_secs_f64().max(0.1);
        let polls = (secs / interval).ceil().max(1.0) as u32;
        capture = capture.with_max_polls(polls);
    }
    let debug_dir = capture.debug_dir.clone();
    let port = args.port.or(cfg.port).unwrap_or(9222);

    let client = match ChatClient::connect(port, capture).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Error connecting to Chrome on port {}: {}", port, e);
            eprintln!("Start Chrome with: google-chrome --remote-debugging-port={}", port);
            std::process::exit(1);
        }
    };

    let request = ChatRequest {
        message: args.message.unwrap_or_default(),
        new_chat: args.new_chat,
        think_mode: args.think,
        deep_search: args.deep_search,
        files: args.files.clone(),
    };

    let result = if args.stream {
        run_stream(&client, request).await
    } else {
        run_chat(&client, request, args.verbose).await
    };

    if let Err(e) = &result {
        if args.debug {
            dump_page_state(&client, &debug_dir).await;
        }
        match e {
            ClientError::Capture(CaptureError::ResponseTimeout { waited_secs }) => {
                eprintln!(
                    "No complete reply after {:.1}s; the page may have changed or the \
                     assistant is still thinking",
                    waited_secs
                );
            }
            other => eprintln!("Error: {}", other),
        }
        std::process::exit(1);
    }

    if args.save_responses {
        match client.tracker().lock().save_responses(None) {
            Ok(Some(path)) => println!("Saved responses: {}", path.display()),
            Ok(None) => eprintln!("No captured responses to save"),
            Err(e) => eprintln!("Error saving responses: {}", e),
        }
    }
    if args.export_content {
        match client.tracker().lock().export_response_content(None) {
            Ok(Some(path)) => println!("Exported reply: {}", path.display()),
            Ok(None) => eprintln!("No reply text to export"),
            Err(e) => eprintln!("Error exporting reply: {}", e),
        }
    }

    Ok(())
}

async fn run_chat(
    client: &ChatClient,
    request: ChatRequest,
    verbose: bool,
) -> wisp_client::Result<()> {
    let reply = client.chat(&request).await?;
    println!("{}", reply.content);
    if verbose {
        if let Some(id) = &reply.conversation_id {
            tracing::info!(
                conversation_id = %id,
                response_id = ?reply.response_id,
                tokens = ?reply.token_count,
                "reply received"
            );
        }
    }
    Ok(())
}

async fn run_stream(client: &ChatClient, request: ChatRequest) -> wisp_client::Result<()> {
    let stream = client.chat_stream(request);
    pin_mut!(stream);

    let mut stdout = std::io::stdout();
    while let Some(delta) = stream.next().await {
        let delta = delta?;
        if !delta.delta.is_empty() {
            print!("{}", delta.delta);
            let _ = stdout.flush();
        }
        if delta.is_complete {
            println!();
            break;
        }
    }
    Ok(())
}

/// Best-effort page dumps; failures only warn.
async fn dump_page_state(client: &ChatClient, debug_dir: &std::path::Path) {
    let page = client.session().page();
    match wisp_browser::save_screenshot(page, debug_dir).await {
        Ok(path) => eprintln!("Saved screenshot: {}", path.display()),
        Err(e) => eprintln!("Warning: screenshot failed: {}", e),
    }
    match wisp_browser::save_html(page, debug_dir).await {
        Ok(path) => eprintln!("Saved page HTML: {}", path.display()),
        Err(e) => eprintln!("Warning: HTML dump failed: {}", e),
    }
}
