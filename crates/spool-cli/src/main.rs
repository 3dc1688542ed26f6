use clap::Parser;
use serde_json::{Map, Value};
use spool_client::{Endpoint, PollPolicy, QueueClient};
use spool_engine::MockRuntime;
use spool_worker::WorkerConfig;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// spool: queue-based text generation, client and local emulator.
#[derive(Parser)]
#[command(name = "spool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Submit a prompt to a queue endpoint and print the output.
    Run(RunArgs),

    /// Run the local queue emulator with a scripted model.
    Serve {
        /// Address to listen on.
        #[arg(short, long, default_value = "127.0.0.1:8000")]
        addr: SocketAddr,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Input prompt text.
    #[arg(short, long)]
    prompt: String,

    /// Queue endpoint base URL. Falls back to SPOOL_ENDPOINT.
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Print tokens as they arrive instead of waiting for completion.
    #[arg(short, long)]
    stream: bool,

    /// Maximum number of tokens to generate.
    #[arg(long)]
    max_new_tokens: Option<u32>,

    /// Sampling temperature.
    #[arg(short, long)]
    temperature: Option<f32>,

    /// Top-k sampling cutoff.
    #[arg(long)]
    top_k: Option<u32>,

    /// Top-p (nucleus) sampling cutoff.
    #[arg(long)]
    top_p: Option<f32>,

    /// Stop generation when this string appears (repeatable).
    #[arg(long = "stop")]
    stop: Vec<String>,

    /// Give up and cancel the job after this many seconds.
    #[arg(long)]
    deadline: Option<u64>,
}

impl RunArgs {
    /// Flat override map for submission: only the flags that were given.
    fn overrides(&self) -> Map<String, Value> {
        let mut overrides = Map::new();
        if let Some(max) = self.max_new_tokens {
            overrides.insert("max_new_tokens".to_string(), max.into());
        }
        if let Some(temperature) = self.temperature {
            overrides.insert("temperature".to_string(), Value::from(temperature));
        }
        if let Some(top_k) = self.top_k {
            overrides.insert("top_k".to_string(), top_k.into());
        }
        if let Some(top_p) = self.top_p {
            overrides.insert("top_p".to_string(), Value::from(top_p));
        }
        if !self.stop.is_empty() {
            overrides.insert("stop_strings".to_string(), self.stop.clone().into());
        }
        overrides
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    let outcome = match cli.command {
        Command::Run(args) => run(args).await,
        Command::Serve { addr } => serve(addr).await,
    };
    if let Err(err) = outcome {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
}

async fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let endpoint = match &args.endpoint {
        Some(base) => {
            let mut endpoint = Endpoint::new(base.clone());
            if let Ok(key) = std::env::var("SPOOL_API_KEY") {
                endpoint = endpoint.with_api_key(key);
            }
            endpoint
        }
        None => Endpoint::from_env()
            .ok_or("no endpoint given: pass --endpoint or set SPOOL_ENDPOINT")?,
    };

    let mut policy = PollPolicy::default();
    if let Some(secs) = args.deadline {
        policy.deadline = Some(Duration::from_secs(secs));
    }
    let client = QueueClient::new(endpoint).with_policy(policy);
    let overrides = args.overrides();

    if args.stream {
        let mut stream = client.open(&args.prompt, &overrides).await?;
        let mut stdout = std::io::stdout();
        while let Some(delta) = stream.next_delta().await? {
            write!(stdout, "{}", delta.text)?;
            stdout.flush()?;
        }
        writeln!(stdout)?;
    } else {
        let text = client.run(&args.prompt, &overrides).await?;
        println!("{text}");
    }
    Ok(())
}

async fn serve(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let config = WorkerConfig::from_env()?;
    let runtime = Arc::new(demo_runtime());
    spool_server::run_server(addr, config, runtime).await?;
    Ok(())
}

/// A scripted runtime so the emulator produces believable streams without
/// loading a model.
fn demo_runtime() -> MockRuntime {
    MockRuntime::new()
        .script(&[
            "▁It", "▁was", "▁a", "▁bright", "▁cold", "▁day", "▁in", "▁April", ".",
        ])
        .looping()
        .with_token_delay(Duration::from_millis(40))
}
