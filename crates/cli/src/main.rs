mod config;
mod error;
mod interrupt;

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use runtime::{Agent, AnthropicBackend, Arguments, ToolRegistry, ToolTransport};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use error::{Error, Result};
use interrupt::Interrupt;

const SYSTEM_PROMPT: &str = "You are a helpful assistant. Use the available tools when they help \
                             answer the question. Be concise and direct.";
const CONFIG_FILE: &str = "capstan.toml";

#[derive(Parser)]
#[command(name = "capstan")]
#[command(about = "Chat with a model that can call tools", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file [default: capstan.toml if present]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session
    Chat,
    /// List the tools the tool server offers
    Tools,
    /// Invoke one tool directly
    Call {
        /// Tool name
        tool: String,
        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        arguments: String,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_logging(&config.log.level)?;

    match cli.command {
        Some(Commands::Chat) | None => cmd_chat(&config).await,
        Some(Commands::Tools) => cmd_tools(&config).await,
        Some(Commands::Call { tool, arguments }) => cmd_call(&config, &tool, &arguments).await,
    }
}

/// An explicit path must exist; the default file is optional.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load(path)?,
        None if Path::new(CONFIG_FILE).exists() => Config::load(CONFIG_FILE)?,
        None => Config::default(),
    };
    let config = config.with_env()?;
    config.validate()?;
    Ok(config)
}

/// `RUST_LOG` wins over the configured level. Logs go to stderr.
fn init_logging(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|e| Error::Logging(e.to_string()))?,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
    Ok(())
}

async fn connect_tools(config: &Config) -> Result<(Arc<dyn ToolTransport>, ToolRegistry)> {
    let transport = runtime::connect(&config.transport_config())?;
    match ToolRegistry::from_transport(transport.clone()).await {
        Ok(registry) => Ok((transport, registry)),
        Err(e) => {
            let _ = transport.shutdown().await;
            Err(e.into())
        }
    }
}

async fn cmd_chat(config: &Config) -> Result<()> {
    println!("capstan v{}", env!("CARGO_PKG_VERSION"));

    let endpoint = config.endpoint()?;
    let model = &config.model;
    println!("Model: {} ({endpoint})", model.model);

    let backend = AnthropicBackend::builder(endpoint, &model.model)
        .max_tokens(model.max_tokens)
        .system(model.system.as_deref().unwrap_or(SYSTEM_PROMPT))
        .build();

    let (transport, registry) = connect_tools(config).await?;
    let names: Vec<_> = registry.list().iter().map(|d| d.name.as_str()).collect();
    println!("Tools ({}): {}", transport.kind(), names.join(", "));
    println!("Type 'quit' or Ctrl+D to exit, 'reset' to clear history.");
    println!("Ctrl+C interrupts a request, or exits at the prompt.\n");

    let mut agent = Agent::new(backend, Arc::new(registry), config.agent_config())?;
    info!(conversation = %agent.conversation().id(), "chat started");

    let result = repl(&mut agent).await;

    debug!(usage = ?agent.usage(), "chat finished");
    if let Err(e) = transport.shutdown().await {
        debug!(error = %e, "tool transport shutdown failed");
    }
    result?;
    println!("\nGoodbye.");
    Ok(())
}

async fn repl(agent: &mut Agent<AnthropicBackend>) -> Result<()> {
    let interrupt = Interrupt::install();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            // EOF
            break;
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        match input.to_lowercase().as_str() {
            "quit" | "exit" => break,
            "reset" => {
                agent.reset();
                println!("Conversation reset.\n");
                continue;
            }
            _ => {}
        }

        let cancel = interrupt.begin();
        let outcome = agent.chat_with_cancel(input, &cancel).await;
        interrupt.end();

        match outcome {
            Ok(response) => println!("\n{response}\n"),
            Err(e) => eprintln!("Error: {e}\n"),
        }
    }
    Ok(())
}

async fn cmd_tools(config: &Config) -> Result<()> {
    let (transport, registry) = connect_tools(config).await?;

    if registry.is_empty() {
        println!("No tools offered.");
    }
    for definition in registry.list() {
        println!("{:<20}  {}", definition.name, definition.description);
    }

    transport.shutdown().await?;
    Ok(())
}

async fn cmd_call(config: &Config, tool: &str, arguments: &str) -> Result<()> {
    let arguments: Arguments =
        serde_json::from_str(arguments).map_err(|e| Error::InvalidArguments(e.to_string()))?;

    let (transport, registry) = connect_tools(config).await?;
    let result = registry.execute(tool, arguments).await;
    transport.shutdown().await?;

    let result = result?;
    if result.is_error {
        return Err(Error::ToolFailed(result.output_text()));
    }
    println!("{:#}", result.output);
    Ok(())
}
