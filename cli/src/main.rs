use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use exchange::{
    Client, ClientConfig, ConfigError, DEFAULT_ADDRESS, DEFAULT_PORT, RpcError, StreamItem,
};
use futures_util::StreamExt;
use serde_json::{Value, json};
use tracing::{Level, info, warn};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("{method} failed: {source}")]
    Rpc {
        method: &'static str,
        source: RpcError,
    },
    #[error("request failed: {0}")]
    Request(#[from] RpcError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("missing expected field `{0}`")]
    MissingField(&'static str),
    #[error("server has no models; pass --model-id or --provider-config")]
    NoModel,
}

#[derive(Parser, Debug)]
#[command(
    name = "exchange-cli",
    about = "Drive an RPC server over one multiplexed websocket",
    after_help = "Unset endpoint flags fall back to TUI_URL, TUI_ADDRESS, TUI_PORT and TUI_TIMEOUT_MS."
)]
struct Cli {
    #[command(flatten)]
    endpoint: Endpoint,

    /// Log verbosity on stderr (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

/// Flags that override the `TUI_*` environment config.
#[derive(Args, Debug, Default)]
struct Endpoint {
    /// Full server URL; overrides --address and --port.
    #[arg(long)]
    url: Option<String>,

    /// Server address; replaces the environment endpoint together with --port.
    #[arg(long)]
    address: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Default per-exchange timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Unary call; prints the result.
    Call(CallArgs),
    /// Streaming call; prints each chunk as it arrives, then the end value.
    Stream(StreamArgs),
    /// Fire-and-forget request.
    Notify(NotifyArgs),
    /// Interactive chat: one `chatCompletion` stream per stdin line.
    ///
    /// Needs an existing model, or --provider-config to create one.
    Chat(ChatArgs),
}

#[derive(Args, Debug)]
struct CallArgs {
    method: String,

    #[arg(long, default_value = "{}")]
    params: String,

    /// Overrides the default timeout for this call.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[derive(Args, Debug)]
struct StreamArgs {
    method: String,

    #[arg(long, default_value = "{}")]
    params: String,

    /// Idle timeout between chunks; defaults to the global timeout.
    #[arg(long)]
    idle_timeout_ms: Option<u64>,
}

#[derive(Args, Debug)]
struct NotifyArgs {
    method: String,

    #[arg(long, default_value = "{}")]
    params: String,
}

#[derive(Args, Debug)]
struct ChatArgs {
    /// Model to chat with; defaults to the first entry of `getModelList`.
    #[arg(long)]
    model_id: Option<String>,

    /// JSON provider parameters used to create a model with `newModel` when
    /// the server has none.
    #[arg(long)]
    provider_config: Option<PathBuf>,

    #[arg(long, default_value = "AzureOpenAI")]
    provider_name: String,

    /// Existing chat to continue; a new chat is created when absent.
    #[arg(long)]
    chat_id: Option<String>,

    /// Message to continue from.
    #[arg(long)]
    parent: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = client_config(ClientConfig::from_env()?, &cli.endpoint)?;
    let client = Client::new(config).on_close(|reason| warn!(%reason, "connection lost"));
    client.connect().await?;

    let outcome = match cli.command {
        Command::Call(args) => run_call(&client, args).await,
        Command::Stream(args) => run_stream(&client, args).await,
        Command::Notify(args) => run_notify(&client, args).await,
        Command::Chat(args) => run_chat(&client, args).await,
    };

    client.close().await;
    outcome
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();
}

/// Apply command-line overrides to the environment config.
fn client_config(base: ClientConfig, endpoint: &Endpoint) -> Result<ClientConfig, CliError> {
    let timeout = endpoint
        .timeout_ms
        .map_or(base.default_timeout, Duration::from_millis);
    let config = match (&endpoint.url, &endpoint.address, endpoint.port) {
        (Some(url), _, _) => ClientConfig::from_url(url)?,
        (None, None, None) => base,
        (None, address, port) => ClientConfig::new(
            address.as_deref().unwrap_or(DEFAULT_ADDRESS),
            port.unwrap_or(DEFAULT_PORT),
        ),
    };
    Ok(config.with_default_timeout(timeout))
}

async fn run_call(client: &Client, args: CallArgs) -> Result<(), CliError> {
    let params = parse_params(&args.params)?;
    let result = match args.timeout_ms {
        Some(ms) => {
            client
                .call(&args.method, params, Duration::from_millis(ms))
                .await?
        }
        None => client.call_default(&args.method, params).await?,
    };
    print_json(&result)
}

async fn run_stream(client: &Client, args: StreamArgs) -> Result<(), CliError> {
    let params = parse_params(&args.params)?;
    let mut stream = match args.idle_timeout_ms {
        Some(ms) => {
            client
                .call_stream(&args.method, params, Duration::from_millis(ms))
                .await?
        }
        None => client.call_stream_default(&args.method, params).await?,
    };
    info!(id = stream.id(), method = %args.method, "stream opened");

    while let Some(item) = stream.next().await {
        match item? {
            StreamItem::Chunk(chunk) => print_chunk(&chunk)?,
            StreamItem::End(end) => {
                println!();
                print_json(&end)?;
            }
        }
    }
    Ok(())
}

async fn run_notify(client: &Client, args: NotifyArgs) -> Result<(), CliError> {
    let params = parse_params(&args.params)?;
    let id = client.send_request(&args.method, params).await?;
    info!(id, method = %args.method, "notification sent");
    Ok(())
}

async fn run_chat(client: &Client, args: ChatArgs) -> Result<(), CliError> {
    let model_id = match args.model_id {
        Some(id) => id,
        None => resolve_model(client, &args.provider_name, args.provider_config.as_deref()).await?,
    };

    let chats = client
        .call_default("getChatList", json!({ "start": 0, "quantity": 50 }))
        .await
        .map_err(|source| CliError::Rpc {
            method: "getChatList",
            source,
        })?;
    info!(chats = chats.as_array().map_or(0, Vec::len), "existing chats");
    let chat_id = match args.chat_id {
        Some(id) => id,
        None => {
            let chat = client
                .call_default("newChat", json!({}))
                .await
                .map_err(|source| CliError::Rpc {
                    method: "newChat",
                    source,
                })?;
            record_id(&chat).ok_or(CliError::MissingField("id"))?
        }
    };
    eprintln!("chat {chat_id} with model {model_id}; one message per line, EOF to quit");

    let mut parent = args.parent;
    for line in io::stdin().lock().lines() {
        let line = line?;
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        let params = completion_params(&chat_id, &model_id, parent.as_deref(), text);
        let mut stream = client
            .call_stream_default("chatCompletion", params)
            .await
            .map_err(|source| CliError::Rpc {
                method: "chatCompletion",
                source,
            })?;

        loop {
            match stream.next_item().await {
                Ok(StreamItem::Chunk(chunk)) => print_chunk(&chunk)?,
                Ok(StreamItem::End(end)) => {
                    println!();
                    if let Some(id) = assistant_message_id(&end) {
                        parent = Some(id);
                    }
                    break;
                }
                // A failed completion leaves the chat usable for the next line.
                Err(e) => {
                    println!();
                    warn!(code = e.code(), error = %e, "chat completion failed");
                    break;
                }
            }
        }
    }
    Ok(())
}

/// First listed model, or a new one built from the provider config file.
async fn resolve_model(
    client: &Client,
    provider_name: &str,
    provider_config: Option<&Path>,
) -> Result<String, CliError> {
    let models = client
        .call_default("getModelList", json!({}))
        .await
        .map_err(|source| CliError::Rpc {
            method: "getModelList",
            source,
        })?;
    if let Some(id) = first_model_id(&models) {
        return Ok(id);
    }

    let path = provider_config.ok_or(CliError::NoModel)?;
    let provider_params = parse_params(&std::fs::read_to_string(path)?)?;
    let created = client
        .call_default("newModel", new_model_params(provider_name, provider_params))
        .await
        .map_err(|source| CliError::Rpc {
            method: "newModel",
            source,
        })?;
    let id = record_id(&created).ok_or(CliError::MissingField("id"))?;
    info!(%id, provider = provider_name, "created model");
    Ok(id)
}

fn parse_params(raw: &str) -> Result<Value, CliError> {
    Ok(serde_json::from_str(raw)?)
}

/// `chatCompletion` params for one user line.
fn completion_params(chat_id: &str, model_id: &str, parent: Option<&str>, text: &str) -> Value {
    let mut params = json!({
        "id": chat_id,
        "modelId": model_id,
        "userMessage": {
            "role": "user",
            "content": [{ "type": "text", "data": text }],
        },
    });
    if let Some(parent) = parent {
        params["parent"] = Value::String(parent.to_owned());
    }
    params
}

fn new_model_params(provider_name: &str, provider_params: Value) -> Value {
    json!({
        "providerName": provider_name,
        "providerParams": provider_params,
    })
}

fn first_model_id(models: &Value) -> Option<String> {
    models
        .as_array()?
        .first()?
        .get("id")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
}

/// `newChat` and `newModel` may answer with the bare id or with the record.
fn record_id(record: &Value) -> Option<String> {
    record
        .as_str()
        .or_else(|| record.get("id").and_then(Value::as_str))
        .map(ToOwned::to_owned)
}

fn assistant_message_id(end: &Value) -> Option<String> {
    end.get("assistantMessageId")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
}

/// Text chunks are printed as-is so token streams read naturally.
fn print_chunk(chunk: &Value) -> Result<(), CliError> {
    let mut out = io::stdout().lock();
    match chunk {
        Value::String(text) => write!(out, "{text}")?,
        other => writeln!(out, "{other}")?,
    }
    out.flush()?;
    Ok(())
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
