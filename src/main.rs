#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use agent_relay::client::{parse_content_arg, RelayClient, RelayReply};
use agent_relay::config::{self, Config};
use agent_relay::gateway;
use agent_relay::relay::NewMessage;
use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::io::Write;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CompletionShell {
    #[value(name = "bash")]
    Bash,
    #[value(name = "fish")]
    Fish,
    #[value(name = "zsh")]
    Zsh,
    #[value(name = "powershell")]
    PowerShell,
    #[value(name = "elvish")]
    Elvish,
}

/// `agent-relay` - tagged mailboxes and request/response rendezvous for agents.
#[derive(Parser, Debug)]
#[command(name = "agent-relay")]
#[command(version)]
#[command(about = "In-memory message relay for cooperating agents.", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the relay HTTP server
    #[command(
        visible_alias = "gateway",
        long_about = "\
Start the relay HTTP server.

All state is held in memory and lost when the process exits.

Examples:
  agent-relay serve                  # use config defaults (127.0.0.1:3000)
  agent-relay serve -p 8080          # listen on port 8080
  agent-relay serve -p 0             # random available port"
    )]
    Serve {
        /// Port to listen on (use 0 for random available port); defaults to config gateway.port
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to; defaults to config gateway.host
        #[arg(long)]
        host: Option<String>,
    },

    /// Talk to a running relay
    #[command(long_about = "\
Talk to a running relay.

Content arguments are parsed as JSON when possible and sent as a JSON \
string otherwise.

Examples:
  agent-relay client send --agent coordinator --description hi --tag status
  agent-relay client receive --agent developer --tag status
  agent-relay client send-and-wait --agent developer --description 'need review' --tag design-request
  agent-relay client respond <request-id> --agent designer --content '{\"approved\":true}'")]
    Client {
        /// Relay base URL; defaults to AGENT_RELAY_URL, then the configured gateway address
        #[arg(long)]
        url: Option<String>,

        #[command(subcommand)]
        client_command: ClientCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },

    /// Generate shell completion script to stdout
    #[command(long_about = "\
Generate shell completion scripts for `agent-relay`.

The script is printed to stdout so it can be sourced directly:

Examples:
  source <(agent-relay completions bash)
  agent-relay completions zsh > ~/.zfunc/_agent-relay")]
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Subcommand, Debug)]
enum ClientCommands {
    /// Post a fire-and-forget message
    Send {
        #[command(flatten)]
        message: MessageArgs,
    },
    /// Post a request and wait for its response
    SendAndWait {
        #[command(flatten)]
        message: MessageArgs,
    },
    /// Consume the first matching message
    Receive {
        /// Caller agent id
        #[arg(long)]
        agent: String,
        /// Required tag (repeat for OR-matching)
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Allowed sender (repeatable)
        #[arg(long = "from")]
        agent_ids: Vec<String>,
        /// Look at the first match without consuming it
        #[arg(long)]
        peek: bool,
    },
    /// List matching messages without consuming them
    Check {
        /// Required tag (repeat for OR-matching)
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Allowed sender (repeatable)
        #[arg(long = "from")]
        agent_ids: Vec<String>,
    },
    /// Answer a pending send-and-wait request
    Respond {
        /// Id of the request message
        request_id: String,
        /// Responder agent id
        #[arg(long)]
        agent: String,
        /// Response content (JSON or plain text)
        #[arg(long, default_value = "null")]
        content: String,
    },
    /// Show relay counters
    Status,
}

#[derive(clap::Args, Debug)]
struct MessageArgs {
    /// Sender agent id
    #[arg(long)]
    agent: String,
    /// Human-readable summary
    #[arg(long)]
    description: String,
    /// Payload (JSON or plain text)
    #[arg(long, default_value = "null")]
    content: String,
    /// Tag (repeatable)
    #[arg(long = "tag")]
    tags: Vec<String>,
}

impl MessageArgs {
    fn into_message(self) -> NewMessage {
        NewMessage::new(self.agent, self.description)
            .with_content(parse_content_arg(&self.content))
            .with_tags(self.tags)
    }
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Dump the full configuration JSON Schema to stdout
    Schema,
    /// Write the effective configuration to config.toml
    Init {
        /// Replace an existing config.toml
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(config_dir) = &cli.config_dir {
        if config_dir.trim().is_empty() {
            bail!("--config-dir cannot be empty");
        }
        std::env::set_var(config::CONFIG_DIR_ENV, config_dir);
    }

    // Completions must remain stdout-only and should not load config or initialize logging.
    if let Commands::Completions { shell } = &cli.command {
        let mut stdout = std::io::stdout().lock();
        write_shell_completion(*shell, &mut stdout)?;
        return Ok(());
    }

    if let Commands::Config {
        config_command: ConfigCommands::Schema,
    } = &cli.command
    {
        let schema = schemars::schema_for!(Config);
        println!(
            "{}",
            serde_json::to_string_pretty(&schema).context("failed to serialize JSON Schema")?
        );
        return Ok(());
    }

    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let config = Config::load().await?;

    match cli.command {
        Commands::Completions { .. }
        | Commands::Config {
            config_command: ConfigCommands::Schema,
        } => unreachable!(),

        Commands::Config {
            config_command: ConfigCommands::Init { force },
        } => {
            if config.config_path.exists() && !force {
                bail!(
                    "{} already exists; pass --force to overwrite it",
                    config.config_path.display()
                );
            }
            config.save().await?;
            println!("Wrote {}", config.config_path.display());
            Ok(())
        }

        Commands::Serve { port, host } => {
            let port = port.unwrap_or(config.gateway.port);
            let host = host.unwrap_or_else(|| config.gateway.host.clone());
            if port == 0 {
                info!("Starting agent relay on {host} (random port)");
            } else {
                info!("Starting agent relay on {host}:{port}");
            }
            gateway::run_gateway(&host, port, config).await
        }

        Commands::Client {
            url,
            client_command,
        } => {
            let url = url
                .or_else(|| std::env::var("AGENT_RELAY_URL").ok())
                .filter(|u| !u.trim().is_empty())
                .unwrap_or_else(|| format!("http://{}:{}", config.gateway.host, config.gateway.port));
            run_client(&RelayClient::new(url), client_command).await
        }
    }
}

async fn run_client(client: &RelayClient, command: ClientCommands) -> Result<()> {
    let reply = match command {
        ClientCommands::Send { message } => client.send(&message.into_message()).await?,
        ClientCommands::SendAndWait { message } => {
            client.send_and_wait(&message.into_message()).await?
        }
        ClientCommands::Receive {
            agent,
            tags,
            agent_ids,
            peek,
        } => client.receive(&agent, &tags, &agent_ids, !peek).await?,
        ClientCommands::Check { tags, agent_ids } => client.check(&tags, &agent_ids).await?,
        ClientCommands::Respond {
            request_id,
            agent,
            content,
        } => {
            client
                .respond(&request_id, &agent, parse_content_arg(&content))
                .await?
        }
        ClientCommands::Status => client.status().await?,
    };
    print_reply(&reply)
}

fn print_reply(reply: &RelayReply) -> Result<()> {
    let rendered =
        serde_json::to_string_pretty(&reply.body).context("failed to render relay response")?;
    println!("{rendered}");
    if !reply.is_success() {
        bail!("relay answered HTTP {}", reply.status);
    }
    Ok(())
}

fn write_shell_completion<W: Write>(shell: CompletionShell, writer: &mut W) -> Result<()> {
    use clap_complete::generate;
    use clap_complete::shells;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();

    match shell {
        CompletionShell::Bash => generate(shells::Bash, &mut cmd, bin_name.clone(), writer),
        CompletionShell::Fish => generate(shells::Fish, &mut cmd, bin_name.clone(), writer),
        CompletionShell::Zsh => generate(shells::Zsh, &mut cmd, bin_name.clone(), writer),
        CompletionShell::PowerShell => {
            generate(shells::PowerShell, &mut cmd, bin_name.clone(), writer);
        }
        CompletionShell::Elvish => generate(shells::Elvish, &mut cmd, bin_name, writer),
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_accepts_port_and_gateway_alias() {
        let cli = Cli::try_parse_from(["agent-relay", "gateway", "-p", "0"]).unwrap();
        match cli.command {
            Commands::Serve { port, host } => {
                assert_eq!(port, Some(0));
                assert!(host.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn client_send_collects_repeated_tags() {
        let cli = Cli::try_parse_from([
            "agent-relay",
            "client",
            "send",
            "--agent",
            "coordinator",
            "--description",
            "hi",
            "--tag",
            "status",
            "--tag",
            "daily",
            "--content",
            r#"{"n":1}"#,
        ])
        .unwrap();
        let Commands::Client {
            client_command: ClientCommands::Send { message },
            ..
        } = cli.command
        else {
            panic!("expected client send");
        };
        let message = message.into_message();
        assert_eq!(message.agent_id, "coordinator");
        assert_eq!(message.tags, vec!["status", "daily"]);
        assert_eq!(message.content, serde_json::json!({"n": 1}));
    }

    #[test]
    fn config_init_accepts_force() {
        let cli = Cli::try_parse_from(["agent-relay", "config", "init", "--force"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                config_command: ConfigCommands::Init { force: true }
            }
        ));
    }

    #[test]
    fn completions_are_generated() {
        let mut out = Vec::new();
        write_shell_completion(CompletionShell::Bash, &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("agent-relay"));
    }
}
