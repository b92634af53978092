//! Simple Chat - Entry Point
//!
//! `simple-chat server` hosts a chat room with an operator console on stdin.
//! `simple-chat client` joins one from the terminal.

use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use simple_chat::cli::{Cli, ClientArgs, Command, ServerArgs};
use simple_chat::client::{ChatClient, ClientSettings, TerminalSink};
use simple_chat::config::ChatConfig;
use simple_chat::error::{ChatError, handle_error};
use simple_chat::server::console::{ConsoleExit, run_console};
use simple_chat::server::{Server, ServerSettings};

#[tokio::main]
async fn main() {
    // RUST_LOG still wins over the default filter
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Server(args) => run_server(&cli.config, args).await,
        Command::Client(args) => run_client(&cli.config, args).await,
    };

    if let Err(e) = result {
        handle_error(&e);
        std::process::exit(1);
    }
}

async fn run_server(config_path: &str, args: ServerArgs) -> Result<(), ChatError> {
    let mut config = ChatConfig::load_from(config_path)?;
    args.apply(&mut config);
    config.validate()?;

    info!("Launching chat server...");

    let server = Server::bind(ServerSettings::from_config(&config)).await?;
    let registry = server.registry();

    server
        .run_until(async move {
            let console = async {
                let stdin = BufReader::new(tokio::io::stdin());
                match run_console(stdin, tokio::io::stdout(), registry).await {
                    Ok(ConsoleExit::Quit) => return,
                    Ok(ConsoleExit::EndOfInput) => info!("Console input closed"),
                    Err(e) => warn!("Console stopped: {}", e),
                }
                // Without a console only ctrl-c can stop the server
                std::future::pending::<()>().await
            };

            tokio::select! {
                _ = console => {}
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!("Failed to listen for ctrl-c: {}", e);
                    }
                }
            }
        })
        .await
}

async fn run_client(config_path: &str, args: ClientArgs) -> Result<(), ChatError> {
    let mut config = ChatConfig::load_from(config_path)?;
    args.apply(&mut config);
    config.validate()?;

    let settings = ClientSettings::from_config(&config).with_name(args.name);
    info!("Connecting to {}:{} as {}", settings.host, settings.port, settings.name);

    let client = ChatClient::connect(settings, Arc::new(TerminalSink)).await?;
    info!("Joined as {}, type /quit to leave", client.name());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_input(&line) {
                    Input::Empty => {}
                    Input::Quit => break,
                    Input::Private { target, text } => {
                        if let Err(e) = client.send_private(text, target) {
                            handle_error(&e);
                        }
                    }
                    Input::Text(text) => {
                        if let Err(e) = client.send(text) {
                            handle_error(&e);
                        }
                    }
                }
            }
            _ = client.ended() => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.shutdown().await;
    client.closed().await;
    Ok(())
}

enum Input<'a> {
    Empty,
    Quit,
    Private { target: &'a str, text: &'a str },
    Text(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Input::Empty;
    }
    if trimmed == "/quit" {
        return Input::Quit;
    }
    if let Some(rest) = trimmed.strip_prefix("/msg ") {
        if let Some((target, text)) = rest.trim_start().split_once(char::is_whitespace) {
            return Input::Private { target, text: text.trim_start() };
        }
    }
    Input::Text(line)
}
