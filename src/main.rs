#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::correctness,
    missing_debug_implementations,
    missing_docs,
    clippy::all,
    clippy::wildcard_imports,
    clippy::needless_borrow,
    clippy::cast_lossless,
    clippy::unused_async,
    clippy::explicit_iter_loop,
    clippy::explicit_into_iter_loop,
    clippy::cloned_instead_of_copied
)]
#![cfg_attr(not(test), forbid(clippy::indexing_slicing))]
#![cfg_attr(not(test), forbid(clippy::string_slice))]
#![allow(
    clippy::match_bool,
    clippy::mixed_read_write_in_expression,
    clippy::bool_assert_comparison,
    clippy::manual_split_once,
    clippy::format_push_string,
    clippy::bool_to_int_with_if
)]
pub(crate) mod cli;
mod config;
pub(crate) mod error;
pub(crate) mod greylist;
pub(crate) mod policy_client;
pub(crate) mod relay;
pub(crate) mod smtp_server;
pub(crate) mod spam_status;
#[cfg(test)]
pub(crate) mod testing;
pub(crate) mod utils;
pub(crate) mod xforward;

use cli::Command;
use config::Config;
use env_logger::Env;
use greylist::GreylistHandler;
use policy_client::PolicyQuery;
use smtp_server::run_smtp_server;
use std::env;
use std::process;
use std::sync::Arc;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() {
    // default to info level
    let env = Env::new().filter_or("RUST_LOG", "info");
    env_logger::Builder::from_env(env)
        // disable timestamps - automatically added by systemd
        .format_timestamp(None)
        .init();

    let mut args = env::args();
    let program = args.next().unwrap_or_else(|| "greylistproxy".to_string());
    let config_path = match cli::parse_args(args) {
        Ok(Command::Serve { config_path }) => config_path,
        Ok(Command::Query {
            server,
            port,
            recipient,
            sender,
            address,
            hostname,
        }) => {
            let query = PolicyQuery {
                recipient: &recipient,
                sender: &sender,
                client_address: &address,
                client_name: &hostname,
            };
            match policy_client::query(&server, port, &query).await {
                Ok(answer) => println!("{answer}"),
                Err(e) => {
                    eprintln!("Policy query failed: {}", e);
                    process::exit(1);
                }
            }
            return;
        }
        Err(e) => {
            eprintln!("{e}\n{}", cli::usage(&program));
            process::exit(1);
        }
    };

    let config = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to read config: {}", e);
            process::exit(1);
        }
    };

    let addr = config.listen_addr();
    let max_size = config.max_message_size;
    match &config.relay {
        Some(relay) => log::info!("greylistproxy starting, relaying to {relay}"),
        None => log::info!("greylistproxy starting, relay is None: mail will be dropped"),
    }
    log::debug!(
        "Greylisting above spam score {} and bulk score {} via {}:{}",
        config.spam_threshold,
        config.bulk_threshold,
        config.policy_host,
        config.policy_port
    );

    let handler = Arc::new(GreylistHandler::new(config));
    log::debug!("SMTP server listening on {addr}");

    if let Err(e) = run_smtp_server(&addr, handler, max_size).await {
        eprintln!("Server error: {}", e);
        process::exit(1);
    }
}
