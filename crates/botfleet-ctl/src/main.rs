// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Botfleet Control CLI
//!
//! CLI tool for driving a botfleet session.
//!
//! Usage:
//!   botfleet-ctl <command> [options]
//!
//! Commands:
//!   launch --target <uid> [--bot <name>]
//!   start <instance_id>
//!   stop <instance_id>
//!   restart <instance_id>
//!   delete <instance_id>
//!   safe-mode <instance_id> <on|off>
//!   list
//!   log
//!   telemetry <target_uid> [--profile]
//!   run                           Keep the engine running until Ctrl-C

use std::process::ExitCode;
use std::sync::Arc;

use tracing::info;

use botfleet_core::config::CoreConfig;
use botfleet_core::persistence::SqliteStore;
use botfleet_core::rate::display_eta;
use botfleet_core::scheduler::FleetEngine;

fn print_usage() {
    eprintln!(
        r#"Usage: botfleet-ctl <command> [options]

Drive a botfleet session.

COMMANDS:
    launch                          Create an instance and start its job
    start <instance_id>             Start a stopped or errored instance
    stop <instance_id>              Stop a running instance
    restart <instance_id>           Stop then start an instance
    delete <instance_id>            Remove an instance from the session
    safe-mode <instance_id> <on|off>  Toggle safe mode
    list                            List tracked instances
    log                             Print the trailing console log
    telemetry <target_uid>          Fetch a progress snapshot
    run                             Keep polling until Ctrl-C

LAUNCH OPTIONS:
    --target <uid>                  Target id (required)
    --bot <name>                    Endpoint set name (default: first configured)

TELEMETRY OPTIONS:
    --profile                       Fetch the profile snapshot instead

ENVIRONMENT:
    BOTFLEET_START_URL              Job start endpoint template (required)
    BOTFLEET_STOP_URL               Job stop endpoint template (required)
    BOTFLEET_BOT_NAME               Endpoint set name (default: default)
    BOTFLEET_MAX_INSTANCES          Instance limit (default: 1)
    BOTFLEET_LEVEL_URL              Progress telemetry template
    BOTFLEET_PROFILE_URL            Profile telemetry template
    BOTFLEET_SAFE_MODE_LIMIT_MINUTES  Safe-mode budget (default: 60)
    BOTFLEET_DB                     SQLite path (default: .data/botfleet.db)

EXAMPLES:
    # Launch an instance for a target
    botfleet-ctl launch --target 123456

    # Watch progress
    botfleet-ctl telemetry 123456

    # Cap a run at one hour
    botfleet-ctl safe-mode <instance_id> on
"#
    );
}

#[derive(Debug)]
enum Command {
    Launch {
        target_uid: String,
        bot_name: Option<String>,
    },
    Start {
        instance_id: String,
    },
    Stop {
        instance_id: String,
    },
    Restart {
        instance_id: String,
    },
    Delete {
        instance_id: String,
    },
    SafeMode {
        instance_id: String,
        enabled: bool,
    },
    List,
    Log,
    Telemetry {
        target_uid: String,
        profile: bool,
    },
    Run,
}

fn parse_args() -> Result<Command, String> {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from_vec(&args)
}

fn parse_args_from_vec(args: &[String]) -> Result<Command, String> {
    if args.len() < 2 {
        return Err("No command specified".to_string());
    }

    match args[1].as_str() {
        "help" | "--help" | "-h" => {
            print_usage();
            std::process::exit(0);
        }
        "launch" => {
            let mut target_uid: Option<String> = None;
            let mut bot_name: Option<String> = None;

            let mut i = 2;
            while i < args.len() {
                match args[i].as_str() {
                    "--target" => {
                        i += 1;
                        target_uid = Some(args.get(i).ok_or("--target requires an id")?.clone());
                    }
                    "--bot" => {
                        i += 1;
                        bot_name = Some(args.get(i).ok_or("--bot requires a name")?.clone());
                    }
                    arg => return Err(format!("Unknown argument: {}", arg)),
                }
                i += 1;
            }

            Ok(Command::Launch {
                target_uid: target_uid.ok_or("--target is required")?,
                bot_name,
            })
        }
        "start" => {
            let instance_id = args.get(2).ok_or("Instance ID required")?.clone();
            Ok(Command::Start { instance_id })
        }
        "stop" => {
            let instance_id = args.get(2).ok_or("Instance ID required")?.clone();
            Ok(Command::Stop { instance_id })
        }
        "restart" => {
            let instance_id = args.get(2).ok_or("Instance ID required")?.clone();
            Ok(Command::Restart { instance_id })
        }
        "delete" => {
            let instance_id = args.get(2).ok_or("Instance ID required")?.clone();
            Ok(Command::Delete { instance_id })
        }
        "safe-mode" => {
            let instance_id = args.get(2).ok_or("Instance ID required")?.clone();
            let enabled = match args.get(3).map(String::as_str) {
                Some("on") => true,
                Some("off") => false,
                _ => return Err("safe-mode requires 'on' or 'off'".to_string()),
            };
            Ok(Command::SafeMode {
                instance_id,
                enabled,
            })
        }
        "list" => Ok(Command::List),
        "log" => Ok(Command::Log),
        "telemetry" => {
            let target_uid = args.get(2).ok_or("Target id required")?.clone();
            let mut profile = false;

            let mut i = 3;
            while i < args.len() {
                match args[i].as_str() {
                    "--profile" => profile = true,
                    arg => return Err(format!("Unknown argument: {}", arg)),
                }
                i += 1;
            }

            Ok(Command::Telemetry {
                target_uid,
                profile,
            })
        }
        "run" => Ok(Command::Run),
        cmd => Err(format!("Unknown command: {}", cmd)),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("botfleet_core=warn".parse().expect("valid directive")),
        )
        .init();

    let cmd = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    let config = match CoreConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let db_path =
        std::env::var("BOTFLEET_DB").unwrap_or_else(|_| ".data/botfleet.db".to_string());
    let store = match SqliteStore::from_path(&db_path).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("Failed to open session store at {}: {}", db_path, e);
            return ExitCode::FAILURE;
        }
    };

    let engine = match FleetEngine::start(config, Some(store)).await {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Failed to start engine: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = execute_command(&engine, cmd).await;
    engine.shutdown().await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute_command(engine: &FleetEngine, cmd: Command) -> Result<(), String> {
    match cmd {
        Command::Launch {
            target_uid,
            bot_name,
        } => {
            let bot = bot_name.unwrap_or_default();
            match engine.controller().launch(&bot, &target_uid).await {
                Some(instance) => {
                    println!("{} {}", instance.id, instance.status.as_str());
                }
                None => return Err(last_log_line(engine).await),
            }
        }

        Command::Start { instance_id } => {
            match engine.controller().start(&instance_id).await {
                Some(instance) => println!("{} {}", instance.id, instance.status.as_str()),
                None => return Err(last_log_line(engine).await),
            }
        }

        Command::Stop { instance_id } => {
            match engine.controller().stop(&instance_id, false).await {
                Some(instance) => println!("{} {}", instance.id, instance.status.as_str()),
                None => return Err(last_log_line(engine).await),
            }
        }

        Command::Restart { instance_id } => {
            match engine.controller().restart(&instance_id).await {
                Some(instance) => println!("{} {}", instance.id, instance.status.as_str()),
                None => return Err(last_log_line(engine).await),
            }
        }

        Command::Delete { instance_id } => {
            match engine.controller().delete(&instance_id).await {
                Some(_) => println!("Deleted: {}", instance_id),
                None => return Err(format!("Instance not found: {}", instance_id)),
            }
        }

        Command::SafeMode {
            instance_id,
            enabled,
        } => {
            match engine.controller().set_safe_mode(&instance_id, enabled).await {
                Some(instance) => println!(
                    "{} safe-mode {}",
                    instance.id,
                    if instance.safe_mode { "on" } else { "off" }
                ),
                None => return Err(last_log_line(engine).await),
            }
        }

        Command::List => {
            let instances = engine.registry().snapshot().await;
            println!(
                "{}",
                serde_json::to_string_pretty(&instances).map_err(|e| e.to_string())?
            );
        }

        Command::Log => {
            for entry in engine.logs().tail().await {
                println!("[{}] {}", entry.timestamp, entry.message);
            }
        }

        Command::Telemetry {
            target_uid,
            profile,
        } => {
            if profile {
                let snapshot = engine
                    .telemetry()
                    .fetch_profile(&target_uid)
                    .await
                    .ok_or("Profile telemetry unavailable")?;
                println!("banner:   {}", snapshot.banner);
                if !snapshot.avatar.is_empty() {
                    println!("avatar:   {}", snapshot.avatar);
                }
                if !snapshot.nickname.is_empty() {
                    println!("nickname: {}", snapshot.nickname);
                }
            } else {
                let snapshot = engine
                    .telemetry()
                    .fetch_level(&target_uid)
                    .await
                    .ok_or("Level telemetry unavailable")?;
                if let Some(nickname) = &snapshot.nickname {
                    println!("nickname: {}", nickname);
                }
                if let Some(level) = snapshot.level {
                    println!("level:    {}", level);
                }
                if let Some(current) = snapshot.current_metric {
                    println!("current:  {}", current);
                }
                if let Some(target) = snapshot.target_metric {
                    println!("target:   {}", target);
                }
                println!("progress: {:.1}%", snapshot.percent_complete());

                // The local estimate wins; the source-reported ETA only
                // covers targets we have not sampled long enough.
                let instances = engine.registry().snapshot().await;
                let tracked = instances.iter().find(|i| i.target_uid == target_uid);
                let rate = match tracked {
                    Some(instance) => engine.published_rate(&instance.id).await,
                    None => None,
                };
                if let Some(rate) = rate {
                    println!("rate:     {}/min", rate);
                } else if let Some(last) = tracked.and_then(|i| i.last_known_rate.as_deref()) {
                    println!("rate:     {} (last known)", last);
                }
                println!("eta:      {}", display_eta(rate, &snapshot));
            }
        }

        Command::Run => {
            info!("Engine running; press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .map_err(|e| format!("Failed to wait for Ctrl-C: {}", e))?;
            println!("Shutting down...");
        }
    }

    Ok(())
}

async fn last_log_line(engine: &FleetEngine) -> String {
    engine
        .logs()
        .tail()
        .await
        .last()
        .map(|entry| entry.message.clone())
        .unwrap_or_else(|| "Command refused".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("botfleet-ctl")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_launch() {
        let cmd = parse_args_from_vec(&args(&["launch", "--target", "123", "--bot", "alt"]))
            .expect("parses");
        match cmd {
            Command::Launch {
                target_uid,
                bot_name,
            } => {
                assert_eq!(target_uid, "123");
                assert_eq!(bot_name.as_deref(), Some("alt"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_launch_requires_target() {
        assert!(parse_args_from_vec(&args(&["launch"])).is_err());
    }

    #[test]
    fn test_parse_safe_mode() {
        let cmd = parse_args_from_vec(&args(&["safe-mode", "abc", "on"])).expect("parses");
        match cmd {
            Command::SafeMode {
                instance_id,
                enabled,
            } => {
                assert_eq!(instance_id, "abc");
                assert!(enabled);
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(parse_args_from_vec(&args(&["safe-mode", "abc", "maybe"])).is_err());
    }

    #[test]
    fn test_parse_telemetry_profile_flag() {
        let cmd = parse_args_from_vec(&args(&["telemetry", "123", "--profile"])).expect("parses");
        match cmd {
            Command::Telemetry {
                target_uid,
                profile,
            } => {
                assert_eq!(target_uid, "123");
                assert!(profile);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(parse_args_from_vec(&args(&["frobnicate"])).is_err());
    }
}
