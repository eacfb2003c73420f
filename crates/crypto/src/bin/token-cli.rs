//! Token CLI Tool
//!
//! Generates API keys and encodes or inspects hub bearer tokens, for
//! provisioning devices and debugging rejected handshakes.

use commandlink_crypto::{new_api_key, TokenCodec};
use serde::Serialize;
use std::env;
use std::process;
use uuid::Uuid;

/// Environment variable consulted when `--key` is absent
const TOKEN_KEY_ENV: &str = "COMMANDLINK_TOKEN_KEY";

#[derive(Debug, Serialize)]
struct KeygenOutput {
    api_key: String,
}

#[derive(Debug, Serialize)]
struct EncodeOutput {
    token: String,
    app_id: String,
}

#[derive(Debug, Serialize)]
struct DecodeOutput {
    valid: bool,
    app_id: Option<String>,
    api_key: Option<String>,
    message: String,
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Failed to serialize output: {}", e))?;
    println!("{}", text);
    Ok(())
}

fn codec_from(key: Option<String>) -> Result<TokenCodec, String> {
    let key = key
        .or_else(|| env::var(TOKEN_KEY_ENV).ok())
        .ok_or_else(|| format!("Missing --key argument (or {} variable)", TOKEN_KEY_ENV))?;
    TokenCodec::from_passphrase(&key).map_err(|e| format!("Invalid key: {}", e))
}

fn cmd_keygen(json: bool) -> Result<(), String> {
    let api_key = new_api_key();
    if json {
        print_json(&KeygenOutput { api_key })
    } else {
        println!("{}", api_key);
        Ok(())
    }
}

fn cmd_encode(
    key: Option<String>,
    app_id: String,
    api_key: String,
    json: bool,
) -> Result<(), String> {
    let codec = codec_from(key)?;
    let app_id = Uuid::parse_str(&app_id).map_err(|e| format!("Invalid app id: {}", e))?;
    let token = codec
        .encode(app_id, &api_key)
        .map_err(|e| format!("Failed to encode token: {}", e))?;

    if json {
        print_json(&EncodeOutput {
            token,
            app_id: app_id.to_string(),
        })
    } else {
        println!("{}", token);
        Ok(())
    }
}

fn cmd_decode(key: Option<String>, token: String, json: bool) -> Result<(), String> {
    let codec = codec_from(key)?;
    let output = match codec.decode(&token) {
        Ok((app_id, api_key)) => DecodeOutput {
            valid: true,
            app_id: Some(app_id.to_string()),
            api_key: Some(api_key),
            message: "Token is valid".to_string(),
        },
        Err(e) => DecodeOutput {
            valid: false,
            app_id: None,
            api_key: None,
            message: e.to_string(),
        },
    };

    if json {
        print_json(&output)?;
    } else if output.valid {
        println!("App id:  {}", output.app_id.as_deref().unwrap_or_default());
        println!("API key: {}", output.api_key.as_deref().unwrap_or_default());
    } else {
        println!("Invalid token: {}", output.message);
    }

    if output.valid {
        Ok(())
    } else {
        Err("Token rejected".to_string())
    }
}

fn print_usage() {
    println!("Token CLI - API keys and hub bearer tokens");
    println!();
    println!("USAGE:");
    println!("    token-cli keygen [--json]");
    println!("    token-cli encode --app-id <uuid> --api-key <key> [--key <aes-key>] [--json]");
    println!("    token-cli decode --token <token> [--key <aes-key>] [--json]");
    println!();
    println!("COMMANDS:");
    println!("    keygen    Generate a random API key");
    println!("    encode    Seal an app id and API key into a bearer token");
    println!("    decode    Open a bearer token");
    println!();
    println!("The AES key defaults to ${}.", TOKEN_KEY_ENV);
}

struct Args {
    key: Option<String>,
    app_id: Option<String>,
    api_key: Option<String>,
    token: Option<String>,
    json: bool,
}

fn parse_flags(args: &[String]) -> Args {
    let mut parsed = Args {
        key: None,
        app_id: None,
        api_key: None,
        token: None,
        json: false,
    };

    let mut i = 0;
    while i < args.len() {
        let slot = match args[i].as_str() {
            "--key" | "-k" => Some(&mut parsed.key),
            "--app-id" => Some(&mut parsed.app_id),
            "--api-key" => Some(&mut parsed.api_key),
            "--token" | "-t" => Some(&mut parsed.token),
            "--json" => {
                parsed.json = true;
                None
            }
            _ => None,
        };
        if let Some(slot) = slot {
            i += 1;
            if i < args.len() {
                *slot = Some(args[i].clone());
            }
        }
        i += 1;
    }
    parsed
}

fn main() {
    let argv: Vec<String> = env::args().skip(1).collect();
    let Some((command, rest)) = argv.split_first() else {
        print_usage();
        process::exit(1);
    };
    let args = parse_flags(rest);

    let result = match command.as_str() {
        "keygen" => cmd_keygen(args.json),
        "encode" => match (args.app_id, args.api_key) {
            (Some(app_id), Some(api_key)) => cmd_encode(args.key, app_id, api_key, args.json),
            _ => Err("Missing --app-id or --api-key argument".to_string()),
        },
        "decode" => match args.token {
            Some(token) => cmd_decode(args.key, token, args.json),
            None => Err("Missing --token argument".to_string()),
        },
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => Err(format!("Unknown command: {}", other)),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
