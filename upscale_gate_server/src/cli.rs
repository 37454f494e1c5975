use std::{env, env::VarError};

/// There's no real CLI for the server, so just do quick 'n dirty
pub fn handle_command_line_args() -> bool {
    let has_cli_args = env::args().count() > 1;
    if has_cli_args {
        // We don't expect any CLI args, so always print the help
        display_readme();
        display_envs();
    }
    has_cli_args
}

fn display_readme() {
    const README: &str = include_str!("./cli-help.txt");
    println!("\n{README}\n");
}

fn display_envs() {
    // Be explicit about which envars to print, so as to avoid accidentally exposing secrets
    const DISPLAY_ENVS: [&str; 23] = [
        "RUST_LOG",
        "UPG_HOST",
        "UPG_PORT",
        "UPG_STORE_BACKEND",
        "UPG_RATE_LIMIT_BACKEND",
        "UPG_KV_REST_URL",
        "UPG_PADDLE_EARLY_BIRD_PRICE_ID",
        "UPG_PADDLE_STANDARD_PRICE_ID",
        "UPG_CREEM_EARLY_BIRD_PRODUCT_ID",
        "UPG_CREEM_STANDARD_PRODUCT_ID",
        "UPG_EARLY_BIRD_CAP",
        "UPG_WEBHOOK_TOLERANCE_SECS",
        "UPG_DEDUP_RETENTION_DAYS",
        "UPG_TOKEN_RATE_PER_MINUTE",
        "UPG_TOKEN_RATE_PER_DAY",
        "UPG_UPSCALE_RATE_PER_MINUTE",
        "UPG_UPSCALE_RATE_PER_DAY",
        "UPG_MAX_UPLOAD_BYTES",
        "UPG_TRUST_PROXY_HEADERS",
        "UPG_REPLICATE_MODEL",
        "UPG_REPLICATE_BASE_URL",
        "UPG_REPLICATE_POLL_SECS",
        "UPG_REPLICATE_MAX_POLLS",
    ];

    println!("Current environment values (EXCLUDING variables that contain secrets):");
    DISPLAY_ENVS.iter().for_each(|&name| {
        let val = match env::var(name) {
            Ok(s) => s,
            Err(VarError::NotPresent) => "Not set".into(),
            Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
        };
        println!("  {name:<35} {val:<15}");
    })
}
