use std::{env, env::VarError};

/// There's no real CLI for the worker, so just do quick 'n dirty
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
    const DISPLAY_ENVS: [&str; 16] = [
        "RUST_LOG",
        "IMEI_DATABASE_URL",
        "IMEI_DB_MAX_CONNECTIONS",
        "IMEI_WORKER_POOL_SIZE",
        "IMEI_JOB_MAX_ATTEMPTS",
        "IMEI_JOB_BACKOFF_MS",
        "IMEI_JOB_MAX_BACKOFF_MS",
        "IMEI_JOB_POLL_MS",
        "IMEI_STALE_JOB_TIMEOUT_SECS",
        "IMEI_LOOKUP_URL",
        "IMEI_LOOKUP_TIMEOUT_SECS",
        "IMEI_THROTTLE",
        "IMEI_GUEST_RATE",
        "IMEI_GUEST_CURRENCY",
        "IMEI_PRICE_CACHE_TTL_SECS",
        "IMEI_LOW_RISK_CARRIERS",
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
