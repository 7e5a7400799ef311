//! Deploy Runner - Webhook 触发的部署执行器
//!
//! Usage:
//! - Normal mode: `deploy-runner`
//! - With custom port: `deploy-runner --port 19999`
//! - Custom option file: `deploy-runner --config /etc/deploy-runner/app.json`
//! - Validate only: `deploy-runner --check`

use std::path::PathBuf;

use deploy_runner::RuntimeConfig;

/// 解析命令行参数
fn parse_args() -> RuntimeConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = RuntimeConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" if i + 1 < args.len() => {
                config.port_override = args[i + 1].parse().ok();
                i += 2;
            }
            "--config" if i + 1 < args.len() => {
                config.config_override = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--check" => {
                config.check_only = true;
                i += 1;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                eprintln!("Ignoring unknown argument: {}", other);
                i += 1;
            }
        }
    }

    config
}

fn print_help() {
    println!("Deploy Runner - Webhook 触发的部署执行器");
    println!();
    println!("USAGE:");
    println!("    deploy-runner [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>      Override the listening port");
    println!("    --config <PATH>    Deployment option file (JSON)");
    println!("    --check            Validate the option file, print the pipeline and exit");
    println!("    -h, --help         Print help information");
    println!();
    println!("ENVIRONMENT:");
    println!("    DEPLOY_RUNNER_PORT, DEPLOY_RUNNER_ACCESS_TOKEN, DEPLOY_RUNNER_TOKEN_HEADER,");
    println!("    DEPLOY_RUNNER_SIGNATURE_HEADER, DEPLOY_RUNNER_SIGNED, DEPLOY_RUNNER_CONFIG,");
    println!("    DEPLOY_RUNNER_DATA_DIR, RUST_LOG");
}

fn main() {
    let config = parse_args();

    deploy_runner::init_tracing();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(deploy_runner::init_and_run_with_config(config)) {
        tracing::error!(error = %e, "Deploy runner failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
