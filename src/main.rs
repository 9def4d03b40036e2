use clap::Parser;
use green_score::config::{AppConfig, ServerArgs};
use green_score::utils::logger::{self, LogFormat};
use green_score::utils::validation::Validate;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();

    // 載入配置：預設值 → TOML → 環境變數 → 命令列
    let mut config = match AppConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };
    args.apply(&mut config);

    logger::init_server_logger(args.verbose, LogFormat::parse(&config.server.log_format));

    tracing::info!("Starting green-score API");
    if args.verbose {
        tracing::debug!("Config: {:?}", config);
    }

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }

    if let Err(e) = green_score::serve(config).await {
        tracing::error!("❌ Server stopped: {}", e);
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }

    Ok(())
}
