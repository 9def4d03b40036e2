use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "green-score")]
#[command(about = "Environmental green score API for US ZIP codes")]
pub struct ServerArgs {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "GREEN_SCORE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the bind host
    #[arg(long)]
    pub host: Option<String>,

    /// Override the listening port (PORT also works)
    #[arg(short, long)]
    pub port: Option<u16>,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,
}

impl ServerArgs {
    /// 命令列參數優先於檔案與環境變數
    pub fn apply(&self, config: &mut super::AppConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
    }
}

/// `green-score-prewarm`: warm the report cache of a running server.
#[derive(Debug, Clone, Parser)]
#[command(name = "green-score-prewarm")]
#[command(about = "Prewarm /green-score for every Houston ZIP code")]
pub struct PrewarmArgs {
    /// Base URL of the running API
    #[arg(long, default_value = "http://localhost:8000")]
    pub base_url: String,

    /// Requests per minute, across all workers
    #[arg(long, default_value_t = 6, value_parser = clap::value_parser!(u32).range(1..))]
    pub rpm: u32,

    /// Requests in flight within each minute
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..))]
    pub concurrency: u32,

    /// Include 772xx PO-box ZIPs
    #[arg(long)]
    pub include_po_boxes: bool,

    /// Only warm the first N ZIPs (0 = all)
    #[arg(long, default_value_t = 0)]
    pub limit: usize,

    /// Discover and print, but do not call the API
    #[arg(long)]
    pub dry_run: bool,

    /// Directory for the CSV log
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Houston ZIP discovery endpoint
    #[arg(long, default_value = "https://api.zippopotam.us/us/tx/houston")]
    pub zips_url: String,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn cli_flags_override_config() {
        let args = ServerArgs::parse_from(["green-score", "--port", "9100", "-v"]);
        let mut config = AppConfig::default();
        args.apply(&mut config);

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(args.verbose);
    }

    #[test]
    fn prewarm_defaults() {
        let args = PrewarmArgs::parse_from(["green-score-prewarm"]);
        assert_eq!(args.base_url, "http://localhost:8000");
        assert_eq!(args.rpm, 6);
        assert_eq!(args.concurrency, 2);
        assert_eq!(args.limit, 0);
        assert!(!args.dry_run);
        assert!(PrewarmArgs::try_parse_from(["green-score-prewarm", "--rpm", "0"]).is_err());
    }
}
