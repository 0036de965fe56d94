use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "logtap")]
#[command(about = "Captures application logs into a bounded, persisted history")]
pub struct AppArgs {
    #[arg(long, help = "Config file path (JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, default_value = "data", help = "Data directory for the persisted history")]
    pub data_dir: PathBuf,

    #[arg(long, help = "Maximum number of retained entries (overrides the config file)")]
    pub capacity: Option<usize>,

    #[arg(long, help = "Open the persisted history read-only instead of running the demo host")]
    pub recover: bool,

    #[arg(long, value_name = "FILE", help = "Write the history to FILE in the export line format")]
    pub export: Option<PathBuf>,

    #[arg(long, help = "Minimum severity to show (trace, debug, info, warn, error)")]
    pub level: Option<String>,

    #[arg(long, help = "Only show entries containing this text; prefix with '-' to exclude")]
    pub filter: Option<String>,
}

impl AppArgs {
    pub fn from_cli() -> Self {
        <Self as Parser>::parse()
    }
}
