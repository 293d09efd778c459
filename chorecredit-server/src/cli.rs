use clap::{Parser, Subcommand};
use std::path::PathBuf;

const HELP_EPILOG: &str = r#"Server options can also be provided via environment variables:
  CONFIG_PATH (default: ./config.yaml)
  DB_PATH     (default: data/app.db)
  PORT        (default: 5151 or config.listen_port)

The `import-codes` command loads a vendor code export into the resource
pool and exits.
"#;

#[derive(Debug, Parser)]
#[command(
    name = "chorecredit-server",
    version,
    about = "ChoreCredit server",
    long_about = None,
    after_long_help = HELP_EPILOG,
)]
pub struct Cli {
    /// Optional subcommand. Without one, runs the server.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Import a code export file (CODE;MINUTES;CREATED;DEVICE per line)
    ImportCodes {
        /// Path to the export file
        file: PathBuf,
        /// Restrict the imported units to one family's pool
        #[arg(long)]
        family_id: Option<i32>,
    },
}
