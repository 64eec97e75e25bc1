//! aila-tui: terminal display for the Aula message digest.
//!
//! Layout:
//! ```text
//! +-- aila: AI for Aula -----------------------------+
//! | Updated at 2024-03-10 07:00:12.                  |
//! |                                                  |
//! | Some messages seem to be important. ...          |
//! | Summary: ...                                     |
//! |                                                  |
//! | Birthday party, Mette Hansen: ...   (bold)       |
//! | Lost mittens, Lars Nielsen: ...                  |
//! +--------------------------------------------------+
//! | DIGEST | next in 23h 4m | 2 new item(s) | ? help |
//! +--------------------------------------------------+
//! ```

mod app;
mod event;
mod ui;

use anyhow::Result;
use clap::{Args, Parser};
use std::path::PathBuf;

fn main() -> Result<()> {
    let cli = Cli::parse();
    app::run(cli.common.config.as_deref())
}

#[derive(Debug, Parser)]
#[command(
    name = "aila-tui",
    author,
    version,
    about = "Terminal display for the Aula message digest"
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}
