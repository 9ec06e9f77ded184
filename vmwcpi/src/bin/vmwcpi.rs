//! BOSH CPI for VMware Workstation, Fusion and ESXi. Reads one request from stdin and
//! writes the response to stdout.

use std::{path::PathBuf, process::exit, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::error;
use tokio::io::{stdin, stdout, AsyncReadExt, AsyncWriteExt};
use vmwcpi::{action::Cpi, config::Config, logging_config, runner::LocalRunner};

#[derive(Parser)]
struct Args {
    /// Path to the JSON configuration
    #[arg(long = "configPath", conflicts_with = "config_base64")]
    pub config_path: Option<PathBuf>,
    /// The JSON configuration, base64 encoded
    #[arg(long = "configBase64")]
    pub config_base64: Option<String>,
}

async fn run(args: Args) -> Result<bool> {
    let config = match (&args.config_path, &args.config_base64) {
        (Some(path), _) => Config::load(path)
            .with_context(|| format!("Could not load config {}", path.to_string_lossy()))?,
        (None, Some(encoded)) => {
            Config::from_base64(encoded).context("Could not load inline config")?
        }
        (None, None) => bail!("One of --configPath or --configBase64 is required"),
    };

    let cpi = Cpi::from_config(&config, Arc::new(LocalRunner))?;

    let mut request = String::new();
    stdin()
        .read_to_string(&mut request)
        .await
        .context("Could not read request")?;

    let response = cpi.handle(&request).await;

    let mut out = serde_json::to_vec(&response)?;
    out.push(b'\n');
    let mut stdout = stdout();
    stdout.write_all(&out).await?;
    stdout.flush().await?;

    Ok(response.is_error())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    logging_config().expect("Could not configure logging");

    match run(args).await {
        Ok(false) => {}
        Ok(true) => exit(1),
        Err(e) => {
            error!("{:#}", e);
            exit(1);
        }
    }
}
