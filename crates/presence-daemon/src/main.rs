mod cli;
mod commands;
#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn path_arg<'a>(m: &'a clap::ArgMatches, id: &str) -> Result<&'a Path> {
    m.get_one::<String>(id)
        .map(Path::new)
        .with_context(|| format!("missing --{id}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli::build().get_matches();
    let level = matches
        .get_one::<String>("log-level")
        .map(String::as_str)
        .unwrap_or("info");
    init_logging(level);

    match matches.subcommand() {
        Some(("keygen", m)) => {
            let out = path_arg(m, "out")?;
            let public = commands::keygen(out, m.get_flag("force"))?;
            println!("signing key written to {}", out.display());
            println!("authority public key: {public}");
        }
        Some(("check-config", m)) => {
            let config = commands::check_config(path_arg(m, "config")?)?;
            println!(
                "config ok: devices {} / {}, stasis after {} unauthorized attempts",
                config.devices.expected_primary,
                config.devices.expected_secondary,
                config.guardian.unauthorized_threshold
            );
        }
        Some(("authorize", m)) => {
            let out = m.get_one::<String>("out").map(Path::new);
            let subject = m
                .get_one::<String>("subject")
                .context("missing --subject")?;
            let (dest, token) = commands::authorize(
                path_arg(m, "config")?,
                subject,
                path_arg(m, "signature")?,
                path_arg(m, "binding")?,
                out,
            )?;
            println!("token {} for {} written to {}", token.nonce, token.subject, dest.display());
        }
        Some(("restore", m)) => {
            let dest = commands::restore(
                path_arg(m, "config")?,
                path_arg(m, "signature")?,
                path_arg(m, "binding")?,
            )?;
            println!("restore request written to {}; send a signal to apply it", dest.display());
        }
        Some(("run", m)) => {
            commands::run(path_arg(m, "config")?, !m.get_flag("no-session-lock")).await?;
        }
        _ => unreachable!("clap requires a subcommand"),
    }
    Ok(())
}
