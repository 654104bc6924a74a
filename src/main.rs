//! latent-anomaly command-line entry point

use clap::Parser;
use latent_anomaly::cli::{cmd_info, cmd_score, Cli, Commands, ScoreOverrides};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "latent_anomaly=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Score {
            reference,
            query,
            original,
            reconstructed,
            config,
            components,
            outlier_fraction,
            normalization,
            output,
            top,
        } => {
            let overrides = ScoreOverrides {
                components,
                outlier_fraction,
                normalization,
            };
            cmd_score(
                &reference,
                &query,
                &original,
                &reconstructed,
                config.as_deref(),
                overrides,
                output.as_deref(),
                top,
            )?;
        }
        Commands::Info { data } => {
            cmd_info(&data)?;
        }
    }

    Ok(())
}
