//! Bucketeer job binary: artifact collection and optional stack teardown

use anyhow::{anyhow, Context};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bucketeer::collector::{new_collector, BucketCollector};
use bucketeer::config::{AppConfig, LogFormat};
use bucketeer::stack::{CloudFormationApi, StackTeardown};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;

    init_tracing(&config)?;

    let location = config
        .storage_location()
        .context("invalid storage configuration")?;
    let settings = config.storage_settings();

    let collector = new_collector(&location, config.cluster.as_ref(), &settings)
        .context("error obtaining a bucket provider")?;

    if config.collect.patterns.is_empty() {
        tracing::info!("No collect.patterns configured, skipping collection");
    } else {
        collect(&config, &collector, &location.bucket_url).await?;
    }

    if !config.stack.name.trim().is_empty() {
        teardown(&config).await?;
    }

    Ok(())
}

async fn collect(
    config: &AppConfig,
    collector: &BucketCollector,
    bucket_url: &str,
) -> anyhow::Result<()> {
    tracing::info!(
        bucket = %bucket_url,
        patterns = config.collect.patterns.len(),
        "Collecting artifacts",
    );

    let urls = match collector
        .collect_files(
            &config.collect.patterns,
            &config.collect.output_path,
            &config.collect.base_dir,
        )
        .await
    {
        Ok(urls) => urls,
        Err(err) => {
            for url in &err.uploaded {
                println!("{}", url);
            }
            return Err(anyhow!(err));
        }
    };

    for url in &urls {
        println!("{}", url);
    }
    tracing::info!(count = urls.len(), "Collected artifacts");

    Ok(())
}

async fn teardown(config: &AppConfig) -> anyhow::Result<()> {
    let name = config.stack.name.trim();
    let api = CloudFormationApi::from_app_config(config)
        .await
        .context("failed to create the CloudFormation client")?;

    let stack = StackTeardown::new(api)
        .delete_stack(name)
        .await
        .with_context(|| format!("failed to delete stack {}", name))?;

    tracing::info!(
        stack = %stack.name,
        status = %stack.status,
        retained = stack.resources.len(),
        "Stack teardown finished",
    );

    Ok(())
}

fn init_tracing(config: &AppConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.logging.level.clone()))
        .unwrap_or_else(|_| EnvFilter::new("bucketeer=info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.logging.format {
        LogFormat::Json => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
    }

    Ok(())
}
