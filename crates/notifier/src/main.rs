use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use tokio::{sync::watch, task::JoinSet};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cwl_notifier::{
    aws::{CwlLogQuery, LogQuery},
    config::AppConfig,
    consumer::SqsConsumer,
    notify::{Notify, SlackNotifier},
    pipeline::{AlarmPipeline, RoutingClassifier},
    Result,
};

#[derive(Debug, Parser)]
#[command(name = "cwl-notifier", about = "CloudWatch alarm to Slack log notifier")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, env = "CONFIG_PATH")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let config = AppConfig::load(&args.config)?;
    init_tracing(config.debug);
    info!(
        region = %config.aws.region,
        alarms = config.alarms.len(),
        "starting cwl-notifier"
    );

    let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(config.aws.region.clone()))
        .load()
        .await;

    let log_query: Arc<dyn LogQuery> = Arc::new(CwlLogQuery::new(
        aws_sdk_cloudwatchlogs::Client::new(&sdk_config),
    ));
    let sqs = aws_sdk_sqs::Client::new(&sdk_config);
    let notifier: Arc<dyn Notify> = Arc::new(SlackNotifier::new(config.slack.api_token.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut consumers = JoinSet::new();
    for alarm in &config.alarms {
        let classifier = RoutingClassifier::compile(&config.slack.profile, alarm)?;
        let pipeline = Arc::new(AlarmPipeline::new(
            log_query.clone(),
            notifier.clone(),
            classifier,
            &config,
        ));
        let consumer = SqsConsumer::new(sqs.clone(), alarm.sqs_url.clone(), pipeline);
        let shutdown = shutdown_rx.clone();
        consumers.spawn(async move { consumer.run(shutdown).await });
    }

    wait_for_shutdown().await?;
    info!("shutdown signal received, draining consumers");
    let _ = shutdown_tx.send(true);
    while consumers.join_next().await.is_some() {}

    Ok(())
}

fn init_tracing(debug: bool) {
    let default_filter = if debug { "cwl_notifier=debug,info" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    Ok(())
}
