use crate::{
    core::{EndOfTier, Effect, EvaluationConfig},
    decision::DecisionRecord,
    flow::{parse_flows, Flow},
    index::{Engine, Index, Metrics},
    load::{load_flows, load_resources},
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use prometheus_client::registry::Registry;
use std::{io::Write, path::PathBuf};
use tokio::io::AsyncReadExt;
use tracing::info;

#[derive(Debug, Parser)]
#[clap(name = "calico-policy", about = "Evaluates Calico tiered network policies")]
pub struct Args {
    /// Logs are written to stdout along with decisions, so only warnings are logged by default.
    #[clap(long, default_value = "calico=warn,warn", env = "CALICO_POLICY_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain", env = "CALICO_POLICY_LOG_FORMAT")]
    log_format: kubert::LogFormat,

    /// The action taken on a connection that no tier decides.
    #[clap(long, default_value = "deny", env = "CALICO_POLICY_DEFAULT_ACTION")]
    default_action: Effect,

    /// The outcome of a tier whose applicable policies all fail to match: `pass` moves on to the
    /// next tier, `deny` drops the connection.
    #[clap(long, default_value = "pass", env = "CALICO_POLICY_END_OF_TIER")]
    end_of_tier: EndOfTier,

    /// Writes metrics in the OpenMetrics text format to stdout once the command completes.
    #[clap(long)]
    metrics: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validates policy resources.
    Validate {
        /// Files or directories of `Tier`, `NetworkPolicy` and `GlobalNetworkPolicy` resources.
        #[clap(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Evaluates flows, writing one JSON decision per line.
    Eval {
        /// Files or directories of `Tier`, `NetworkPolicy` and `GlobalNetworkPolicy` resources.
        #[clap(long = "policy", short = 'p', required = true)]
        policies: Vec<PathBuf>,

        /// Files or directories of flows. Flows are read from stdin when none are given.
        flows: Vec<PathBuf>,
    },
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            default_action,
            end_of_tier,
            metrics,
            command,
        } = self;

        log_format.try_init(log_level)?;

        let mut prom = <Registry>::default();
        let index_metrics = Metrics::register(prom.sub_registry_with_prefix("calico_policy"));
        let config = EvaluationConfig {
            default_action,
            end_of_tier,
        };
        let (engine, index) = Index::new(config, index_metrics);

        match command {
            Command::Validate { paths } => {
                let resources = load_resources(&paths).await?;
                let count = resources.len();
                index
                    .write()
                    .reset(resources)
                    .context("invalid policy resources")?;
                info!(resources = count, "Validated");
            }

            Command::Eval { policies, flows } => {
                let resources = load_resources(&policies).await?;
                index
                    .write()
                    .reset(resources)
                    .context("invalid policy resources")?;

                let flows = if flows.is_empty() {
                    let mut input = String::new();
                    tokio::io::stdin()
                        .read_to_string(&mut input)
                        .await
                        .context("failed to read flows from stdin")?;
                    parse_flows(&input).context("failed to parse flows from stdin")?
                } else {
                    load_flows(&flows).await?
                };

                let mut stdout = std::io::stdout().lock();
                for flow in flows {
                    let record = evaluate(&engine, flow);
                    serde_json::to_writer(&mut stdout, &record)?;
                    writeln!(stdout)?;
                }
                stdout.flush()?;
            }
        }

        if metrics {
            let mut text = String::new();
            prometheus_client::encoding::text::encode(&mut text, &prom)?;
            print!("{}", text);
        }

        Ok(())
    }
}

fn evaluate(engine: &Engine, Flow { name, hops }: Flow) -> DecisionRecord {
    let decision = match &*hops {
        [ctx] => engine.evaluate(ctx),
        hops => engine.evaluate_path(hops),
    };
    DecisionRecord::new(name, &decision)
}
