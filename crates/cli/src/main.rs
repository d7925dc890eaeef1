// Operator tooling: evaluate checks and menus against a JSON fixture.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde_json::json;

use gatehouse_authz::{
    AuditSink, CheckMode, EvaluationContext, EvaluationRequest, NullAuditSink, TracingAuditSink,
};
use gatehouse_observability::ObservabilityConfig;

mod fixture;

use fixture::Fixture;

#[derive(Parser)]
#[command(name = "gatehouse")]
#[command(about = "Capability and data-scope decisions over a fixture", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Fixture with resources, roles, principals and menu
    #[arg(short, long, global = true, env = "GATEHOUSE_FIXTURE", default_value = "fixtures/campus.json")]
    fixture: PathBuf,

    /// Write audit events to the log
    #[arg(long, global = true)]
    audit: bool,

    /// Human-readable logs instead of JSON
    #[arg(long, global = true)]
    pretty: bool,

    /// Override the check mode (strict, loose)
    #[arg(long, global = true)]
    mode: Option<CheckMode>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one or more permission codes (e.g. smart:device:read)
    Check {
        /// Principal name from the fixture
        #[arg(short, long)]
        principal: String,

        /// Permission codes to evaluate as one batch
        #[arg(required = true)]
        codes: Vec<String>,

        /// Context dimension, as dimension=id1,id2 (repeatable)
        #[arg(short, long = "context")]
        context: Vec<String>,
    },

    /// Print the navigation tree as the principal would see it
    Menu {
        /// Principal name from the fixture
        #[arg(short, long)]
        principal: String,
    },
}

fn parse_context(pairs: &[String]) -> anyhow::Result<EvaluationContext> {
    let mut context = EvaluationContext::new();
    for pair in pairs {
        let Some((dimension, ids)) = pair.split_once('=') else {
            bail!("context '{pair}' is not dimension=id1,id2");
        };
        context = context.with(
            dimension.trim(),
            ids.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string),
        );
    }
    Ok(context)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logging = if cli.pretty {
        ObservabilityConfig::default().pretty()
    } else {
        ObservabilityConfig::default()
    };
    gatehouse_observability::init_with(&logging);

    let fixture = Fixture::load(&cli.fixture)?;

    let config = fixture.resolve_config(|key| std::env::var(key).ok(), cli.mode)?;
    let audit: Arc<dyn AuditSink> = if cli.audit {
        Arc::new(TracingAuditSink)
    } else {
        Arc::new(NullAuditSink)
    };
    let engine = fixture.engine(config, audit)?;

    match cli.command {
        Commands::Check {
            principal,
            codes,
            context,
        } => {
            let principal = fixture.principal(&principal)?;
            let context = parse_context(&context)?;

            let requests = codes
                .iter()
                .map(|code| {
                    EvaluationRequest::from_code(code)
                        .map(|r| r.with_context(context.clone()))
                        .with_context(|| format!("invalid permission code '{code}'"))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;

            let decisions = engine.evaluate_batch(principal, &requests).await?;
            let report: Vec<_> = codes
                .iter()
                .zip(&decisions)
                .map(|(code, decision)| json!({ "code": code, "decision": decision }))
                .collect();

            println!("{}", serde_json::to_string_pretty(&report)?);
            tracing::debug!(stats = ?engine.stats(), "check finished");
        }
        Commands::Menu { principal } => {
            let principal = fixture.principal(&principal)?;
            let Some(tree) = fixture.menu.as_ref() else {
                bail!("fixture has no menu");
            };

            let visible = engine.filter_menu(tree, principal).await;
            println!("{}", serde_json::to_string_pretty(&visible)?);
        }
    }

    Ok(())
}
