//! loyalty-ledger: operator CLI for the points ledger.
//!
//! Runs one ledger operation against the configured Shopify store and prints
//! the result as JSON on stdout.
//!
//! Customers are named by numeric id, `gid://shopify/Customer/<id>`, or
//! email address.
//!
//! ## Configuration
//! - `loyalty.yaml` in the working directory, `--config`, or LOYALTY_CONFIG
//! - LOYALTY__SHOPIFY__DOMAIN / LOYALTY__SHOPIFY__ACCESS_TOKEN
//! - LOYALTY_LOG: tracing filter (default: info)

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info};

use loyalty_ledger::config::Config;
use loyalty_ledger::services::build_services;
use loyalty_ledger::utils::bootstrap::init_tracing;
use loyalty_ledger::model::CustomerRef;

#[derive(Parser, Debug)]
#[command(author, version, about = "Loyalty points ledger operations", long_about = None)]
struct Cli {
    /// Configuration file (YAML).
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Pretty-print JSON output.
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the valid point balance.
    Balance { customer: CustomerRef },

    /// Show balance, tasks, batches, history and vouchers.
    Progress { customer: CustomerRef },

    /// Complete a task for a customer.
    Complete {
        customer: CustomerRef,
        task_id: String,

        /// Task metadata as a JSON object, e.g. '{"pages": 12}'.
        #[arg(long, default_value = "{}")]
        metadata: Value,

        /// Credit the task without checking its qualifying condition.
        #[arg(long)]
        skip_check: bool,
    },

    /// Credit the order-paid task.
    OrderPaid { customer: CustomerRef, order_id: String },

    /// Redeem points for a discount code.
    Redeem { customer: CustomerRef, points: u64 },

    /// Clear all loyalty state for a customer.
    Reset {
        customer: CustomerRef,

        /// Required confirmation.
        #[arg(long)]
        yes: bool,
    },
}

fn emit<T: Serialize>(value: &T, pretty: bool) -> Result<(), Box<dyn std::error::Error>> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", rendered);
    Ok(())
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(cli.config.as_deref())?;
    let services = build_services(&config).await?;
    let ledger = &services.ledger;

    match cli.command {
        Commands::Balance { customer } => {
            let customer = services.resolve(&customer).await?;
            let points = ledger.get_balance(&customer).await?;
            emit(&json!({ "customerId": customer, "points": points }), cli.pretty)
        }
        Commands::Progress { customer } => {
            let customer = services.resolve(&customer).await?;
            let progress = ledger.progress(&customer).await?;
            emit(&progress, cli.pretty)
        }
        Commands::Complete {
            customer,
            task_id,
            metadata,
            skip_check,
        } => {
            let customer = services.resolve(&customer).await?;
            let outcome = if skip_check {
                ledger.complete_task(&customer, &task_id, metadata).await?
            } else {
                ledger.submit_task(&customer, &task_id, metadata).await?
            };
            emit(&outcome.response(), cli.pretty)
        }
        Commands::OrderPaid { customer, order_id } => {
            let customer = services.resolve(&customer).await?;
            let outcome = ledger.record_order_paid(&customer, &order_id).await?;
            emit(&outcome.response(), cli.pretty)
        }
        Commands::Redeem { customer, points } => {
            let customer = services.resolve(&customer).await?;
            let outcome = services.redemption.redeem(&customer, points).await?;
            emit(&outcome.response(), cli.pretty)
        }
        Commands::Reset { customer, yes } => {
            if !yes {
                return Err("reset is destructive; pass --yes to confirm".into());
            }
            let customer = services.resolve(&customer).await?;
            ledger.reset(&customer).await?;
            info!(customer_id = %customer, "Reset complete");
            emit(&json!({ "success": true, "customerId": customer }), cli.pretty)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(error = %e, "Command failed");
        return Err(e);
    }
    Ok(())
}
