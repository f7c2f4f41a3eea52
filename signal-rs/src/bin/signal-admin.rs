//! CLI tool for managing signal-rs receivers
//!
//! # Usage
//!
//! ```bash
//! # Issue or rotate a token
//! signal-admin issue alice --plan silver --email alice@example.com --db sqlite://signals.db
//!
//! # Override the daily quota
//! signal-admin issue bob --plan free --quota unlimited
//!
//! # Inspect
//! signal-admin users
//! signal-admin signals --limit 20
//! signal-admin trades --limit 20
//! signal-admin usage alice
//!
//! # Subscribe a receiver to a sender
//! signal-admin follow alice farm_robot
//!
//! # Temporary upgrade after a referral
//! signal-admin boost alice --to silver --days 7
//!
//! # Revoke access
//! signal-admin deactivate alice
//! ```

use chrono::Utc;
use clap::{Parser, Subcommand};
use signal_rs::identity::{IdentityStore, IssueRequest};
use signal_rs::quota::{Allowance, Plan, QuotaLedger};
use signal_rs::signals::SignalStore;
use signal_rs::trades::TradeStore;

#[derive(Parser)]
#[command(name = "signal-admin")]
#[command(about = "Manage signal-rs receivers and inspect the relay", long_about = None)]
struct Cli {
    /// Database URL (e.g., sqlite://signals.db)
    #[arg(short, long, default_value = "sqlite://signals.db")]
    db: String,

    /// Username reserved for the publishing sender
    #[arg(long, default_value = "farm_robot")]
    sender: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue or rotate a receiver token
    Issue {
        username: String,
        /// free, silver or gold
        #[arg(long, default_value = "free")]
        plan: String,
        #[arg(long)]
        email: Option<String>,
        /// Daily quota override: a number or "unlimited"
        #[arg(long)]
        quota: Option<Allowance>,
        /// Validity in months of 30 days
        #[arg(long)]
        months: Option<u32>,
    },
    /// List all identities
    Users,
    /// Show the most recent signals
    Signals {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Show the most recent trades
    Trades {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Subscribe a receiver to a sender
    Follow { receiver: String, sender: String },
    /// Remove a subscription
    Unfollow { receiver: String, sender: String },
    /// Grant a temporary plan upgrade
    Boost {
        username: String,
        #[arg(long = "to")]
        boost_to: String,
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
    /// Revoke a boost by ID
    RevokeBoost { id: i64 },
    /// Disable a receiver; its token stops resolving
    Deactivate { username: String },
    /// Show today's quota usage for a user
    Usage { username: String },
    /// Create the sender identity, or rotate its token
    Sender {
        #[arg(long)]
        rotate: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let pool = signal_rs::db::connect(&cli.db).await?;
    signal_rs::db::init_schema(&pool).await?;

    let identities = IdentityStore::new(pool.clone(), &cli.sender);
    let ledger = QuotaLedger::new(pool.clone());

    match cli.command {
        Commands::Issue {
            username,
            plan,
            email,
            quota,
            months,
        } => {
            let plan = Plan::parse(&plan)
                .ok_or_else(|| anyhow::anyhow!("unknown plan: {}", plan))?;

            let issued = identities
                .issue_or_update(IssueRequest {
                    username,
                    email,
                    plan,
                    quota_override: quota,
                    months_valid: months,
                })
                .await?;

            let daily_quota = ledger.effective_quota_at(&issued.identity, Utc::now()).await?;
            println!("✓ Token issued for {}", issued.identity.username);
            println!("  Plan:        {}", issued.identity.plan);
            println!("  Daily quota: {}", daily_quota);
            if let Some(expires_at) = issued.identity.expires_at {
                println!("  Expires:     {}", expires_at.to_rfc3339());
            }
            println!("  Token:       {}", issued.token);
        }
        Commands::Users => {
            let users = identities.list().await?;

            if users.is_empty() {
                println!("No users found.");
            } else {
                println!(
                    "{:<6} {:<20} {:<28} {:<8} {:<10} {:<8}",
                    "ID", "Username", "Email", "Plan", "Override", "Active"
                );
                println!("{:-<84}", "");

                for user in &users {
                    println!(
                        "{:<6} {:<20} {:<28} {:<8} {:<10} {:<8}",
                        user.id,
                        user.username,
                        user.email.as_deref().unwrap_or("-"),
                        user.plan,
                        user.quota_override
                            .map(|q| q.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                        if user.is_active { "yes" } else { "no" },
                    );
                }

                println!("\nTotal: {} user(s)", users.len());
            }
        }
        Commands::Signals { limit } => {
            let signals = SignalStore::new(pool.clone()).recent(limit).await?;

            if signals.is_empty() {
                println!("No signals found.");
            } else {
                println!(
                    "{:<6} {:<10} {:<10} {:>8} {:>8} {:>8} {:<25}",
                    "ID", "Symbol", "Action", "SL", "TP", "Lot", "Created At"
                );
                println!("{:-<81}", "");

                for signal in &signals {
                    println!(
                        "{:<6} {:<10} {:<10} {:>8} {:>8} {:>8} {:<25}",
                        signal.id,
                        signal.symbol,
                        signal.action,
                        signal.sl_pips,
                        signal.tp_pips,
                        signal.lot_size,
                        signal.created_at.to_rfc3339(),
                    );
                }
            }
        }
        Commands::Trades { limit } => {
            let trades = TradeStore::new(pool.clone()).list(None, limit).await?;

            if trades.is_empty() {
                println!("No trades found.");
            } else {
                println!(
                    "{:<6} {:<8} {:<10} {:<6} {:>10} {:>10} {:>8} {:>10}",
                    "ID", "User", "Symbol", "Side", "Entry", "Exit", "Volume", "PnL"
                );
                println!("{:-<74}", "");

                for trade in &trades {
                    println!(
                        "{:<6} {:<8} {:<10} {:<6} {:>10} {:>10} {:>8} {:>10}",
                        trade.id,
                        trade.identity_id,
                        trade.symbol,
                        trade.side,
                        trade.entry_price,
                        trade.exit_price.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
                        trade.volume,
                        trade.pnl.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
                    );
                }
            }
        }
        Commands::Follow { receiver, sender } => {
            let follower = identities.require_username(&receiver).await?;
            let followed = identities.require_username(&sender).await?;

            identities.follow(follower.id, followed.id).await?;
            println!("✓ {} now follows {}", follower.username, followed.username);
        }
        Commands::Unfollow { receiver, sender } => {
            let follower = identities.require_username(&receiver).await?;
            let followed = identities.require_username(&sender).await?;

            identities.unfollow(follower.id, followed.id).await?;
            println!("✓ {} no longer follows {}", follower.username, followed.username);
        }
        Commands::Boost {
            username,
            boost_to,
            days,
        } => {
            let plan = Plan::parse(&boost_to)
                .ok_or_else(|| anyhow::anyhow!("unknown plan: {}", boost_to))?;
            let identity = identities.require_username(&username).await?;

            let boost = ledger.grant_boost(identity.id, plan, days, Utc::now()).await?;
            println!(
                "✓ {} boosted to {} until {}",
                identity.username,
                boost.boost_to,
                boost.end_at.to_rfc3339()
            );
        }
        Commands::RevokeBoost { id } => {
            ledger.revoke_boost(id).await?;
            println!("✓ Boost {} revoked", id);
        }
        Commands::Deactivate { username } => {
            identities.deactivate(&username).await?;
            println!("✓ {} deactivated", username);
        }
        Commands::Usage { username } => {
            let identity = identities.require_username(&username).await?;
            let snapshot = ledger.snapshot_at(&identity, Utc::now()).await?;

            println!("{} ({})", identity.username, snapshot.plan);
            println!("  Daily quota: {}", snapshot.daily_quota);
            println!("  Used today:  {}", snapshot.used_today);
            println!("  Remaining:   {}", snapshot.remaining);
        }
        Commands::Sender { rotate } => match identities.ensure_sender(rotate).await? {
            Some(issued) => {
                println!("✓ Sender {} ready", issued.identity.username);
                println!("  Token: {}", issued.token);
            }
            None => {
                println!("Sender {} already exists; pass --rotate for a new token", cli.sender);
            }
        },
    }

    Ok(())
}
