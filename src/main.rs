use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use messmate::{deposits, settlement, AppState, SignUp, StoreHandle};

#[derive(Parser)]
#[command(name = "messmate", about = "Shared-household ledger and settlement")]
struct Cli {
    /// SQLite database path.
    #[arg(long, default_value = "messmate.sqlite3")]
    db: PathBuf,

    /// Persisted current-household mirror; defaults next to the database.
    #[arg(long)]
    mirror: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Credentials {
    /// Email address or profile handle.
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
}

#[derive(Subcommand)]
enum Command {
    /// Create an account and its profile.
    Signup {
        #[command(flatten)]
        creds: Credentials,
        #[arg(long)]
        name: String,
        /// Human-chosen handle, unique across the system.
        #[arg(long)]
        handle: String,
    },
    /// Show the signed-in account and current household.
    Whoami {
        #[command(flatten)]
        creds: Credentials,
    },
    /// Create a household and become its manager.
    CreateMess {
        #[command(flatten)]
        creds: Credentials,
        #[arg(long)]
        name: String,
        #[arg(long)]
        secret: String,
    },
    /// Join an existing household by name and secret.
    JoinMess {
        #[command(flatten)]
        creds: Credentials,
        #[arg(long)]
        name: String,
        #[arg(long)]
        secret: String,
    },
    /// List the household roster.
    Members {
        #[command(flatten)]
        creds: Credentials,
    },
    /// Record a deposit (manager only). Negative amounts are debits.
    Deposit {
        #[command(flatten)]
        creds: Credentials,
        /// Member account id to credit or debit.
        #[arg(long)]
        member: String,
        /// Amount in cents.
        #[arg(long)]
        amount: i64,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Print the ledger, newest first.
    Ledger {
        #[command(flatten)]
        creds: Credentials,
    },
    /// Request reimbursement from another member.
    DebtRequest {
        #[command(flatten)]
        creds: Credentials,
        /// Account id of the member who owes.
        #[arg(long)]
        from: String,
        /// Amount in cents.
        #[arg(long)]
        amount: i64,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// List pending requests involving you.
    DebtList {
        #[command(flatten)]
        creds: Credentials,
    },
    /// Accept a request addressed to you; posts the ledger transfer.
    DebtAccept {
        #[command(flatten)]
        creds: Credentials,
        #[arg(long)]
        id: String,
    },
    /// Deny a request addressed to you.
    DebtDeny {
        #[command(flatten)]
        creds: Credentials,
        #[arg(long)]
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    messmate::logging::init();
    let cli = Cli::parse();

    let mirror_path = cli
        .mirror
        .clone()
        .unwrap_or_else(|| cli.db.with_extension("mirror.json"));
    let mirror = StoreHandle::file(&mirror_path).context("open mirror store")?;
    let state = AppState::open(&cli.db, mirror).await?;
    state.resolver.initialize().await;

    match cli.command {
        Command::Signup {
            creds,
            name,
            handle,
        } => {
            let account = state
                .identity
                .sign_up(SignUp {
                    email: creds.email,
                    password: creds.password,
                    name,
                    unique_id: handle,
                })
                .await?;
            println!("created account {} <{}>", account.id, account.email);
        }
        Command::Whoami { creds } => {
            let resolver = sign_in(&state, &creds).await?;
            let account = resolver
                .current_account()
                .context("no session after sign-in")?;
            println!("{} <{}>", account.display_name, account.email);
            match resolver.current_membership() {
                Some(current) => println!(
                    "household: {} ({})",
                    current.household_name,
                    current.role.as_str()
                ),
                None => println!("household: none"),
            }
        }
        Command::CreateMess {
            creds,
            name,
            secret,
        } => {
            let resolver = sign_in(&state, &creds).await?;
            let household = resolver.create_household(&name, &secret).await?;
            println!("created household {} ({})", household.name, household.id);
        }
        Command::JoinMess {
            creds,
            name,
            secret,
        } => {
            let resolver = sign_in(&state, &creds).await?;
            let household = resolver.join_household(&name, &secret).await?;
            println!("joined household {} ({})", household.name, household.id);
        }
        Command::Members { creds } => {
            let resolver = sign_in(&state, &creds).await?;
            let caller = resolver.caller()?;
            for member in messmate::household::members_of(&state.pool, &caller.household_id).await? {
                println!(
                    "{}\t{}\t{} <{}>",
                    member.account_id,
                    member.role.as_str(),
                    member.name,
                    member.email
                );
            }
        }
        Command::Deposit {
            creds,
            member,
            amount,
            date,
        } => {
            let resolver = sign_in(&state, &creds).await?;
            let caller = resolver.caller()?;
            let entry = deposits::add_entry(&state.pool, &caller, &member, amount, date).await?;
            println!(
                "recorded {} cents for {} on {}",
                entry.amount_cents, entry.member_id, entry.entry_date
            );
        }
        Command::Ledger { creds } => {
            let resolver = sign_in(&state, &creds).await?;
            let caller = resolver.caller()?;
            for entry in deposits::entries_for(&state.pool, &caller.household_id).await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    entry.entry_date, entry.member_id, entry.amount_cents, entry.id
                );
            }
        }
        Command::DebtRequest {
            creds,
            from,
            amount,
            date,
        } => {
            let resolver = sign_in(&state, &creds).await?;
            let caller = resolver.caller()?;
            let request =
                settlement::create_request(&state.pool, &caller, &from, amount, date).await?;
            println!("created request {}", request.id);
        }
        Command::DebtList { creds } => {
            let resolver = sign_in(&state, &creds).await?;
            let caller = resolver.caller()?;
            for request in
                settlement::pending_for(&state.pool, &caller.household_id, &caller.account_id)
                    .await?
            {
                println!(
                    "{}\tfrom={}\tto={}\t{} cents\t{}",
                    request.id,
                    request.from_id,
                    request.to_id,
                    request.amount_cents,
                    request.request_date
                );
            }
        }
        Command::DebtAccept { creds, id } => {
            let resolver = sign_in(&state, &creds).await?;
            let caller = resolver.caller()?;
            settlement::accept(&state.pool, &caller, &id).await?;
            println!("accepted {id}");
        }
        Command::DebtDeny { creds, id } => {
            let resolver = sign_in(&state, &creds).await?;
            let caller = resolver.caller()?;
            settlement::deny(&state.pool, &caller, &id).await?;
            println!("denied {id}");
        }
    }

    Ok(())
}

async fn sign_in(state: &AppState, creds: &Credentials) -> anyhow::Result<messmate::Resolver> {
    state
        .identity
        .sign_in(&creds.email, &creds.password)
        .await?;
    let resolver = state.resolver.clone();
    // The auth-event listener updates the resolver asynchronously; the CLI
    // needs the fresh value on the next line, so re-resolve explicitly.
    resolver.refresh().await?;
    Ok(resolver)
}
