//! ticketq CLI: operator and worker interface to the ticket engine.

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use ticketq::config::{Config, Policy};
use ticketq::db::Db;
use ticketq::engine::{Cascade, ExpirationResult, Sweeper, Workflow};
use ticketq::model::*;
use ticketq::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "ticketq", about = "Leasing ticket scheduler for autonomous workers")]
struct Cli {
    /// Who is acting, for human-facing operations (review, flags, closing)
    #[arg(long, global = true, default_value = "operator")]
    human: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the lease sweeper until interrupted
    Serve,
    /// Project operations
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },
    /// Ticket operations
    Ticket {
        #[command(subcommand)]
        action: TicketAction,
    },
    /// Claim a ticket for a worker
    Claim {
        key: TicketKey,
        #[arg(long)]
        worker: Option<String>,
        /// Lease length in seconds (default from policy)
        #[arg(long)]
        duration_secs: Option<i64>,
    },
    /// Renew a lease, or claim the ticket again if it is free
    Resume {
        key: TicketKey,
        #[arg(long)]
        worker: Option<String>,
        #[arg(long)]
        duration_secs: Option<i64>,
    },
    /// Give up a lease
    Release {
        key: TicketKey,
        #[arg(long)]
        worker: Option<String>,
        #[arg(long, default_value = "released by worker")]
        reason: String,
    },
    /// Submit work for review
    Complete {
        key: TicketKey,
        #[arg(long)]
        worker: Option<String>,
        #[arg(long)]
        summary: Option<String>,
        /// Accept immediately, skipping review
        #[arg(long)]
        accept: bool,
    },
    /// Accept reviewed work
    Accept { key: TicketKey },
    /// Send reviewed work back
    Reject {
        key: TicketKey,
        #[arg(long)]
        reason: String,
    },
    /// Escalate a ticket to a human
    Flag {
        key: TicketKey,
        /// needs_input | decision | blocked | error | review
        #[arg(long)]
        reason: FlagReason,
        #[arg(long)]
        message: String,
        /// Flag on behalf of this worker instead of the human actor
        #[arg(long)]
        worker: Option<String>,
    },
    /// Answer a flagged ticket
    Respond {
        key: TicketKey,
        #[arg(long)]
        message: String,
    },
    /// Close a ticket with a resolution
    Close {
        key: TicketKey,
        /// done | wont_do | duplicate | invalid | obsolete
        #[arg(long)]
        resolution: Resolution,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Reopen a closed ticket
    Reopen { key: TicketKey },
    /// Publish a draft
    Publish { key: TicketKey },
    /// Checklist operations
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Dependency operations
    Dep {
        #[command(subcommand)]
        action: DepAction,
    },
    /// Expire leases that have run out
    Expire {
        /// Only this ticket
        key: Option<TicketKey>,
        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Create a project
    Create { key: String, name: String },
}

#[derive(Subcommand)]
enum TicketAction {
    /// Create a ticket
    Create {
        project: String,
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "medium")]
        priority: Priority,
        #[arg(long, default_value = "medium")]
        complexity: Complexity,
        #[arg(long = "type", default_value = "task")]
        ticket_type: TicketType,
        #[arg(long)]
        parent: Option<TicketKey>,
        /// May be repeated
        #[arg(long = "depends-on")]
        depends_on: Vec<TicketKey>,
        #[arg(long)]
        max_retries: Option<u32>,
        /// Create as a draft
        #[arg(long)]
        draft: bool,
    },
    /// Show a ticket
    Show { key: TicketKey },
    /// List tickets
    List {
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        status: Option<Status>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Claimable tickets, in the order they should be picked up
    Ready {
        #[arg(long)]
        project: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Activity log of a ticket
    History { key: TicketKey },
}

#[derive(Subcommand)]
enum TaskAction {
    /// Append a checklist item
    Add { key: TicketKey, description: String },
    /// Mark a checklist item done
    Done { key: TicketKey, position: i64 },
    /// Show the checklist
    List { key: TicketKey },
}

#[derive(Subcommand)]
enum DepAction {
    /// KEY depends on DEPENDS_ON
    Add { key: TicketKey, depends_on: TicketKey },
    /// Remove a dependency
    Rm { key: TicketKey, depends_on: TicketKey },
    /// Show dependencies and dependents
    List { key: TicketKey },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig::from(&config))?;

    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;
    let mut workflow = Workflow::new(db);
    workflow.default_max_retries = config.policy.max_retries;

    let policy = &config.policy;
    let human = Actor::human(&cli.human);
    let worker = |w: Option<String>| w.unwrap_or_else(|| policy.default_worker_id.clone());
    let lease = |secs: Option<i64>| {
        secs.map(chrono::Duration::seconds)
            .unwrap_or_else(|| policy.claim_duration())
    };

    match cli.command {
        Command::Serve => cmd_serve(workflow, policy).await,
        Command::Project {
            action: ProjectAction::Create { key, name },
        } => {
            let project = workflow.create_project(&key, &name).await?;
            println!("Created project {} ({})", project.key, project.name);
            Ok(())
        }
        Command::Ticket { action } => cmd_ticket(&workflow, &human, action).await,
        Command::Claim {
            key,
            worker: w,
            duration_secs,
        } => {
            let (ticket, claim) = workflow.claim(&key, &worker(w), lease(duration_secs)).await?;
            println!(
                "{} claimed by {} until {} (claim {})",
                ticket.key, claim.worker_id, claim.expires_at, claim.id
            );
            Ok(())
        }
        Command::Resume {
            key,
            worker: w,
            duration_secs,
        } => {
            let (ticket, claim) = workflow.resume(&key, &worker(w), lease(duration_secs)).await?;
            println!("{} held by {} until {}", ticket.key, claim.worker_id, claim.expires_at);
            Ok(())
        }
        Command::Release {
            key,
            worker: w,
            reason,
        } => {
            let ticket = workflow.release(&key, &worker(w), &reason).await?;
            println!("{} released ({}, retry {})", ticket.key, ticket.status, ticket.retry_count);
            Ok(())
        }
        Command::Complete {
            key,
            worker: w,
            summary,
            accept,
        } => {
            let (ticket, cascade) = workflow
                .complete(&key, &worker(w), summary.as_deref(), accept)
                .await?;
            println!("{} is now {}", ticket.key, ticket.status);
            print_cascade(&cascade);
            Ok(())
        }
        Command::Accept { key } => {
            let (ticket, cascade) = workflow.accept(&key, &human).await?;
            println!("{} accepted", ticket.key);
            print_cascade(&cascade);
            Ok(())
        }
        Command::Reject { key, reason } => {
            let ticket = workflow.reject(&key, &human, &reason).await?;
            println!("{} rejected, now {} (retry {})", ticket.key, ticket.status, ticket.retry_count);
            Ok(())
        }
        Command::Flag {
            key,
            reason,
            message,
            worker: w,
        } => {
            let actor = w.map(Actor::agent).unwrap_or_else(|| human.clone());
            let ticket = workflow.flag(&key, &actor, reason, &message).await?;
            println!("{} flagged ({reason})", ticket.key);
            Ok(())
        }
        Command::Respond { key, message } => {
            let ticket = workflow.respond(&key, &human, &message).await?;
            println!("{} is now {}", ticket.key, ticket.status);
            Ok(())
        }
        Command::Close {
            key,
            resolution,
            reason,
        } => {
            let (ticket, cascade) = workflow
                .close(&key, &human, resolution, reason.as_deref())
                .await?;
            println!("{} closed as {resolution}", ticket.key);
            print_cascade(&cascade);
            Ok(())
        }
        Command::Reopen { key } => {
            let ticket = workflow.reopen(&key, &human).await?;
            println!("{} reopened as {}", ticket.key, ticket.status);
            Ok(())
        }
        Command::Publish { key } => {
            let ticket = workflow.publish(&key, &human).await?;
            println!("{} published as {}", ticket.key, ticket.status);
            Ok(())
        }
        Command::Task { action } => cmd_task(&workflow, &human, action).await,
        Command::Dep { action } => cmd_dep(&workflow, &human, action).await,
        Command::Expire { key, dry_run } => {
            let results = match key {
                Some(key) => vec![workflow.expire_one(&key, dry_run).await?],
                None => workflow.expire_all(dry_run).await?.results,
            };
            if results.is_empty() {
                println!("No expired claims.");
            }
            for r in &results {
                print_expiration(r, dry_run);
            }
            Ok(())
        }
    }
}

async fn cmd_serve(workflow: Workflow, policy: &Policy) -> anyhow::Result<()> {
    let sweeper = Sweeper::new(workflow, policy.sweep_interval());

    let s = sweeper.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        s.shutdown();
    });

    sweeper
        .run(|sweep| {
            for r in &sweep.results {
                print_expiration(r, sweep.dry_run);
            }
        })
        .await?;
    Ok(())
}

async fn cmd_ticket(workflow: &Workflow, human: &Actor, action: TicketAction) -> anyhow::Result<()> {
    match action {
        TicketAction::Create {
            project,
            title,
            description,
            priority,
            complexity,
            ticket_type,
            parent,
            depends_on,
            max_retries,
            draft,
        } => {
            let mut new = NewTicket::new(project, title)
                .description(description)
                .priority(priority)
                .complexity(complexity)
                .ticket_type(ticket_type);
            if let Some(parent) = parent {
                new = new.parent(parent);
            }
            for dep in depends_on {
                new = new.depends_on(dep);
            }
            if let Some(n) = max_retries {
                new = new.max_retries(n);
            }
            if draft {
                new = new.draft();
            }
            let ticket = workflow.create_ticket(human, new).await?;
            println!("Created: {} (status: {})", ticket.key, ticket.status);
        }
        TicketAction::Show { key } => {
            let ticket = workflow.ticket(&key).await?;
            println!("Key:         {}", ticket.key);
            println!("Title:       {}", ticket.title);
            println!("Type:        {}", ticket.ticket_type);
            println!("Status:      {}", ticket.status);
            if let Some(resolution) = ticket.resolution {
                println!("Resolution:  {resolution}");
            }
            println!("Priority:    {}", ticket.priority);
            println!("Complexity:  {}", ticket.complexity);
            println!("Retries:     {}/{}", ticket.retry_count, ticket.max_retries);
            if let Some(reason) = ticket.flag_reason {
                println!(
                    "Flag:        {reason}: {}",
                    ticket.flag_message.as_deref().unwrap_or("-")
                );
            }
            if let Some(claim) = workflow.active_claim(&key).await? {
                println!("Claimed by:  {} until {}", claim.worker_id, claim.expires_at);
            }
            println!("Created:     {}", ticket.created_at);
            println!("Updated:     {}", ticket.updated_at);
            if let Some(completed) = ticket.completed_at {
                println!("Completed:   {completed}");
            }
            if !ticket.description.is_empty() {
                println!("---\n{}", ticket.description);
            }
        }
        TicketAction::List {
            project,
            status,
            limit,
        } => {
            let tickets = workflow
                .tickets(&TicketFilter {
                    project: project.map(|p| p.to_ascii_uppercase()),
                    status,
                    limit: Some(limit),
                    ..Default::default()
                })
                .await?;
            print_tickets(&tickets);
        }
        TicketAction::Ready { project, limit } => {
            let tickets = workflow.ready(project.as_deref(), limit).await?;
            print_tickets(&tickets);
        }
        TicketAction::History { key } => {
            for entry in workflow.history(&key).await? {
                println!(
                    "{}  {:<18}  {:<24}  {}",
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.action.as_str(),
                    entry.actor.to_string(),
                    entry.summary
                );
            }
        }
    }
    Ok(())
}

async fn cmd_task(workflow: &Workflow, human: &Actor, action: TaskAction) -> anyhow::Result<()> {
    match action {
        TaskAction::Add { key, description } => {
            let task = workflow.add_task(&key, human, &description).await?;
            println!("{key} task {} added", task.position);
        }
        TaskAction::Done { key, position } => {
            workflow.complete_task(&key, human, position).await?;
            println!("{key} task {position} done");
        }
        TaskAction::List { key } => {
            for task in workflow.tasks(&key).await? {
                let mark = if task.done { "x" } else { " " };
                println!("[{mark}] {}. {}", task.position, task.description);
            }
        }
    }
    Ok(())
}

async fn cmd_dep(workflow: &Workflow, human: &Actor, action: DepAction) -> anyhow::Result<()> {
    match action {
        DepAction::Add { key, depends_on } => {
            let ticket = workflow.add_dependency(&key, &depends_on, human).await?;
            println!("{key} depends on {depends_on} ({})", ticket.status);
        }
        DepAction::Rm { key, depends_on } => {
            let ticket = workflow.remove_dependency(&key, &depends_on, human).await?;
            println!("{key} no longer depends on {depends_on} ({})", ticket.status);
        }
        DepAction::List { key } => {
            println!("Depends on:");
            print_tickets(&workflow.dependencies(&key).await?);
            println!("Depended on by:");
            print_tickets(&workflow.dependents(&key).await?);
        }
    }
    Ok(())
}

fn print_tickets(tickets: &[Ticket]) {
    if tickets.is_empty() {
        println!("No tickets found.");
        return;
    }
    println!(
        "{:<12}  {:<8}  {:<8}  {:<8}  TITLE",
        "KEY", "STATUS", "PRIORITY", "RETRIES"
    );
    println!("{}", "-".repeat(80));
    for t in tickets {
        println!(
            "{:<12}  {:<8}  {:<8}  {:<8}  {}",
            t.key.to_string(),
            t.status.as_str(),
            t.priority.as_str(),
            format!("{}/{}", t.retry_count, t.max_retries),
            t.title
        );
    }
    println!("\n{} ticket(s)", tickets.len());
}

fn print_cascade(cascade: &Cascade) {
    for key in &cascade.unblocked {
        println!("  unblocked {key}");
    }
    if let Some(parent) = &cascade.parent_ready {
        println!("  parent {parent} is ready");
    }
}

fn print_expiration(r: &ExpirationResult, dry_run: bool) {
    let key = r
        .ticket
        .as_ref()
        .map(|k| k.to_string())
        .unwrap_or_else(|| "?".to_string());
    let verb = if dry_run { "would expire" } else { "expired" };
    match (&r.error, r.new_status) {
        (Some(err), _) => println!("{key}: claim {} failed: {err}", r.claim_id),
        (None, Some(status)) => println!(
            "{key}: {verb} claim of {} -> {status}{}",
            r.worker_id,
            if r.escalated { " (escalated)" } else { "" }
        ),
        (None, None) => println!("{key}: {verb} claim of {}", r.worker_id),
    }
}
