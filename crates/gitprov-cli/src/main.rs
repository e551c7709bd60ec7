//! gitprov CLI - inspect and drive the provider configured for a repository.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use gitprov::cache::DEFAULT_TTL;
use gitprov::{
    detect_remote, remote_url_from_git, CreateIssueRequest, CreateMilestoneRequest,
    CreatePullRequestRequest, GitProvider, Issue, IssueFilter, IssueType, Milestone, Priority,
    ProviderConfig, ProviderFactory, ProviderKind, PullRequest, PullRequestFilter,
    PullRequestStateFilter, StateFilter, TtlCache,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gitprov")]
#[command(author, version, about = "Issues, pull requests and milestones on any git host", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file
    #[arg(short, long, global = true, default_value = "gitprov.yaml")]
    config: PathBuf,

    /// Provider to use instead of the configured or detected one
    #[arg(short, long, global = true)]
    provider: Option<ProviderKind>,

    /// Remote URL to use instead of `remote.origin.url`
    #[arg(long, global = true)]
    remote: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which provider the remote belongs to
    Detect,

    /// Check that a provider can be built and is authenticated
    Status,

    /// Work with issues
    Issue {
        #[command(subcommand)]
        command: IssueCommands,
    },

    /// Work with pull requests
    Pr {
        #[command(subcommand)]
        command: PrCommands,
    },

    /// Work with milestones
    Milestone {
        #[command(subcommand)]
        command: MilestoneCommands,
    },
}

#[derive(Subcommand)]
enum IssueCommands {
    /// Create an issue
    Create {
        title: String,

        /// Issue description
        #[arg(short, long)]
        body: Option<String>,

        /// bug, task, user_story, feature or epic
        #[arg(short = 't', long = "type", default_value = "task")]
        issue_type: IssueType,

        /// P1 (most urgent) to P4
        #[arg(long)]
        priority: Option<Priority>,

        /// Extra label (repeatable)
        #[arg(short, long = "label")]
        labels: Vec<String>,

        /// Milestone id or title
        #[arg(short, long)]
        milestone: Option<String>,
    },

    /// Show one issue
    Get { id: String },

    /// List issues
    List(IssueListArgs),

    /// Close an issue
    Close { id: String },

    /// Reopen a closed issue
    Reopen { id: String },
}

#[derive(Args)]
struct IssueListArgs {
    /// open, closed or all
    #[arg(short, long, default_value = "open")]
    state: StateFilter,

    #[arg(short = 't', long = "type")]
    issue_type: Option<IssueType>,

    #[arg(short, long)]
    label: Option<String>,

    /// Milestone id or title
    #[arg(short, long)]
    milestone: Option<String>,

    #[arg(short = 'n', long, default_value = "30")]
    limit: usize,
}

#[derive(Subcommand)]
enum PrCommands {
    /// Open a pull request
    Create {
        title: String,

        #[arg(long)]
        source: String,

        #[arg(long, default_value = "main")]
        target: String,

        #[arg(short, long)]
        body: Option<String>,

        #[arg(long)]
        draft: bool,

        #[arg(short, long = "label")]
        labels: Vec<String>,

        /// Issue closed by this pull request (repeatable)
        #[arg(long = "closes")]
        closes: Vec<String>,
    },

    /// Show one pull request
    Get { id: String },

    /// List pull requests
    List {
        /// open, closed, merged or all
        #[arg(short, long, default_value = "open")]
        state: PullRequestStateFilter,

        #[arg(long)]
        source: Option<String>,

        #[arg(long)]
        target: Option<String>,

        #[arg(short = 'n', long, default_value = "30")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum MilestoneCommands {
    /// Create a milestone
    Create {
        title: String,

        #[arg(short, long)]
        description: Option<String>,

        /// Due date, YYYY-MM-DD
        #[arg(long)]
        due: Option<String>,
    },

    /// Show one milestone
    Get { id: String },

    /// List milestones
    List {
        /// open, closed or all
        #[arg(short, long, default_value = "open")]
        state: StateFilter,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let Some(command) = cli.command.as_ref() else {
        println!("gitprov - issues, pull requests and milestones on any git host");
        println!("Run with --help for usage information");
        return Ok(());
    };

    let remote = match &cli.remote {
        Some(url) => Some(url.clone()),
        None => {
            let cwd = std::env::current_dir().context("failed to read current directory")?;
            remote_url_from_git(&cwd).await
        }
    };

    if let Commands::Detect = command {
        return detect(remote.as_deref(), cli.json);
    }

    let mut config = ProviderConfig::load_from(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if cli.provider.is_some() {
        config.provider = cli.provider;
    }
    let factory = ProviderFactory::new(config).with_remote_url(remote);

    if let Commands::Status = command {
        return status(&factory).await;
    }

    let provider = match factory.create().await {
        Ok(provider) => provider,
        Err(e) => {
            eprintln!("hint: {}", e.hint());
            return Err(e.into());
        }
    };

    if let Err(e) = run(command, provider.as_ref(), cli.json).await {
        if let Some(provider_error) = e.downcast_ref::<gitprov::Error>() {
            eprintln!("hint: {}", provider_error.hint());
        }
        return Err(e);
    }
    Ok(())
}

fn detect(remote: Option<&str>, json: bool) -> anyhow::Result<()> {
    let remote = remote.context("no remote URL: pass --remote or run inside a git repository")?;
    let detected = detect_remote(remote)
        .with_context(|| format!("'{}' does not belong to a known provider", remote))?;

    if json {
        let coordinates = detected.coordinates.as_ref().map(|c| format!("{:?}", c));
        return print_json(&serde_json::json!({
            "remote": remote,
            "provider": detected.kind,
            "host": detected.host,
            "coordinates": coordinates,
        }));
    }

    println!("remote:   {}", remote);
    println!("provider: {}", detected.kind);
    println!("host:     {}", detected.host);
    match &detected.coordinates {
        Some(coordinates) => println!("coords:   {:?}", coordinates),
        None => println!("coords:   (not recognised)"),
    }
    Ok(())
}

async fn status(factory: &ProviderFactory) -> anyhow::Result<()> {
    let kind = match factory.resolve_kind() {
        Ok(kind) => kind,
        Err(e) => {
            println!("provider: none ({})", e);
            println!("hint:     {}", e.hint());
            return Ok(());
        }
    };
    println!("provider: {}", kind);

    match factory.create().await {
        Ok(_) => println!("status:   ready"),
        Err(e) => {
            println!("status:   unavailable ({})", e);
            println!("hint:     {}", e.hint());
        }
    }
    Ok(())
}

async fn run(command: &Commands, provider: &dyn GitProvider, json: bool) -> anyhow::Result<()> {
    match command {
        Commands::Issue { command } => issue(command, provider, json).await,
        Commands::Pr { command } => pull_request(command, provider, json).await,
        Commands::Milestone { command } => milestone(command, provider, json).await,
        Commands::Detect | Commands::Status => Ok(()),
    }
}

async fn issue(command: &IssueCommands, provider: &dyn GitProvider, json: bool) -> anyhow::Result<()> {
    let issue = match command {
        IssueCommands::Create {
            title,
            body,
            issue_type,
            priority,
            labels,
            milestone,
        } => {
            let request = CreateIssueRequest {
                title: title.clone(),
                body: body.clone(),
                issue_type: *issue_type,
                priority: *priority,
                labels: labels.clone(),
                milestone: milestone.clone(),
            };
            provider.create_issue(request).await?
        }
        IssueCommands::Get { id } => provider.get_issue(id).await?,
        IssueCommands::Close { id } => provider.close_issue(id).await?,
        IssueCommands::Reopen { id } => provider.reopen_issue(id).await?,
        IssueCommands::List(args) => {
            let filter = IssueFilter {
                state: Some(args.state),
                issue_type: args.issue_type,
                label: args.label.clone(),
                milestone: args.milestone.clone(),
                limit: Some(args.limit),
            };
            let issues = provider.list_issues(filter).await?;
            if json {
                return print_json(&issues);
            }
            let titles = milestone_titles(provider, &issues).await;
            for issue in &issues {
                println!("{}", issue_line(issue, &titles));
            }
            return Ok(());
        }
    };

    if json {
        return print_json(&issue);
    }
    let titles = milestone_titles(provider, std::slice::from_ref(&issue)).await;
    println!("{}", issue_line(&issue, &titles));
    println!("  {}", issue.url);
    Ok(())
}

/// Milestone titles for the milestones the issues belong to.
///
/// Issues of one list usually share a few milestones, so lookups go through a
/// cache. A failed lookup leaves the raw milestone id in the output.
async fn milestone_titles(provider: &dyn GitProvider, issues: &[Issue]) -> HashMap<String, String> {
    let mut cache: TtlCache<Milestone> = TtlCache::new();
    let mut titles = HashMap::new();

    for key in issues.iter().filter_map(|i| i.milestone.as_deref()) {
        if titles.contains_key(key) {
            continue;
        }
        match cache
            .get_or_fetch(key, DEFAULT_TTL, || provider.get_milestone(key))
            .await
        {
            Ok(milestone) => {
                titles.insert(key.to_string(), milestone.title);
            }
            Err(e) => tracing::debug!(milestone = key, error = %e, "Milestone lookup failed"),
        }
    }
    titles
}

fn issue_line(issue: &Issue, milestone_titles: &HashMap<String, String>) -> String {
    let mut line = format!(
        "{:<24} {:<7} {:<11} {}",
        issue.id.to_string(),
        format!("{:?}", issue.state).to_lowercase(),
        format!("{:?}", issue.issue_type).to_lowercase(),
        issue.title
    );
    if let Some(priority) = issue.priority {
        line.push_str(&format!(" [P{}]", priority.level()));
    }
    if let Some(milestone) = &issue.milestone {
        let title = milestone_titles.get(milestone).unwrap_or(milestone);
        line.push_str(&format!(" ({})", title));
    }
    line
}

async fn pull_request(command: &PrCommands, provider: &dyn GitProvider, json: bool) -> anyhow::Result<()> {
    let pull_request = match command {
        PrCommands::Create {
            title,
            source,
            target,
            body,
            draft,
            labels,
            closes,
        } => {
            let request = CreatePullRequestRequest {
                title: title.clone(),
                body: body.clone(),
                source_branch: source.clone(),
                target_branch: target.clone(),
                draft: *draft,
                labels: labels.clone(),
                closes: closes.clone(),
            };
            provider.create_pull_request(request).await?
        }
        PrCommands::Get { id } => provider.get_pull_request(id).await?,
        PrCommands::List {
            state,
            source,
            target,
            limit,
        } => {
            let filter = PullRequestFilter {
                state: Some(*state),
                source_branch: source.clone(),
                target_branch: target.clone(),
                limit: Some(*limit),
                ..Default::default()
            };
            let pull_requests = provider.list_pull_requests(filter).await?;
            if json {
                return print_json(&pull_requests);
            }
            for pull_request in &pull_requests {
                println!("{}", pull_request_line(pull_request));
            }
            return Ok(());
        }
    };

    if json {
        return print_json(&pull_request);
    }
    println!("{}", pull_request_line(&pull_request));
    println!("  {}", pull_request.url);
    Ok(())
}

fn pull_request_line(pull_request: &PullRequest) -> String {
    let mut line = format!(
        "{:<24} {:<7} {} -> {} {}",
        pull_request.id.to_string(),
        format!("{:?}", pull_request.state).to_lowercase(),
        pull_request.source_branch,
        pull_request.target_branch,
        pull_request.title
    );
    if pull_request.draft {
        line.push_str(" [draft]");
    }
    if !pull_request.closes_issues.is_empty() {
        let closes: Vec<String> = pull_request
            .closes_issues
            .iter()
            .map(|n| format!("#{}", n))
            .collect();
        line.push_str(&format!(" closes {}", closes.join(", ")));
    }
    line
}

async fn milestone(command: &MilestoneCommands, provider: &dyn GitProvider, json: bool) -> anyhow::Result<()> {
    let milestone = match command {
        MilestoneCommands::Create {
            title,
            description,
            due,
        } => {
            let due_date = due
                .as_deref()
                .map(|d| d.parse())
                .transpose()
                .context("due date must be YYYY-MM-DD")?;
            let request = CreateMilestoneRequest {
                title: title.clone(),
                description: description.clone(),
                due_date,
            };
            provider.create_milestone(request).await?
        }
        MilestoneCommands::Get { id } => provider.get_milestone(id).await?,
        MilestoneCommands::List { state } => {
            let milestones = provider.list_milestones(*state).await?;
            if json {
                return print_json(&milestones);
            }
            for milestone in &milestones {
                println!("{}", milestone_line(milestone));
            }
            return Ok(());
        }
    };

    if json {
        return print_json(&milestone);
    }
    println!("{}", milestone_line(&milestone));
    Ok(())
}

fn milestone_line(milestone: &Milestone) -> String {
    let mut line = format!(
        "{:<28} {:<7} {} ({}/{} closed)",
        milestone.id.to_string(),
        format!("{:?}", milestone.state).to_lowercase(),
        milestone.title,
        milestone.closed_issue_count,
        milestone.issue_count
    );
    if let Some(due) = milestone.due_date {
        line.push_str(&format!(" due {}", due));
    }
    line
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
