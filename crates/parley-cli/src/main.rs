//! `parley`: command-line client for a Parley server.
//!
//! # Usage
//!
//! ```
//! parley --url http://localhost:8080 --user alice --password secret requests
//! parley --config ~/.config/parley/cli.toml available --subject Math --topic Algebra
//! ```

mod client;

use std::{fmt::Write as _, path::PathBuf, time::Duration};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use clap::{Args as ClapArgs, Parser, Subcommand};
use client::{ApiClient, ApiConfig, Candidate, RequestView};
use parley_core::{
  application::{ApplicationStatus, ExpertApplication, Expertise, NewApplication},
  notify::Notification,
  presence::{TopicQuery, TopicTag},
  request::{RequestStatus, Slot},
  skill::Skill,
};
use serde::Deserialize;
use serde_json::json;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "parley", about = "Command-line client for the Parley API")]
struct Args {
  /// Path to a TOML config file (url, username, password).
  #[arg(short, long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Base URL of the parley server (default: http://localhost:8080).
  #[arg(long, env = "PARLEY_URL")]
  url: Option<String>,

  /// API username.
  #[arg(long, env = "PARLEY_USER")]
  user: Option<String>,

  /// API password (plaintext).
  #[arg(long, env = "PARLEY_PASSWORD")]
  password: Option<String>,

  /// Print raw JSON instead of summaries.
  #[arg(long, global = true)]
  json: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
struct TopicArgs {
  #[arg(long)]
  subject:   String,
  #[arg(long)]
  topic:     String,
  #[arg(long)]
  sub_topic: Option<String>,
}

impl TopicArgs {
  fn query(self) -> TopicQuery {
    let query = TopicQuery::new(self.subject, self.topic);
    match self.sub_topic {
      Some(sub) => query.with_sub_topic(sub),
      None => query,
    }
  }
}

#[derive(ClapArgs, Debug)]
struct ApplicationArgs {
  #[arg(long, value_parser = parse_expertise)]
  expertise: Expertise,
  /// `class:subject:topic`, repeatable.
  #[arg(long = "skill", value_parser = parse_skill, required = true)]
  skills:    Vec<Skill>,
  /// Supporting document reference, repeatable.
  #[arg(long = "document")]
  documents: Vec<String>,
}

impl ApplicationArgs {
  fn into_input(self) -> NewApplication {
    NewApplication {
      expertise: self.expertise,
      skills:    self.skills,
      documents: self.documents,
    }
  }
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Apply to become an expert.
  Apply(ApplicationArgs),
  /// Replace a previously submitted application.
  Resubmit {
    id: Uuid,
    #[command(flatten)]
    application: ApplicationArgs,
  },
  /// List applications (your own, or all of them as an operator).
  Applications {
    #[arg(long, value_parser = parse_application_status)]
    status: Option<ApplicationStatus>,
  },
  /// Approve an application (operators only).
  Approve { id: Uuid },
  /// Reject an application (operators only).
  RejectApplication {
    id:     Uuid,
    #[arg(long)]
    reason: Option<String>,
  },
  /// Show an expert's activation countdown.
  Activation { user_id: Uuid },
  /// List experts online right now for a topic.
  Available(TopicArgs),
  /// Send a tutoring request to one available expert.
  Dispatch {
    candidate: Uuid,
    #[command(flatten)]
    topic:     TopicArgs,
    #[arg(long)]
    note:      Option<String>,
  },
  /// Open an interview request for an operator to assign.
  Interview {
    #[command(flatten)]
    topic: TopicArgs,
    #[arg(long)]
    note:  Option<String>,
  },
  /// List requests you are party to.
  Requests {
    #[arg(long, value_parser = parse_request_status)]
    status: Option<RequestStatus>,
  },
  /// Show one request.
  Show { id: Uuid },
  /// Assign an interview to an expert (operators only).
  Assign { id: Uuid, respondent: Uuid },
  /// Accept a request addressed to you.
  Accept { id: Uuid },
  /// Reject a request addressed to you.
  Reject {
    id:     Uuid,
    #[arg(long)]
    reason: Option<String>,
  },
  /// Propose time slots: `2024-03-04T10:00:00Z/60`, repeatable.
  Propose {
    id:    Uuid,
    #[arg(value_parser = parse_slot, required = true)]
    slots: Vec<Slot>,
  },
  /// Answer a proposal with different slots.
  Counter {
    id:    Uuid,
    #[arg(value_parser = parse_slot, required = true)]
    slots: Vec<Slot>,
  },
  /// Accept one of the counterparty's slots (the only one if omitted).
  AcceptSlot {
    id:    Uuid,
    #[arg(long)]
    start: Option<DateTime<Utc>>,
  },
  /// Turn down every proposed slot.
  Decline { id: Uuid },
  /// Mark a scheduled session as held.
  Complete { id: Uuid },
  /// Cancel a request.
  Cancel { id: Uuid },
  /// Rate a completed session.
  Rate {
    id:      Uuid,
    #[arg(value_parser = clap::value_parser!(u8).range(1..=5))]
    stars:   u8,
    #[arg(long)]
    comment: Option<String>,
  },
  /// Go online for the given `subject:topic[:sub_topic]` tags.
  Connect {
    #[arg(value_parser = parse_topic_tag)]
    topics: Vec<TopicTag>,
  },
  /// Drop one connection.
  Disconnect,
  /// Print notifications as they arrive.
  Watch {
    #[arg(long, default_value_t = 25)]
    wait_secs: u64,
  },
}

// ─── Config file ──────────────────────────────────────────────────────────────

/// Shape of the optional TOML config file.
#[derive(Deserialize, Default)]
struct ConfigFile {
  #[serde(default)]
  url:      String,
  #[serde(default)]
  username: String,
  #[serde(default)]
  password: String,
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy(),
    )
    .init();

  let args = Args::parse();

  let file_cfg: ConfigFile = if let Some(path) = &args.config {
    let raw = std::fs::read_to_string(path)
      .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&raw).context("parsing config file")?
  } else {
    ConfigFile::default()
  };

  // CLI flags override config file, which overrides defaults.
  let api_config = ApiConfig {
    base_url: args
      .url
      .or_else(|| (!file_cfg.url.is_empty()).then(|| file_cfg.url.clone()))
      .unwrap_or_else(|| "http://localhost:8080".to_string()),
    username: args
      .user
      .or_else(|| (!file_cfg.username.is_empty()).then(|| file_cfg.username.clone()))
      .unwrap_or_default(),
    password: args
      .password
      .or_else(|| (!file_cfg.password.is_empty()).then(|| file_cfg.password.clone()))
      .unwrap_or_default(),
  };

  let client = ApiClient::new(api_config)?;
  let out = Output { json: args.json };
  run(&client, out, args.command).await
}

async fn run(client: &ApiClient, out: Output, command: Command) -> Result<()> {
  match command {
    Command::Apply(application) => {
      let app = client.submit_application(&application.into_input()).await?;
      out.applications(&[app])
    }
    Command::Resubmit { id, application } => {
      let app = client.resubmit_application(id, &application.into_input()).await?;
      out.applications(&[app])
    }
    Command::Applications { status } => out.applications(&client.list_applications(status).await?),
    Command::Approve { id } => out.applications(&[client.approve(id).await?]),
    Command::RejectApplication { id, reason } => {
      out.applications(&[client.reject_application(id, reason).await?])
    }
    Command::Activation { user_id } => {
      let view = client.activation(user_id).await?;
      if out.json {
        return print_json(&view);
      }
      match (view.is_active, view.remaining(Utc::now())) {
        (true, _) => println!("{user_id} is active"),
        (false, Some(left)) => println!("{user_id} activates in {}s", left.num_seconds().max(0)),
        (false, None) => println!("{user_id} has no pending activation"),
      }
      Ok(())
    }
    Command::Available(topic) => out.candidates(&client.available(&topic.query()).await?),
    Command::Dispatch { candidate, topic, note } => {
      out.requests(&[client.dispatch(candidate, &topic.query(), note).await?])
    }
    Command::Interview { topic, note } => {
      out.requests(&[client.create_interview(&topic.query(), note).await?])
    }
    Command::Requests { status } => out.requests(&client.list_requests(status).await?),
    Command::Show { id } => out.requests(&[client.get_request(id).await?]),
    Command::Assign { id, respondent } => {
      out.requests(&[client.command(id, "assign", json!({ "respondent": respondent })).await?])
    }
    Command::Accept { id } => out.requests(&[client.command(id, "accept", json!({})).await?]),
    Command::Reject { id, reason } => {
      out.requests(&[client.command(id, "reject", json!({ "reason": reason })).await?])
    }
    Command::Propose { id, slots } => out.requests(&[client.propose(id, slots, false).await?]),
    Command::Counter { id, slots } => out.requests(&[client.propose(id, slots, true).await?]),
    Command::AcceptSlot { id, start } => {
      out.requests(&[client.command(id, "accept-slot", json!({ "start": start })).await?])
    }
    Command::Decline { id } => {
      out.requests(&[client.command(id, "decline-slots", json!({})).await?])
    }
    Command::Complete { id } => out.requests(&[client.command(id, "complete", json!({})).await?]),
    Command::Cancel { id } => out.requests(&[client.command(id, "cancel", json!({})).await?]),
    Command::Rate { id, stars, comment } => {
      let body = json!({ "stars": stars, "comment": comment });
      out.requests(&[client.command(id, "rate", body).await?])
    }
    Command::Connect { topics } => {
      println!("{} open connection(s)", client.connect(topics).await?);
      Ok(())
    }
    Command::Disconnect => {
      println!("{} open connection(s)", client.disconnect().await?);
      Ok(())
    }
    Command::Watch { wait_secs } => watch(client, out, wait_secs).await,
  }
}

/// Long-poll forever, backing off briefly after a failed poll.
async fn watch(client: &ApiClient, out: Output, wait_secs: u64) -> Result<()> {
  loop {
    match client.next_notification(wait_secs).await {
      Ok(Some(notification)) => out.notification(&notification)?,
      Ok(None) => {}
      Err(err) => {
        tracing::warn!(error = %err, "notification poll failed");
        tokio::time::sleep(Duration::from_secs(5)).await;
      }
    }
  }
}

// ─── Output ───────────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
struct Output {
  json: bool,
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

impl Output {
  fn applications(self, apps: &[ExpertApplication]) -> Result<()> {
    if self.json {
      return print_json(&apps);
    }
    for app in apps {
      let skills: Vec<_> = app
        .skills
        .iter()
        .map(|s| format!("{}/{}/{}", s.class, s.subject, s.topic))
        .collect();
      println!(
        "{}  {:<8}  {:?}  by {}  [{}]",
        app.application_id,
        format!("{:?}", app.status()).to_lowercase(),
        app.expertise,
        app.applicant_id,
        skills.join(", ")
      );
    }
    Ok(())
  }

  fn candidates(self, found: &[Candidate]) -> Result<()> {
    if self.json {
      let rows: Vec<_> = found
        .iter()
        .map(|c| json!({ "user_id": c.user_id, "topics": c.topics, "since": c.since }))
        .collect();
      return print_json(&rows);
    }
    if found.is_empty() {
      println!("no experts available");
    }
    for c in found {
      println!("{}  online since {}", c.user_id, c.since.format("%Y-%m-%d %H:%M:%S"));
    }
    Ok(())
  }

  fn requests(self, views: &[RequestView]) -> Result<()> {
    if self.json {
      let rows: Vec<_> = views
        .iter()
        .map(|v| {
          let mut value = serde_json::to_value(&v.request)?;
          value["effective_status"] = json!(v.effective_status);
          Ok(value)
        })
        .collect::<Result<_, serde_json::Error>>()?;
      return print_json(&rows);
    }
    for view in views {
      println!("{}", describe_request(view));
    }
    Ok(())
  }

  fn notification(self, notification: &Notification) -> Result<()> {
    if self.json {
      return print_json(notification);
    }
    let line = match notification {
      Notification::ApplicationApproved { application_id, activation_at } => {
        format!("application {application_id} approved; active from {activation_at}")
      }
      Notification::ApplicationRejected { application_id, reason } => format!(
        "application {application_id} rejected{}",
        reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default()
      ),
      Notification::ExpertActivated { activation_at } => {
        format!("you are an active expert as of {activation_at}")
      }
      Notification::RequestReceived { request_id, requester_id } => {
        format!("new request {request_id} from {requester_id}")
      }
      Notification::RequestUpdated { request_id, status } => {
        format!("request {request_id} is now {status}")
      }
    };
    println!("{line}");
    Ok(())
  }
}

fn describe_request(view: &RequestView) -> String {
  let request = &view.request;
  let mut line = format!(
    "{}  {:<17}  {}/{}",
    request.request_id,
    view.effective_status.as_str(),
    request.topic.subject,
    request.topic.topic
  );
  if let Some(slot) = request.state.confirmed_slot() {
    let _ = write!(line, "  at {} ({}m)", slot.start, slot.duration_minutes);
  } else if let Some(proposal) = request.state.current_proposal() {
    let starts: Vec<_> = proposal.slots.iter().map(|s| s.start.to_rfc3339()).collect();
    let _ = write!(line, "  proposed: {}", starts.join(", "));
  }
  line
}

// ─── Argument parsers ─────────────────────────────────────────────────────────

fn parse_slot(raw: &str) -> Result<Slot> {
  let (start, minutes) = raw
    .split_once('/')
    .ok_or_else(|| anyhow!("expected <rfc3339 start>/<minutes>, got {raw:?}"))?;
  let start: DateTime<Utc> = start.parse().context("invalid slot start")?;
  let minutes: u32 = minutes.parse().context("invalid slot duration")?;
  Ok(Slot::new(start, minutes))
}

fn parse_skill(raw: &str) -> Result<Skill> {
  match raw.splitn(3, ':').collect::<Vec<_>>().as_slice() {
    [class, subject, topic] => Ok(Skill::new(*class, *subject, *topic)),
    _ => Err(anyhow!("expected class:subject:topic, got {raw:?}")),
  }
}

fn parse_topic_tag(raw: &str) -> Result<TopicTag> {
  let mut parts = raw.splitn(3, ':');
  match (parts.next(), parts.next(), parts.next()) {
    (Some(subject), Some(topic), sub_topic) if !subject.is_empty() && !topic.is_empty() => {
      Ok(TopicTag {
        subject:   subject.to_string(),
        topic:     topic.to_string(),
        sub_topic: sub_topic.map(str::to_string),
      })
    }
    _ => Err(anyhow!("expected subject:topic[:sub_topic], got {raw:?}")),
  }
}

fn parse_expertise(raw: &str) -> Result<Expertise> {
  serde_json::from_value(json!(raw.to_lowercase()))
    .map_err(|_| anyhow!("expertise must be tutor or interviewer"))
}

fn parse_application_status(raw: &str) -> Result<ApplicationStatus> {
  serde_json::from_value(json!(raw.to_lowercase()))
    .map_err(|_| anyhow!("status must be pending, approved or rejected"))
}

fn parse_request_status(raw: &str) -> Result<RequestStatus> {
  serde_json::from_value(json!(raw.to_lowercase().replace('-', "_")))
    .map_err(|_| anyhow!("unknown request status {raw:?}"))
}
