mod client;
mod render;

use std::path::PathBuf;

use anyhow::Result;
use chrono::Local;
use clap::{Args as ClapArgs, Parser, Subcommand};
use owo_colors::OwoColorize;
use serde_json::{Value, json};

use crate::client::Connection;
use crate::render::{RenderOptions, WireMeeting};

#[derive(Parser)]
#[command(name = "nextmeet", version)]
#[command(about = "Query the nextmeet daemon for your next meeting")]
struct Cli {
    /// Daemon socket path
    #[arg(long, global = true)]
    socket_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Filters applied server-side before picking results.
#[derive(ClapArgs, Debug, Default)]
struct FilterArgs {
    /// Only meetings that carry a video-call link
    #[arg(long)]
    only_with_link: bool,

    /// Only meetings starting within this many minutes (ongoing exempt)
    #[arg(long)]
    within_mins: Option<i64>,

    /// Only meetings starting today
    #[arg(long)]
    today_only: bool,

    /// Drop all-day meetings
    #[arg(long)]
    skip_all_day: bool,

    /// Only meetings whose title contains this substring (repeatable)
    #[arg(long)]
    include_title: Vec<String>,

    /// Drop meetings whose title contains this substring (repeatable)
    #[arg(long)]
    exclude_title: Vec<String>,

    /// Only meetings from this calendar (repeatable)
    #[arg(long)]
    include_calendar: Vec<String>,

    /// Drop meetings from this calendar (repeatable)
    #[arg(long)]
    exclude_calendar: Vec<String>,

    /// Only meetings starting within HH:MM-HH:MM (ongoing exempt)
    #[arg(long)]
    work_hours: Option<String>,
}

impl FilterArgs {
    fn to_params(&self) -> Value {
        let mut params = serde_json::Map::new();
        if self.only_with_link {
            params.insert("only_with_link".into(), json!(true));
        }
        if let Some(mins) = self.within_mins {
            params.insert("within_mins".into(), json!(mins));
        }
        if self.today_only {
            params.insert("today_only".into(), json!(true));
        }
        if self.skip_all_day {
            params.insert("skip_all_day_meeting".into(), json!(true));
        }
        if !self.include_title.is_empty() {
            params.insert("include_title".into(), json!(self.include_title));
        }
        if !self.exclude_title.is_empty() {
            params.insert("exclude_title".into(), json!(self.exclude_title));
        }
        if !self.include_calendar.is_empty() {
            params.insert("include_calendar".into(), json!(self.include_calendar));
        }
        if !self.exclude_calendar.is_empty() {
            params.insert("exclude_calendar".into(), json!(self.exclude_calendar));
        }
        if let Some(hours) = &self.work_hours {
            params.insert("work_hours".into(), json!(hours));
        }
        Value::Object(params)
    }
}

#[derive(ClapArgs, Debug, Default)]
struct OutputArgs {
    /// Emit waybar custom-module JSON instead of plain text
    #[arg(long)]
    waybar: bool,

    /// Emit the raw JSON response
    #[arg(long)]
    json: bool,

    /// Truncate titles to this many characters
    #[arg(long)]
    max_title_length: Option<usize>,

    /// Show "Busy" instead of meeting titles
    #[arg(long)]
    privacy: bool,

    /// 12-hour clock
    #[arg(long)]
    ampm: bool,
}

impl OutputArgs {
    fn render_options(&self) -> RenderOptions {
        RenderOptions {
            max_title_length: self.max_title_length,
            privacy: self.privacy,
            ampm: self.ampm,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the daemon is reachable
    Ping,
    /// Show the daemon's version
    Version,
    /// Show the next meeting
    Next {
        #[command(flatten)]
        filters: FilterArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// List today's remaining meetings
    List {
        #[command(flatten)]
        filters: FilterArgs,
        /// Show at most this many meetings
        #[arg(long)]
        limit: Option<i64>,
        /// Emit the raw JSON array
        #[arg(long)]
        json: bool,
    },
    /// Pause meeting notifications (0 resumes)
    Snooze {
        /// Minutes to stay quiet
        minutes: i64,
    },
    /// Stream daemon events to stdout, one JSON object per line
    Watch {
        /// Topics to subscribe to (default: all)
        topics: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let socket_path = match &cli.socket_path {
        Some(path) => path.clone(),
        None => nextmeet_core::paths::default_socket_path()?,
    };
    let mut conn = Connection::open(&socket_path).await?;

    match cli.command {
        Commands::Ping => {
            let result = conn.call("ping", json!({})).await?;
            println!("{}", result.as_str().unwrap_or("pong"));
        }
        Commands::Version => {
            let result = conn.call("version", json!({})).await?;
            println!(
                "{}",
                result["version"].as_str().unwrap_or("unknown")
            );
        }
        Commands::Next { filters, output } => {
            let result = conn.call("get_next", filters.to_params()).await?;
            if output.json {
                println!("{result}");
                return Ok(());
            }
            let meeting: Option<WireMeeting> = match result {
                Value::Null => None,
                value => Some(serde_json::from_value(value)?),
            };
            let opts = output.render_options();
            let now = Local::now().naive_local();
            if output.waybar {
                println!("{}", render::waybar(meeting.as_ref(), now, &opts));
            } else {
                println!("{}", render::status_line(meeting.as_ref(), now, &opts));
            }
        }
        Commands::List {
            filters,
            limit,
            json: raw,
        } => {
            let mut params = filters.to_params();
            if let Some(limit) = limit {
                params["limit"] = json!(limit);
            }
            let result = conn.call("list", params).await?;
            if raw {
                println!("{result}");
                return Ok(());
            }
            let meetings: Vec<WireMeeting> = serde_json::from_value(result)?;
            if meetings.is_empty() {
                println!("{}", "No meetings".dimmed());
                return Ok(());
            }
            for m in &meetings {
                let times = format!(
                    "{} - {}",
                    m.start.format("%H:%M"),
                    m.end.format("%H:%M")
                );
                if m.is_ongoing {
                    println!("{}  {}", times.green().bold(), m.title.bold());
                } else {
                    println!("{}  {}", times.cyan(), m.title);
                }
            }
        }
        Commands::Snooze { minutes } => {
            let result = conn.call("snooze", json!({"minutes": minutes})).await?;
            if result["snoozed"].as_bool().unwrap_or(false) {
                println!("Notifications snoozed for {minutes} min");
            } else {
                println!("Notifications resumed");
            }
        }
        Commands::Watch { topics } => {
            conn.watch(&topics, |event| {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => eprintln!("undecodable event: {e}"),
                }
            })
            .await?;
        }
    }
    Ok(())
}
