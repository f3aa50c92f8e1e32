//! Line-oriented command console. Each input line is split with shell quoting
//! and parsed by clap; each result is one JSON object on one line.

use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;
use ulid::Ulid;

use crate::admission::{
    AdmissionController, BookingError, BookingRequest, Caller, DeleteError, QueryError, Remedy,
    SettingsError, ValidationError,
};
use crate::engine::StoreError;
use crate::model::Minute;
use crate::notify::NotifyHub;
use crate::observability::{COMMANDS_TOTAL, WATCHES_ACTIVE, command_label};

#[derive(Parser, Debug)]
#[command(name = "washslot", no_binary_name = true)]
struct Line {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Book a machine: book <machine> <YYYY-MM-DD> <HH:MM> --name .. --phone .. --pin ..
    Book {
        resource: String,
        date: String,
        start: String,
        #[arg(long, default_value_t = 60)]
        duration: Minute,
        #[arg(long)]
        name: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        pin: Option<String>,
        #[arg(long)]
        admin: bool,
    },
    /// Check whether a slot is free.
    Free {
        resource: String,
        date: String,
        start: String,
        #[arg(long, default_value_t = 60)]
        duration: Minute,
    },
    /// Reservations from one date to another (inclusive).
    List {
        from: String,
        to: Option<String>,
        #[arg(long)]
        resource: Option<String>,
    },
    /// Cancel a reservation with its PIN, or as admin.
    Cancel {
        id: String,
        #[arg(long)]
        pin: Option<String>,
        #[arg(long)]
        admin: bool,
    },
    /// Show, or with --admin set, maintenance mode.
    Maintenance {
        #[arg(value_enum)]
        state: Option<Toggle>,
        #[arg(long)]
        admin: bool,
    },
    /// Past reservations, newest first.
    History {
        #[arg(long)]
        before: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        admin: bool,
    },
    /// Your upcoming reservations.
    Mine { name: String },
    /// Search upcoming reservations by name or phone.
    Search {
        term: String,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        admin: bool,
    },
    /// Reservations today and from today on.
    Stats,
    /// Which machines are running right now.
    Status,
    /// Configured machines.
    Resources,
    /// Stream bookings and cancellations for a machine.
    Watch { resource: String },
}

fn caller(admin: bool) -> Caller {
    if admin { Caller::Admin } else { Caller::Public }
}

#[derive(Debug)]
pub enum CommandError {
    /// Unparseable line, or a help request; carries clap's rendered text.
    Usage(String),
    InvalidId(String),
    Booking(BookingError),
    Delete(DeleteError),
    Settings(SettingsError),
    Query(QueryError),
    Store(StoreError),
}

impl CommandError {
    pub fn remedy(&self) -> Remedy {
        match self {
            CommandError::Usage(_) | CommandError::InvalidId(_) => Remedy::ChangeInput,
            CommandError::Booking(e) => e.remedy(),
            CommandError::Delete(e) => e.remedy(),
            CommandError::Settings(e) => e.remedy(),
            CommandError::Query(e) => e.remedy(),
            CommandError::Store(_) => Remedy::RetryLater,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({ "error": self.to_string(), "remedy": self.remedy() })
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Usage(msg) => write!(f, "{}", msg.trim_end()),
            CommandError::InvalidId(id) => write!(f, "not a reservation id: {id}"),
            CommandError::Booking(e) => write!(f, "{e}"),
            CommandError::Delete(e) => write!(f, "{e}"),
            CommandError::Settings(e) => write!(f, "{e}"),
            CommandError::Query(e) => write!(f, "{e}"),
            CommandError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CommandError {}

impl From<BookingError> for CommandError {
    fn from(e: BookingError) -> Self {
        CommandError::Booking(e)
    }
}

impl From<DeleteError> for CommandError {
    fn from(e: DeleteError) -> Self {
        CommandError::Delete(e)
    }
}

impl From<SettingsError> for CommandError {
    fn from(e: SettingsError) -> Self {
        CommandError::Settings(e)
    }
}

impl From<QueryError> for CommandError {
    fn from(e: QueryError) -> Self {
        CommandError::Query(e)
    }
}

impl From<StoreError> for CommandError {
    fn from(e: StoreError) -> Self {
        CommandError::Store(e)
    }
}

/// `Ok(None)` for blank lines and `#` comments.
pub fn parse_line(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let words = shell_words::split(line).map_err(|e| CommandError::Usage(e.to_string()))?;
    let parsed = Line::try_parse_from(words).map_err(|e| CommandError::Usage(e.to_string()))?;
    Ok(Some(parsed.command))
}

fn listing(found: &[crate::model::ReservationInfo]) -> Value {
    json!({ "count": found.len(), "reservations": found })
}

pub struct Console {
    controller: Arc<AdmissionController>,
    notify: Arc<NotifyHub>,
    /// Watch notices go here; the process prints them.
    out: mpsc::Sender<String>,
    watches: DashMap<String, JoinHandle<()>>,
}

impl Console {
    pub fn new(
        controller: Arc<AdmissionController>,
        notify: Arc<NotifyHub>,
        out: mpsc::Sender<String>,
    ) -> Self {
        Self {
            controller,
            notify,
            out,
            watches: DashMap::new(),
        }
    }

    /// Parse and run one line. `None` when there is nothing to print.
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        let result = match parse_line(line) {
            Ok(None) => return None,
            Ok(Some(cmd)) => {
                let label = command_label(&cmd);
                let result = self.execute(cmd).await;
                let status = if result.is_ok() { "ok" } else { "error" };
                metrics::counter!(COMMANDS_TOTAL, "command" => label, "status" => status)
                    .increment(1);
                result
            }
            Err(e) => Err(e),
        };
        let value = result.unwrap_or_else(|e| e.to_json());
        Some(value.to_string())
    }

    pub async fn execute(&self, cmd: Command) -> Result<Value, CommandError> {
        let ctl = &self.controller;
        match cmd {
            Command::Book {
                resource,
                date,
                start,
                duration,
                name,
                phone,
                pin,
                admin,
            } => {
                let request = BookingRequest {
                    user_name: name,
                    phone_number: phone,
                    pin,
                    resource_id: resource,
                    date,
                    start_time: start,
                    duration_minutes: duration,
                };
                let reservation = ctl.submit_booking(request, caller(admin)).await?;
                Ok(json!({ "booked": reservation.info() }))
            }
            Command::Free {
                resource,
                date,
                start,
                duration,
            } => {
                let free = ctl.is_slot_free(&resource, &date, &start, duration).await?;
                Ok(json!({ "free": free }))
            }
            Command::List { from, to, resource } => {
                let to = to.unwrap_or_else(|| from.clone());
                let found = ctl.list_reservations(resource.as_deref(), &from, &to).await?;
                Ok(listing(&found))
            }
            Command::Cancel { id, pin, admin } => {
                let id = Ulid::from_string(&id).map_err(|_| CommandError::InvalidId(id))?;
                let removed = ctl
                    .delete_reservation(id, pin.as_deref(), caller(admin))
                    .await?;
                Ok(json!({ "cancelled": removed }))
            }
            Command::Maintenance { state, admin } => {
                if let Some(state) = state {
                    ctl.set_maintenance_mode(state == Toggle::On, caller(admin))
                        .await?;
                }
                Ok(json!({ "maintenance": ctl.get_maintenance_mode().await? }))
            }
            Command::History {
                before,
                limit,
                admin,
            } => {
                let page = ctl.history(before.as_deref(), limit, caller(admin)).await?;
                Ok(json!(page))
            }
            Command::Mine { name } => Ok(listing(&ctl.user_reservations(&name).await?)),
            Command::Search { term, date, admin } => {
                let found = ctl
                    .search_reservations(&term, date.as_deref(), caller(admin))
                    .await?;
                Ok(listing(&found))
            }
            Command::Stats => Ok(json!(ctl.dashboard_stats().await?)),
            Command::Status => Ok(json!({ "machines": ctl.resource_status().await? })),
            Command::Resources => Ok(json!({ "resources": ctl.resources() })),
            Command::Watch { resource } => self.watch(resource),
        }
    }

    fn watch(&self, resource: String) -> Result<Value, CommandError> {
        if self.controller.config().resource(&resource).is_none() {
            return Err(QueryError::Validation(ValidationError::UnknownResource(resource)).into());
        }
        // A watcher whose output closed has exited; a new watch replaces it.
        let live = self.watches.get(&resource).is_some_and(|h| !h.is_finished());
        if live {
            return Ok(json!({ "watching": resource, "already": true }));
        }

        let mut rx = self.notify.subscribe(&resource);
        let out = self.out.clone();
        let name = resource.clone();
        metrics::gauge!(WATCHES_ACTIVE).increment(1.0);
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(notice) => {
                        let line = json!({ "notice": notice }).to_string();
                        if out.send(line).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(resource = %name, skipped, "watcher fell behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            metrics::gauge!(WATCHES_ACTIVE).decrement(1.0);
        });
        self.watches.insert(resource.clone(), handle);
        Ok(json!({ "watching": resource }))
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        for entry in self.watches.iter() {
            entry.value().abort();
        }
    }
}
