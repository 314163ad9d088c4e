// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam::channel::{self, Sender};
use csv::{ReaderBuilder, Trim, Writer};
use dashmap::DashMap;
use points_ledger::{
    Actor, Engine, LedgerConfig, LedgerError, NewBehavior, NewReward, NotFoundKind, RewardId,
    UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::thread;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Points Ledger - Replay a CSV of ledger commands
///
/// Reads commands from a CSV file, applies them to a fresh ledger and writes
/// every balance to stdout.
#[derive(Parser, Debug)]
#[command(name = "points-ledger")]
#[command(about = "Replays behavior and reward commands and prints balances", long_about = None)]
struct Args {
    /// Path to CSV file with commands
    ///
    /// Expected format: op,actor,subject,amount,text
    /// Example: cargo run -- commands.csv > balances.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Number of worker threads. Commands of one family always run in file order.
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config =
        LedgerConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    init_tracing(&config.log_level);

    let file = File::open(&args.input)
        .with_context(|| format!("failed to open '{}'", args.input.display()))?;

    let engine = Engine::with_config(config);
    let applied = replay(&engine, BufReader::new(file), args.workers)
        .context("failed to read commands")?;
    info!(applied, "replay finished");

    write_balances(&engine, std::io::stdout()).context("failed to write balances")?;
    Ok(())
}

// Logs go to stderr so stdout stays valid CSV.
fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Raw CSV record matching the input format.
///
/// Fields: `op, actor, subject, amount, text`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    actor: u64,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    amount: Option<i64>,
    #[serde(default)]
    text: Option<String>,
}

/// A parsed command. Reward labels are the 1-based position of the `reward`
/// row that created the reward.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Parent {
        id: u64,
        nickname: String,
    },
    Child {
        parent: u64,
        child: u64,
        nickname: String,
    },
    Behavior {
        actor: u64,
        child: u64,
        delta: i64,
        description: String,
    },
    Reward {
        actor: u64,
        label: u64,
        stock: u32,
        price: i64,
        name: String,
    },
    Exchange {
        actor: u64,
        label: u64,
        target: Option<u64>,
    },
    DeleteReward {
        actor: u64,
        label: u64,
    },
}

impl CsvRecord {
    /// Converts the record to a command.
    ///
    /// Returns `None` for unknown ops or missing required fields.
    fn into_command(self, reward_rows: &mut u64) -> Option<Command> {
        let actor = self.actor;
        let subject = self.subject.filter(|s| !s.is_empty());
        let text = self.text.unwrap_or_default();

        match self.op.to_lowercase().as_str() {
            "parent" => Some(Command::Parent {
                id: actor,
                nickname: text,
            }),
            "child" => Some(Command::Child {
                parent: actor,
                child: subject?.parse().ok()?,
                nickname: text,
            }),
            "behavior" => Some(Command::Behavior {
                actor,
                child: subject?.parse().ok()?,
                delta: self.amount?,
                description: text,
            }),
            "reward" => {
                let stock = subject?.parse().ok()?;
                let price = self.amount?;
                *reward_rows += 1;
                Some(Command::Reward {
                    actor,
                    label: *reward_rows,
                    stock,
                    price,
                    name: text,
                })
            }
            "exchange" => {
                let subject = subject?;
                let (label, target) = match subject.split_once(':') {
                    Some((label, target)) => (label.parse().ok()?, Some(target.parse().ok()?)),
                    None => (subject.parse().ok()?, None),
                };
                Some(Command::Exchange {
                    actor,
                    label,
                    target,
                })
            }
            "delete_reward" => Some(Command::DeleteReward {
                actor,
                label: subject?.parse().ok()?,
            }),
            _ => None,
        }
    }
}

/// Where the dispatcher sends a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Worker(usize),
    /// The command touches another family's reward. Every worker is drained
    /// first and the command runs on the dispatching thread.
    Barrier,
}

/// Assigns commands to workers by family, the parent plus its children.
///
/// Learns child links from `child` commands and reward owners from `reward`
/// commands as rows are read.
struct Router {
    workers: usize,
    parents: HashMap<u64, u64>,
    reward_families: HashMap<u64, u64>,
}

impl Router {
    fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            parents: HashMap::new(),
            reward_families: HashMap::new(),
        }
    }

    fn family_of(&self, user: u64) -> u64 {
        self.parents.get(&user).copied().unwrap_or(user)
    }

    fn route(&mut self, command: &Command) -> Route {
        let family = match command {
            Command::Parent { id, .. } => self.family_of(*id),
            Command::Child { parent, child, .. } => {
                self.parents.insert(*child, *parent);
                self.family_of(*parent)
            }
            Command::Behavior { actor, .. } => self.family_of(*actor),
            Command::Reward { actor, label, .. } => {
                let family = self.family_of(*actor);
                self.reward_families.insert(*label, family);
                family
            }
            Command::Exchange { actor, label, .. } | Command::DeleteReward { actor, label } => {
                let family = self.family_of(*actor);
                match self.reward_families.get(label) {
                    Some(&owner) if owner != family => return Route::Barrier,
                    _ => family,
                }
            }
        };
        Route::Worker((family % self.workers as u64) as usize)
    }
}

/// Work sent to a replay worker.
enum Job {
    Apply(Command),
    /// Acknowledged once every job queued before it has run.
    Drain(Sender<()>),
}

/// Blocks until every worker has run the jobs queued so far.
///
/// Returns `false` if a worker hung up.
fn drain(senders: &[Sender<Job>]) -> bool {
    let (done_tx, done_rx) = channel::bounded(senders.len());
    for sender in senders {
        if sender.send(Job::Drain(done_tx.clone())).is_err() {
            return false;
        }
    }
    drop(done_tx);
    done_rx.iter().take(senders.len()).count() == senders.len()
}

/// Applies commands to an engine, resolving reward labels and actor roles.
struct Replayer<'a> {
    engine: &'a Engine,
    rewards: DashMap<u64, RewardId>,
}

impl<'a> Replayer<'a> {
    fn new(engine: &'a Engine) -> Self {
        Self {
            engine,
            rewards: DashMap::new(),
        }
    }

    // The role comes from the registered account, as an identity layer would supply it.
    fn actor(&self, id: u64) -> Result<Actor, LedgerError> {
        self.engine
            .account(UserId(id))
            .map(|account| Actor {
                user_id: account.id,
                role: account.role,
            })
            .ok_or(LedgerError::NotFound(NotFoundKind::Account))
    }

    fn reward(&self, label: u64) -> Result<RewardId, LedgerError> {
        self.rewards
            .get(&label)
            .map(|id| *id)
            .ok_or(LedgerError::NotFound(NotFoundKind::Reward))
    }

    fn apply(&self, command: Command) -> Result<(), LedgerError> {
        match command {
            Command::Parent { id, nickname } => {
                self.engine.register_parent(UserId(id), &nickname)?;
            }
            Command::Child {
                parent,
                child,
                nickname,
            } => {
                self.engine
                    .create_child(self.actor(parent)?, UserId(child), &nickname)?;
            }
            Command::Behavior {
                actor,
                child,
                delta,
                description,
            } => {
                self.engine.record_behavior(
                    self.actor(actor)?,
                    NewBehavior::new(UserId(child), description, delta),
                )?;
            }
            Command::Reward {
                actor,
                label,
                stock,
                price,
                name,
            } => {
                let item = self
                    .engine
                    .create_reward(self.actor(actor)?, NewReward::new(name, price, stock))?;
                self.rewards.insert(label, item.id);
            }
            Command::Exchange {
                actor,
                label,
                target,
            } => {
                self.engine.exchange(
                    self.actor(actor)?,
                    self.reward(label)?,
                    target.map(UserId),
                )?;
            }
            Command::DeleteReward { actor, label } => {
                self.engine
                    .deactivate_or_delete(self.actor(actor)?, self.reward(label)?)?;
            }
        }
        Ok(())
    }

    fn apply_logged(&self, command: Command) -> bool {
        match self.apply(command.clone()) {
            Ok(()) => true,
            Err(e) => {
                debug!(?command, error = %e, code = e.error_code(), "skipping rejected command");
                false
            }
        }
    }
}

/// Replays commands from a CSV reader and returns how many were applied.
///
/// Rows are streamed. Malformed rows and rejected commands are logged and
/// skipped. With more than one worker, commands are routed by family so each
/// family's commands keep their file order while families run in parallel.
/// Redeeming or deleting another family's reward waits for every worker to
/// catch up, so the result never depends on the worker count.
///
/// # CSV Format
///
/// Expected columns: `op, actor, subject, amount, text`
///
/// | op              | subject                   | amount | text        |
/// |-----------------|---------------------------|--------|-------------|
/// | `parent`        |                           |        | nickname    |
/// | `child`         | child id                  |        | nickname    |
/// | `behavior`      | child id                  | delta  | description |
/// | `reward`        | stock                     | price  | name        |
/// | `exchange`      | `reward` or `reward:child`|        |             |
/// | `delete_reward` | reward                    |        |             |
///
/// # Example
///
/// ```csv
/// op,actor,subject,amount,text
/// parent,1,,,Mom
/// child,1,10,,Ann
/// behavior,1,10,20,Homework
/// reward,1,1,20,Ice cream
/// exchange,10,1,,
/// ```
///
/// # Errors
///
/// Returns a CSV error if reading the input fails.
fn replay<R: Read>(engine: &Engine, reader: R, workers: usize) -> Result<usize, csv::Error> {
    let replayer = Replayer::new(engine);

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    let mut reward_rows = 0;
    let commands = rdr
        .deserialize::<CsvRecord>()
        .filter_map(move |result| match result {
            Ok(record) => {
                let command = record.into_command(&mut reward_rows);
                if command.is_none() {
                    debug!("skipping invalid command record");
                }
                command.map(Ok::<Command, csv::Error>)
            }
            Err(e) if e.is_io_error() => Some(Err(e)),
            Err(e) => {
                debug!(error = %e, "skipping malformed row");
                None
            }
        });

    if workers <= 1 {
        let mut applied = 0;
        for command in commands {
            if replayer.apply_logged(command?) {
                applied += 1;
            }
        }
        return Ok(applied);
    }

    let mut router = Router::new(workers);
    thread::scope(|scope| {
        let (senders, handles): (Vec<Sender<Job>>, Vec<_>) = (0..workers)
            .map(|_| {
                let (tx, rx) = channel::bounded::<Job>(256);
                let replayer = &replayer;
                let handle = scope.spawn(move || {
                    let mut applied = 0;
                    for job in rx {
                        match job {
                            Job::Apply(command) => {
                                if replayer.apply_logged(command) {
                                    applied += 1;
                                }
                            }
                            Job::Drain(done) => {
                                let _ = done.send(());
                            }
                        }
                    }
                    applied
                });
                (tx, handle)
            })
            .unzip();

        // A worker only hangs up by panicking, which the join below reports.
        let mut applied = 0;
        for command in commands {
            let command: Command = command?;
            match router.route(&command) {
                Route::Worker(worker) => {
                    if senders[worker].send(Job::Apply(command)).is_err() {
                        break;
                    }
                }
                Route::Barrier => {
                    if !drain(&senders) {
                        break;
                    }
                    debug!(?command, "applying cross-family command after drain");
                    if replayer.apply_logged(command) {
                        applied += 1;
                    }
                }
            }
        }
        drop(senders);

        for handle in handles {
            match handle.join() {
                Ok(count) => applied += count,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        Ok(applied)
    })
}

#[derive(Debug, Serialize)]
struct BalanceRow {
    user: u64,
    total_points: i64,
    available_points: i64,
}

/// Writes every balance as CSV, ordered by user id.
///
/// # CSV Format
///
/// Columns: `user, total_points, available_points`
///
/// # Errors
///
/// Returns an error if a balance cannot be read or writing fails.
fn write_balances<W: Write>(engine: &Engine, writer: W) -> Result<()> {
    let mut wtr = Writer::from_writer(writer);

    for balance in engine.balances()? {
        wtr.serialize(BalanceRow {
            user: balance.user_id.0,
            total_points: balance.total_points,
            available_points: balance.available_points,
        })?;
    }

    wtr.flush()?;
    Ok(())
}
