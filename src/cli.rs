use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

use crate::models::{CounterId, EntryId};

#[derive(Parser)]
#[command(name = "queueboard")]
#[command(version)]
#[command(about = "Queue management front end: display board, counter controller and counter admin")]
pub struct Args {
    /// Path to the TOML config file (defaults to ./queueboard.toml if present)
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Log in and store the session credential
    Login {
        #[arg(long, short)]
        username: String,
        /// Read from stdin when omitted
        #[arg(long, short)]
        password: Option<String>,
    },

    /// Log out and clear the stored credential
    Logout,

    /// Run the public display board
    Display {
        /// Skip the realtime connection and rely on polling only
        #[arg(long)]
        no_realtime: bool,
    },

    /// Operate one counter interactively
    Controller {
        #[arg(long)]
        counter: CounterId,
    },

    /// Manage counters
    Counters {
        #[command(subcommand)]
        action: CounterAction,
    },

    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum CounterAction {
    List,
    Create {
        name: String,
        /// Up to 3 letters or digits, upper-cased
        prefix: String,
    },
    Update {
        id: CounterId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Flip the counter between active and inactive
    Toggle { id: CounterId },
    /// Delete or archive a counter; history is kept
    Delete { id: CounterId },
}

// ---------------------------------------------------------------------------
// Controller prompt
// ---------------------------------------------------------------------------

/// One line typed at the controller prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerInput {
    CallNext,
    Recall,
    Add { name: String, priority: bool },
    Complete(EntryId),
    Skip(EntryId),
    Remove(EntryId),
    EditName { id: EntryId, name: String },
    ClearCompleted,
    Refresh,
    Help,
    Quit,
}

pub const CONTROLLER_HELP: &str = "\
n | next                 call the next customer
r | recall               announce the current customer again
a | add NAME             add a customer and print a ticket
p | priority NAME        add a priority customer
c | complete ID          mark an entry completed
s | skip ID              send an entry to the back of the queue
x | remove ID            remove an entry
e | edit ID NAME         correct a customer's name
clear                    clear completed entries
refresh                  reload the queue
h | help                 show this help
q | quit                 leave";

impl ControllerInput {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((w, r)) => (w, r.trim()),
            None => (line, ""),
        };
        let needs = |what: &str| -> Result<(), String> {
            if rest.is_empty() {
                Err(format!("'{word}' needs {what}"))
            } else {
                Ok(())
            }
        };

        match word.to_ascii_lowercase().as_str() {
            "n" | "next" => Ok(Self::CallNext),
            "r" | "recall" => Ok(Self::Recall),
            "a" | "add" => {
                needs("a name")?;
                Ok(Self::Add { name: rest.to_string(), priority: false })
            }
            "p" | "priority" => {
                needs("a name")?;
                Ok(Self::Add { name: rest.to_string(), priority: true })
            }
            "c" | "complete" => {
                needs("an entry id")?;
                Ok(Self::Complete(EntryId::new(rest)))
            }
            "s" | "skip" => {
                needs("an entry id")?;
                Ok(Self::Skip(EntryId::new(rest)))
            }
            "x" | "remove" => {
                needs("an entry id")?;
                Ok(Self::Remove(EntryId::new(rest)))
            }
            "e" | "edit" => {
                needs("an entry id and a name")?;
                match rest.split_once(char::is_whitespace) {
                    Some((id, name)) if !name.trim().is_empty() => {
                        Ok(Self::EditName { id: EntryId::new(id), name: name.trim().to_string() })
                    }
                    _ => Err(format!("'{word}' needs an entry id and a name")),
                }
            }
            "clear" => Ok(Self::ClearCompleted),
            "refresh" | "" => Ok(Self::Refresh),
            "h" | "help" | "?" => Ok(Self::Help),
            "q" | "quit" | "exit" => Ok(Self::Quit),
            other => Err(format!("unknown command '{other}', type 'help'")),
        }
    }
}
