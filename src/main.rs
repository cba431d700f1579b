use std::collections::BTreeSet;
use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use clap::{CommandFactory, Parser};
use colored::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use queueboard::announce::Announcer;
use queueboard::cli::{Args, Command, ControllerInput, CounterAction, CONTROLLER_HELP};
use queueboard::config::QueueConfig;
use queueboard::controller::Controller;
use queueboard::counters::CounterManager;
use queueboard::display::{render_controller, render_counters, render_display, ticker_frame};
use queueboard::error::{QueueError, Result};
use queueboard::gateway::{HttpGateway, QueueGateway};
use queueboard::models::CounterId;
use queueboard::realtime::{ChannelClient, MemoryTransport, Transport, WebSocketTransport};
use queueboard::session::SessionStore;
use queueboard::sync::{FetchScope, QueueSync, SyncTiming};
use queueboard::ticket::SystemPrinter;

const TICKER_WIDTH: usize = 60;

fn alert(err: &QueueError) {
    eprintln!("{} {}", "!".bright_red().bold(), err.alert_text().bright_red());
    if err.is_transport() {
        warn!(error = %err, "gateway unreachable or returned garbage");
    } else {
        warn!(error = %err, "action failed");
    }
}

fn clear_screen() {
    print!("\x1B[2J\x1B[H");
}

fn require_login(session: &SessionStore) -> Result<()> {
    if session.is_authenticated() {
        Ok(())
    } else {
        Err(QueueError::Precondition("Please log in first: queueboard login -u <user>".to_string()))
    }
}

fn relay(config: &QueueConfig) -> ChannelClient {
    let transport: Arc<dyn Transport> =
        Arc::new(WebSocketTransport::new(&config.realtime_url, &config.realtime_key));
    ChannelClient::new(transport)
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

async fn run_login(gateway: &HttpGateway, session: &SessionStore, username: &str, password: Option<String>) -> Result<()> {
    let password = match password {
        Some(p) => p,
        None => {
            print!("Password: ");
            let _ = std::io::stdout().flush();
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            lines.next_line().await?.unwrap_or_default()
        }
    };
    let token = gateway.login(username, password.trim_end()).await?;
    session.set_credential(Some(token))?;
    info!(username, "logged in");
    println!("{}", "Logged in.".bright_green());
    Ok(())
}

async fn run_logout(gateway: &HttpGateway, session: &SessionStore) -> Result<()> {
    if let Err(e) = gateway.logout().await {
        warn!(error = %e, "gateway logout failed, clearing local session anyway");
    }
    session.set_credential(None)?;
    println!("{}", "Logged out.".bright_green());
    Ok(())
}

// ---------------------------------------------------------------------------
// Display board
// ---------------------------------------------------------------------------

async fn run_display(config: &QueueConfig, gateway: Arc<HttpGateway>, no_realtime: bool) -> Result<()> {
    let sync = QueueSync::new(gateway, SyncTiming::from_config(config));
    if let Err(e) = sync.refresh_now(FetchScope::Counters).await {
        alert(&e);
    }
    if let Err(e) = sync.refresh_now(FetchScope::Queue(None)).await {
        alert(&e);
    }

    let client = if no_realtime {
        ChannelClient::new(Arc::new(MemoryTransport::new()))
    } else {
        relay(config)
    };
    let _lease = client.lease()?;
    let counter_ids: Vec<CounterId> = sync.counters().into_iter().map(|c| c.id).collect();
    let mut subscriptions = sync.attach(&client, &counter_ids)?;
    let mut attached: BTreeSet<CounterId> = counter_ids.into_iter().collect();
    let poller = tokio::spawn(sync.clone().poll(vec![FetchScope::Counters, FetchScope::Queue(None)]));

    let mut changes = sync.changes();
    let mut clock = tokio::time::interval(Duration::from_secs(1));
    let mut tick: usize = 0;
    loop {
        tokio::select! {
            _ = clock.tick() => tick = tick.wrapping_add(1),
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                match sync.attach_new_counters(&client, &mut attached) {
                    Ok(subs) => subscriptions.extend(subs),
                    Err(e) => alert(&e),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
        let ticker = ticker_frame(&config.ticker, tick, TICKER_WIDTH);
        let board = sync.read(|r| render_display(r, Local::now(), &ticker));
        clear_screen();
        print!("{board}");
        let _ = std::io::stdout().flush();
    }

    poller.abort();
    for sub in subscriptions {
        sub.unsubscribe();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

async fn execute<G: QueueGateway>(controller: &Controller<G>, input: ControllerInput) -> Result<Option<String>> {
    let note = match input {
        ControllerInput::CallNext => match controller.call_next().await? {
            Some(call) => format!("Called {} {}", call.entry.number, call.entry.name),
            None => "Nobody is waiting.".to_string(),
        },
        ControllerInput::Recall => {
            let call = controller.recall().await?;
            format!("Recalled {} {}", call.entry.number, call.entry.name)
        }
        ControllerInput::Add { name, priority } => {
            let receipt = controller.add_person(&name, priority).await?;
            if let Some(e) = &receipt.print_error {
                alert(e);
            }
            format!("Added {} (ticket {})", receipt.entry.name, receipt.preview_number)
        }
        ControllerInput::Complete(id) => {
            let done = controller.complete(&id).await?;
            format!("Completed {}", done.number)
        }
        ControllerInput::Skip(id) => {
            let moved = controller.skip(&id).await?;
            format!("Moved {} to the back as {}", moved.name, moved.number)
        }
        ControllerInput::Remove(id) => {
            controller.remove(&id).await?;
            format!("Removed {id}")
        }
        ControllerInput::EditName { id, name } => {
            let renamed = controller.edit_name(&id, &name).await?;
            format!("Renamed to {} ({})", renamed.name, renamed.number)
        }
        ControllerInput::ClearCompleted => {
            let n = controller.clear_completed().await?;
            format!("Cleared {n} completed entries")
        }
        ControllerInput::Refresh => {
            controller.load().await?;
            return Ok(None);
        }
        ControllerInput::Help => CONTROLLER_HELP.to_string(),
        ControllerInput::Quit => return Ok(None),
    };
    Ok(Some(note))
}

fn draw_controller<G: QueueGateway>(controller: &Controller<G>, note: Option<&str>) {
    clear_screen();
    print!("{}", render_controller(controller.view().as_ref(), &controller.preview_number()));
    if let Some(note) = note {
        println!("{note}");
    }
    print!("> ");
    let _ = std::io::stdout().flush();
}

async fn run_controller(
    config: &QueueConfig,
    gateway: Arc<HttpGateway>,
    session: &SessionStore,
    counter: CounterId,
) -> Result<()> {
    require_login(session)?;
    let sync = QueueSync::new(gateway, SyncTiming::from_config(config));
    let controller = Controller::new(
        sync.clone(),
        Arc::new(Announcer::from_command(config.speech_command.as_deref())),
        Arc::new(SystemPrinter::from_config(config)),
        counter.clone(),
    )
    .in_place_updates(config.in_place_requeue);
    if let Err(e) = controller.load().await {
        alert(&e);
    }

    let client = relay(config);
    let _lease = client.lease()?;
    let subscriptions = sync.attach(&client, std::slice::from_ref(&counter))?;
    let poller = tokio::spawn(
        sync.clone().poll(vec![FetchScope::Queue(Some(counter.clone())), FetchScope::Counters]),
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut changes = sync.changes();
    draw_controller(&controller, Some("Type 'help' for commands."));
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match ControllerInput::parse(&line) {
                    Ok(ControllerInput::Quit) => break,
                    Ok(input) => match execute(&controller, input).await {
                        Ok(note) => draw_controller(&controller, note.as_deref()),
                        Err(e) => {
                            draw_controller(&controller, None);
                            alert(&e);
                        }
                    },
                    Err(msg) => draw_controller(&controller, Some(&msg)),
                }
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                draw_controller(&controller, None);
            }
        }
    }

    poller.abort();
    for sub in subscriptions {
        sub.unsubscribe();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

async fn run_counters(
    config: &QueueConfig,
    gateway: Arc<HttpGateway>,
    session: &SessionStore,
    action: CounterAction,
) -> Result<()> {
    require_login(session)?;
    let manager = CounterManager::new(QueueSync::new(gateway, SyncTiming::from_config(config)));
    match action {
        CounterAction::List => {}
        CounterAction::Create { name, prefix } => {
            let c = manager.create(&name, &prefix).await?;
            println!("Created counter {} ({})", c.id, c.name);
        }
        CounterAction::Update { id, name, prefix } => {
            manager.update(&id, name.as_deref(), prefix.as_deref()).await?;
            println!("Updated counter {id}");
        }
        CounterAction::Toggle { id } => {
            let c = manager.toggle(&id).await?;
            println!("Counter {id} is now {}", if c.active { "active" } else { "inactive" });
        }
        CounterAction::Delete { id } => {
            manager.delete(&id).await?;
            println!("Deleted counter {id}");
        }
    }
    print!("{}", render_counters(&manager.list().await?));
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("queueboard=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Command::Completions { shell } = args.command {
        clap_complete::generate(shell, &mut Args::command(), "queueboard", &mut std::io::stdout());
        return;
    }

    let config = match QueueConfig::load(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{} {e}", "error:".bright_red().bold());
            std::process::exit(2);
        }
    };

    let session = Arc::new(SessionStore::open(&config.session_file));
    let gateway = Arc::new(HttpGateway::from_config(&config, Arc::clone(&session)));

    let result = match args.command {
        Command::Login { username, password } => run_login(&gateway, &session, &username, password).await,
        Command::Logout => run_logout(&gateway, &session).await,
        Command::Display { no_realtime } => run_display(&config, gateway, no_realtime).await,
        Command::Controller { counter } => run_controller(&config, gateway, &session, counter).await,
        Command::Counters { action } => run_counters(&config, gateway, &session, action).await,
        Command::Completions { .. } => Ok(()),
    };

    if let Err(e) = result {
        alert(&e);
        std::process::exit(1);
    }
}
