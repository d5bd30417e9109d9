mod config;
mod diagnostics;
mod error_handler;
mod notifications;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use config::Config;
use diagnostics::{BuildInfo, Cli, Command};
use error_handler::ErrorHandler;
use feedsync_core::{
    resubscribe_with_backoff, sender_display_name, sign_in, Credential, CredentialStore,
    FeedError, FeedSession, FeedState, FileCredentialStore, FileMessageStore, FileProfileStore,
    Message, NotificationSink, ProfileCache, ProfileStore, Registration, ResubscribeStrategy,
    StaticIdentity,
};
use futures::StreamExt;
use notifications::{is_open_feed_action, DesktopNotifier, LogOnlySink};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

/// Messages printed when the feed is opened from a notification
const OPEN_FEED_PREVIEW: usize = 10;

/// Feedsync daemon
struct Daemon {
    config: Config,
    session: Arc<FeedSession>,
    notifier: Option<DesktopNotifier>,
    error_handler: ErrorHandler,
}

impl Daemon {
    /// Create the daemon and its feed session (not started yet)
    async fn new(config: Config) -> Result<Self> {
        config
            .ensure_directories()
            .context("Failed to create directories")?;

        let messages = Arc::new(FileMessageStore::new(&config.paths.store_dir));
        let profiles = Arc::new(FileProfileStore::new(&config.paths.store_dir));

        let identity = match config.load_user_id() {
            Some(user_id) => {
                info!("Signed in as {}", user_id);
                StaticIdentity::signed_in(user_id)
            }
            None => {
                warn!("No user id configured; running signed out");
                StaticIdentity::signed_out()
            }
        };

        let error_handler = ErrorHandler::new();
        let notifier = if config.notifications.enabled {
            match DesktopNotifier::new(
                config.notifications.app_name.clone(),
                config.notifications.timeout_ms,
            )
            .await
            {
                Ok(notifier) => {
                    error_handler.attach(notifier.clone()).await;
                    Some(notifier)
                }
                Err(e) => {
                    warn!("Desktop notifications unavailable, logging instead: {:#}", e);
                    None
                }
            }
        } else {
            info!("Desktop notifications disabled in config");
            None
        };

        let sink: Arc<dyn NotificationSink> = match &notifier {
            Some(notifier) => Arc::new(notifier.clone()),
            None => Arc::new(LogOnlySink),
        };

        let session = Arc::new(FeedSession::new(
            config.session_config(),
            messages,
            profiles,
            Arc::new(identity),
            sink,
        ));

        Ok(Self {
            config,
            session,
            notifier,
            error_handler,
        })
    }

    /// Follow the feed until Ctrl+C
    async fn run(&self, attach: bool) -> Result<()> {
        info!("Feed directory: {}", self.config.paths.store_dir.display());

        let mut state_rx = self.session.watch_state();
        if let Err(e) = self.session.start().await {
            self.error_handler.handle_error(&e, "starting feed").await;
        }

        // Attached: the terminal is the feed screen
        let _watching = attach.then(|| self.session.activity().enter());

        let mut last_printed: Option<String> = None;

        let mut actions = match &self.notifier {
            Some(notifier) => match notifier.subscribe_actions().await {
                Ok(stream) => Some(stream),
                Err(e) => {
                    warn!("Notification actions unavailable: {:#}", e);
                    None
                }
            },
            None => None,
        };

        let mut input = attach.then(|| BufReader::new(tokio::io::stdin()).lines());

        let mut strategy = ResubscribeStrategy::new()
            .with_initial_delay(self.config.recovery.initial_delay())
            .with_max_attempts(self.config.recovery.max_attempts);

        info!("Feed daemon running. Press Ctrl+C to stop");

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Received shutdown signal");
                    break;
                }

                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = state_rx.borrow_and_update().clone();

                    if attach {
                        last_printed = print_new_messages(
                            &state,
                            last_printed.as_deref(),
                            self.session.profiles(),
                        );
                    }

                    match feed_alert(&state) {
                        None => {}
                        Some(FeedAlert::SendFailed(message)) => {
                            eprintln!("{}", message);
                            self.session.clear_error();
                        }
                        Some(FeedAlert::FeedLost(message)) if self.config.recovery.auto_resubscribe => {
                            warn!("{}", message);
                            tokio::select! {
                                result = resubscribe_with_backoff(&self.session, &mut strategy) => {
                                    if let Err(e) = result {
                                        self.error_handler.handle_error(&e, "resubscribing to feed").await;
                                        error!("Giving up on the feed after {} attempts", strategy.max_attempts);
                                        break;
                                    }
                                }
                                _ = &mut ctrl_c => {
                                    info!("Received shutdown signal");
                                    break;
                                }
                            }
                        }
                        Some(FeedAlert::FeedLost(message)) => {
                            error!("{}; auto resubscribe is off", message);
                            break;
                        }
                    }
                }

                Some((server_id, action)) = next_action(&mut actions) => {
                    // The signal is broadcast for every application's notifications
                    let feed_id = self.notifier.as_ref().and_then(|n| n.feed_id(server_id));
                    if let (Some(feed_id), true) = (feed_id, is_open_feed_action(&action)) {
                        info!("Feed opened from notification {}", feed_id);
                        let state = self.session.state();
                        let from = state.messages.len().saturating_sub(OPEN_FEED_PREVIEW);
                        print_messages(&state.messages[from..], self.session.profiles());
                    }
                }

                Some(line) = next_line(&mut input) => {
                    self.send_line(&line).await;
                }
            }
        }

        Ok(())
    }

    async fn send_line(&self, line: &str) {
        match self.session.send_message(line) {
            Ok(Some(handle)) => {
                if let Err(e) = handle.await {
                    warn!("Send task ended abnormally: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => {
                eprintln!("{}", e.user_message());
                self.error_handler.handle_error(&e, "sending message").await;
            }
        }
    }

    /// Send one message and wait for the store to accept it
    async fn send(&self, text: &str) -> Result<()> {
        let handle = match self.session.send_message(text) {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                println!("Nothing to send.");
                return Ok(());
            }
            Err(e) => {
                self.error_handler.handle_error(&e, "sending message").await;
                return Err(anyhow!(e.user_message()));
            }
        };

        handle.await.context("Send task failed")?;

        match self.session.state().error {
            Some(message) => Err(anyhow!(message)),
            None => {
                println!("Message sent.");
                Ok(())
            }
        }
    }

    fn shutdown(&self) {
        self.session.shutdown();
        info!("Feed daemon stopped");
    }
}

async fn next_action<S>(actions: &mut Option<S>) -> Option<(u32, String)>
where
    S: futures::Stream<Item = (u32, String)> + Unpin,
{
    match actions {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn next_line<R>(input: &mut Option<tokio::io::Lines<R>>) -> Option<String>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let Some(lines) = input.as_mut() else {
        return std::future::pending().await;
    };

    match lines.next_line().await {
        Ok(Some(line)) => Some(line),
        Ok(None) => {
            // stdin closed; stop polling it
            *input = None;
            None
        }
        Err(e) => {
            warn!("Failed to read stdin: {}", e);
            *input = None;
            None
        }
    }
}

/// What an error in the feed state means for the run loop
#[derive(Debug, PartialEq, Eq)]
enum FeedAlert<'a> {
    /// A send failed; the subscription is still live
    SendFailed(&'a str),
    /// The subscription failed and the feed is parked
    FeedLost(&'a str),
}

fn feed_alert(state: &FeedState) -> Option<FeedAlert<'_>> {
    let message = state.error.as_deref()?;
    Some(if state.subscribed {
        FeedAlert::SendFailed(message)
    } else {
        FeedAlert::FeedLost(message)
    })
}

/// Print what arrived after `last_printed` and return the new last printed id
fn print_new_messages(
    state: &FeedState,
    last_printed: Option<&str>,
    profiles: &ProfileCache,
) -> Option<String> {
    print_messages(unprinted(&state.messages, last_printed), profiles);
    state
        .messages
        .last()
        .map(|m| m.id.clone())
        .or_else(|| last_printed.map(str::to_string))
}

/// Messages after `last_printed`, or all of them once it left the window
fn unprinted<'a>(messages: &'a [Message], last_printed: Option<&str>) -> &'a [Message] {
    match last_printed.and_then(|id| messages.iter().rposition(|m| m.id == id)) {
        Some(index) => &messages[index + 1..],
        None => messages,
    }
}

fn print_messages(messages: &[Message], profiles: &ProfileCache) {
    for message in messages {
        println!("{}", format_message(message, profiles));
    }
}

fn format_message(message: &Message, profiles: &ProfileCache) -> String {
    let name = sender_display_name(profiles.get(&message.sender_id).as_ref(), &message.sender_id);
    match message.timestamp {
        Some(at) => format!(
            "[{}] {}: {}",
            at.with_timezone(&chrono::Local).format("%H:%M"),
            name,
            message.text
        ),
        None => format!("[--:--] {}: {}", name, message.text),
    }
}

fn form_error(e: FeedError) -> anyhow::Error {
    match e {
        FeedError::Validation(msg) => anyhow!(msg),
        other => anyhow!(other.user_message()),
    }
}

/// Validate a registration, store the profile and credential, and remember
/// the user id
async fn register(
    config: &Config,
    profiles: &dyn ProfileStore,
    credentials: &dyn CredentialStore,
    registration: Registration,
    user_id: Option<String>,
) -> Result<String> {
    registration.validate().map_err(form_error)?;

    if credentials.find(&registration.email).await?.is_some() {
        return Err(anyhow!(
            "The email address is already in use by another account."
        ));
    }

    let user_id = user_id.unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
    let credential = Credential::new(
        user_id.clone(),
        &registration.email,
        &registration.password,
    );
    let profile = registration
        .into_profile(user_id.clone())
        .map_err(form_error)?;

    profiles
        .put(profile)
        .await
        .context("Failed to save profile")?;
    credentials
        .put(credential)
        .await
        .context("Failed to save credential")?;
    config.save_user_id(&user_id)?;

    Ok(user_id)
}

/// Check an email and password and remember the account's user id
async fn login(
    config: &Config,
    credentials: &dyn CredentialStore,
    email: &str,
    password: &str,
) -> Result<String> {
    let user_id = sign_in(credentials, email, password)
        .await
        .map_err(form_error)?;
    config.save_user_id(&user_id)?;

    if let Some(pinned) = config.identity.user_id.as_deref() {
        warn!(
            "identity.user_id = {} in {} takes precedence over the signed-in account",
            pinned,
            config.config_path().display()
        );
    }

    Ok(user_id)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command();

    if let Command::Version { verbose } = command {
        BuildInfo::get().display(verbose);
        return Ok(());
    }

    diagnostics::init_logging(&cli).context("Failed to initialize logging")?;

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    info!("Configuration loaded from {}", config.config_path().display());

    match command {
        Command::DumpConfig => {
            let contents =
                toml::to_string_pretty(&config).context("Failed to serialize config")?;
            println!("{}", contents);
            Ok(())
        }

        Command::Register {
            name,
            email,
            phone,
            password,
            confirm_password,
            avatar_url,
            user_id,
        } => {
            config
                .ensure_directories()
                .context("Failed to create directories")?;
            let profiles = FileProfileStore::new(&config.paths.store_dir);
            let credentials = FileCredentialStore::new(&config.paths.store_dir);
            let registration = Registration {
                name,
                phone,
                email,
                password,
                confirm_password,
                avatar_url,
            };
            let user_id =
                register(&config, &profiles, &credentials, registration, user_id).await?;
            println!("Registered as {}", user_id);
            Ok(())
        }

        Command::Login { email, password } => {
            let credentials = FileCredentialStore::new(&config.paths.store_dir);
            let user_id = login(&config, &credentials, &email, &password).await?;
            println!("Signed in as {}", user_id);
            Ok(())
        }

        Command::Logout => {
            if config.clear_user_id()? {
                println!("Signed out.");
            } else {
                println!("Not signed in.");
            }
            Ok(())
        }

        Command::Send { text } => {
            let daemon = Daemon::new(config)
                .await
                .context("Failed to create daemon")?;
            daemon.send(&text).await
        }

        Command::Run { attach } => {
            info!("Starting feedsync daemon...");
            let daemon = Daemon::new(config)
                .await
                .context("Failed to create daemon")?;

            let result = daemon.run(attach).await;
            daemon.shutdown();
            result
        }

        Command::Version { .. } => Ok(()),
    }
}
