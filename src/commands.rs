//! Inbound chat commands: a static name table, the handlers behind it and
//! the update polling loop feeding them.

use hickory_resolver::proto::rr::RecordType;
use log::{debug, error, info, warn};
use std::{collections::HashMap, fmt, sync::Arc, time::Duration};
use tokio::{select, time::sleep};
use tokio_util::sync::CancellationToken;

use crate::channel::{Notice, Notifier, Origin, TelegramChannel};
use crate::config::Config;
use crate::error::Error;
use crate::media::Mood;
use crate::monitor::HealthMonitor;
use crate::probe::{ProbeFailure, Resolve, parse_record_type};
use crate::stats::StatsSource;
use crate::subscriptions::{SubscriberId, SubscriptionStore};

const RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Start,
    Stop,
    Poke,
    Stat,
    Help,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = COMMANDS
            .iter()
            .find(|(_, command)| command == self)
            .map_or("?", |(name, _)| name);
        write!(f, "/{name}")
    }
}

const COMMANDS: &[(&str, Command)] = &[
    ("start", Command::Start),
    ("stop", Command::Stop),
    ("poke", Command::Poke),
    ("stat", Command::Stat),
    ("help", Command::Help),
];

/// Maps command names to commands.
#[derive(Debug)]
pub struct CommandTable(HashMap<&'static str, Command>);

impl CommandTable {
    pub fn new() -> Result<Self, Error> {
        Self::build(COMMANDS)
    }

    fn build(entries: &[(&'static str, Command)]) -> Result<Self, Error> {
        let mut table = HashMap::with_capacity(entries.len());
        for &(name, command) in entries {
            if table.insert(name, command).is_some() {
                return Err(Error::Config(format!("duplicate command /{name}")));
            }
        }
        Ok(Self(table))
    }

    /// Splits `/name[@bot] arg...` into a known command and its arguments.
    pub fn parse(&self, text: &str) -> Option<(Command, Vec<String>)> {
        let mut words = text.trim().strip_prefix('/')?.split_whitespace();
        let head = words.next()?;
        let name = head.split('@').next()?.to_ascii_lowercase();
        let command = *self.0.get(name.as_str())?;
        Some((command, words.map(str::to_string).collect()))
    }
}

pub struct Handlers {
    store: Arc<SubscriptionStore>,
    monitor: Arc<HealthMonitor>,
    resolver: Arc<dyn Resolve>,
    stats: Arc<dyn StatsSource>,
    notifier: Arc<dyn Notifier>,
    test_domain: String,
    main_channel: Option<SubscriberId>,
    allow_main_unsubscribe: bool,
}

impl Handlers {
    pub fn new(
        store: Arc<SubscriptionStore>,
        monitor: Arc<HealthMonitor>,
        resolver: Arc<dyn Resolve>,
        stats: Arc<dyn StatsSource>,
        notifier: Arc<dyn Notifier>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            monitor,
            resolver,
            stats,
            notifier,
            test_domain: config.resolver.test_domain.clone(),
            main_channel: config
                .telegram
                .main_channel
                .as_deref()
                .map(SubscriberId::from),
            allow_main_unsubscribe: config.telegram.allow_main_channel_unsubscribe,
        }
    }

    pub async fn handle(&self, command: Command, args: &[String], origin: &Origin) -> Notice {
        match command {
            Command::Start => self.start(origin),
            Command::Stop => self.stop(origin),
            Command::Poke => self.poke(args).await,
            Command::Stat => Notice::text(self.stats.fetch().await.to_string()),
            Command::Help => Notice::text(self.welcome()),
        }
    }

    /// The id a chat is stored under. Posts from the main channel map to the
    /// configured main channel id so it is never subscribed twice.
    fn subscriber(&self, origin: &Origin) -> SubscriberId {
        match &self.main_channel {
            Some(main) if origin.is_chat(main) => main.clone(),
            _ => origin.chat.clone(),
        }
    }

    fn start(&self, origin: &Origin) -> Notice {
        let id = self.subscriber(origin);
        if self.store.subscribe(id.clone()) {
            info!("{id} subscribed");
        }
        self.monitor.reset();
        Notice::text(self.welcome())
    }

    fn stop(&self, origin: &Origin) -> Notice {
        let id = self.subscriber(origin);
        if !self.allow_main_unsubscribe && self.main_channel.as_ref() == Some(&id) {
            return Notice::text("The main channel cannot be unsubscribed.");
        }

        if self.store.unsubscribe(&id) {
            info!("{id} unsubscribed");
            Notice::text("Subscription successfully cancelled!")
        } else {
            Notice::text("You have no active subscription. Use /start to start it again.")
        }
    }

    /// One-off probe of `[domain] [record-type]`. Always yields a reply.
    pub async fn poke(&self, args: &[String]) -> Notice {
        let domain = args.first().map_or(self.test_domain.as_str(), String::as_str);
        let record_type = match args.get(1).map(String::as_str).map(parse_record_type) {
            None => RecordType::A,
            Some(Ok(record_type)) => record_type,
            Some(Err(e)) => return Notice::text(format!("\u{26a0}\u{fe0f} {e}")),
        };

        match self.resolver.resolve(domain, record_type).await {
            Ok(records) => {
                let answer = if records.is_empty() {
                    format!("No {record_type} records for {domain}.")
                } else {
                    records.join("\n")
                };
                Notice::with_mood(
                    format!(
                        "\u{2705} {answer}\nEverything seems fine. The dot is resolving #LikeABosch."
                    ),
                    Mood::Positive,
                )
            }
            Err(ProbeFailure::NotFound(_)) => Notice::with_mood(
                format!("\u{26a0}\u{fe0f} Domain {domain} not found, DoT is working though."),
                Mood::Positive,
            ),
            Err(failure) => Notice::with_mood(format!("\u{1f6a8} {failure}"), Mood::Negative),
        }
    }

    fn welcome(&self) -> String {
        let mut text = "Hey. I am having a look on the dot.\n\
                        If you want me to make an unscheduled extra check type /poke. \
                        Stop me with /stop."
            .to_string();
        if let Some(name) = self
            .main_channel
            .as_ref()
            .and_then(|channel| channel.as_str().strip_prefix('@'))
        {
            text.push_str(&format!(" Feel free to join https://t.me/{name}"));
        }
        text
    }
}

/// Runs one command in its own task and replies with whatever it produced,
/// or with a generic apology if the handler panicked.
pub async fn dispatch(handlers: Arc<Handlers>, command: Command, args: Vec<String>, origin: Origin) {
    let task = {
        let handlers = handlers.clone();
        let origin = origin.clone();
        tokio::spawn(async move { handlers.handle(command, &args, &origin).await })
    };

    let notice = match task.await {
        Ok(notice) => notice,
        Err(e) => {
            error!("Handler for {command} from {} failed: {e}", origin.chat);
            Notice::text("\u{26a0}\u{fe0f} Something went wrong, please try again.")
        }
    };

    if let Err(e) = handlers.notifier.reply(&origin, &notice).await {
        warn!("Failed to reply to {}: {e}", origin.chat);
    }
}

/// Long-polls the bot API and dispatches every recognised command until
/// `token` is cancelled.
pub async fn run(
    handlers: Arc<Handlers>,
    channel: Arc<TelegramChannel>,
    table: CommandTable,
    token: CancellationToken,
) {
    info!("Listening for commands...");
    let mut offset = 0;

    loop {
        let updates = select! {
            result = channel.updates(offset) => result,
            () = token.cancelled() => {
                info!("Shutdown requested, stopping command listener");
                break;
            }
        };

        let updates = match updates {
            Ok(updates) => updates,
            Err(e) => {
                warn!("Failed to fetch updates: {e}");
                select! {
                    () = sleep(RETRY_DELAY) => continue,
                    () = token.cancelled() => break,
                }
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            let Some((text, origin)) = update.command_text() else {
                continue;
            };
            let Some((command, args)) = table.parse(text) else {
                debug!("Ignoring message from {}", origin.chat);
                continue;
            };

            info!("Received {command} from {}", origin.chat);
            tokio::spawn(dispatch(handlers.clone(), command, args, origin));
        }
    }

    info!("Command listener stopped");
}
