// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::{
    bail,
    Result,
};
use ::clap::{
    Arg,
    ArgMatches,
    Command,
};
use ::pgas::{
    cores,
    flush,
    mycore,
    send_message,
    send_message_async,
    spawn,
    thread_yield,
    AggregatorSnapshot,
    CompletionEvent,
    Config,
    Core,
    GlobalAddress,
    RuntimeConfig,
    World,
};
use ::rand::{
    rngs::SmallRng,
    Rng,
    SeedableRng,
};
use ::std::{
    sync::atomic::{
        AtomicUsize,
        Ordering,
    },
    time::{
        Duration,
        Instant,
    },
};

//==============================================================================
// Program Arguments
//==============================================================================

/// Program Arguments
#[derive(Debug)]
pub struct ProgramArguments {
    /// Configuration file.
    config: Option<String>,
    /// Number of locales.
    locales: Option<usize>,
    /// Cores per locale.
    locale_cores: Option<usize>,
    /// Messages sent by each core.
    messages: usize,
}

/// Associate functions for Program Arguments
impl ProgramArguments {
    /// Default number of messages per core.
    const DEFAULT_MESSAGES: usize = 100_000;

    /// Parses the program arguments from the command line interface.
    pub fn new(app_name: &'static str, app_author: &'static str, app_about: &'static str) -> Result<Self> {
        let matches: ArgMatches = Command::new(app_name)
            .author(app_author)
            .about(app_about)
            .arg(
                Arg::new("config")
                    .long("config")
                    .value_parser(clap::value_parser!(String))
                    .required(false)
                    .value_name("FILE")
                    .help("Sets the configuration file"),
            )
            .arg(
                Arg::new("locales")
                    .long("locales")
                    .value_parser(clap::value_parser!(String))
                    .required(false)
                    .value_name("COUNT")
                    .help("Sets the number of locales"),
            )
            .arg(
                Arg::new("locale-cores")
                    .long("locale-cores")
                    .value_parser(clap::value_parser!(String))
                    .required(false)
                    .value_name("COUNT")
                    .help("Sets the number of cores per locale"),
            )
            .arg(
                Arg::new("messages")
                    .long("messages")
                    .value_parser(clap::value_parser!(String))
                    .required(false)
                    .value_name("COUNT")
                    .help("Sets the number of messages each core sends"),
            )
            .get_matches();

        // Default arguments.
        let mut args: ProgramArguments = ProgramArguments {
            config: None,
            locales: None,
            locale_cores: None,
            messages: Self::DEFAULT_MESSAGES,
        };

        // Configuration file.
        if let Some(config) = matches.get_one::<String>("config") {
            args.config = Some(config.to_string());
        }

        // Topology.
        if let Some(locales) = matches.get_one::<String>("locales") {
            args.locales = Some(Self::parse_count(locales, "locales")?);
        }
        if let Some(locale_cores) = matches.get_one::<String>("locale-cores") {
            args.locale_cores = Some(Self::parse_count(locale_cores, "locale cores")?);
        }

        // Messages.
        if let Some(messages) = matches.get_one::<String>("messages") {
            args.messages = Self::parse_count(messages, "messages")?;
        }

        Ok(args)
    }

    /// Builds the runtime configuration: the file or the defaults, then the command line.
    pub fn runtime_config(&self) -> Result<RuntimeConfig> {
        let config: Config = match &self.config {
            Some(path) => match Config::new(path) {
                Ok(config) => config,
                Err(e) => bail!("failed to read {}: {:?}", path, e),
            },
            None => Config::empty(),
        };
        let mut runtime: RuntimeConfig = match config.runtime_config() {
            Ok(runtime) => runtime,
            Err(e) => bail!("bad configuration: {:?}", e),
        };
        if let Some(locales) = self.locales {
            runtime.locales = locales;
        }
        if let Some(locale_cores) = self.locale_cores {
            runtime.locale_cores = locale_cores;
        }
        if self.locales.is_none() && self.locale_cores.is_none() && self.config.is_none() {
            runtime.locales = 2;
            runtime.locale_cores = 2;
        }
        Ok(runtime)
    }

    pub fn get_messages(&self) -> usize {
        self.messages
    }

    fn parse_count(value: &str, what: &str) -> Result<usize> {
        let count: usize = value.parse()?;
        if count > 0 {
            Ok(count)
        } else {
            bail!("invalid number of {}", what)
        }
    }
}

//==============================================================================
// Application
//==============================================================================

/// Sends `messages` requests from the calling core to random cores and waits for every reply.
async fn storm(messages: usize, finished: &'static AtomicUsize) {
    let me: Core = mycore();
    let replies: CompletionEvent = CompletionEvent::new(messages as i64);
    let reply_to: GlobalAddress<CompletionEvent> = GlobalAddress::local(&replies);
    let mut rng: SmallRng = SmallRng::seed_from_u64(me as u64);
    let cores: usize = cores();
    for _ in 0..messages {
        let destination: Core = rng.gen_range(0..cores) as Core;
        send_message_async(destination, move || {
            send_message(me, move || unsafe { reply_to.get() }.complete(1));
        })
        .await;
    }
    for destination in 0..cores {
        flush(destination as Core);
    }
    replies.wait().await;
    finished.fetch_add(1, Ordering::AcqRel);
}

//==============================================================================
// main()
//==============================================================================

fn main() -> Result<()> {
    let args: ProgramArguments = ProgramArguments::new(
        "message-storm",
        "Microsoft Corporation",
        "Floods every core of a run with small active messages and waits for the replies.",
    )?;
    let config: RuntimeConfig = args.runtime_config()?;
    let messages: usize = args.get_messages();
    let world: World = match World::new(config) {
        Ok(world) => world,
        Err(e) => bail!("failed to create world: {:?}", e),
    };
    let storms: usize = world.topology().cores();
    let total: usize = messages * storms;
    let finished: &'static AtomicUsize = Box::leak(Box::new(AtomicUsize::new(0)));

    let start: Instant = Instant::now();
    let stats: AggregatorSnapshot = match world.run(move || async move {
        for core in 0..cores() {
            send_message(core as Core, move || spawn(storm(messages, finished)));
            flush(core as Core);
        }
        while finished.load(Ordering::Acquire) < storms {
            thread_yield().await;
        }
    }) {
        Ok(stats) => stats,
        Err(e) => bail!("run failed: {:?}", e),
    };
    let elapsed: Duration = start.elapsed();

    println!(
        "{} round trips in {:?} ({:.0} msg/s)",
        total,
        elapsed,
        2.0 * total as f64 / elapsed.as_secs_f64()
    );
    println!(
        "buffers sent: {}, bytes serialized: {}, immediate sends: {}, flushes: {}, idle flushes: {}",
        stats.buffers_sent, stats.bytes_serialized, stats.immediate_sends, stats.flushes, stats.idle_flushes
    );
    if stats.buffers_sent > 0 {
        println!(
            "average buffer: {} bytes",
            stats.bytes_serialized / stats.buffers_sent
        );
    }
    Ok(())
}
