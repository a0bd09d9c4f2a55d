// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    limits::{
        MAX_IN_FLIGHT_PER_LOCALE,
        MIN_BUFFER_SIZE,
        MESSAGE_HEADER_BYTES,
    },
};
use ::std::{
    fs::File,
    io::Read,
    ops::Index,
    str::FromStr,
};
use ::yaml_rust::{
    yaml::Hash,
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Constants
//======================================================================================================================

// Shape of the run.
mod pgas_config {
    pub const SECTION_NAME: &str = "pgas";
    pub const LOCALES: &str = "locales";
    pub const LOCALE_CORES: &str = "locale_cores";
    pub const MEMORY_BUDGET: &str = "memory_budget";
}

// Message aggregation.
mod aggregator_config {
    pub const SECTION_NAME: &str = "aggregator";
    pub const TARGET_SIZE: &str = "target_size";
    pub const SIZE_FLUSH: &str = "size_flush";
    pub const AUTOFLUSH_TICKS: &str = "autoflush_ticks";
    pub const ENABLE_AGGREGATION: &str = "enable_aggregation";
    pub const FLUSH_ON_IDLE: &str = "flush_on_idle";
    pub const BUFFER_SIZE: &str = "buffer_size";
    pub const RDMA_BUFFERS: &str = "rdma_buffers";
    pub const SEND_CONTEXTS: &str = "send_contexts";
    pub const SEND_CONTEXT_SIZE: &str = "send_context_size";
    pub const IN_FLIGHT_PER_LOCALE: &str = "in_flight_per_locale";
}

// Tasking and work stealing.
mod tasking_config {
    pub const SECTION_NAME: &str = "tasking";
    pub const CHUNK_SIZE: &str = "chunk_size";
    pub const LOAD_BALANCE: &str = "load_balance";
    pub const STEAL_SEED: &str = "steal_seed";
    pub const PERIODIC_POLL_TICKS: &str = "periodic_poll_ticks";
    pub const NUM_STARTING_WORKERS: &str = "num_starting_workers";
    pub const MAX_ALLOWED_ACTIVE_WORKERS: &str = "max_allowed_active_workers";
    pub const STACK_SIZE: &str = "stack_size";
    pub const STEAL_QUEUE_CAPACITY: &str = "steal_queue_capacity";
}

/// Seed used to shuffle steal victims when none is configured.
const DEFAULT_STEAL_SEED: u64 = 12345;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Runtime configuration file.
#[derive(Clone, Debug)]
pub struct Config(pub Yaml);

/// How idle cores look for work.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoadBalance {
    /// Cores only run what they spawned themselves.
    None,
    /// Idle cores steal public tasks from the other cores of their locale.
    Steal,
}

/// Every knob of the runtime, resolved.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RuntimeConfig {
    pub locales: usize,
    pub locale_cores: usize,
    /// Bytes the runtime may allocate per core. Footprints are shrunk to fit when set.
    pub memory_budget: Option<usize>,

    /// Bytes a destination should gather before it is worth sending.
    pub target_size: usize,
    /// Flush a destination as soon as its pending bytes reach [RuntimeConfig::target_size].
    pub size_flush: bool,
    /// Nanoseconds after which pending messages are sent regardless of size.
    pub autoflush_ticks: u64,
    /// Send messages to other locales one by one instead of aggregating them.
    pub enable_aggregation: bool,
    /// Let idle cores flush their pending messages.
    pub flush_on_idle: bool,
    pub buffer_size: usize,
    /// Aggregation buffers per core.
    pub rdma_buffers: usize,
    /// Immediate send contexts per core.
    pub send_contexts: usize,
    pub send_context_size: usize,
    /// Buffers one core may have in flight to one locale.
    pub in_flight_per_locale: usize,

    /// Most tasks taken by one steal.
    pub chunk_size: usize,
    pub load_balance: LoadBalance,
    pub steal_seed: u64,
    /// Nanoseconds between two runs of a periodic Worker.
    pub periodic_poll_ticks: u64,
    pub num_starting_workers: usize,
    pub max_allowed_active_workers: usize,
    /// Bytes accounted per task Worker.
    pub stack_size: usize,
    pub steal_queue_capacity: usize,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Config {
    /// Reads a configuration file into a [Config] object.
    pub fn new(config_path: &str) -> Result<Self, Fail> {
        let mut config_s: String = String::new();
        File::open(config_path)?.read_to_string(&mut config_s)?;
        config_s.parse()
    }

    /// A configuration with no options set.
    pub fn empty() -> Self {
        Self(Yaml::Hash(Hash::new()))
    }

    /// Resolves every option: environment first, then the file, then the default.
    pub fn runtime_config(&self) -> Result<RuntimeConfig, Fail> {
        let defaults: RuntimeConfig = RuntimeConfig::default();
        let pgas: Option<&Yaml> = self.get_section(pgas_config::SECTION_NAME)?;
        let aggregator: Option<&Yaml> = self.get_section(aggregator_config::SECTION_NAME)?;
        let tasking: Option<&Yaml> = self.get_section(tasking_config::SECTION_NAME)?;

        let memory_budget: Option<usize> =
            match Self::get_typed_env_option::<usize>(pgas_config::MEMORY_BUDGET)? {
                Some(budget) => Some(budget),
                None => match pgas {
                    Some(section) if !section.index(pgas_config::MEMORY_BUDGET).is_badvalue() => {
                        Some(Self::get_int_option(section, pgas_config::MEMORY_BUDGET)?)
                    },
                    _ => None,
                },
            };

        let load_balance: LoadBalance =
            match Self::get_typed_env_option::<String>(tasking_config::LOAD_BALANCE)? {
                Some(mode) => mode.parse()?,
                None => match tasking {
                    Some(section) if !section.index(tasking_config::LOAD_BALANCE).is_badvalue() => {
                        Self::get_typed_str_option(section, tasking_config::LOAD_BALANCE, |mode: &str| {
                            Some(mode.to_string())
                        })?
                        .parse()?
                    },
                    _ => defaults.load_balance,
                },
            };

        let config: RuntimeConfig = RuntimeConfig {
            locales: Self::int_or(pgas, pgas_config::LOCALES, defaults.locales)?,
            locale_cores: Self::int_or(pgas, pgas_config::LOCALE_CORES, defaults.locale_cores)?,
            memory_budget,
            target_size: Self::int_or(aggregator, aggregator_config::TARGET_SIZE, defaults.target_size)?,
            size_flush: Self::bool_or(aggregator, aggregator_config::SIZE_FLUSH, defaults.size_flush)?,
            autoflush_ticks: Self::int_or(aggregator, aggregator_config::AUTOFLUSH_TICKS, defaults.autoflush_ticks)?,
            enable_aggregation: Self::bool_or(
                aggregator,
                aggregator_config::ENABLE_AGGREGATION,
                defaults.enable_aggregation,
            )?,
            flush_on_idle: Self::bool_or(aggregator, aggregator_config::FLUSH_ON_IDLE, defaults.flush_on_idle)?,
            buffer_size: Self::int_or(aggregator, aggregator_config::BUFFER_SIZE, defaults.buffer_size)?,
            rdma_buffers: Self::int_or(aggregator, aggregator_config::RDMA_BUFFERS, defaults.rdma_buffers)?,
            send_contexts: Self::int_or(aggregator, aggregator_config::SEND_CONTEXTS, defaults.send_contexts)?,
            send_context_size: Self::int_or(
                aggregator,
                aggregator_config::SEND_CONTEXT_SIZE,
                defaults.send_context_size,
            )?,
            in_flight_per_locale: Self::int_or(
                aggregator,
                aggregator_config::IN_FLIGHT_PER_LOCALE,
                defaults.in_flight_per_locale,
            )?,
            chunk_size: Self::int_or(tasking, tasking_config::CHUNK_SIZE, defaults.chunk_size)?,
            load_balance,
            steal_seed: Self::int_or(tasking, tasking_config::STEAL_SEED, defaults.steal_seed)?,
            periodic_poll_ticks: Self::int_or(
                tasking,
                tasking_config::PERIODIC_POLL_TICKS,
                defaults.periodic_poll_ticks,
            )?,
            num_starting_workers: Self::int_or(
                tasking,
                tasking_config::NUM_STARTING_WORKERS,
                defaults.num_starting_workers,
            )?,
            max_allowed_active_workers: Self::int_or(
                tasking,
                tasking_config::MAX_ALLOWED_ACTIVE_WORKERS,
                defaults.max_allowed_active_workers,
            )?,
            stack_size: Self::int_or(tasking, tasking_config::STACK_SIZE, defaults.stack_size)?,
            steal_queue_capacity: Self::int_or(
                tasking,
                tasking_config::STEAL_QUEUE_CAPACITY,
                defaults.steal_queue_capacity,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Looks up an optional top-level section.
    fn get_section(&self, name: &str) -> Result<Option<&Yaml>, Fail> {
        if self.0.index(name).is_badvalue() {
            return Ok(None);
        }
        Ok(Some(Self::get_subsection(&self.0, name)?))
    }

    /// Integer option: environment, then file, then `default`.
    fn int_or<T: FromStr + TryFrom<i64>>(section: Option<&Yaml>, index: &str, default: T) -> Result<T, Fail> {
        if let Some(value) = Self::get_typed_env_option(index)? {
            return Ok(value);
        }
        match section {
            Some(section) if !section.index(index).is_badvalue() => Self::get_int_option(section, index),
            _ => Ok(default),
        }
    }

    /// Boolean option: environment, then file, then `default`.
    fn bool_or(section: Option<&Yaml>, index: &str, default: bool) -> Result<bool, Fail> {
        if let Some(value) = Self::get_typed_env_option(index)? {
            return Ok(value);
        }
        match section {
            Some(section) if !section.index(index).is_badvalue() => Self::get_bool_option(section, index),
            _ => Ok(default),
        }
    }

    /// Similar to [Self::get_option], but additionally verifies that the value is a section.
    fn get_subsection<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        let section: &'a Yaml = Self::get_option(yaml, index)?;
        match section {
            Yaml::Hash(_) => Ok(section),
            _ => {
                let message: String = format!("parameter \"{}\" has unexpected type", index);
                error!("get_subsection(): {}", message);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
        }
    }

    /// Index `yaml` to find the value at `index`, validating that the index exists.
    fn get_option<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        match yaml.index(index) {
            Yaml::BadValue => {
                let message: String = format!("missing configuration option \"{}\"", index);
                error!("get_option(): {}", message);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
            value => Ok(value),
        }
    }

    /// Index `yaml` to find the value at `index`, validating that it exists and that the receiver returns Some(_).
    fn get_typed_option<'a, T, Fn>(yaml: &'a Yaml, index: &str, receiver: Fn) -> Result<T, Fail>
    where
        Fn: FnOnce(&'a Yaml) -> Option<T>,
    {
        let option: &'a Yaml = Self::get_option(yaml, index)?;
        match receiver(option) {
            Some(value) => Ok(value),
            None => {
                let message: String = format!("parameter {} has unexpected type", index);
                error!("get_typed_option(): {}", message);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
        }
    }

    /// Index `yaml` to find value at `index`, validating it as a string.
    fn get_typed_str_option<T, Fn>(yaml: &Yaml, index: &str, parser: Fn) -> Result<T, Fail>
    where
        Fn: FnOnce(&str) -> Option<T>,
    {
        let option: &Yaml = Self::get_option(yaml, index)?;
        if let Some(value) = option.as_str() {
            if let Some(value) = parser(value) {
                return Ok(value);
            }
        }
        let message: String = format!("parameter {} has unexpected type", index);
        error!("get_typed_str_option(): {}", message);
        Err(Fail::new(libc::EINVAL, message.as_str()))
    }

    /// Get value where the environment value overrides the config file if it exists.
    fn get_typed_env_option<T: FromStr>(index: &str) -> Result<Option<T>, Fail> {
        if let Ok(var) = ::std::env::var(index.to_uppercase()) {
            if let Ok(value) = var.as_str().parse() {
                return Ok(Some(value));
            } else {
                let message: String = format!("environment option {} has unexpected type", index.to_uppercase());
                error!("get_typed_env_option(): {}", message);
                return Err(Fail::new(libc::EINVAL, message.as_str()));
            }
        }
        Ok(None)
    }

    /// Similar to [Self::get_typed_option] using `Yaml::as_i64` as the receiver, but additionally verifies that the
    /// destination type may hold the i64 value.
    fn get_int_option<T: TryFrom<i64>>(yaml: &Yaml, index: &str) -> Result<T, Fail> {
        let val: i64 = Self::get_typed_option(yaml, index, &Yaml::as_i64)?;
        match T::try_from(val) {
            Ok(val) => Ok(val),
            _ => {
                let message: String = format!("parameter \"{}\" is out of range", index);
                error!("get_int_option(): {}", message);
                Err(Fail::new(libc::ERANGE, message.as_str()))
            },
        }
    }

    /// Same as [Self::get_typed_option] using `Yaml::as_bool` as the receiver.
    fn get_bool_option(yaml: &Yaml, index: &str) -> Result<bool, Fail> {
        Self::get_typed_option(yaml, index, &Yaml::as_bool)
    }
}

impl RuntimeConfig {
    /// Checks the options against each other and against the runtime's limits.
    pub fn validate(&self) -> Result<(), Fail> {
        if self.buffer_size < MIN_BUFFER_SIZE || self.buffer_size > u32::MAX as usize {
            let cause: String = format!("buffer_size {} is out of range", self.buffer_size);
            error!("validate(): {}", cause);
            return Err(Fail::new(libc::ERANGE, &cause));
        }
        if self.in_flight_per_locale == 0 || self.in_flight_per_locale > MAX_IN_FLIGHT_PER_LOCALE {
            let cause: String = format!(
                "in_flight_per_locale {} is not between 1 and {}",
                self.in_flight_per_locale, MAX_IN_FLIGHT_PER_LOCALE
            );
            error!("validate(): {}", cause);
            return Err(Fail::new(libc::ERANGE, &cause));
        }
        if self.rdma_buffers == 0 || self.num_starting_workers == 0 || self.max_allowed_active_workers == 0 {
            let cause: String = String::from("rdma_buffers and worker counts must be positive");
            error!("validate(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        if self.send_context_size < MESSAGE_HEADER_BYTES || self.chunk_size == 0 || self.steal_queue_capacity == 0 {
            let cause: String = String::from("send_context_size, chunk_size and steal_queue_capacity are too small");
            error!("validate(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        Ok(())
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl FromStr for Config {
    type Err = Fail;

    /// Parses a configuration document.
    fn from_str(config_s: &str) -> Result<Self, Fail> {
        let config: Vec<Yaml> = match YamlLoader::load_from_str(config_s) {
            Ok(config) => config,
            Err(e) => {
                let cause: String = format!("malformed configuration ({})", e);
                error!("from_str(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        match &config[..] {
            [c] => Ok(Self(c.clone())),
            _ => {
                error!("from_str(): wrong number of config objects");
                Err(Fail::new(libc::EINVAL, "Wrong number of config objects"))
            },
        }
    }
}

impl FromStr for LoadBalance {
    type Err = Fail;

    fn from_str(mode: &str) -> Result<Self, Fail> {
        match mode {
            "none" => Ok(LoadBalance::None),
            "steal" => Ok(LoadBalance::Steal),
            "share" | "global" => {
                let cause: String = format!("load balancing mode \"{}\" is not supported", mode);
                error!("from_str(): {}", cause);
                Err(Fail::new(libc::ENOTSUP, &cause))
            },
            _ => {
                let cause: String = format!("unknown load balancing mode \"{}\"", mode);
                error!("from_str(): {}", cause);
                Err(Fail::new(libc::EINVAL, &cause))
            },
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            locales: 1,
            locale_cores: 1,
            memory_budget: None,
            target_size: 4096,
            size_flush: false,
            autoflush_ticks: 100_000,
            enable_aggregation: true,
            flush_on_idle: true,
            buffer_size: 1 << 19,
            rdma_buffers: 8,
            send_contexts: 16,
            send_context_size: 4096,
            in_flight_per_locale: 4,
            chunk_size: 10,
            load_balance: LoadBalance::Steal,
            steal_seed: DEFAULT_STEAL_SEED,
            periodic_poll_ticks: 20_000,
            num_starting_workers: 4,
            max_allowed_active_workers: 64,
            stack_size: 64 * 1024,
            steal_queue_capacity: 1 << 14,
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
