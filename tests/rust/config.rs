// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::pgas::{
    ensure_eq,
    Config,
    LoadBalance,
    RuntimeConfig,
    World,
};
use ::std::{
    env,
    fs,
    path::PathBuf,
    process,
};
use common::test_config;

//==============================================================================
// Constants
//==============================================================================

const CONFIG_FILE: &str = "
pgas:
  locales: 2
  locale_cores: 3
aggregator:
  target_size: 8192
  size_flush: true
  in_flight_per_locale: 2
tasking:
  load_balance: none
  chunk_size: 4
";

//==============================================================================
// test_config_file()
//==============================================================================

/// Options come from the file where it sets them and from the defaults elsewhere.
#[test]
fn test_config_file() -> Result<()> {
    let path: PathBuf = env::temp_dir().join(format!("pgas-config-{}.yaml", process::id()));
    fs::write(&path, CONFIG_FILE)?;
    let config: Result<Config, pgas::Fail> = Config::new(&path.to_string_lossy());
    fs::remove_file(&path)?;
    let config: RuntimeConfig = match config.and_then(|c| c.runtime_config()) {
        Ok(config) => config,
        Err(e) => anyhow::bail!("failed to load configuration: {:?}", e),
    };

    ensure_eq!(config.locales, 2);
    ensure_eq!(config.locale_cores, 3);
    ensure_eq!(config.target_size, 8192);
    ensure_eq!(config.size_flush, true);
    ensure_eq!(config.in_flight_per_locale, 2);
    ensure_eq!(config.load_balance, LoadBalance::None);
    ensure_eq!(config.chunk_size, 4);
    ensure_eq!(config.buffer_size, RuntimeConfig::default().buffer_size);
    Ok(())
}

//==============================================================================
// test_missing_file()
//==============================================================================

#[test]
fn test_missing_file() -> Result<()> {
    let result: Result<Config, pgas::Fail> = Config::new("/nonexistent/pgas.yaml");
    ensure_eq!(result.err().map(|e| e.errno), Some(libc::ENOENT));
    Ok(())
}

//==============================================================================
// test_environment_overrides_file()
//==============================================================================

/// An environment variable named after an option wins over the file.
#[test]
fn test_environment_overrides_file() -> Result<()> {
    let config: Config = match "tasking:\n  steal_seed: 7\n".parse() {
        Ok(config) => config,
        Err(e) => anyhow::bail!("failed to parse configuration: {:?}", e),
    };
    env::set_var("STEAL_SEED", "99");
    let resolved: Result<RuntimeConfig, pgas::Fail> = config.runtime_config();
    env::remove_var("STEAL_SEED");

    match resolved {
        Ok(resolved) => ensure_eq!(resolved.steal_seed, 99),
        Err(e) => anyhow::bail!("failed to resolve configuration: {:?}", e),
    }
    Ok(())
}

//==============================================================================
// test_unsupported_load_balancing()
//==============================================================================

/// Sharing and global load balancing are refused rather than silently downgraded.
#[test]
fn test_unsupported_load_balancing() -> Result<()> {
    for mode in ["share", "global"] {
        let config: Config = match format!("tasking:\n  load_balance: {}\n", mode).parse() {
            Ok(config) => config,
            Err(e) => anyhow::bail!("failed to parse configuration: {:?}", e),
        };
        ensure_eq!(config.runtime_config().err().map(|e| e.errno), Some(libc::ENOTSUP));
    }
    Ok(())
}

//==============================================================================
// test_memory_budget()
//==============================================================================

/// A world built under a memory budget shrinks its queues and buffers to fit.
#[test]
fn test_memory_budget() -> Result<()> {
    let unbounded: RuntimeConfig = test_config(1, 2);
    let budget: usize = World::negotiate_footprint(&mut unbounded.clone(), usize::MAX) / 2;
    let world: World = match World::new(RuntimeConfig {
        memory_budget: Some(budget),
        ..unbounded.clone()
    }) {
        Ok(world) => world,
        Err(e) => anyhow::bail!("failed to create world: {:?}", e),
    };

    ensure_eq!(world.config().steal_queue_capacity < unbounded.steal_queue_capacity, true);
    ensure_eq!(world.config().rdma_buffers <= unbounded.rdma_buffers, true);

    match world.run(|| async {}) {
        Ok(_) => (),
        Err(e) => anyhow::bail!("run failed: {:?}", e),
    };
    Ok(())
}

//==============================================================================
// test_invalid_options()
//==============================================================================

#[test]
fn test_invalid_options() -> Result<()> {
    let too_small: RuntimeConfig = RuntimeConfig {
        buffer_size: 64,
        ..Default::default()
    };
    ensure_eq!(World::new(too_small).err().map(|e| e.errno), Some(libc::ERANGE));

    let too_many: RuntimeConfig = RuntimeConfig {
        in_flight_per_locale: 17,
        ..Default::default()
    };
    ensure_eq!(World::new(too_many).err().map(|e| e.errno), Some(libc::ERANGE));

    let no_workers: RuntimeConfig = RuntimeConfig {
        num_starting_workers: 0,
        ..Default::default()
    };
    ensure_eq!(World::new(no_workers).err().map(|e| e.errno), Some(libc::EINVAL));
    Ok(())
}
