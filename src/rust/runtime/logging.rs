// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::flexi_logger::{
    Logger,
    LoggerHandle,
};
use ::std::sync::Once;

//==============================================================================
// Static Variables
//==============================================================================

/// Guardian to the logging initialize function.
static INIT_LOG: Once = Once::new();

//==============================================================================
// Standalone Functions
//==============================================================================

/// Initializes logging features. The level comes from RUST_LOG and defaults to warnings.
pub fn initialize() {
    INIT_LOG.call_once(|| {
        let handle: LoggerHandle = match Logger::try_with_env_or_str("warn").and_then(|logger| logger.start()) {
            Ok(handle) => handle,
            Err(e) => {
                eprintln!("initialize(): failed to start logger ({:?})", e);
                return;
            },
        };
        // The logger stops when its handle goes away, so keep it for the rest of the process.
        ::std::mem::forget(handle);
    });
}
