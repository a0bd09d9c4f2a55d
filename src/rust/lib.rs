// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! A partitioned global address space runtime. Each core runs a cooperative scheduler on its own OS thread; cores
//! talk to each other through aggregated active messages.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

#[macro_use]
extern crate log;

pub mod pgas;
pub mod runtime;

pub use crate::{
    pgas::{
        config::{
            Config,
            LoadBalance,
            RuntimeConfig,
        },
        world::World,
    },
    runtime::{
        aggregator::AggregatorSnapshot,
        completion::CompletionEvent,
        condition_variable::ConditionVariable,
        context::{
            aggregator_stats,
            census,
            cores,
            flush,
            locale_cores,
            locale_of,
            locales,
            mycore,
            mylocale,
            pending_messages,
            send_message,
            send_message_async,
            signal_termination,
            spawn,
            spawn_public,
            total_aggregator_stats,
        },
        count_condition_variable::CountConditionVariable,
        delegate,
        fail::Fail,
        full_empty::FullEmpty,
        gaddr::GlobalAddress,
        message::{
            Message,
            ReuseMessagePool,
        },
        scheduler::{
            mutex::Mutex,
            thread_idle,
            thread_suspend,
            thread_wake,
            thread_yield,
            thread_yield_periodic,
        },
        semaphore::CountingSemaphore,
        Core,
        Locale,
        Topology,
    },
};

//======================================================================================================================
// Macros
//======================================================================================================================

/// Bails out of an `anyhow::Result` function when both sides are not equal.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr $(,)?) => {
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    ::anyhow::bail!(
                        "ensure failed: `(left == right)` left: `{:?}`, right: `{:?}` ({}:{})",
                        left_val,
                        right_val,
                        file!(),
                        line!()
                    );
                }
            },
        }
    };
}

/// Bails out of an `anyhow::Result` function when both sides are equal.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr $(,)?) => {
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val == *right_val {
                    ::anyhow::bail!(
                        "ensure failed: `(left != right)` left: `{:?}`, right: `{:?}` ({}:{})",
                        left_val,
                        right_val,
                        file!(),
                        line!()
                    );
                }
            },
        }
    };
}
