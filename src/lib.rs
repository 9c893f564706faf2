//! # eaudit — per-core energy attribution profiler
//!
//! eaudit launches a target executable under ptrace, interrupts it on a
//! periodic timer, and charges each tick's hardware-counter and RAPL
//! energy deltas to the function each thread was executing, per core.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Target process tree                     │
//! │        (forked, traced, stopped/resumed every tick)          │
//! └───────────────────────────┬──────────────────────────────────┘
//!                             │ ptrace events, registers, /proc
//!                             ▼
//! ┌──────────────┐   ┌──────────────┐   ┌────────────────────┐
//! │   Sampling   │──▶│    Tracer    │──▶│      Sampler       │
//! │    Clock     │   │  (ptrace)    │   │ (attribution table)│
//! └──────────────┘   └──────────────┘   └──────────┬─────────┘
//!                                                  │
//!                       ┌──────────────┐           │
//!                       │   Counters   │◀──────────┤ per-core deltas
//!                       │ (perf, RAPL) │           │
//!                       └──────────────┘           │
//!                       ┌──────────────┐           │
//!                       │ Energy Model │◀──────────┤ per-core split
//!                       └──────────────┘           │
//!                                                  ▼
//!                       ┌──────────────┐   ┌──────────────┐
//!                       │ Symbolizer   │──▶│    Report    │
//!                       │ (addr2line)  │   │    (TSV)     │
//!                       └──────────────┘   └──────────────┘
//! ```
//!
//! ## Module structure
//!
//! - [`cli`]: argument parsing and run configuration
//! - [`clock`]: the periodic sampling timer and its atomic expiry flag
//! - [`tracer`]: ptrace ownership of the target's threads
//! - [`counters`]: merged per-core (perf) and package (RAPL) counter sets
//! - [`model`]: clustered-regression scoring and the per-core energy split
//! - [`sampling`]: the main loop and the attribution table
//! - [`symbolization`]: batch address-to-function resolution
//! - [`report`]: the per-function / per-core / global TSV report
//! - [`domain`]: shared newtypes and error enums

pub mod cli;
pub mod clock;
pub mod counters;
pub mod domain;
pub mod model;
pub mod report;
pub mod sampling;
pub mod symbolization;
pub mod tracer;
