// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Calendar-Presence: keep chat presence in sync with calendar availability
//!
//! This crate provides the sync engine and HTTP service that mirror a
//! user's calendar into their chat presence, and deliver event change
//! notifications, reminders and daily summaries as bot messages.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use services::{Engine, NotificationProcessor};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub engine: Engine,
    pub notifications: NotificationProcessor,
}
