/// Too Good To Go Notifier Library
///
/// Watches a marketplace account's favorite stores and notifies a Telegram
/// chat when surplus-food bags become available. Includes the randomized
/// invocation scheduler, the anti-bot cooldown, daily de-duplication, the
/// marketplace client and the bot and HTTP surfaces.

pub mod app;
pub mod availability;
pub mod bot;
pub mod clock;
pub mod config;
pub mod cooldown;
pub mod handlers;
pub mod http_server;
pub mod invocation;
pub mod ledger;
pub mod monitoring;
pub mod notifier;
pub mod preferences;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod tgtg;
pub mod trigger;
