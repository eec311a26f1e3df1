//! Browser capability adapters.
//!
//! `chromium` drives a local Chrome/Chromium over the DevTools protocol via
//! chromiumoxide.

pub mod chromium;
mod script;

pub use chromium::{ChromiumLauncher, ChromiumPage, ChromiumSession};
