//! Web surface: one dashboard page plus a small JSON API on a single port.

mod page;
mod server;

pub use page::{escape_html, render_dashboard};
pub use server::{router, run_server, WebState};
