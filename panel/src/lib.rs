//! Site panel: keeps a UI view in sync with a local site server and a git
//! save workflow.
//!
//! - **[`core`]**: Pure, deterministic logic (wire messages, save types, view
//!   render state). No I/O.
//! - **[`io`]**: Side-effecting collaborators (config, discovery, git, review
//!   lookup, worker supervision). Behind traits where tests need fakes.
//!
//! Orchestration sits on top: [`bus`] carries typed messages between the host
//! and the view, [`reconcile`] runs saves, [`host`] and [`ui`] are the two
//! halves of the sync loop and [`client`] connects a view to `panel-host`
//! over HTTP.

pub mod bus;
pub mod cancel;
pub mod client;
pub mod core;
pub mod exit_codes;
pub mod host;
pub mod io;
pub mod logging;
pub mod reconcile;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod ui;
