//! Log-tailing metric engine.
//!
//! Programs declare metrics and the regular expressions that update them.
//! The engine tails log files, feeds every new line through the loaded
//! programs and keeps the resulting values in a concurrent [`MetricStore`].
//! Consumers ask for a serialized snapshot of the store with
//! [`Engine::write_metrics`] and decode it back into [`Metric`] values.
//!
//! # Example
//!
//! ```ignore
//! use logmetrics::{Engine, Options};
//!
//! let engine = Arc::new(Engine::new(Options::new("/etc/progs", vec!["/var/log/app.log".into()]))?);
//! let tailers = engine.start_tailing(cancel_token.clone());
//! engine.write_metrics(writer).await?;
//! ```

mod datum;
mod engine;
mod error;
mod metric;
mod program;
mod store;
mod tailer;

pub use datum::Datum;
pub use engine::{Engine, Options};
pub use error::{Error, Result};
pub use metric::{LabelSet, Metric, MetricKind};
pub use program::{Program, Rule, RuleMatch, load_programs};
pub use store::MetricStore;
pub use tailer::FileTailer;
