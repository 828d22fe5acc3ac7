//! MySQL adapter: upsert sink per connection plus the error-ledger table.
//!
//! Identifiers come pre-validated from `migrate-core`; every row value is
//! bound as a positional parameter.

pub mod error;
pub mod ledger;
pub mod sink;
pub mod sql;
pub mod value;

pub use ledger::MySqlErrorLedger;
pub use sink::MySqlSink;
pub use sql::render_upsert;
pub use value::MySqlValue;

use mysql_async::{Opts, Pool};

/// Build a lazily-connecting pool from a `mysql://` URL.
pub fn pool_from_url(url: &str) -> Result<Pool, mysql_async::Error> {
    let opts = Opts::from_url(url)?;
    Ok(Pool::new(opts))
}
