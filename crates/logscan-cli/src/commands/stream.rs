//! Stream command implementation.
//!
//! Handles `stream-forward` and `stream-backward`.

use std::io::Write;

use logscan::{Direction, Engine, Query, QueryEvent, QuerySummary};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::{BackwardArgs, ForwardArgs, RangeArgs};
use crate::error::CliError;
use crate::output::OutputFormat;

/// Handler for the stream commands.
pub struct StreamCommand<'a> {
    engine: &'a Engine,
}

impl<'a> StreamCommand<'a> {
    /// Creates a new stream command handler.
    #[must_use]
    pub const fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Builds the engine query for `stream-forward`.
    #[must_use]
    pub fn forward_query(args: &ForwardArgs) -> Query {
        range_query(&args.range).with_follow_from(args.follow.into())
    }

    /// Builds the engine query for `stream-backward`.
    #[must_use]
    pub fn backward_query(args: &BackwardArgs) -> Query {
        range_query(&args.range).with_direction(Direction::Backward)
    }

    /// Runs `query`, writing each record as it arrives.
    ///
    /// Stops early after `limit` records or when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns error if the query is rejected, fails mid-stream, or output
    /// cannot be written.
    pub async fn execute<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        query: &Query,
        limit: Option<u64>,
        cancel: CancellationToken,
    ) -> Result<Option<QuerySummary>, CliError> {
        let mut rx = self.engine.spawn(query, cancel.clone())?;
        let mut written = 0u64;

        while let Some(event) = rx.recv().await {
            match event {
                QueryEvent::Record(record) => {
                    format.write(out, &record)?;
                    written += 1;
                    if limit.is_some_and(|limit| written >= limit) {
                        cancel.cancel();
                        break;
                    }
                }
                QueryEvent::Finished(summary) => {
                    info!(
                        emitted = summary.emitted,
                        skipped = summary.skipped,
                        cursor = summary.cursor.offset,
                        has_more = summary.cursor.has_more,
                        "query finished"
                    );
                    return Ok(Some(summary));
                }
                QueryEvent::Failed(e) => return Err(e.into()),
            }
        }

        info!(written, "query stopped");
        Ok(None)
    }
}

fn range_query(range: &RangeArgs) -> Query {
    let mut query = Query::new(&range.file);
    query.start_time = range.start;
    query.stop_time = range.stop;
    query.grep.clone_from(&range.grep);
    query
}
