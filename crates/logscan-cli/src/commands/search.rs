//! Search command implementation.

use std::io::Write;

use logscan::Engine;

use crate::cli::SearchArgs;
use crate::error::CliError;
use crate::output::OutputFormat;

/// Handler for the search command.
pub struct SearchCommand<'a> {
    engine: &'a Engine,
}

impl<'a> SearchCommand<'a> {
    /// Creates a new search command handler.
    #[must_use]
    pub const fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Executes the search command and returns the number of matches.
    ///
    /// # Errors
    ///
    /// Returns error if the pattern is invalid, the file cannot be read, or
    /// output cannot be written.
    pub fn execute<W: Write>(
        &self,
        out: &mut W,
        format: &OutputFormat,
        args: &SearchArgs,
    ) -> Result<usize, CliError> {
        let mut count = 0;
        for found in self.engine.open_raw(&args.file, &args.pattern)? {
            let found = found.map_err(logscan::Error::from)?;
            format.write(out, &found)?;
            count += 1;
        }
        Ok(count)
    }
}
