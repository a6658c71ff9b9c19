// Copyright 2018 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License

/*! Getting the finished report where it's going.

Reports go either to standard output or to a file. Files are written through
a temporary file in the same directory that is renamed into place once
complete, so a failed run never leaves a truncated report behind.

*/

use failure::{Error, ResultExt};
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use termcolor::{Buffer, BufferWriter, ColorChoice};


/// Where the report should go.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Destination {
    Stdout,
    File(PathBuf),
}

impl Destination {
    pub fn new(path: Option<PathBuf>) -> Self {
        match path {
            Some(p) => Destination::File(p),
            None => Destination::Stdout,
        }
    }

    fn stdout_writer() -> BufferWriter {
        let choice = if io::stdout().is_terminal() {
            ColorChoice::Auto
        } else {
            ColorChoice::Never
        };

        BufferWriter::stdout(choice)
    }

    /// Make a buffer to render the report into. Only reports bound for a
    /// terminal get colors.
    pub fn buffer(&self) -> Buffer {
        match *self {
            Destination::Stdout => Self::stdout_writer().buffer(),
            Destination::File(_) => Buffer::no_color(),
        }
    }

    /// Emit a finished report.
    pub fn write(&self, report: &Buffer) -> Result<(), Error> {
        match *self {
            Destination::Stdout => {
                Self::stdout_writer().print(report).context("cannot write the report to standard output")?;
            },

            Destination::File(ref path) => {
                write_atomically(path, report.as_slice())?;
            },
        }

        Ok(())
    }
}


/// Write `data` to `path`, which either ends up with all of it or is left
/// untouched.
fn write_atomically(path: &Path, data: &[u8]) -> Result<(), Error> {
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir)
        .with_context(|_| format!("cannot create a temporary file in {}", dir.display()))?;

    temp.write_all(data)
        .and_then(|_| temp.as_file().sync_all())
        .with_context(|_| format!("cannot write the report to {}", temp.path().display()))?;

    temp.persist(path)
        .map_err(|e| e.error)
        .with_context(|_| format!("cannot save the report as {}", path.display()))?;

    info!("report written to {}", path.display());
    Ok(())
}
