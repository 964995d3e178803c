//! Maps finished runs to operator output and an exit status.

use std::io::Write;

use crate::record::RunRecord;

/// Exit status of a successful run.
pub const EXIT_SUCCESS: u8 = 0;

/// Exit status of any failed run.
pub const EXIT_FAILURE: u8 = 1;

/// Print the outcome of `record` and return the process exit status.
///
/// Success prints the proxy address (or the record as JSON) on `out`.
/// Failure prints the cause on `err`. Safety violations are labelled so
/// they cannot be mistaken for transient errors.
pub fn report<R, O, E>(record: &R, json: bool, out: &mut O, err: &mut E) -> u8
where
    R: RunRecord,
    O: Write,
    E: Write,
{
    let outcome = record.outcome();

    let written = match &outcome {
        Ok(_) if json => write_json(record, out),
        Ok(proxy) => writeln!(out, "{}", proxy),
        Err(failure) => {
            let label = if failure.safety_violation {
                "SAFETY VIOLATION"
            } else {
                "error"
            };
            let line = writeln!(err, "{} [{}]: {}", label, failure.kind, failure.message);
            if json { line.and_then(|_| write_json(record, out)) } else { line }
        }
    };
    if let Err(e) = written {
        tracing::error!(error = %e, "Failed to write run report");
    }

    match outcome {
        Ok(_) => EXIT_SUCCESS,
        Err(_) => EXIT_FAILURE,
    }
}

fn write_json<R: RunRecord, O: Write>(record: &R, out: &mut O) -> std::io::Result<()> {
    serde_json::to_writer_pretty(&mut *out, record)?;
    writeln!(out)
}
