use std::path::Path;

use tracing::{error, info, warn};

use atlas_archive::validate_archive;
use atlas_core::error::exit;

/// Validate a finished archive. Warnings are reported but only errors (or an
/// unreadable archive) produce a failing exit code.
pub fn run(atls: &Path) -> u8 {
    let report = match validate_archive(atls) {
        Ok(report) => report,
        Err(message) => {
            error!(path = %atls.display(), "validation failed: {message}");
            return exit::VALIDATE_FATAL;
        }
    };

    for warning in &report.warnings {
        warn!("{warning}");
    }
    for err in &report.errors {
        error!("{err}");
    }

    if report.is_ok() {
        info!(
            path = %atls.display(),
            warnings = report.warnings.len(),
            "archive is valid"
        );
        exit::OK
    } else {
        error!(
            path = %atls.display(),
            errors = report.errors.len(),
            "archive failed validation"
        );
        exit::VALIDATE_FATAL
    }
}
