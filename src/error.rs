use thiserror::Error;

/// Run-level validation and resource errors.
///
/// Per-range data gaps never surface here; they degrade to NoTrade rows.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Missing required column '{column}' in {source_name}")]
    MissingColumn { column: String, source_name: String },

    #[error("Unknown instrument '{0}': add it to the 'instruments' section of the config")]
    UnknownInstrument(String),

    #[error("Invalid slot label '{0}', expected HH:MM")]
    InvalidSlotLabel(String),

    #[error("Unknown time zone '{0}'")]
    UnknownTimeZone(String),

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error(
        "Out of memory growing bar table to {rows} rows (~{bytes} bytes); \
         narrow the date range or split the input by instrument"
    )]
    Capacity { rows: usize, bytes: usize },
}

impl EngineError {
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
