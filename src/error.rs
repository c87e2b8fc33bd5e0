use thiserror::Error;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the engine, the statistics layer and the driver.
///
/// Each variant carries enough context to be actionable. Stale events are not
/// errors and never surface here.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid user or API parameter.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// Configuration rejected before the simulation is built.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Requested particles cannot be placed in the arena.
    #[error("particles do not fit: {0}")]
    Overcrowded(String),

    /// Numerical or geometric issue (e.g. degenerate contact normal).
    #[error("numerical error: {0}")]
    MathError(String),

    /// State drift or positions out of bounds.
    #[error("out of bounds: {0}")]
    OutOfBounds(String),

    /// Conversion between two different unit families.
    #[error("cannot convert {from} to {to}: incompatible unit families")]
    UnitMismatch {
        from: &'static str,
        to: &'static str,
    },

    /// A reading was requested in a family with no selectable units.
    #[error("no display unit available for {0}")]
    NoUnitAvailable(&'static str),

    /// The statistic id is not registered.
    #[error("unknown statistic id {0}")]
    UnknownStatistic(u64),

    /// The simulation thread has stopped and no longer accepts controls.
    #[error("simulation thread is not running")]
    Disconnected,

    /// TOML configuration could not be parsed.
    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    /// Propagated I/O errors (thread spawn).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_is_informative() {
        let e = Error::InvalidParam("radius must be > 0".to_string());
        let msg = format!("{e}");
        assert!(msg.contains("invalid parameter"));
        assert!(msg.contains("radius"));
    }

    #[test]
    fn unit_mismatch_names_both_units() {
        let e = Error::UnitMismatch {
            from: "nm",
            to: "K",
        };
        let msg = e.to_string();
        assert!(msg.contains("nm") && msg.contains("K"));
    }

    #[test]
    fn result_type_alias_compiles() -> Result<()> {
        Ok(())
    }
}
