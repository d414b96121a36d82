use std::time::Duration;

/// Timing of a device's polling and state handling.
#[derive(clap::Parser, Clone, Debug)]
#[group(id = "settings::Settings")]
pub struct Settings {
    /// How often the operational parameters (mode, fan mode, setpoint) are read.
    #[arg(long, default_value = "10s")]
    pub polling_interval: humantime::Duration,

    /// How often sensor readings are read and reported at most.
    #[arg(long, default_value = "30s")]
    pub report_interval: humantime::Duration,

    /// Close the connection after it has been unused for this long.
    ///
    /// Defaults to the transport's own idle timeout.
    #[arg(long)]
    pub idle_timeout: Option<humantime::Duration>,

    /// After a write, ignore values read back from the unit for this long.
    ///
    /// Units take a moment to apply a change and will report the old value meanwhile.
    #[arg(long, default_value = "10s")]
    pub suppression_window: humantime::Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(10).into(),
            report_interval: Duration::from_secs(30).into(),
            idle_timeout: None,
            suppression_window: Duration::from_secs(10).into(),
        }
    }
}

impl Settings {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout.map(Into::into)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::Parser as _;

    #[test]
    fn defaults_match_the_command_line() {
        let parsed = Settings::try_parse_from(["x"]).unwrap();
        let default = Settings::default();
        assert_eq!(*parsed.polling_interval, *default.polling_interval);
        assert_eq!(*parsed.report_interval, *default.report_interval);
        assert_eq!(*parsed.suppression_window, *default.suppression_window);
        assert_eq!(parsed.idle_timeout(), None);
        let parsed = Settings::try_parse_from(["x", "--idle-timeout", "2m"]).unwrap();
        assert_eq!(parsed.idle_timeout(), Some(Duration::from_secs(120)));
    }
}
