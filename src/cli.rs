use clap::Parser;

/// Host-resident lab agent: checks in with its range controller, executes
/// issued work, reports results.
#[derive(Debug, Parser)]
#[command(name = "outpost", version, about)]
pub struct Cli {
    /// Override the check-in interval (e.g. `30s`, `5m`).
    #[arg(long)]
    pub interval: Option<String>,

    /// Override the controller check-in URL.
    #[arg(long)]
    pub controller_url: Option<String>,

    /// Leave the system hosts file alone (DNS bypass still applies).
    #[arg(long)]
    pub no_hosts_rewrite: bool,
}

impl Cli {
    /// Layer CLI overrides on top of the resolved configuration.
    pub fn apply(&self, config: &mut crate::config::Config) -> crate::error::Result<()> {
        if let Some(raw) = &self.interval {
            config.checkin_interval = crate::config::parse_interval(raw)?;
        }
        if let Some(url) = &self.controller_url {
            config.controller_url = url.clone();
        }
        if self.no_hosts_rewrite {
            config.rewrite_hosts = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::time::Duration;

    #[test]
    fn overrides_apply_on_top_of_resolved_config() {
        let cli = Cli::parse_from([
            "outpost",
            "--interval",
            "90s",
            "--controller-url",
            "https://10.0.0.1:4443/beacon",
            "--no-hosts-rewrite",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config).unwrap();
        assert_eq!(config.checkin_interval, Duration::from_secs(90));
        assert_eq!(config.controller_url, "https://10.0.0.1:4443/beacon");
        assert!(!config.rewrite_hosts);
    }

    #[test]
    fn bad_interval_is_a_config_error() {
        let cli = Cli::parse_from(["outpost", "--interval", "whenever"]);
        let mut config = Config::default();
        assert!(cli.apply(&mut config).is_err());
    }

    #[test]
    fn no_flags_leave_config_untouched() {
        let cli = Cli::parse_from(["outpost"]);
        let mut config = Config::default();
        let before = config.checkin_interval;
        cli.apply(&mut config).unwrap();
        assert_eq!(config.checkin_interval, before);
        assert!(config.rewrite_hosts);
    }
}
