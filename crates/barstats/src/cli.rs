use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};

pub const DEFAULT_INTERVAL: u32 = 5;
pub const MIN_INTERVAL: u32 = 1;
pub const MAX_INTERVAL: u32 = 3600;

pub const DEFAULT_NETWORK_REFRESH_RATE: u32 = 5;
pub const MIN_NETWORK_REFRESH_RATE: u32 = 1;
pub const MAX_NETWORK_REFRESH_RATE: u32 = 100;

/// barstats - system stats provider for a status bar
#[derive(Parser, Debug)]
#[command(name = "barstats")]
#[command(about = "Pushes periodic system stats to the bar", long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Collect every stat of every group
    #[arg(short, long)]
    pub all: bool,

    /// Battery stats to collect
    #[arg(short, long, num_args = 1.., value_enum)]
    pub battery: Option<Vec<BatteryStat>>,

    /// CPU stats to collect
    #[arg(short, long, num_args = 1.., value_enum)]
    pub cpu: Option<Vec<CpuStat>>,

    /// Disk stats to collect (aggregated over all disks)
    #[arg(short, long, num_args = 1.., value_enum)]
    pub disk: Option<Vec<DiskStat>>,

    /// Memory stats to collect
    #[arg(short, long, num_args = 1.., value_enum)]
    pub memory: Option<Vec<MemoryStat>>,

    /// Network rx/tx rates for the named interfaces (e.g. -n en0 lo0)
    #[arg(short, long, num_args = 1..)]
    pub network: Option<Vec<String>>,

    /// System identity stats to collect
    #[arg(short, long, num_args = 1.., value_enum)]
    pub system: Option<Vec<SystemStat>>,

    /// Uptime units to include, largest first
    #[arg(short, long, num_args = 0.., value_enum)]
    pub uptime: Option<Vec<UptimeUnit>>,

    /// Refresh interval in seconds
    #[arg(short, long, default_value_t = DEFAULT_INTERVAL)]
    pub interval: u32,

    /// How often to re-list network interfaces, in stat intervals
    #[arg(long, default_value_t = DEFAULT_NETWORK_REFRESH_RATE)]
    pub network_refresh_rate: u32,

    /// Bar instance to publish to (or set BARSTATS_BAR env var)
    #[arg(long, env = "BARSTATS_BAR", default_value = "sketchybar")]
    pub bar: String,

    /// Event name triggered on the bar with each sample
    #[arg(short, long, default_value = "system_stats")]
    pub event: String,

    /// Output values without units
    #[arg(long)]
    pub no_units: bool,

    /// Log level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatteryStat {
    Count,
    Percentage,
    State,
    TimeToEmpty,
    TimeToFull,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuStat {
    Count,
    Frequency,
    Temperature,
    Usage,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiskStat {
    Count,
    Free,
    Total,
    Usage,
    Used,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryStat {
    RamAvailable,
    RamTotal,
    RamUsage,
    RamUsed,
    SwapFree,
    SwapTotal,
    SwapUsage,
    SwapUsed,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SystemStat {
    Arch,
    Distro,
    HostName,
    KernelVersion,
    Name,
    OsVersion,
    LongOsVersion,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum UptimeUnit {
    Week,
    Day,
    Hour,
    Min,
    Sec,
}

impl Args {
    pub fn validate(&self) -> Result<()> {
        if self.interval < MIN_INTERVAL || self.interval > MAX_INTERVAL {
            bail!(
                "interval must be between {MIN_INTERVAL} and {MAX_INTERVAL} seconds, got {}",
                self.interval
            );
        }
        if self.network_refresh_rate < MIN_NETWORK_REFRESH_RATE
            || self.network_refresh_rate > MAX_NETWORK_REFRESH_RATE
        {
            bail!(
                "network refresh rate must be between {MIN_NETWORK_REFRESH_RATE} and \
                 {MAX_NETWORK_REFRESH_RATE}, got {}",
                self.network_refresh_rate
            );
        }
        if !self.all
            && self.battery.is_none()
            && self.cpu.is_none()
            && self.disk.is_none()
            && self.memory.is_none()
            && self.network.is_none()
            && self.system.is_none()
            && self.uptime.is_none()
        {
            bail!("at least one stat group must be requested, or use --all");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_flag_alone_is_valid() {
        let args = Args::parse_from(["barstats", "--all"]);
        assert!(args.validate().is_ok());
        assert_eq!(args.interval, DEFAULT_INTERVAL);
        assert_eq!(args.bar, "sketchybar");
    }

    #[test]
    fn single_group_is_valid() {
        let args = Args::parse_from(["barstats", "--cpu", "usage", "count"]);
        assert!(args.validate().is_ok());
        assert_eq!(args.cpu, Some(vec![CpuStat::Usage, CpuStat::Count]));
    }

    #[test]
    fn no_groups_is_rejected() {
        let args = Args::parse_from(["barstats", "--interval", "5"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn out_of_range_interval_is_rejected() {
        let args = Args::parse_from(["barstats", "--all", "--interval", "0"]);
        assert!(args.validate().is_err());
        let args = Args::parse_from(["barstats", "--all", "--interval", "3601"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn out_of_range_network_refresh_rate_is_rejected() {
        let args = Args::parse_from(["barstats", "--all", "--network-refresh-rate", "0"]);
        assert!(args.validate().is_err());
        let args = Args::parse_from(["barstats", "--all", "--network-refresh-rate", "101"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn network_takes_interface_names() {
        let args = Args::parse_from(["barstats", "--network", "en0", "lo0"]);
        assert!(args.validate().is_ok());
        assert_eq!(
            args.network,
            Some(vec!["en0".to_owned(), "lo0".to_owned()])
        );
    }

    #[test]
    fn network_requires_at_least_one_interface() {
        assert!(Args::try_parse_from(["barstats", "--network"]).is_err());
    }

    #[test]
    fn bare_uptime_flag_means_all_units() {
        let args = Args::parse_from(["barstats", "--uptime"]);
        assert_eq!(args.uptime, Some(vec![]));
        assert!(args.validate().is_ok());
    }
}
